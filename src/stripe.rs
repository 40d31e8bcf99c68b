use std::collections::BTreeSet;
use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::config::{StripeConfig, STRIPE_COUNTRY_SPECS_URL, STRIPE_PAGE_LIMIT};
use crate::error::{AppError, Result};
use crate::refresh::write_json_pretty;
use crate::types::CountryRecord;

pub const STRIPE_COUNTRY: &str = "US";

/// The parts of a Stripe country spec the comparison needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountrySpecSummary {
    pub id: Option<String>,
    pub default_currency: Option<String>,
    #[serde(default)]
    pub supported_payment_currencies: Vec<String>,
}

impl CountrySpecSummary {
    pub fn from_spec(spec: &Value) -> Self {
        let text = |key: &str| spec.get(key).and_then(Value::as_str).map(str::to_string);
        Self {
            id: text("id"),
            default_currency: text("default_currency"),
            supported_payment_currencies: spec
                .get("supported_payment_currencies")
                .and_then(Value::as_array)
                .map(|a| a.iter().filter_map(|c| c.as_str().map(str::to_string)).collect())
                .unwrap_or_default(),
        }
    }
}

/// Accepts a bare array or a list response (`{"data": [...]}`).
pub fn normalize_specs(raw: Value) -> Result<Vec<Value>> {
    match raw {
        Value::Array(items) => Ok(items),
        Value::Object(mut map) => match map.remove("data") {
            Some(Value::Array(items)) => Ok(items),
            _ => Err(AppError::Config(
                "Stripe data must be an array or a list response with data[]".to_string(),
            )),
        },
        _ => Err(AppError::Config(
            "Stripe data must be an array or a list response with data[]".to_string(),
        )),
    }
}

pub fn load_specs(path: &Path) -> Result<Vec<Value>> {
    if !path.is_file() {
        return Err(AppError::Config(format!(
            "Stripe data not found: {}",
            path.display()
        )));
    }
    normalize_specs(serde_json::from_str(&std::fs::read_to_string(path)?)?)
}

#[derive(Debug, Deserialize)]
struct ListPage {
    data: Vec<Value>,
    #[serde(default)]
    has_more: bool,
}

/// Walks every page of the country-specs list endpoint.
pub async fn fetch_specs(client: &reqwest::Client, url: &str, api_key: &str) -> Result<Vec<Value>> {
    let mut specs = Vec::new();
    let mut starting_after: Option<String> = None;

    loop {
        let mut query = vec![("limit", STRIPE_PAGE_LIMIT.to_string())];
        if let Some(id) = &starting_after {
            query.push(("starting_after", id.clone()));
        }
        let resp = client
            .get(url)
            .bearer_auth(api_key)
            .query(&query)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(AppError::fetch(url, format!("Stripe API error: {status}")));
        }
        let page: ListPage = serde_json::from_str(&resp.text().await?)
            .map_err(|e| AppError::fetch(url, format!("Unexpected Stripe API response: {e}")))?;

        let next = page
            .data
            .last()
            .and_then(|s| s.get("id"))
            .and_then(Value::as_str)
            .map(str::to_string);
        debug!(page = page.data.len(), has_more = page.has_more, "Stripe country specs page");
        specs.extend(page.data);

        match next {
            Some(id) if page.has_more => starting_after = Some(id),
            _ => break,
        }
    }
    Ok(specs)
}

pub fn find_us(specs: &[Value]) -> Result<&Value> {
    specs
        .iter()
        .find(|s| {
            s.get("id")
                .and_then(Value::as_str)
                .is_some_and(|id| id.eq_ignore_ascii_case(STRIPE_COUNTRY))
        })
        .ok_or_else(|| AppError::fetch(STRIPE_COUNTRY_SPECS_URL, "Stripe data missing US country specs"))
}

#[derive(Debug, Serialize)]
struct StripeOutput<'a, T: Serialize> {
    generated_at: String,
    source: &'static str,
    source_url: &'static str,
    data: &'a [T],
}

/// Saves the US spec, minimised unless `full` is set.
pub fn save_spec(path: &Path, spec: &Value, full: bool) -> Result<()> {
    let generated_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    if full {
        write_json_pretty(
            path,
            &StripeOutput {
                generated_at,
                source: "stripe_country_specs",
                source_url: STRIPE_COUNTRY_SPECS_URL,
                data: std::slice::from_ref(spec),
            },
        )
    } else {
        write_json_pretty(
            path,
            &StripeOutput {
                generated_at,
                source: "stripe_country_specs",
                source_url: STRIPE_COUNTRY_SPECS_URL,
                data: &[CountrySpecSummary::from_spec(spec)],
            },
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrencyComparison {
    pub stripe_currencies: usize,
    pub mapping_currencies: usize,
    /// Supported by Stripe, absent from the mapping.
    pub missing: Vec<String>,
    /// In the mapping, not supported by Stripe.
    pub extra: Vec<String>,
}

pub fn compare(mapping: &[CountryRecord], spec: &CountrySpecSummary) -> CurrencyComparison {
    let ours: BTreeSet<String> = mapping
        .iter()
        .map(|r| r.currency_code.trim().to_lowercase())
        .filter(|c| !c.is_empty())
        .collect();
    let theirs: BTreeSet<String> = spec
        .supported_payment_currencies
        .iter()
        .map(|c| c.to_lowercase())
        .collect();

    CurrencyComparison {
        stripe_currencies: theirs.len(),
        mapping_currencies: ours.len(),
        missing: theirs.difference(&ours).cloned().collect(),
        extra: ours.difference(&theirs).cloned().collect(),
    }
}

/// Loads or fetches the specs, optionally saves the US one, and logs the comparison.
pub async fn run(
    cfg: &StripeConfig,
    client: &reqwest::Client,
    mapping: &[CountryRecord],
) -> Result<CurrencyComparison> {
    let specs = match (&cfg.specs_path, &cfg.api_key) {
        (Some(path), _) => load_specs(path)?,
        (None, Some(key)) => fetch_specs(client, &cfg.api_url, key).await?,
        (None, None) => {
            return Err(AppError::Config(
                "Set STRIPE_SPECS_PATH or STRIPE_API_KEY".to_string(),
            ))
        }
    };
    let us = find_us(&specs)?;

    if let Some(path) = &cfg.out_path {
        save_spec(path, us, cfg.save_full)?;
        info!(path = %path.display(), full = cfg.save_full, "Stripe US country spec saved");
    }

    let comparison = compare(mapping, &CountrySpecSummary::from_spec(us));
    info!(
        stripe_currencies = comparison.stripe_currencies,
        mapping_currencies = comparison.mapping_currencies,
        "Stripe currencies (US): {} | mapping currencies: {}",
        comparison.stripe_currencies,
        comparison.mapping_currencies,
    );
    if comparison.missing.is_empty() {
        info!("Missing currencies: none");
    } else {
        info!(
            "Missing currencies ({}): {}",
            comparison.missing.len(),
            comparison.missing.join(", ")
        );
    }
    if !comparison.extra.is_empty() {
        info!(
            "Extra currencies in mapping ({}): {}",
            comparison.extra.len(),
            comparison.extra.join(", ")
        );
    }
    Ok(comparison)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;
    use wiremock::matchers::{header, method, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record(code: &str) -> CountryRecord {
        CountryRecord {
            country_name: code.to_string(),
            iso2: String::new(),
            iso3: String::new(),
            currency_code: code.to_string(),
        }
    }

    fn us_spec() -> Value {
        json!({
            "id": "US",
            "default_currency": "usd",
            "supported_payment_currencies": ["usd", "EUR", "jpy", "aed"],
            "verification_fields": {"individual": {"minimum": []}}
        })
    }

    #[test]
    fn specs_accept_array_or_list_response() {
        assert_eq!(normalize_specs(json!([us_spec()])).unwrap().len(), 1);
        assert_eq!(
            normalize_specs(json!({"object": "list", "data": [us_spec()]})).unwrap().len(),
            1
        );
        assert!(normalize_specs(json!({"object": "list"})).is_err());
        assert!(normalize_specs(json!("US")).is_err());
    }

    #[test]
    fn us_spec_is_required() {
        let specs = vec![json!({"id": "DE"}), json!({"id": "us"})];
        assert_eq!(find_us(&specs).unwrap()["id"], "us");
        let err = find_us(&specs[..1]).unwrap_err();
        assert!(matches!(err, AppError::Fetch { .. }));
    }

    #[test]
    fn comparison_lists_missing_and_extra_sorted() {
        let mapping = [record("USD"), record("eur"), record("eur"), record("xof"), record("")];
        let cmp = compare(&mapping, &CountrySpecSummary::from_spec(&us_spec()));
        assert_eq!(cmp.stripe_currencies, 4);
        assert_eq!(cmp.mapping_currencies, 3);
        assert_eq!(cmp.missing, ["aed", "jpy"]);
        assert_eq!(cmp.extra, ["xof"]);
    }

    #[test]
    fn saved_spec_is_minimised_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stripe/us.json");
        save_spec(&path, &us_spec(), false).unwrap();
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["source"], "stripe_country_specs");
        assert_eq!(saved["data"][0]["default_currency"], "usd");
        assert!(saved["data"][0].get("verification_fields").is_none());

        save_spec(&path, &us_spec(), true).unwrap();
        let saved: Value = serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert!(saved["data"][0].get("verification_fields").is_some());
    }

    #[tokio::test]
    async fn fetch_follows_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(query_param("starting_after", "DE"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [us_spec()],
                "has_more": false
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(header("authorization", "Bearer sk_test_123"))
            .and(query_param("limit", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{"id": "AT"}, {"id": "DE"}],
                "has_more": true
            })))
            .up_to_n_times(1)
            .mount(&server)
            .await;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        let specs = fetch_specs(&client, &server.uri(), "sk_test_123").await.unwrap();
        assert_eq!(specs.len(), 3);
        assert_eq!(find_us(&specs).unwrap()["default_currency"], "usd");
    }

    #[tokio::test]
    async fn stripe_error_status_is_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        let client = reqwest::Client::new();
        let err = fetch_specs(&client, &server.uri(), "bad").await.unwrap_err();
        assert!(err.to_string().contains("Stripe API error"));
    }
}
