use std::collections::BTreeMap;
use std::sync::LazyLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::USER_AGENT;
use crate::error::{AppError, Result};
use crate::pricing::number::parse_number;
use crate::types::{ExchangeRates, ExchangeSource, PppObservation};

static ECB_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"time=['"]([^'"]+)['"]"#).expect("invalid regex"));
static ECB_CUBE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"<Cube\s+([^>]+?)/>").expect("invalid regex"));
static XML_ATTR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([a-zA-Z]+)=['"]([^'"]+)['"]"#).expect("invalid regex"));

/// Shared client for upstream sources. `timeout` bounds each single request.
pub fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()?)
}

async fn get_checked(client: &reqwest::Client, url: &str) -> Result<reqwest::Response> {
    let resp = client.get(url).send().await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(AppError::fetch(url, format!("status {status}")));
    }
    Ok(resp)
}

pub async fn fetch_json(client: &reqwest::Client, url: &str) -> Result<Value> {
    let body = get_checked(client, url).await?.text().await?;
    serde_json::from_str(&body).map_err(|e| AppError::fetch(url, format!("invalid JSON: {e}")))
}

pub async fn fetch_text(client: &reqwest::Client, url: &str) -> Result<String> {
    Ok(get_checked(client, url).await?.text().await?)
}

// ---------------------------------------------------------------------------
// World Bank PPP
// ---------------------------------------------------------------------------

/// PPP payload plus the raw response, kept for `PPP_RAW_DIR`.
#[derive(Debug, Clone)]
pub struct PppFetch {
    pub observations: Vec<PppObservation>,
    pub raw: Value,
}

pub async fn fetch_world_bank(client: &reqwest::Client, url: &str) -> Result<PppFetch> {
    let raw = fetch_json(client, url).await?;
    let observations = parse_world_bank(&raw);
    debug!(observations = observations.len(), "World Bank PPP fetched");
    Ok(PppFetch { observations, raw })
}

/// Parses the `[meta, records]` response. Unusable records are skipped; a
/// record with no year is kept with `year: None`.
pub fn parse_world_bank(payload: &Value) -> Vec<PppObservation> {
    let Some(records) = payload.get(1).and_then(Value::as_array) else {
        warn!("World Bank payload has no record page, treating it as empty");
        return Vec::new();
    };

    records
        .iter()
        .filter_map(|rec| {
            let country_id = rec
                .pointer("/country/id")
                .and_then(Value::as_str)
                .filter(|id| !id.is_empty())?;
            let value = parse_number(rec.get("value")?)?;
            let year = match rec.get("date") {
                None | Some(Value::Null) => None,
                Some(date) => Some(parse_year(date)?),
            };
            Some(PppObservation {
                country_id: country_id.to_string(),
                country_iso3: rec
                    .get("countryiso3code")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string),
                year,
                value,
            })
        })
        .collect()
}

fn parse_year(date: &Value) -> Option<i32> {
    let year = parse_number(date)?;
    (year.fract() == 0.0 && year.abs() < f64::from(i32::MAX)).then_some(year as i32)
}

// ---------------------------------------------------------------------------
// Exchange rates
// ---------------------------------------------------------------------------

pub async fn fetch_exchange_rates(
    client: &reqwest::Client,
    source: ExchangeSource,
    url: &str,
) -> Result<ExchangeRates> {
    let rates = match source {
        ExchangeSource::OpenErApi => parse_open_er_api(&fetch_json(client, url).await?)
            .map_err(|reason| AppError::fetch(url, reason))?,
        ExchangeSource::Ecb => parse_ecb(&fetch_text(client, url).await?)
            .map_err(|reason| AppError::fetch(url, reason))?,
    };
    debug!(source = %source, currencies = rates.rates.len(), "exchange rates fetched");
    Ok(rates)
}

/// USD-based JSON from open.er-api.com.
pub fn parse_open_er_api(payload: &Value) -> std::result::Result<ExchangeRates, String> {
    if payload.get("result").and_then(Value::as_str) != Some("success") {
        return Err("open.er-api.com returned an error".to_string());
    }
    let rates = payload
        .get("rates")
        .and_then(Value::as_object)
        .map(|map| {
            map.iter()
                .filter_map(|(code, rate)| Some((code.to_uppercase(), parse_number(rate)?)))
                .collect()
        })
        .unwrap_or_default();
    Ok(ExchangeRates {
        date: payload
            .get("time_last_update_utc")
            .and_then(Value::as_str)
            .and_then(normalize_date),
        rates,
        source: ExchangeSource::OpenErApi,
    })
}

/// `YYYY-MM-DD` (UTC) from an RFC 2822 or RFC 3339 timestamp.
pub fn normalize_date(input: &str) -> Option<String> {
    let input = input.trim();
    DateTime::parse_from_rfc2822(input)
        .or_else(|_| DateTime::parse_from_rfc3339(input))
        .ok()
        .map(|dt| dt.with_timezone(&Utc).format("%Y-%m-%d").to_string())
}

/// ECB daily reference rates, rebased from EUR to USD.
pub fn parse_ecb(xml: &str) -> std::result::Result<ExchangeRates, String> {
    let date = ECB_TIME.captures(xml).map(|c| c[1].to_string());

    let mut eur_based: BTreeMap<String, f64> = BTreeMap::new();
    for cube in ECB_CUBE.captures_iter(xml) {
        let mut currency = None;
        let mut rate = None;
        for attr in XML_ATTR.captures_iter(&cube[1]) {
            match &attr[1] {
                "currency" => currency = Some(attr[2].to_uppercase()),
                "rate" => rate = attr[2].trim().parse::<f64>().ok().filter(|r| r.is_finite()),
                _ => {}
            }
        }
        if let (Some(code), Some(rate)) = (currency, rate) {
            eur_based.insert(code, rate);
        }
    }

    let usd_per_eur = eur_based
        .get("USD")
        .copied()
        .filter(|r| *r > 0.0)
        .ok_or_else(|| "ECB USD rate missing".to_string())?;

    let mut rates: BTreeMap<String, f64> = eur_based
        .into_iter()
        .filter(|(code, _)| code != "USD")
        .map(|(code, rate)| (code, rate / usd_per_eur))
        .collect();
    rates.insert("USD".to_string(), 1.0);
    rates.insert("EUR".to_string(), 1.0 / usd_per_eur);

    Ok(ExchangeRates {
        date,
        rates,
        source: ExchangeSource::Ecb,
    })
}
