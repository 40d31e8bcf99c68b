use std::fs;
use std::path::Path;

use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::config::Config;
use crate::error::{AppError, Result};
use crate::fetcher::{fetch_exchange_rates, fetch_world_bank, http_client};
use crate::merge::{merge, MergeSummary};
use crate::sorter::sort_canonical;
use crate::types::{CountryRecord, RateRow};

pub const RAW_PPP_FILE: &str = "world_bank_ppp.json";
pub const RAW_EXCHANGE_FILE: &str = "exchange_rates.json";

/// Reads the country mapping: a JSON array of records, or an object whose
/// values are records.
pub fn load_mapping(path: &Path) -> Result<Vec<CountryRecord>> {
    if !path.is_file() {
        return Err(AppError::Config(format!(
            "Mapping file not found: {}",
            path.display()
        )));
    }
    let value: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let records = match value {
        Value::Array(items) => items,
        Value::Object(map) => map.into_iter().map(|(_, v)| v).collect(),
        _ => {
            return Err(AppError::Config(format!(
                "Mapping must be an array or an object: {}",
                path.display()
            )))
        }
    };
    records
        .into_iter()
        .map(|r| serde_json::from_value(r).map_err(AppError::from))
        .collect()
}

/// Reads rate rows written by an earlier refresh.
pub fn load_rows(path: &Path) -> Result<Vec<RateRow>> {
    let mut rows: Vec<RateRow> = serde_json::from_str(&fs::read_to_string(path)?)?;
    sort_canonical(&mut rows);
    Ok(rows)
}

/// Pretty JSON with a trailing newline; parent directories are created.
pub fn write_json_pretty<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');
    write_string(path, &body)
}

pub fn write_string(path: &Path, body: &str) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, body)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Refresher
// ---------------------------------------------------------------------------

pub struct Refresher {
    cfg: Config,
    client: reqwest::Client,
}

impl Refresher {
    pub fn new(cfg: Config) -> Result<Self> {
        let client = http_client(cfg.fetch_timeout)?;
        Ok(Self { cfg, client })
    }

    /// Produces the rate rows for this run: freshly fetched, or reloaded from
    /// the previous output when `skip_refresh` is set.
    pub async fn run(&self) -> Result<Vec<RateRow>> {
        if self.cfg.skip_refresh {
            let rows = load_rows(&self.cfg.out_path)?;
            info!(
                rows = rows.len(),
                path = %self.cfg.out_path.display(),
                "Refresh skipped: loaded existing rate rows"
            );
            return Ok(rows);
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<Vec<RateRow>> {
        let countries = load_mapping(&self.cfg.mapping_path)?;
        let timeout = self.cfg.fetch_timeout;

        let (ppp, rates) = tokio::time::timeout(timeout, async {
            tokio::try_join!(
                fetch_world_bank(&self.client, &self.cfg.world_bank_url),
                fetch_exchange_rates(
                    &self.client,
                    self.cfg.exchange_source,
                    self.cfg.exchange_url()
                ),
            )
        })
        .await
        .map_err(|_| AppError::Timeout(timeout))??;

        if let Some(dir) = &self.cfg.raw_dir {
            write_json_pretty(&dir.join(RAW_PPP_FILE), &ppp.raw)?;
            write_json_pretty(&dir.join(RAW_EXCHANGE_FILE), &rates)?;
            info!(dir = %dir.display(), "Raw upstream payloads saved");
        }

        let output = merge(&countries, &ppp.observations, &rates);
        write_json_pretty(&self.cfg.out_path, &output.rows)?;

        log_summary(&output.summary, rates.date.as_deref(), &self.cfg.out_path);
        Ok(output.rows)
    }
}

fn log_summary(summary: &MergeSummary, exchange_date: Option<&str>, out_path: &Path) {
    info!(
        rows = summary.rows,
        path = %out_path.display(),
        "Wrote {} rows to {}",
        summary.rows,
        out_path.display(),
    );
    info!(
        missing_ppp = summary.missing_ppp,
        missing_exchange_rate = summary.missing_exchange_rate,
        missing_ppp_year = summary.missing_ppp_year,
        fallback_rates = summary.fallback_rates,
        "Missing PPP: {} | missing exchange rate: {} | missing PPP year: {}",
        summary.missing_ppp,
        summary.missing_exchange_rate,
        summary.missing_ppp_year,
    );
    match exchange_date {
        Some(date) => info!(exchange_rate_date = date, "Exchange rate date: {date}"),
        None => warn!("Exchange rate date unavailable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MAPPING: &str = r#"[
        {"country_name": "Japan", "iso2": "JP", "iso3": "JPN", "currency_code": "jpy"},
        {"country_name": "Germany", "iso2": "DE", "iso3": "DEU", "currency_code": "eur"},
        {"country_name": "Austria", "iso2": "AT", "iso3": "AUT", "currency_code": "eur"}
    ]"#;

    fn world_bank_body() -> Value {
        json!([
            {"page": 1},
            [
                {"country": {"id": "JP"}, "countryiso3code": "JPN", "date": "2023", "value": 95.0},
                {"country": {"id": "DE"}, "countryiso3code": "DEU", "date": "2023", "value": 0.74},
                {"country": {"id": "DE"}, "countryiso3code": "DEU", "date": "2022", "value": 0.71}
            ]
        ])
    }

    fn rates_body() -> Value {
        json!({
            "result": "success",
            "time_last_update_utc": "Tue, 13 Oct 2026 00:02:31 +0000",
            "rates": {"USD": 1.0, "JPY": 150.0, "EUR": 0.92}
        })
    }

    struct Fixture {
        dir: tempfile::TempDir,
        env: HashMap<String, String>,
    }

    impl Fixture {
        fn new(server: &MockServer) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let mapping = dir.path().join("currency_map.json");
            fs::write(&mapping, MAPPING).unwrap();
            let env = HashMap::from([
                ("PPP_MAPPING_PATH".to_string(), mapping.display().to_string()),
                ("PPP_OUT_PATH".to_string(), dir.path().join("out/ppp_rates.json").display().to_string()),
                ("WORLD_BANK_URL".to_string(), format!("{}/wb", server.uri())),
                ("OPEN_ER_API_URL".to_string(), format!("{}/fx", server.uri())),
            ]);
            Self { dir, env }
        }

        fn set(mut self, key: &str, value: impl Into<String>) -> Self {
            self.env.insert(key.to_string(), value.into());
            self
        }

        fn config(&self) -> Config {
            Config::from_lookup(|k| self.env.get(k).cloned()).unwrap()
        }

        fn out_path(&self) -> PathBuf {
            self.dir.path().join("out/ppp_rates.json")
        }
    }

    async fn mount(server: &MockServer, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn mapping_accepts_array_or_object() {
        let dir = tempfile::tempdir().unwrap();
        let array = dir.path().join("array.json");
        fs::write(&array, MAPPING).unwrap();
        assert_eq!(load_mapping(&array).unwrap().len(), 3);

        let object = dir.path().join("object.json");
        fs::write(
            &object,
            r#"{"JP": {"country_name": "Japan", "iso2": "JP", "iso3": "JPN", "currency_code": "jpy"}}"#,
        )
        .unwrap();
        let records = load_mapping(&object).unwrap();
        assert_eq!(records[0].currency_code, "jpy");

        let scalar = dir.path().join("scalar.json");
        fs::write(&scalar, "42").unwrap();
        assert!(matches!(load_mapping(&scalar), Err(AppError::Config(_))));
        assert!(matches!(
            load_mapping(&dir.path().join("absent.json")),
            Err(AppError::Config(_))
        ));
    }

    #[tokio::test]
    async fn refresh_writes_sorted_rows() {
        let server = MockServer::start().await;
        mount(&server, "/wb", ResponseTemplate::new(200).set_body_json(world_bank_body())).await;
        mount(&server, "/fx", ResponseTemplate::new(200).set_body_json(rates_body())).await;

        let fixture = Fixture::new(&server);
        let rows = Refresher::new(fixture.config()).unwrap().run().await.unwrap();

        let names: Vec<_> = rows.iter().map(|r| r.country_name.as_str()).collect();
        assert_eq!(names, ["Austria", "Germany", "Japan"]);
        assert_eq!(rows[0].ppp_rate, None);
        assert_eq!(rows[1].ppp_rate, Some(0.74));
        assert_eq!(rows[1].ppp_year, Some(2023));
        assert_eq!(rows[2].exchange_rate, Some(150.0));
        assert_eq!(rows[2].exchange_rate_date.as_deref(), Some("2026-10-13"));

        let written = fs::read_to_string(fixture.out_path()).unwrap();
        assert!(written.ends_with("]\n"));
        let reloaded = load_rows(&fixture.out_path()).unwrap();
        assert_eq!(reloaded, rows);
    }

    #[tokio::test]
    async fn raw_payloads_are_saved_when_requested() {
        let server = MockServer::start().await;
        mount(&server, "/wb", ResponseTemplate::new(200).set_body_json(world_bank_body())).await;
        mount(&server, "/fx", ResponseTemplate::new(200).set_body_json(rates_body())).await;

        let fixture = Fixture::new(&server);
        let raw_dir = fixture.dir.path().join("raw");
        let fixture = fixture.set("PPP_RAW_DIR", raw_dir.display().to_string());
        Refresher::new(fixture.config()).unwrap().run().await.unwrap();

        let wb: Value =
            serde_json::from_str(&fs::read_to_string(raw_dir.join(RAW_PPP_FILE)).unwrap()).unwrap();
        assert_eq!(wb, world_bank_body());
        let fx: Value =
            serde_json::from_str(&fs::read_to_string(raw_dir.join(RAW_EXCHANGE_FILE)).unwrap())
                .unwrap();
        assert_eq!(fx["source"], "open_er_api");
        assert_eq!(fx["date"], "2026-10-13");
    }

    #[tokio::test]
    async fn failed_fetch_writes_nothing() {
        let server = MockServer::start().await;
        mount(&server, "/wb", ResponseTemplate::new(200).set_body_json(world_bank_body())).await;
        mount(&server, "/fx", ResponseTemplate::new(500)).await;

        let fixture = Fixture::new(&server);
        let err = Refresher::new(fixture.config()).unwrap().run().await.unwrap_err();
        assert!(matches!(err, AppError::Fetch { .. }), "{err}");
        assert!(!fixture.out_path().exists());
    }

    #[tokio::test]
    async fn slow_upstream_times_out() {
        let server = MockServer::start().await;
        mount(
            &server,
            "/wb",
            ResponseTemplate::new(200)
                .set_body_json(world_bank_body())
                .set_delay(std::time::Duration::from_secs(3)),
        )
        .await;
        mount(&server, "/fx", ResponseTemplate::new(200).set_body_json(rates_body())).await;

        let fixture = Fixture::new(&server).set("FETCH_TIMEOUT_SECS", "1");
        let err = Refresher::new(fixture.config()).unwrap().run().await.unwrap_err();
        assert!(
            matches!(err, AppError::Timeout(_) | AppError::Http(_)),
            "{err}"
        );
        assert!(!fixture.out_path().exists());
    }

    #[tokio::test]
    async fn skip_refresh_reuses_previous_output() {
        let server = MockServer::start().await;
        let fixture = Fixture::new(&server).set("SKIP_REFRESH", "true");
        write_json_pretty(
            &fixture.out_path(),
            &json!([
                {"country_name": "Japan", "currency_code": "jpy", "ppp_rate": "95", "exchange_rate": 150},
                {"country_name": "Chile", "currency_code": "clp", "ppp_rate": null, "exchange_rate": ""}
            ]),
        )
        .unwrap();

        let rows = Refresher::new(fixture.config()).unwrap().run().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].country_name, "Chile");
        assert_eq!(rows[1].ppp_rate, Some(95.0));
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
