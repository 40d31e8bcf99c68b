use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::aggregate::AggregationPolicy;
use crate::error::{AppError, Result};
use crate::types::{ExchangeSource, PricingParameters};

pub const WORLD_BANK_URL: &str =
    "https://api.worldbank.org/v2/country/all/indicator/PA.NUS.PPP?format=json&per_page=20000";
pub const ECB_URL: &str = "https://www.ecb.europa.eu/stats/eurofxref/eurofxref-daily.xml";
pub const OPEN_ER_API_URL: &str = "https://open.er-api.com/v6/latest/USD";
pub const STRIPE_COUNTRY_SPECS_URL: &str = "https://api.stripe.com/v1/country_specs";

/// Sent with every upstream request.
pub const USER_AGENT: &str = "ppp-pricing-refresh/1.0";

pub const DEFAULT_USD_PRICE: f64 = 20.0;
pub const DEFAULT_USD_FLOOR: f64 = 5.0;
pub const DEFAULT_CAP_MULTIPLIER: f64 = 1.5;

/// Whole-refresh fetch timeout (seconds).
pub const DEFAULT_FETCH_TIMEOUT_SECS: u64 = 30;

/// Stripe list endpoints return at most 100 objects per page.
pub const STRIPE_PAGE_LIMIT: usize = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    /// Country → currency mapping (PPP_MAPPING_PATH). Must exist.
    pub mapping_path: PathBuf,
    /// Merged rate rows (PPP_OUT_PATH).
    pub out_path: PathBuf,
    /// Raw upstream payloads are saved here when set (PPP_RAW_DIR).
    pub raw_dir: Option<PathBuf>,
    pub exchange_source: ExchangeSource,
    pub world_bank_url: String,
    pub ecb_url: String,
    pub open_er_api_url: String,
    pub fetch_timeout: Duration,
    /// Reuse `out_path` instead of fetching (SKIP_REFRESH).
    pub skip_refresh: bool,
    pub pricing: PricingParameters,
    pub aggregation_policy: AggregationPolicy,
    pub export_yaml_path: Option<PathBuf>,
    pub export_json_path: Option<PathBuf>,
    /// Provenance line written into the YAML export (SOURCE_URL).
    pub source_url: Option<String>,
    /// Serve the HTTP API after the refresh when set (API_PORT).
    pub api_port: Option<u16>,
    pub stripe: StripeConfig,
}

#[derive(Debug, Clone, Default)]
pub struct StripeConfig {
    pub api_key: Option<String>,
    pub specs_path: Option<PathBuf>,
    pub out_path: Option<PathBuf>,
    pub save_full: bool,
    pub api_url: String,
}

impl StripeConfig {
    pub fn enabled(&self) -> bool {
        self.api_key.is_some() || self.specs_path.is_some()
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds a config from any key lookup; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let pricing = PricingParameters::new(
            parse_var(&var, "USD_PRICE")?.unwrap_or(DEFAULT_USD_PRICE),
            parse_var(&var, "USD_FLOOR")?.unwrap_or(DEFAULT_USD_FLOOR),
            parse_var(&var, "USD_CAP_MULTIPLIER")?.unwrap_or(DEFAULT_CAP_MULTIPLIER),
        );
        pricing.validate()?;

        let mapping_path = PathBuf::from(
            var("PPP_MAPPING_PATH").unwrap_or_else(|| "docs/data/currency_map.json".to_string()),
        );
        if !mapping_path.is_file() {
            return Err(AppError::Config(format!(
                "Mapping file not found: {}",
                mapping_path.display()
            )));
        }

        let exchange_source = match var("EXCHANGE_SOURCE") {
            Some(s) => s.parse::<ExchangeSource>()?,
            None => ExchangeSource::OpenErApi,
        };
        let aggregation_policy = match var("AGGREGATION_POLICY") {
            Some(s) => s.parse::<AggregationPolicy>()?,
            None => AggregationPolicy::default(),
        };

        Ok(Self {
            log_level: var("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            mapping_path,
            out_path: PathBuf::from(
                var("PPP_OUT_PATH").unwrap_or_else(|| "docs/data/ppp_rates.json".to_string()),
            ),
            raw_dir: var("PPP_RAW_DIR").map(PathBuf::from),
            exchange_source,
            world_bank_url: var("WORLD_BANK_URL").unwrap_or_else(|| WORLD_BANK_URL.to_string()),
            ecb_url: var("ECB_URL").unwrap_or_else(|| ECB_URL.to_string()),
            open_er_api_url: var("OPEN_ER_API_URL")
                .unwrap_or_else(|| OPEN_ER_API_URL.to_string()),
            fetch_timeout: Duration::from_secs(
                parse_var(&var, "FETCH_TIMEOUT_SECS")?.unwrap_or(DEFAULT_FETCH_TIMEOUT_SECS),
            ),
            skip_refresh: parse_flag(&var, "SKIP_REFRESH")?,
            pricing,
            aggregation_policy,
            export_yaml_path: Some(PathBuf::from(
                var("EXPORT_YAML_PATH").unwrap_or_else(|| "docs/data/currency_ppp.yml".to_string()),
            )),
            export_json_path: var("EXPORT_JSON_PATH").map(PathBuf::from),
            source_url: var("SOURCE_URL"),
            api_port: parse_var(&var, "API_PORT")?,
            stripe: StripeConfig {
                api_key: var("STRIPE_API_KEY"),
                specs_path: var("STRIPE_SPECS_PATH").map(PathBuf::from),
                out_path: var("STRIPE_OUT_PATH").map(PathBuf::from),
                save_full: parse_flag(&var, "STRIPE_FULL")?,
                api_url: var("STRIPE_API_URL")
                    .unwrap_or_else(|| STRIPE_COUNTRY_SPECS_URL.to_string()),
            },
        })
    }

    /// The upstream URL for the configured exchange-rate source.
    pub fn exchange_url(&self) -> &str {
        match self.exchange_source {
            ExchangeSource::OpenErApi => &self.open_er_api_url,
            ExchangeSource::Ecb => &self.ecb_url,
        }
    }
}

fn parse_var<T, F>(var: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    var(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|_| AppError::Config(format!("{key} must be a valid number, got {raw:?}")))
        })
        .transpose()
}

fn parse_flag<F>(var: &F, key: &str) -> Result<bool>
where
    F: Fn(&str) -> Option<String>,
{
    match var(key).map(|v| v.to_lowercase()).as_deref() {
        None | Some("0" | "false" | "no" | "off") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some(other) => Err(AppError::Config(format!("{key} must be a boolean, got {other:?}"))),
    }
}
