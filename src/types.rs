use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::config::{DEFAULT_CAP_MULTIPLIER, DEFAULT_USD_FLOOR, DEFAULT_USD_PRICE};
use crate::error::AppError;
use crate::pricing::number::lenient_number;

// ---------------------------------------------------------------------------
// Reference data
// ---------------------------------------------------------------------------

/// One entry of the static country → currency mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountryRecord {
    pub country_name: String,
    #[serde(default)]
    pub iso2: String,
    #[serde(default)]
    pub iso3: String,
    /// 3-letter code, any case.
    #[serde(default)]
    pub currency_code: String,
}

// ---------------------------------------------------------------------------
// Upstream observations
// ---------------------------------------------------------------------------

/// A single PPP conversion factor reported for a country and year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PppObservation {
    /// iso2 (or aggregate region id) as reported by the source.
    pub country_id: String,
    pub country_iso3: Option<String>,
    pub year: Option<i32>,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeSource {
    OpenErApi,
    Ecb,
}

impl std::fmt::Display for ExchangeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExchangeSource::OpenErApi => "open_er_api",
            ExchangeSource::Ecb => "ecb",
        };
        write!(f, "{s}")
    }
}

impl FromStr for ExchangeSource {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "open_er_api" => Ok(ExchangeSource::OpenErApi),
            "ecb" => Ok(ExchangeSource::Ecb),
            other => Err(AppError::Config(format!("Unknown exchange source: {other}"))),
        }
    }
}

/// A full FX snapshot, normalised to a USD base (local units per one USD).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRates {
    pub date: Option<String>,
    /// Upper-case currency code → rate per USD.
    pub rates: BTreeMap<String, f64>,
    pub source: ExchangeSource,
}

/// The rate resolved for one currency, possibly through a fallback code.
#[derive(Debug, Clone, PartialEq)]
pub struct FxObservation {
    /// Code the rate was actually found under.
    pub code: String,
    pub rate: f64,
    pub date: Option<String>,
    pub source: ExchangeSource,
}

// ---------------------------------------------------------------------------
// Merged rows
// ---------------------------------------------------------------------------

/// A country joined with its latest PPP value and its exchange rate.
/// Missing matches stay `None` and are flagged later by the row computer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateRow {
    pub country_name: String,
    #[serde(default)]
    pub iso3: String,
    #[serde(default)]
    pub iso2: String,
    #[serde(default)]
    pub currency_code: String,
    #[serde(default, deserialize_with = "lenient_number")]
    pub ppp_rate: Option<f64>,
    #[serde(default)]
    pub ppp_year: Option<i32>,
    #[serde(default)]
    pub ppp_source: Option<String>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub exchange_rate: Option<f64>,
    #[serde(default)]
    pub exchange_rate_date: Option<String>,
    #[serde(default)]
    pub exchange_rate_source: Option<String>,
}

// ---------------------------------------------------------------------------
// Pricing parameters
// ---------------------------------------------------------------------------

/// Inputs of one pricing computation. Passed by value, never mutated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricingParameters {
    pub usd_price: f64,
    pub usd_floor: f64,
    pub usd_cap_multiplier: f64,
}

impl PricingParameters {
    pub fn new(usd_price: f64, usd_floor: f64, usd_cap_multiplier: f64) -> Self {
        Self {
            usd_price,
            usd_floor,
            usd_cap_multiplier,
        }
    }

    /// Checks the ranges a refresh run requires: price > 0, floor >= 0, cap >= 1.
    pub fn validate(&self) -> crate::error::Result<()> {
        if !self.usd_price.is_finite() || self.usd_price <= 0.0 {
            return Err(AppError::Config(format!(
                "USD price must be > 0, got {}",
                self.usd_price
            )));
        }
        if !self.usd_floor.is_finite() || self.usd_floor < 0.0 {
            return Err(AppError::Config(format!(
                "USD floor must be >= 0, got {}",
                self.usd_floor
            )));
        }
        if !self.usd_cap_multiplier.is_finite() || self.usd_cap_multiplier < 1.0 {
            return Err(AppError::Config(format!(
                "USD cap multiplier must be >= 1, got {}",
                self.usd_cap_multiplier
            )));
        }
        Ok(())
    }
}

impl Default for PricingParameters {
    fn default() -> Self {
        Self::new(DEFAULT_USD_PRICE, DEFAULT_USD_FLOOR, DEFAULT_CAP_MULTIPLIER)
    }
}
