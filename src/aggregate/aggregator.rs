use std::collections::BTreeMap;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::pricing::ComputedRow;
use crate::sorter::{sort_canonical, CountryKeyed};
use crate::types::PricingParameters;

/// The reference currency always exports exactly the USD price.
pub const USD_CODE: &str = "usd";
pub const USD_PINNED_VALUE: i64 = 1000;

/// How several countries sharing one currency collapse to one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregationPolicy {
    /// Median of every country's scaled value; even counts average the middle pair.
    #[default]
    Median,
    /// First country in canonical (currency, country name) order.
    FirstWins,
}

impl std::fmt::Display for AggregationPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AggregationPolicy::Median => write!(f, "median"),
            AggregationPolicy::FirstWins => write!(f, "first_wins"),
        }
    }
}

impl FromStr for AggregationPolicy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "median" => Ok(AggregationPolicy::Median),
            "first_wins" | "first" => Ok(AggregationPolicy::FirstWins),
            other => Err(AppError::Config(format!("Unknown aggregation policy: {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportMetadata {
    pub generated_at: DateTime<Utc>,
    pub params: PricingParameters,
    pub source_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CurrencyValue {
    /// Lower-case currency code.
    pub code: String,
    /// Scaled units (1000 = the USD price).
    pub value: i64,
}

/// One export value per currency, ordered by code.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrencyAggregate {
    pub metadata: ExportMetadata,
    pub policy: AggregationPolicy,
    pub entries: Vec<CurrencyValue>,
}

#[cfg(test)]
impl CurrencyAggregate {
    pub fn get(&self, code: &str) -> Option<i64> {
        let code = code.to_lowercase();
        self.entries
            .iter()
            .find(|e| e.code == code)
            .map(|e| e.value)
    }
}

/// Median of scaled values; the mean of the middle pair is rounded half up.
pub fn median(values: &mut [i64]) -> Option<i64> {
    if values.is_empty() {
        return None;
    }
    values.sort_unstable();
    let mid = values.len() / 2;
    if values.len() % 2 == 1 {
        Some(values[mid])
    } else {
        // Sum in i128 so two values near i64::MAX cannot overflow.
        let sum = i128::from(values[mid - 1]) + i128::from(values[mid]);
        i64::try_from((sum + 1).div_euclid(2)).ok()
    }
}

/// Reduce computed rows to one value per currency.
///
/// Missing rows and rows without a currency code are ignored. Input order
/// does not affect the result.
pub fn aggregate(
    rows: &[ComputedRow],
    policy: AggregationPolicy,
    metadata: ExportMetadata,
) -> CurrencyAggregate {
    let mut ordered: Vec<&ComputedRow> = rows
        .iter()
        .filter(|r| !r.is_missing && !r.rate.currency_code.trim().is_empty())
        .collect();
    sort_canonical(&mut ordered);

    let mut grouped: BTreeMap<String, Vec<i64>> = BTreeMap::new();
    for row in ordered {
        if let Some(value) = row.final_ppp_scaled() {
            grouped
                .entry(row.rate.currency_code.trim().to_lowercase())
                .or_default()
                .push(value);
        }
    }

    let entries = grouped
        .into_iter()
        .filter_map(|(code, mut values)| {
            let value = if code == USD_CODE {
                USD_PINNED_VALUE
            } else {
                match policy {
                    AggregationPolicy::Median => median(&mut values)?,
                    AggregationPolicy::FirstWins => *values.first()?,
                }
            };
            Some(CurrencyValue { code, value })
        })
        .collect();

    CurrencyAggregate {
        metadata,
        policy,
        entries,
    }
}

/// Lower-cased currency codes carried by more than one row.
pub fn duplicate_currencies<T: CountryKeyed>(rows: &[T]) -> Vec<String> {
    let mut counts: BTreeMap<String, usize> = BTreeMap::new();
    for row in rows {
        let code = row.currency_code().trim();
        if !code.is_empty() {
            *counts.entry(code.to_lowercase()).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(code, _)| code)
        .collect()
}
