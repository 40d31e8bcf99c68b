use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::aggregate::aggregator::{duplicate_currencies, CurrencyAggregate};
use crate::error::Result;
use crate::pricing::ComputedRow;
use crate::types::{PricingParameters, RateRow};

/// Payment-processor currency mapping: comment header, then `code: value` lines.
pub fn render_yaml(aggregate: &CurrencyAggregate) -> String {
    let meta = &aggregate.metadata;
    let mut lines = vec![
        format!("# Generated {}", meta.generated_at.format("%Y-%m-%d")),
        format!(
            "# USD price: {}, USD floor: {}",
            meta.params.usd_price, meta.params.usd_floor
        ),
        format!("# USD cap multiplier: {}x", meta.params.usd_cap_multiplier),
    ];
    if let Some(url) = meta.source_url.as_deref().filter(|u| !u.is_empty()) {
        lines.push(format!("# Source: {url}"));
    }
    for entry in &aggregate.entries {
        lines.push(format!("{}: {}", entry.code, entry.value));
    }
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

#[derive(Debug, Serialize)]
pub struct JsonExport<'a> {
    pub generated_at: String,
    pub usd_price: f64,
    pub usd_floor: f64,
    pub usd_cap_multiplier: f64,
    pub rows: &'a [ComputedRow],
}

impl<'a> JsonExport<'a> {
    pub fn new(
        rows: &'a [ComputedRow],
        params: &PricingParameters,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            generated_at: generated_at.to_rfc3339_opts(SecondsFormat::Millis, true),
            usd_price: params.usd_price,
            usd_floor: params.usd_floor,
            usd_cap_multiplier: params.usd_cap_multiplier,
            rows,
        }
    }

    /// Pretty-printed with a trailing newline.
    pub fn to_json_string(&self) -> Result<String> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }
}

/// Counts shown next to a row listing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RowSummary {
    pub total: usize,
    pub adjusted: usize,
    pub capped: usize,
    pub missing: usize,
    /// First non-empty exchange-rate date among the rows.
    pub exchange_rate_date: Option<String>,
    pub currencies: usize,
    pub duplicate_currencies: usize,
}

impl RowSummary {
    pub fn from_rows(rows: &[ComputedRow]) -> Self {
        Self::for_view(rows, rows.iter().map(|r| &r.rate))
    }

    /// Flag counts come from `view`; the exchange-rate date and currency
    /// figures come from `all`, so a search does not change them.
    pub fn for_view<'a, I>(view: &[ComputedRow], all: I) -> Self
    where
        I: IntoIterator<Item = &'a RateRow>,
    {
        let all: Vec<&RateRow> = all.into_iter().collect();
        let mut codes: Vec<String> = all
            .iter()
            .map(|r| r.currency_code.trim().to_lowercase())
            .filter(|c| !c.is_empty())
            .collect();
        codes.sort_unstable();
        codes.dedup();

        Self {
            total: view.len(),
            adjusted: view.iter().filter(|r| r.is_adjusted).count(),
            capped: view.iter().filter(|r| r.is_capped).count(),
            missing: view.iter().filter(|r| r.is_missing).count(),
            exchange_rate_date: all
                .iter()
                .filter_map(|r| r.exchange_rate_date.as_deref())
                .find(|d| !d.is_empty())
                .map(str::to_string),
            currencies: codes.len(),
            duplicate_currencies: duplicate_currencies(&all).len(),
        }
    }
}
