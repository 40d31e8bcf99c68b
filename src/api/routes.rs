use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::header,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::aggregate::{aggregate, render_yaml, AggregationPolicy, ExportMetadata, JsonExport, RowSummary};
use crate::api::health::get_health;
use crate::error::AppError;
use crate::format::format_price;
use crate::pricing::number::parse_number_str;
use crate::pricing::{compute_rows, ComputedRow};
use crate::sorter::{sort_by_key, SortKey};
use crate::types::{PricingParameters, RateRow};

#[derive(Clone)]
pub struct ApiState {
    /// Merged rows in canonical order. Never mutated after startup.
    pub rows: Arc<Vec<RateRow>>,
    pub defaults: PricingParameters,
    pub policy: AggregationPolicy,
    pub source_url: Option<String>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/rows", get(get_rows))
        .route("/summary", get(get_summary))
        .route("/export/yaml", get(get_export_yaml))
        .route("/export/json", get(get_export_json))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

/// Raw strings so unparsable values fall back instead of rejecting the request.
#[derive(Debug, Default, Deserialize)]
pub struct ViewQuery {
    pub price: Option<String>,
    pub floor: Option<String>,
    pub cap: Option<String>,
    pub search: Option<String>,
    pub sort: Option<String>,
}

impl ViewQuery {
    /// Each value falls back to its default when unparsable or out of range
    /// (price > 0, floor >= 0, cap >= 1).
    pub fn params(&self, defaults: &PricingParameters) -> PricingParameters {
        let pick = |raw: &Option<String>, default: f64, in_range: fn(f64) -> bool| {
            raw.as_deref()
                .and_then(parse_number_str)
                .filter(|v| in_range(*v))
                .unwrap_or(default)
        };
        PricingParameters::new(
            pick(&self.price, defaults.usd_price, |v| v > 0.0),
            pick(&self.floor, defaults.usd_floor, |v| v >= 0.0),
            pick(&self.cap, defaults.usd_cap_multiplier, |v| v >= 1.0),
        )
    }

    pub fn sort_key(&self) -> SortKey {
        self.sort
            .as_deref()
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or_default()
    }

    /// Case-insensitive substring match on name, currency and ISO codes.
    fn matches(&self, row: &RateRow) -> bool {
        let Some(term) = self
            .search
            .as_deref()
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
        else {
            return true;
        };
        [&row.country_name, &row.currency_code, &row.iso2, &row.iso3]
            .iter()
            .any(|field| field.to_lowercase().contains(&term))
    }

    fn computed_rows(&self, state: &ApiState) -> Vec<ComputedRow> {
        let filtered: Vec<RateRow> = state
            .rows
            .iter()
            .filter(|r| self.matches(r))
            .cloned()
            .collect();
        compute_rows(&filtered, &self.params(&state.defaults))
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct RowView {
    #[serde(flatten)]
    pub row: ComputedRow,
    /// Local price in display form, `-` for missing rows.
    pub formatted_price: String,
}

#[derive(Serialize)]
pub struct RowsResponse {
    pub params: PricingParameters,
    pub sort: String,
    pub summary: RowSummary,
    pub rows: Vec<RowView>,
}

fn sort_name(key: SortKey) -> &'static str {
    match key {
        SortKey::CountryName => "country_name",
        SortKey::CurrencyCode => "currency_code",
        SortKey::PppRate => "ppp_rate",
        SortKey::ExchangeRate => "exchange_rate",
        SortKey::AdjustedPppRate => "adjusted_ppp_rate",
        SortKey::AdjustmentPct => "adjustment_pct",
        SortKey::CurrencyPrice => "currency_price",
        SortKey::UsdEquivAdjusted => "usd_equiv_adjusted",
        SortKey::PppYear => "ppp_year",
        SortKey::PppSource => "ppp_source",
        SortKey::ExchangeRateDate => "exchange_rate_date",
        SortKey::ExchangeRateSource => "exchange_rate_source",
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

pub async fn get_rows(
    State(state): State<ApiState>,
    Query(query): Query<ViewQuery>,
) -> Result<Json<RowsResponse>, AppError> {
    let key = query.sort_key();
    let mut rows = query.computed_rows(&state);
    let summary = RowSummary::for_view(&rows, state.rows.iter());
    sort_by_key(&mut rows, key);

    let rows = rows
        .into_iter()
        .map(|row| {
            let formatted_price = format_price(
                row.price.map(|p| p.currency_price),
                Some(row.rate.currency_code.as_str()),
            );
            RowView {
                row,
                formatted_price,
            }
        })
        .collect();

    Ok(Json(RowsResponse {
        params: query.params(&state.defaults),
        sort: sort_name(key).to_string(),
        summary,
        rows,
    }))
}

pub async fn get_summary(
    State(state): State<ApiState>,
    Query(query): Query<ViewQuery>,
) -> Json<RowSummary> {
    Json(RowSummary::for_view(
        &query.computed_rows(&state),
        state.rows.iter(),
    ))
}

pub async fn get_export_yaml(
    State(state): State<ApiState>,
    Query(query): Query<ViewQuery>,
) -> impl IntoResponse {
    let params = query.params(&state.defaults);
    let computed = compute_rows(&state.rows, &params);
    let agg = aggregate(
        &computed,
        state.policy,
        ExportMetadata {
            generated_at: Utc::now(),
            params,
            source_url: state.source_url.clone(),
        },
    );
    (
        [(header::CONTENT_TYPE, "text/yaml; charset=utf-8")],
        render_yaml(&agg),
    )
}

pub async fn get_export_json(
    State(state): State<ApiState>,
    Query(query): Query<ViewQuery>,
) -> Result<impl IntoResponse, AppError> {
    let params = query.params(&state.defaults);
    let computed = compute_rows(&state.rows, &params);
    let body = JsonExport::new(&computed, &params, Utc::now()).to_json_string()?;
    Ok(([(header::CONTENT_TYPE, "application/json")], body))
}
