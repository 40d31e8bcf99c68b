use serde::{Serialize, Serializer};

use crate::pricing::number::round_to;
use crate::types::{PricingParameters, RateRow};

/// Fixed-point scale for rates: 1 scaled unit = 1/1000 of a local unit per USD-basket.
pub const SCALE: f64 = 1000.0;

/// Local prices are rounded to the nearest quarter unit.
pub const PRICE_INCREMENT: f64 = 0.25;

/// Derived price fields of a row that had valid inputs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PricePoint {
    pub ppp_scaled_raw: f64,
    /// `ceil(ppp_scaled_raw)`, never rounds down.
    pub ppp_scaled_rounded: i64,
    /// Smallest scaled rate whose local price is still worth `usd_floor`.
    pub min_ppp_scaled: i64,
    /// Largest scaled rate allowed by the cap multiplier.
    pub cap_ppp_scaled: i64,
    /// `max(ppp_scaled_rounded, min_ppp_scaled)`, before the cap.
    pub floor_adjusted_ppp_scaled: i64,
    /// `min(floor_adjusted_ppp_scaled, cap_ppp_scaled)`; the exported value.
    pub final_ppp_scaled: i64,
    pub adjustment_pct: Option<f64>,
    pub currency_price: f64,
    pub usd_equiv_raw: f64,
    pub usd_equiv_adjusted: f64,
}

impl PricePoint {
    pub fn adjusted_ppp_rate(&self) -> f64 {
        self.final_ppp_scaled as f64 / SCALE
    }

    pub fn is_adjusted(&self) -> bool {
        self.final_ppp_scaled != self.ppp_scaled_rounded
    }

    pub fn is_capped(&self) -> bool {
        self.final_ppp_scaled < self.floor_adjusted_ppp_scaled
    }
}

fn is_positive(v: Option<f64>) -> Option<f64> {
    v.filter(|x| x.is_finite() && *x > 0.0)
}

/// An already-rounded scaled value as `i64`; `None` when it does not fit.
fn to_scaled(v: f64) -> Option<i64> {
    // i64::MAX as f64 is 2^63, one past the largest representable value.
    (v.is_finite() && v >= i64::MIN as f64 && v < i64::MAX as f64).then_some(v as i64)
}

/// Apply the floor/cap policy to one PPP/FX pair.
///
/// Returns `None` when either rate or the USD price is absent, non-finite or
/// non-positive, or when a scaled value leaves the `i64` range. The floor is
/// applied first and the cap last, so a cap below the floor-implied minimum
/// wins.
pub fn compute_price(
    ppp_rate: Option<f64>,
    exchange_rate: Option<f64>,
    params: &PricingParameters,
) -> Option<PricePoint> {
    let ppp_rate = is_positive(ppp_rate)?;
    let exchange_rate = is_positive(exchange_rate)?;
    let usd_price = is_positive(Some(params.usd_price))?;

    let ppp_scaled_raw = ppp_rate * SCALE;
    let ppp_scaled_rounded = to_scaled(ppp_scaled_raw.ceil())?;
    let exch_scaled = exchange_rate * SCALE;

    let min_ppp_scaled = to_scaled((params.usd_floor * exch_scaled / usd_price).ceil())?;
    // usd_price cancels out of (cap * usd_price) * exch / usd_price.
    let cap_ppp_scaled = to_scaled((params.usd_cap_multiplier * exch_scaled).floor())?;

    let floor_adjusted_ppp_scaled = ppp_scaled_rounded.max(min_ppp_scaled);
    let final_ppp_scaled = floor_adjusted_ppp_scaled.min(cap_ppp_scaled);

    let adjustment_pct = (ppp_scaled_rounded > 0)
        .then(|| final_ppp_scaled as f64 / ppp_scaled_rounded as f64 - 1.0);

    Some(PricePoint {
        ppp_scaled_raw,
        ppp_scaled_rounded,
        min_ppp_scaled,
        cap_ppp_scaled,
        floor_adjusted_ppp_scaled,
        final_ppp_scaled,
        adjustment_pct,
        currency_price: round_to(usd_price * final_ppp_scaled as f64 / SCALE, PRICE_INCREMENT),
        usd_equiv_raw: usd_price * ppp_scaled_raw / exch_scaled,
        usd_equiv_adjusted: usd_price * final_ppp_scaled as f64 / exch_scaled,
    })
}

// ---------------------------------------------------------------------------
// ComputedRow
// ---------------------------------------------------------------------------

/// A merged row enriched with its price computation and status flags.
///
/// Serialises flat: the rate row's fields, the three flags, then every
/// derived field (all `null` when the row is missing data).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComputedRow {
    #[serde(flatten)]
    pub rate: RateRow,
    #[serde(rename = "isMissing")]
    pub is_missing: bool,
    #[serde(rename = "isAdjusted")]
    pub is_adjusted: bool,
    #[serde(rename = "isCapped")]
    pub is_capped: bool,
    #[serde(flatten, serialize_with = "serialize_price")]
    pub price: Option<PricePoint>,
}

impl ComputedRow {
    pub fn final_ppp_scaled(&self) -> Option<i64> {
        self.price.map(|p| p.final_ppp_scaled)
    }
}

/// Compute one row. Pure and total: bad inputs produce a missing row.
pub fn compute_row(row: &RateRow, params: &PricingParameters) -> ComputedRow {
    let price = compute_price(row.ppp_rate, row.exchange_rate, params);
    ComputedRow {
        rate: row.clone(),
        is_missing: price.is_none(),
        is_adjusted: price.is_some_and(|p| p.is_adjusted()),
        is_capped: price.is_some_and(|p| p.is_capped()),
        price,
    }
}

pub fn compute_rows(rows: &[RateRow], params: &PricingParameters) -> Vec<ComputedRow> {
    rows.iter().map(|row| compute_row(row, params)).collect()
}

#[derive(Serialize)]
struct NullablePrice {
    ppp_scaled_raw: Option<f64>,
    ppp_scaled_rounded: Option<i64>,
    min_ppp_scaled: Option<i64>,
    cap_ppp_scaled: Option<i64>,
    adjusted_ppp_scaled: Option<i64>,
    adjusted_ppp_rate: Option<f64>,
    adjustment_pct: Option<f64>,
    currency_price: Option<f64>,
    usd_equiv_raw: Option<f64>,
    usd_equiv_adjusted: Option<f64>,
}

impl From<Option<&PricePoint>> for NullablePrice {
    fn from(p: Option<&PricePoint>) -> Self {
        Self {
            ppp_scaled_raw: p.map(|p| p.ppp_scaled_raw),
            ppp_scaled_rounded: p.map(|p| p.ppp_scaled_rounded),
            min_ppp_scaled: p.map(|p| p.min_ppp_scaled),
            cap_ppp_scaled: p.map(|p| p.cap_ppp_scaled),
            adjusted_ppp_scaled: p.map(|p| p.final_ppp_scaled),
            adjusted_ppp_rate: p.map(PricePoint::adjusted_ppp_rate),
            adjustment_pct: p.and_then(|p| p.adjustment_pct),
            currency_price: p.map(|p| p.currency_price),
            usd_equiv_raw: p.map(|p| p.usd_equiv_raw),
            usd_equiv_adjusted: p.map(|p| p.usd_equiv_adjusted),
        }
    }
}

fn serialize_price<S: Serializer>(price: &Option<PricePoint>, s: S) -> Result<S::Ok, S::Error> {
    NullablePrice::from(price.as_ref()).serialize(s)
}
