use std::cmp::Ordering;
use std::str::FromStr;

use crate::pricing::ComputedRow;
use crate::types::{CountryRecord, RateRow};

/// Rows that take part in the canonical (currency, country) ordering.
pub trait CountryKeyed {
    fn currency_code(&self) -> &str;
    fn country_name(&self) -> &str;
    fn iso3(&self) -> &str;
}

impl CountryKeyed for CountryRecord {
    fn currency_code(&self) -> &str {
        &self.currency_code
    }
    fn country_name(&self) -> &str {
        &self.country_name
    }
    fn iso3(&self) -> &str {
        &self.iso3
    }
}

impl CountryKeyed for RateRow {
    fn currency_code(&self) -> &str {
        &self.currency_code
    }
    fn country_name(&self) -> &str {
        &self.country_name
    }
    fn iso3(&self) -> &str {
        &self.iso3
    }
}

impl CountryKeyed for ComputedRow {
    fn currency_code(&self) -> &str {
        &self.rate.currency_code
    }
    fn country_name(&self) -> &str {
        &self.rate.country_name
    }
    fn iso3(&self) -> &str {
        &self.rate.iso3
    }
}

impl<T: CountryKeyed> CountryKeyed for &T {
    fn currency_code(&self) -> &str {
        (**self).currency_code()
    }
    fn country_name(&self) -> &str {
        (**self).country_name()
    }
    fn iso3(&self) -> &str {
        (**self).iso3()
    }
}

/// Currency code case-insensitively, then country name ordinally.
///
/// Raw currency code and iso3 break any remaining tie so the order is total
/// and independent of input order.
pub fn canonical_cmp<T: CountryKeyed>(a: &T, b: &T) -> Ordering {
    cmp_ignore_case(a.currency_code(), b.currency_code())
        .then_with(|| a.country_name().cmp(b.country_name()))
        .then_with(|| a.currency_code().cmp(b.currency_code()))
        .then_with(|| a.iso3().cmp(b.iso3()))
}

pub fn sort_canonical<T: CountryKeyed>(rows: &mut [T]) {
    rows.sort_by(canonical_cmp);
}

fn cmp_ignore_case(a: &str, b: &str) -> Ordering {
    a.chars()
        .flat_map(char::to_lowercase)
        .cmp(b.chars().flat_map(char::to_lowercase))
}

// ---------------------------------------------------------------------------
// Display sort
// ---------------------------------------------------------------------------

/// Columns a computed-row listing can be sorted by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortKey {
    CountryName,
    #[default]
    CurrencyCode,
    PppRate,
    ExchangeRate,
    AdjustedPppRate,
    AdjustmentPct,
    CurrencyPrice,
    UsdEquivAdjusted,
    PppYear,
    PppSource,
    ExchangeRateDate,
    ExchangeRateSource,
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let key = match s {
            "country_name" => SortKey::CountryName,
            "currency_code" => SortKey::CurrencyCode,
            "ppp_rate" => SortKey::PppRate,
            "exchange_rate" => SortKey::ExchangeRate,
            "adjusted_ppp_rate" => SortKey::AdjustedPppRate,
            "adjustment_pct" => SortKey::AdjustmentPct,
            "currency_price" => SortKey::CurrencyPrice,
            "usd_equiv_adjusted" => SortKey::UsdEquivAdjusted,
            "ppp_year" => SortKey::PppYear,
            "ppp_source" => SortKey::PppSource,
            "exchange_rate_date" => SortKey::ExchangeRateDate,
            "exchange_rate_source" => SortKey::ExchangeRateSource,
            other => return Err(format!("unknown sort key: {other}")),
        };
        Ok(key)
    }
}

enum SortValue<'a> {
    Num(f64),
    Text(&'a str),
}

fn num(v: Option<f64>) -> Option<SortValue<'static>> {
    v.filter(|x| !x.is_nan()).map(SortValue::Num)
}

fn text(v: Option<&str>) -> Option<SortValue<'_>> {
    v.filter(|s| !s.is_empty()).map(SortValue::Text)
}

fn sort_value(row: &ComputedRow, key: SortKey) -> Option<SortValue<'_>> {
    match key {
        SortKey::CountryName => text(Some(row.rate.country_name.as_str())),
        SortKey::CurrencyCode => text(Some(row.rate.currency_code.as_str())),
        SortKey::PppRate => num(row.rate.ppp_rate),
        SortKey::ExchangeRate => num(row.rate.exchange_rate),
        SortKey::AdjustedPppRate => num(row.price.map(|p| p.adjusted_ppp_rate())),
        SortKey::AdjustmentPct => num(row.price.and_then(|p| p.adjustment_pct)),
        SortKey::CurrencyPrice => num(row.price.map(|p| p.currency_price)),
        SortKey::UsdEquivAdjusted => num(row.price.map(|p| p.usd_equiv_adjusted)),
        SortKey::PppYear => num(row.rate.ppp_year.map(f64::from)),
        SortKey::PppSource => text(row.rate.ppp_source.as_deref()),
        SortKey::ExchangeRateDate => text(row.rate.exchange_rate_date.as_deref()),
        SortKey::ExchangeRateSource => text(row.rate.exchange_rate_source.as_deref()),
    }
}

/// Missing values last, numbers descending, text ascending ignoring case.
pub fn sort_by_key(rows: &mut [ComputedRow], key: SortKey) {
    rows.sort_by(|a, b| {
        let primary = match (sort_value(a, key), sort_value(b, key)) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Greater,
            (Some(_), None) => Ordering::Less,
            (Some(SortValue::Num(x)), Some(SortValue::Num(y))) => y.total_cmp(&x),
            (Some(SortValue::Text(x)), Some(SortValue::Text(y))) => cmp_ignore_case(x, y),
            // A key always yields one kind of value.
            _ => Ordering::Equal,
        };
        primary.then_with(|| canonical_cmp(a, b))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::computer::compute_row;
    use crate::types::PricingParameters;

    fn row(name: &str, code: &str, ppp: Option<f64>) -> RateRow {
        RateRow {
            country_name: name.to_string(),
            iso3: name.chars().take(3).collect::<String>().to_uppercase(),
            iso2: String::new(),
            currency_code: code.to_string(),
            ppp_rate: ppp,
            ppp_year: None,
            ppp_source: None,
            exchange_rate: Some(1.0),
            exchange_rate_date: None,
            exchange_rate_source: None,
        }
    }

    fn names<T: CountryKeyed>(rows: &[T]) -> Vec<&str> {
        rows.iter().map(|r| r.country_name()).collect()
    }

    #[test]
    fn currency_then_country() {
        let mut rows = vec![
            row("Germany", "eur", None),
            row("Austria", "EUR", None),
            row("Canada", "cad", None),
            row("Aruba", "awg", None),
        ];
        sort_canonical(&mut rows);
        assert_eq!(names(&rows), ["Aruba", "Canada", "Austria", "Germany"]);
    }

    #[test]
    fn country_tie_break_is_case_sensitive_ordinal() {
        let mut rows = vec![row("bermuda", "usd", None), row("Zimbabwe", "usd", None)];
        sort_canonical(&mut rows);
        assert_eq!(names(&rows), ["Zimbabwe", "bermuda"]);
    }

    #[test]
    fn order_does_not_depend_on_input_order() {
        let base = vec![
            row("France", "EUR", None),
            row("France", "eur", None),
            row("Chile", "clp", None),
            row("Spain", "eur", None),
        ];
        let mut forward = base.clone();
        let mut reversed: Vec<_> = base.into_iter().rev().collect();
        sort_canonical(&mut forward);
        sort_canonical(&mut reversed);
        assert_eq!(forward, reversed);
    }

    #[test]
    fn display_sort_puts_missing_last_and_numbers_descending() {
        let prm = PricingParameters::default();
        let mut rows: Vec<_> = [
            row("Aland", "eur", Some(0.5)),
            row("Nowhere", "xxx", None),
            row("Bhutan", "btn", Some(2.0)),
        ]
        .iter()
        .map(|r| compute_row(r, &prm))
        .collect();
        sort_by_key(&mut rows, SortKey::PppRate);
        assert_eq!(names(&rows), ["Bhutan", "Aland", "Nowhere"]);
    }

    #[test]
    fn sort_key_rejects_unknown_column() {
        assert_eq!("ppp_rate".parse::<SortKey>().unwrap(), SortKey::PppRate);
        assert!("iso2".parse::<SortKey>().is_err());
    }
}
