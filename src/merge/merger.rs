use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::merge::fallback::alternates;
use crate::sorter::sort_canonical;
use crate::types::{CountryRecord, ExchangeRates, FxObservation, PppObservation, RateRow};

pub const PPP_SOURCE: &str = "world_bank";

// ---------------------------------------------------------------------------
// PPP lookup
// ---------------------------------------------------------------------------

/// Latest PPP observation per iso2 and per iso3.
///
/// On equal years the first observation seen is kept.
#[derive(Debug, Default)]
pub struct PppIndex {
    by_iso2: HashMap<String, PppObservation>,
    by_iso3: HashMap<String, PppObservation>,
}

impl PppIndex {
    pub fn build(observations: &[PppObservation]) -> Self {
        let mut index = Self::default();
        for obs in observations {
            keep_latest(&mut index.by_iso2, &obs.country_id, obs);
            if let Some(iso3) = obs.country_iso3.as_deref() {
                keep_latest(&mut index.by_iso3, iso3, obs);
            }
        }
        index
    }

    /// iso2 first, iso3 second.
    pub fn lookup(&self, iso2: &str, iso3: &str) -> Option<&PppObservation> {
        get_by_key(&self.by_iso2, iso2).or_else(|| get_by_key(&self.by_iso3, iso3))
    }
}

fn get_by_key<'a>(map: &'a HashMap<String, PppObservation>, key: &str) -> Option<&'a PppObservation> {
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    map.get(&key.to_uppercase())
}

fn keep_latest(map: &mut HashMap<String, PppObservation>, key: &str, obs: &PppObservation) {
    let key = key.trim().to_uppercase();
    if key.is_empty() {
        return;
    }
    let newer = map.get(&key).map_or(true, |current| obs.year > current.year);
    if newer {
        map.insert(key, obs.clone());
    }
}

// ---------------------------------------------------------------------------
// FX lookup
// ---------------------------------------------------------------------------

fn usable_rate(rates: &ExchangeRates, code: &str) -> Option<f64> {
    rates
        .rates
        .get(code)
        .copied()
        .filter(|r| r.is_finite() && *r > 0.0)
}

/// Rate for `currency_code` (any case), walking the fallback table on a miss.
pub fn resolve_exchange_rate(rates: &ExchangeRates, currency_code: &str) -> Option<FxObservation> {
    let code = currency_code.trim().to_uppercase();
    if code.is_empty() {
        return None;
    }
    std::iter::once(code.as_str())
        .chain(alternates(&code).iter().copied())
        .find_map(|candidate| {
            usable_rate(rates, candidate).map(|rate| FxObservation {
                code: candidate.to_string(),
                rate,
                date: rates.date.clone(),
                source: rates.source,
            })
        })
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Why a merged row is incomplete. Counted, never raised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeGap {
    MissingPpp,
    MissingExchangeRate,
    MissingPppYear,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MergeSummary {
    pub rows: usize,
    pub missing_ppp: usize,
    pub missing_exchange_rate: usize,
    pub missing_ppp_year: usize,
    /// Rows whose rate came from a fallback code.
    pub fallback_rates: usize,
}

impl MergeSummary {
    fn record(&mut self, gap: MergeGap) {
        match gap {
            MergeGap::MissingPpp => self.missing_ppp += 1,
            MergeGap::MissingExchangeRate => self.missing_exchange_rate += 1,
            MergeGap::MissingPppYear => self.missing_ppp_year += 1,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MergeOutput {
    /// One row per country, in canonical order.
    pub rows: Vec<RateRow>,
    pub summary: MergeSummary,
}

/// Join each country with its latest PPP value and its exchange rate.
///
/// Countries without a match are still emitted, with `None` in place of the
/// unmatched value.
pub fn merge(
    countries: &[CountryRecord],
    observations: &[PppObservation],
    rates: &ExchangeRates,
) -> MergeOutput {
    let index = PppIndex::build(observations);
    let mut summary = MergeSummary::default();
    let mut rows = Vec::with_capacity(countries.len());

    for country in countries {
        let ppp = index.lookup(&country.iso2, &country.iso3);
        match ppp {
            None => summary.record(MergeGap::MissingPpp),
            Some(obs) if obs.year.is_none() => summary.record(MergeGap::MissingPppYear),
            Some(_) => {}
        }

        let fx = resolve_exchange_rate(rates, &country.currency_code);
        match &fx {
            None => summary.record(MergeGap::MissingExchangeRate),
            Some(obs) if !obs.code.eq_ignore_ascii_case(country.currency_code.trim()) => {
                summary.fallback_rates += 1;
                debug!(
                    country = %country.country_name,
                    requested = %country.currency_code,
                    resolved = %obs.code,
                    "exchange rate resolved through fallback code"
                );
            }
            Some(_) => {}
        }

        rows.push(RateRow {
            country_name: country.country_name.clone(),
            iso3: country.iso3.clone(),
            iso2: country.iso2.clone(),
            currency_code: country.currency_code.clone(),
            ppp_rate: ppp.map(|o| o.value),
            ppp_year: ppp.and_then(|o| o.year),
            ppp_source: Some(PPP_SOURCE.to_string()),
            exchange_rate: fx.map(|o| o.rate),
            exchange_rate_date: rates.date.clone(),
            exchange_rate_source: Some(rates.source.to_string()),
        });
    }

    sort_canonical(&mut rows);
    summary.rows = rows.len();
    MergeOutput { rows, summary }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExchangeSource;
    use std::collections::BTreeMap;

    fn country(name: &str, iso2: &str, iso3: &str, code: &str) -> CountryRecord {
        CountryRecord {
            country_name: name.to_string(),
            iso2: iso2.to_string(),
            iso3: iso3.to_string(),
            currency_code: code.to_string(),
        }
    }

    fn obs(id: &str, iso3: Option<&str>, year: Option<i32>, value: f64) -> PppObservation {
        PppObservation {
            country_id: id.to_string(),
            country_iso3: iso3.map(str::to_string),
            year,
            value,
        }
    }

    fn rates(pairs: &[(&str, f64)]) -> ExchangeRates {
        ExchangeRates {
            date: Some("2026-10-13".to_string()),
            rates: pairs
                .iter()
                .map(|(c, r)| (c.to_string(), *r))
                .collect::<BTreeMap<_, _>>(),
            source: ExchangeSource::OpenErApi,
        }
    }

    #[test]
    fn latest_year_wins() {
        let index = PppIndex::build(&[
            obs("JP", Some("JPN"), Some(2021), 100.0),
            obs("JP", Some("JPN"), Some(2023), 95.0),
            obs("JP", Some("JPN"), Some(2022), 98.0),
        ]);
        assert_eq!(index.lookup("JP", "JPN").unwrap().value, 95.0);
    }

    #[test]
    fn equal_years_keep_first_seen() {
        let index = PppIndex::build(&[
            obs("JP", None, Some(2023), 95.0),
            obs("JP", None, Some(2023), 96.0),
        ]);
        assert_eq!(index.lookup("JP", "").unwrap().value, 95.0);
    }

    #[test]
    fn iso3_used_when_iso2_misses() {
        let index = PppIndex::build(&[obs("XK", Some("XKX"), Some(2022), 0.4)]);
        assert_eq!(index.lookup("KV", "XKX").unwrap().value, 0.4);
        assert!(index.lookup("KV", "KOS").is_none());
        assert!(index.lookup("", "").is_none());
    }

    #[test]
    fn exchange_rate_lookup_is_case_insensitive() {
        let fx = rates(&[("EUR", 0.92)]);
        let hit = resolve_exchange_rate(&fx, "eur").unwrap();
        assert_eq!(hit.code, "EUR");
        assert_eq!(hit.rate, 0.92);
        assert_eq!(hit.date.as_deref(), Some("2026-10-13"));
    }

    #[test]
    fn exchange_rate_falls_back_to_successor_code() {
        let fx = rates(&[("ZWG", 26.7), ("VED", 40.1)]);
        assert_eq!(resolve_exchange_rate(&fx, "zwl").unwrap().code, "ZWG");
        assert_eq!(resolve_exchange_rate(&fx, "VES").unwrap().code, "VED");
        assert!(resolve_exchange_rate(&fx, "GBP").is_none());
        assert!(resolve_exchange_rate(&fx, "").is_none());
    }

    #[test]
    fn own_code_beats_fallback() {
        let fx = rates(&[("SLE", 22.5), ("SLL", 22_500.0)]);
        assert_eq!(resolve_exchange_rate(&fx, "SLL").unwrap().rate, 22_500.0);
    }

    #[test]
    fn non_positive_rate_counts_as_missing() {
        let fx = rates(&[("ABC", 0.0)]);
        assert!(resolve_exchange_rate(&fx, "abc").is_none());
    }

    #[test]
    fn merge_emits_every_country_and_tallies_gaps() {
        let countries = [
            country("Japan", "JP", "JPN", "jpy"),
            country("Atlantis", "AT", "ATL", "atl"),
            country("Kosovo", "XK", "XKX", "eur"),
        ];
        let observations = [
            obs("JP", Some("JPN"), Some(2023), 95.0),
            obs("XK", Some("XKX"), None, 0.4),
        ];
        let out = merge(&countries, &observations, &rates(&[("JPY", 150.0), ("EUR", 0.92)]));

        assert_eq!(out.rows.len(), 3);
        assert_eq!(out.summary.rows, 3);
        assert_eq!(out.summary.missing_ppp, 1);
        assert_eq!(out.summary.missing_exchange_rate, 1);
        assert_eq!(out.summary.missing_ppp_year, 1);

        // Canonical order: atl, eur, jpy.
        let atlantis = &out.rows[0];
        assert_eq!(atlantis.country_name, "Atlantis");
        assert_eq!(atlantis.ppp_rate, None);
        assert_eq!(atlantis.exchange_rate, None);
        assert_eq!(atlantis.exchange_rate_date.as_deref(), Some("2026-10-13"));

        let japan = &out.rows[2];
        assert_eq!(japan.ppp_rate, Some(95.0));
        assert_eq!(japan.ppp_year, Some(2023));
        assert_eq!(japan.exchange_rate, Some(150.0));
        assert_eq!(japan.ppp_source.as_deref(), Some(PPP_SOURCE));
        assert_eq!(japan.exchange_rate_source.as_deref(), Some("open_er_api"));
    }

    #[test]
    fn fallback_resolutions_are_counted() {
        let countries = [country("Zimbabwe", "ZW", "ZWE", "zwl")];
        let out = merge(&countries, &[], &rates(&[("ZWG", 26.7)]));
        assert_eq!(out.summary.fallback_rates, 1);
        assert_eq!(out.rows[0].exchange_rate, Some(26.7));
    }
}
