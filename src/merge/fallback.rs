/// Historically-equivalent currency codes, tried in the listed order when a
/// code has no rate of its own. Each redenomination points both ways so
/// sources quoting only the old or only the new code still resolve.
pub const CURRENCY_FALLBACKS: &[(&str, &[&str])] = &[
    // Mauritanian ouguiya, 2018
    ("MRO", &["MRU"]),
    ("MRU", &["MRO"]),
    // Sierra Leonean leone, 2022
    ("SLE", &["SLL"]),
    ("SLL", &["SLE"]),
    // Sao Tome and Principe dobra, 2018
    ("STD", &["STN"]),
    ("STN", &["STD"]),
    // Venezuelan bolivar: soberano and digital
    ("VED", &["VES"]),
    ("VES", &["VED"]),
    // Zimbabwe dollar and Zimbabwe gold
    ("ZWG", &["ZWL"]),
    ("ZWL", &["ZWG"]),
];

/// Alternates for an upper-case code, empty when the code has none.
pub fn alternates(code: &str) -> &'static [&'static str] {
    CURRENCY_FALLBACKS
        .iter()
        .find(|(primary, _)| *primary == code)
        .map(|(_, alts)| *alts)
        .unwrap_or(&[])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redenominations_point_both_ways() {
        for (code, alts) in CURRENCY_FALLBACKS {
            for alt in *alts {
                assert!(
                    alternates(alt).contains(code),
                    "{alt} should fall back to {code}"
                );
            }
        }
    }

    #[test]
    fn table_has_no_duplicate_primaries() {
        let mut codes: Vec<_> = CURRENCY_FALLBACKS.iter().map(|(c, _)| *c).collect();
        let before = codes.len();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), before);
    }

    #[test]
    fn unknown_code_has_no_alternates() {
        assert!(alternates("USD").is_empty());
        assert_eq!(alternates("ZWL"), &["ZWG"]);
    }
}
