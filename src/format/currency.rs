use std::sync::{Arc, LazyLock};

use dashmap::DashMap;

/// Currency used when a code is absent or not formattable.
pub const FALLBACK_CURRENCY: &str = "USD";

const SYMBOLS: &[(&str, &str)] = &[
    ("USD", "$"),
    ("EUR", "€"),
    ("GBP", "£"),
    ("JPY", "¥"),
    ("CNY", "CN¥"),
    ("INR", "₹"),
    ("KRW", "₩"),
    ("ILS", "₪"),
    ("VND", "₫"),
    ("NGN", "₦"),
    ("PHP", "₱"),
    ("THB", "฿"),
    ("UAH", "₴"),
    ("TRY", "₺"),
    ("BRL", "R$"),
    ("CAD", "CA$"),
    ("AUD", "A$"),
    ("NZD", "NZ$"),
    ("HKD", "HK$"),
    ("MXN", "MX$"),
    ("TWD", "NT$"),
];

const ZERO_DECIMAL: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "UYI", "VND",
    "VUV", "XAF", "XOF", "XPF",
];

const THREE_DECIMAL: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

/// A 3-letter alphabetic code. Case does not matter.
pub fn is_supported(code: &str) -> bool {
    let code = code.trim();
    code.len() == 3 && code.chars().all(|c| c.is_ascii_alphabetic())
}

/// Renders amounts of one currency in `en` style.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CurrencyFormatter {
    pub code: String,
    pub prefix: String,
    pub minor_digits: usize,
}

impl CurrencyFormatter {
    /// `code` must already be upper-case and supported.
    fn new(code: &str) -> Self {
        let prefix = SYMBOLS
            .iter()
            .find(|(c, _)| *c == code)
            .map(|(_, s)| s.to_string())
            .unwrap_or_else(|| format!("{code} "));
        let minor_digits = if ZERO_DECIMAL.contains(&code) {
            0
        } else if THREE_DECIMAL.contains(&code) {
            3
        } else {
            2
        };
        Self {
            code: code.to_string(),
            prefix,
            minor_digits,
        }
    }

    /// `-` for absent or NaN amounts.
    pub fn format(&self, amount: Option<f64>) -> String {
        let Some(amount) = amount.filter(|a| !a.is_nan()) else {
            return "-".to_string();
        };
        let fixed = format!("{:.*}", self.minor_digits, amount.abs());
        let (int_part, frac_part) = match fixed.split_once('.') {
            Some((i, f)) => (i, Some(f)),
            None => (fixed.as_str(), None),
        };
        let mut out = String::new();
        if amount < 0.0 && fixed.bytes().any(|b| b.is_ascii_digit() && b != b'0') {
            out.push('-');
        }
        out.push_str(&self.prefix);
        out.push_str(&group_thousands(int_part));
        if let Some(frac) = frac_part {
            out.push('.');
            out.push_str(frac);
        }
        out
    }
}

fn group_thousands(digits: &str) -> String {
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(ch);
    }
    out
}

// ---------------------------------------------------------------------------
// FormatterCache
// ---------------------------------------------------------------------------

/// Formatters keyed by upper-case code, built on first use and kept for the
/// life of the process. Safe to share across request handlers.
#[derive(Debug, Default)]
pub struct FormatterCache {
    formatters: DashMap<String, Arc<CurrencyFormatter>>,
}

static GLOBAL_CACHE: LazyLock<FormatterCache> = LazyLock::new(FormatterCache::default);

impl FormatterCache {
    pub fn global() -> &'static FormatterCache {
        &GLOBAL_CACHE
    }

    /// Formatter for `code`, or the USD formatter when the code is absent or unsupported.
    pub fn get(&self, code: Option<&str>) -> Arc<CurrencyFormatter> {
        let key = code
            .map(str::trim)
            .filter(|c| is_supported(c))
            .map(str::to_uppercase)
            .unwrap_or_else(|| FALLBACK_CURRENCY.to_string());
        if let Some(existing) = self.formatters.get(&key) {
            return Arc::clone(existing.value());
        }
        let formatter = Arc::new(CurrencyFormatter::new(&key));
        Arc::clone(self.formatters.entry(key).or_insert(formatter).value())
    }
}

/// Formats `amount` in `code` through the process-wide cache.
pub fn format_price(amount: Option<f64>, code: Option<&str>) -> String {
    FormatterCache::global().get(code).format(amount)
}
