use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

/// Brands the classifier recognizes by substring. Matching is
/// case-insensitive; the canonical casing below is what gets reported.
const BRAND_VOCABULARY: &[&str] = &[
    "Nike",
    "Jordan",
    "Adidas",
    "New Balance",
    "Puma",
    "Reebok",
    "Converse",
    "Vans",
    "Asics",
    "Under Armour",
    "Levi's",
    "Patagonia",
    "North Face",
    "Carhartt",
    "Ralph Lauren",
    "Apple",
    "Samsung",
    "Sony",
    "Nintendo",
    "Lego",
    "Supreme",
    "Gucci",
    "Coach",
];

static STYLE_CODE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)^[A-Z0-9]{2,4}-?\d{3,6}$").expect("style code pattern"));

static BARCODE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\d{8,14}$").expect("barcode pattern"));

static PRICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[$€£]\s?\d+(\.\d{1,2})?$").expect("price pattern"));

static NUMERIC_SIZE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:(?:US|EU|UK)\s?)?\d{1,2}(?:\.5)?[MW]?$").expect("numeric size pattern")
});

static SIZE_WORD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:size\s?\d{1,2}(?:\.5)?|XXS|XS|S|M|L|XL|XXL|XXXL|small|medium|large)$")
        .expect("size word pattern")
});

/// Free-form recognized text partitioned into semantic buckets. Buckets are
/// non-exclusive: "M65-001" can be both a model code and part of a title.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TextSignals {
    pub brands: Vec<String>,
    pub sizes: Vec<String>,
    pub style_codes: Vec<String>,
    pub barcodes: Vec<String>,
    pub prices: Vec<String>,
}

impl TextSignals {
    pub fn is_empty(&self) -> bool {
        self.brands.is_empty()
            && self.sizes.is_empty()
            && self.style_codes.is_empty()
            && self.barcodes.is_empty()
            && self.prices.is_empty()
    }

    pub fn signal_count(&self) -> usize {
        self.brands.len()
            + self.sizes.len()
            + self.style_codes.len()
            + self.barcodes.len()
            + self.prices.len()
    }
}

/// Classify recognized text snippets into semantic buckets. Pure function of
/// its input; preserves snippet order within each bucket.
pub fn classify(snippets: &[String]) -> TextSignals {
    let mut signals = TextSignals::default();
    for raw in snippets {
        let text = raw.trim();
        if text.is_empty() {
            continue;
        }
        if let Some(brand) = match_brand(text) {
            if !signals.brands.contains(&brand) {
                signals.brands.push(brand);
            }
        }
        if SIZE_WORD.is_match(text) || NUMERIC_SIZE.is_match(text) {
            signals.sizes.push(strip_size_prefix(text));
        }
        if STYLE_CODE.is_match(text) {
            signals.style_codes.push(text.to_uppercase());
        }
        if BARCODE.is_match(text) {
            signals.barcodes.push(text.to_string());
        }
        if PRICE.is_match(text) {
            signals.prices.push(text.to_string());
        }
    }
    signals
}

fn match_brand(text: &str) -> Option<String> {
    let lowered = text.to_lowercase();
    BRAND_VOCABULARY
        .iter()
        .find(|brand| lowered.contains(&brand.to_lowercase()))
        .map(|brand| (*brand).to_string())
}

fn strip_size_prefix(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed.len() > 5 && trimmed[..5].eq_ignore_ascii_case("size ") {
        trimmed[5..].trim().to_string()
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snippets(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    #[test]
    fn classifies_style_codes() {
        let out = classify(&snippets(&["CW-2288", "dd1391003", "A-12"]));
        assert_eq!(out.style_codes, vec!["CW-2288", "DD1391003"]);
    }

    #[test]
    fn classifies_barcodes_by_length() {
        let out = classify(&snippets(&["194501234567", "1234567", "123456789012345"]));
        assert_eq!(out.barcodes, vec!["194501234567"]);
    }

    #[test]
    fn classifies_prices_with_currency_prefix() {
        let out = classify(&snippets(&["$120", "€45.50", "120", "$12.345"]));
        assert_eq!(out.prices, vec!["$120", "€45.50"]);
    }

    #[test]
    fn classifies_sizes_and_strips_prefix() {
        let out = classify(&snippets(&["Size 10.5", "US 9", "XL", "gigantic"]));
        assert_eq!(out.sizes, vec!["10.5", "US 9", "XL"]);
    }

    #[test]
    fn brand_matching_is_substring_and_case_insensitive() {
        let out = classify(&snippets(&["NIKE AIR", "new balance 990"]));
        assert_eq!(out.brands, vec!["Nike", "New Balance"]);
    }

    #[test]
    fn a_snippet_can_land_in_multiple_buckets() {
        // An eight digit string is both a barcode and a plausible style code.
        let out = classify(&snippets(&["12345678"]));
        assert_eq!(out.barcodes, vec!["12345678"]);
        assert!(out.signal_count() >= 1);
    }

    #[test]
    fn empty_input_yields_empty_signals() {
        let out = classify(&[]);
        assert!(out.is_empty());
        assert_eq!(out.signal_count(), 0);
    }
}
