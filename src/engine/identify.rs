use crate::engine::signals::TextSignals;
use crate::engine::types::{Identification, IdentificationMethod, ItemCategory};
use serde::{Deserialize, Serialize};

/// Vision guesses below this confidence are treated as noise and replaced by
/// the text-only fallback. Under-claiming beats fabricated detail.
const MIN_VISION_CONFIDENCE: f64 = 0.6;

/// Fixed confidence assigned to text-only identifications.
const TEXT_ONLY_CONFIDENCE: f64 = 0.4;

/// Raw best-effort guess from the vision provider, already mapped out of the
/// provider's wire shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VisionGuess {
    pub name: String,
    pub brand: Option<String>,
    pub product_line: Option<String>,
    pub variant: Option<String>,
    pub style_code: Option<String>,
    pub colorway: Option<String>,
    pub size: Option<String>,
    pub category_hint: Option<String>,
    pub method: IdentificationMethod,
    pub confidence: f64,
}

/// Gap-filler from the barcode/product lookup. Never raises confidence, only
/// supplies fields the other inputs left blank.
#[derive(Debug, Clone, Default)]
pub struct LookupHint {
    pub name: Option<String>,
    pub brand: Option<String>,
    pub category_hint: Option<String>,
}

/// Merge the vision guess, classified text signals, lookup hint, and category
/// hint into one canonical identification.
pub fn aggregate(
    guess: Option<&VisionGuess>,
    signals: &TextSignals,
    lookup: &LookupHint,
    category_hint: Option<&str>,
) -> Identification {
    let mut identification = match guess {
        Some(guess) if usable(guess) => from_vision(guess),
        _ => from_text(signals),
    };

    if identification.brand.is_none() {
        identification.brand = signals
            .brands
            .first()
            .cloned()
            .or_else(|| lookup.brand.clone());
    }
    if identification.size.is_none() {
        identification.size = signals.sizes.first().cloned();
    }
    if identification.style_code.is_none() {
        identification.style_code = signals.style_codes.first().cloned();
    }
    if identification.name == Identification::unknown().name
        && let Some(name) = lookup.name.clone()
    {
        identification.name = name;
    }

    if identification.category == ItemCategory::Other {
        let hint = category_hint
            .map(str::to_string)
            .or_else(|| lookup.category_hint.clone());
        if let Some(hint) = hint {
            identification.category = ItemCategory::from_hint(&hint);
        }
    }

    identification
}

fn usable(guess: &VisionGuess) -> bool {
    !guess.name.trim().is_empty()
        && !guess.name.to_lowercase().contains("unknown")
        && guess.confidence >= MIN_VISION_CONFIDENCE
}

fn from_vision(guess: &VisionGuess) -> Identification {
    Identification {
        name: guess.name.trim().to_string(),
        brand: guess.brand.clone(),
        product_line: guess.product_line.clone(),
        variant: guess.variant.clone(),
        style_code: guess.style_code.clone(),
        colorway: guess.colorway.clone(),
        size: guess.size.clone(),
        category: guess
            .category_hint
            .as_deref()
            .map(ItemCategory::from_hint)
            .unwrap_or_default(),
        method: guess.method,
        confidence: guess.confidence.clamp(0.0, 1.0),
    }
}

fn from_text(signals: &TextSignals) -> Identification {
    let mut identification = Identification::unknown();
    if let Some(brand) = signals.brands.first() {
        identification.name = match signals.style_codes.first() {
            Some(code) => format!("{brand} {code}"),
            None => format!("{brand} item"),
        };
        identification.brand = Some(brand.clone());
    }
    identification.size = signals.sizes.first().cloned();
    identification.style_code = signals.style_codes.first().cloned();
    identification.method = IdentificationMethod::TextOnly;
    identification.confidence = if signals.is_empty() {
        0.0
    } else {
        TEXT_ONLY_CONFIDENCE
    };
    identification
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::signals::classify;

    fn guess(name: &str, confidence: f64) -> VisionGuess {
        VisionGuess {
            name: name.to_string(),
            brand: Some("Nike".into()),
            product_line: Some("Air Force".into()),
            variant: Some("Low".into()),
            style_code: Some("CW2288-111".into()),
            colorway: Some("White/White".into()),
            size: Some("10".into()),
            category_hint: Some("sneakers".into()),
            method: IdentificationMethod::VisualText,
            confidence,
        }
    }

    fn nike_signals() -> TextSignals {
        classify(&[
            "Nike Air".to_string(),
            "Size 10".to_string(),
            "CW2288-111".to_string(),
        ])
    }

    #[test]
    fn confident_vision_guess_is_accepted_verbatim() {
        let g = guess("Air Force 1 Low", 0.85);
        let id = aggregate(Some(&g), &nike_signals(), &LookupHint::default(), None);
        assert_eq!(id.name, "Air Force 1 Low");
        assert_eq!(id.method, IdentificationMethod::VisualText);
        assert_eq!(id.confidence, 0.85);
        assert_eq!(id.category, ItemCategory::Sneakers);
    }

    #[test]
    fn low_confidence_guess_falls_back_to_text_only() {
        let g = guess("Air Force 1 Low", 0.55);
        let id = aggregate(Some(&g), &nike_signals(), &LookupHint::default(), None);
        assert_eq!(id.method, IdentificationMethod::TextOnly);
        assert_eq!(id.confidence, 0.4);
        assert_eq!(id.brand.as_deref(), Some("Nike"));
        assert_eq!(id.style_code.as_deref(), Some("CW2288-111"));
    }

    #[test]
    fn unknown_in_guess_name_triggers_fallback() {
        let g = guess("Unknown sneaker", 0.9);
        let id = aggregate(Some(&g), &nike_signals(), &LookupHint::default(), None);
        assert_eq!(id.method, IdentificationMethod::TextOnly);
        assert_eq!(id.confidence, 0.4);
    }

    #[test]
    fn missing_guess_with_no_signals_yields_zero_confidence() {
        let id = aggregate(None, &classify(&[]), &LookupHint::default(), None);
        assert_eq!(id.confidence, 0.0);
        assert_eq!(id.name, "Unknown item");
    }

    #[test]
    fn lookup_hint_fills_gaps_without_raising_confidence() {
        let hint = LookupHint {
            name: Some("LEGO Star Wars 75192".into()),
            brand: Some("Lego".into()),
            category_hint: Some("toys".into()),
        };
        let id = aggregate(None, &classify(&[]), &hint, None);
        assert_eq!(id.name, "LEGO Star Wars 75192");
        assert_eq!(id.brand.as_deref(), Some("Lego"));
        assert_eq!(id.category, ItemCategory::Toys);
        assert_eq!(id.confidence, 0.0);
    }

    #[test]
    fn request_category_hint_wins_over_lookup_hint() {
        let hint = LookupHint {
            category_hint: Some("toys".into()),
            ..LookupHint::default()
        };
        let id = aggregate(None, &classify(&[]), &hint, Some("electronics"));
        assert_eq!(id.category, ItemCategory::Electronics);
    }
}
