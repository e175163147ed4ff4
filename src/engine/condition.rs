use crate::engine::types::{ConditionAssessment, ConditionFactor, ConditionGrade, Severity};

/// Ordered keyword table mapping canonical condition phrases to grades.
/// Most-specific phrases come first so "new with tags" wins over "new".
const GRADE_PHRASES: &[(&str, ConditionGrade, f64)] = &[
    ("new with tags", ConditionGrade::NewWithTags, 0.95),
    ("nwt", ConditionGrade::NewWithTags, 0.9),
    ("new without tags", ConditionGrade::NewWithoutTags, 0.9),
    ("nwot", ConditionGrade::NewWithoutTags, 0.85),
    ("new other", ConditionGrade::NewOther, 0.85),
    ("open box", ConditionGrade::NewOther, 0.8),
    ("new in box", ConditionGrade::NewWithTags, 0.9),
    ("brand new", ConditionGrade::NewWithoutTags, 0.85),
    ("like new", ConditionGrade::LikeNew, 0.9),
    ("barely worn", ConditionGrade::LikeNew, 0.8),
    ("deadstock", ConditionGrade::NewWithoutTags, 0.85),
    ("excellent", ConditionGrade::Excellent, 0.85),
    ("very good", ConditionGrade::VeryGood, 0.85),
    ("for parts", ConditionGrade::ForParts, 0.9),
    ("not working", ConditionGrade::ForParts, 0.9),
    ("broken", ConditionGrade::ForParts, 0.85),
    ("heavily worn", ConditionGrade::Acceptable, 0.8),
    ("well worn", ConditionGrade::Acceptable, 0.75),
    ("acceptable", ConditionGrade::Acceptable, 0.8),
    ("fair", ConditionGrade::Acceptable, 0.7),
    ("good", ConditionGrade::Good, 0.8),
    ("used", ConditionGrade::Good, 0.6),
    ("new", ConditionGrade::NewWithoutTags, 0.7),
];

/// Flaw keywords scanned out of the narrative after the grade is settled.
/// Each carries the area it usually affects and a value-impact percentage.
const FLAW_PHRASES: &[(&str, &str, Severity, f64)] = &[
    ("scuff", "exterior", Severity::Minor, 3.0),
    ("scratch", "surface", Severity::Minor, 4.0),
    ("scratches", "surface", Severity::Moderate, 6.0),
    ("yellowing", "soles", Severity::Moderate, 8.0),
    ("stain", "fabric", Severity::Moderate, 8.0),
    ("fading", "color", Severity::Moderate, 7.0),
    ("hole", "fabric", Severity::Major, 15.0),
    ("tear", "fabric", Severity::Major, 15.0),
    ("crack", "structure", Severity::Major, 18.0),
    ("missing", "components", Severity::Major, 20.0),
    ("water damage", "internals", Severity::Critical, 35.0),
    ("does not power on", "internals", Severity::Critical, 50.0),
];

/// Normalize a free-form condition narrative into a grade plus structured
/// factors. Unmatched text defaults to the middle grade rather than failing.
pub fn assess(narrative: &str) -> ConditionAssessment {
    let lowered = narrative.trim().to_lowercase();
    if lowered.is_empty() {
        return ConditionAssessment::unknown();
    }

    let (grade, confidence) = GRADE_PHRASES
        .iter()
        .find(|(phrase, _, _)| lowered.contains(phrase))
        .map(|(_, grade, confidence)| (*grade, *confidence))
        .unwrap_or((ConditionGrade::default(), 0.5));

    let mut factors = extract_factors(&lowered);
    factors.sort_by_key(|factor| std::cmp::Reverse(factor.severity.display_weight()));

    ConditionAssessment {
        grade,
        confidence,
        factors,
    }
}

fn extract_factors(lowered: &str) -> Vec<ConditionFactor> {
    FLAW_PHRASES
        .iter()
        .filter(|(phrase, _, _, _)| lowered.contains(phrase))
        .map(|(phrase, area, severity, impact)| ConditionFactor {
            area: (*area).to_string(),
            issue: (*phrase).to_string(),
            severity: *severity,
            value_impact_pct: *impact,
        })
        .collect()
}
