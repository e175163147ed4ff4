use crate::engine::types::{ConfidenceReport, DataQuality};

/// Sample size at which sold-listing evidence stops adding confidence.
const FULL_CONFIDENCE_SAMPLES: f64 = 50.0;

/// Pure aggregation of upstream scores: no network, no cache. The data
/// dimension saturates at 50 samples; the overall score is the mean of the
/// three dimensions, clamped to [0, 1].
pub fn score(
    identification_confidence: f64,
    condition_confidence: f64,
    sample_count: usize,
) -> ConfidenceReport {
    let identification = identification_confidence.clamp(0.0, 1.0);
    let condition = condition_confidence.clamp(0.0, 1.0);
    let data = (sample_count as f64 / FULL_CONFIDENCE_SAMPLES).min(1.0);
    let overall = ((identification + condition + data) / 3.0).clamp(0.0, 1.0);

    ConfidenceReport {
        overall,
        identification,
        condition,
        data,
        quality: DataQuality::from_sample_count(sample_count),
    }
}
