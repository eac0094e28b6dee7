use serde::Serialize;

use crate::calibration::CalibrationResult;
use crate::config::health_buckets;
use crate::types::Segment;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthBucket {
    Good,
    Acceptable,
    NeedsAttention,
    Poor,
}

impl HealthBucket {
    pub fn from_ece(ece: f64) -> Self {
        if ece < health_buckets::GOOD {
            HealthBucket::Good
        } else if ece < health_buckets::ACCEPTABLE {
            HealthBucket::Acceptable
        } else if ece < health_buckets::NEEDS_ATTENTION {
            HealthBucket::NeedsAttention
        } else {
            HealthBucket::Poor
        }
    }

    pub fn score(&self) -> f64 {
        match self {
            HealthBucket::Good => 1.0,
            HealthBucket::Acceptable => 0.75,
            HealthBucket::NeedsAttention => 0.4,
            HealthBucket::Poor => 0.1,
        }
    }
}

impl std::fmt::Display for HealthBucket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HealthBucket::Good => "good",
            HealthBucket::Acceptable => "acceptable",
            HealthBucket::NeedsAttention => "needs_attention",
            HealthBucket::Poor => "poor",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SegmentHealth {
    pub segment: Segment,
    pub bucket: HealthBucket,
    pub ece: f64,
    pub brier_score: f64,
    pub hit_rate: f64,
    pub sample_size: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct TuningSummary {
    pub segments: Vec<SegmentHealth>,
    /// Mean bucket score across segments, 0.0 with nothing to summarize.
    pub overall_health: f64,
}

/// Bucket each segment's latest snapshot by calibration error and average
/// the scores into one headline number.
pub fn tuning_summary(results: &[(Segment, CalibrationResult)]) -> TuningSummary {
    let segments: Vec<SegmentHealth> = results
        .iter()
        .map(|(segment, result)| SegmentHealth {
            segment: segment.clone(),
            bucket: HealthBucket::from_ece(result.ece),
            ece: result.ece,
            brier_score: result.brier_score,
            hit_rate: result.hit_rate,
            sample_size: result.resolved_predictions,
        })
        .collect();
    let overall_health = if segments.is_empty() {
        0.0
    } else {
        segments.iter().map(|s| s.bucket.score()).sum::<f64>() / segments.len() as f64
    };
    TuningSummary {
        segments,
        overall_health,
    }
}
