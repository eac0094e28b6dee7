use std::collections::BTreeMap;

use serde::Serialize;
use serde_json::{json, Value};

use crate::calibration::{CalibrationResult, ReliabilityPoint};
use crate::config::{tuning, MIN_BIN_SAMPLES};
use crate::types::Segment;

// ---------------------------------------------------------------------------
// Recommendation types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TunedParameter {
    StakeFraction,
    ConfidenceThreshold,
    CalibrationFactors,
}

impl TunedParameter {
    pub fn config_key(&self, segment: &Segment) -> String {
        use crate::store::config_store as keys;
        match self {
            TunedParameter::StakeFraction => keys::stake_fraction_key(segment),
            TunedParameter::ConfidenceThreshold => keys::confidence_threshold_key(segment),
            TunedParameter::CalibrationFactors => keys::calibration_factors_key(segment),
        }
    }
}

impl std::fmt::Display for TunedParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TunedParameter::StakeFraction => "stake_fraction",
            TunedParameter::ConfidenceThreshold => "confidence_threshold",
            TunedParameter::CalibrationFactors => "calibration_factors",
        };
        write!(f, "{s}")
    }
}

/// A proposed parameter change. Ephemeral: either applied in the same batch
/// run or dropped — recommendations are never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct TuningRecommendation {
    pub segment: Segment,
    pub parameter: TunedParameter,
    pub current: Value,
    pub recommended: Value,
    pub reason: String,
    /// Strictly below 1.0: automated tuning is never certain.
    pub confidence: f64,
    pub sample_size: usize,
}

/// The live values the rules diff against, read from the config store with
/// defaults for never-tuned segments.
#[derive(Debug, Clone)]
pub struct CurrentParams {
    pub stake_fraction: f64,
    pub confidence_threshold: f64,
    pub factors: BTreeMap<String, f64>,
}

impl Default for CurrentParams {
    fn default() -> Self {
        Self {
            stake_fraction: tuning::DEFAULT_STAKE_FRACTION,
            confidence_threshold: tuning::DEFAULT_CONFIDENCE_THRESHOLD,
            factors: BTreeMap::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Rules
// ---------------------------------------------------------------------------

/// Run every rule against one segment's latest snapshot. Rules with
/// insufficient data stay silent instead of guessing.
pub fn recommend(
    segment: &Segment,
    result: &CalibrationResult,
    current: &CurrentParams,
) -> Vec<TuningRecommendation> {
    let mut recs = Vec::new();
    if let Some(rec) = stake_fraction_rule(segment, result, current) {
        recs.push(rec);
    }
    if let Some(rec) = confidence_threshold_rule(segment, result, current) {
        recs.push(rec);
    }
    if let Some(rec) = factor_map_rule(segment, result, current) {
        recs.push(rec);
    }
    recs
}

/// Weighted actual/predicted ratio over qualifying reliability points.
fn confidence_ratio(reliability: &[ReliabilityPoint]) -> Option<(f64, usize)> {
    let mut predicted = 0.0;
    let mut actual = 0.0;
    let mut samples = 0usize;
    for point in reliability.iter().filter(|p| p.count >= MIN_BIN_SAMPLES) {
        predicted += point.mean_predicted * point.count as f64;
        actual += point.mean_actual * point.count as f64;
        samples += point.count;
    }
    if samples == 0 || predicted <= f64::EPSILON {
        None
    } else {
        Some((actual / predicted, samples))
    }
}

/// Scale stakes with observed trustworthiness. Decreases move faster than
/// increases, and both are clipped to one bounded step per pass.
fn stake_fraction_rule(
    segment: &Segment,
    result: &CalibrationResult,
    current: &CurrentParams,
) -> Option<TuningRecommendation> {
    let (ratio, samples) = confidence_ratio(&result.reliability)?;

    let next = if ratio < tuning::RATIO_DECREASE_BELOW {
        (current.stake_fraction - tuning::DECREASE_STEP).max(tuning::STAKE_FLOOR)
    } else if ratio > tuning::RATIO_INCREASE_ABOVE {
        (current.stake_fraction + tuning::INCREASE_STEP).min(tuning::STAKE_CEILING)
    } else {
        return None;
    };
    if (next - current.stake_fraction).abs() < 1e-12 {
        return None; // already at the bound
    }

    let direction = if next < current.stake_fraction { "cut" } else { "raise" };
    Some(TuningRecommendation {
        segment: segment.clone(),
        parameter: TunedParameter::StakeFraction,
        current: json!(current.stake_fraction),
        recommended: json!(next),
        reason: format!(
            "confidence ratio {ratio:.3} over {samples} samples, {direction} stake fraction"
        ),
        confidence: bounded_confidence(samples, (ratio - 1.0).abs()),
        sample_size: samples,
    })
}

/// Move the minimum-confidence bar to the cheapest probability band that
/// still beats break-even pricing. With no profitable band at all, push the
/// bar toward the ceiling one step at a time.
fn confidence_threshold_rule(
    segment: &Segment,
    result: &CalibrationResult,
    current: &CurrentParams,
) -> Option<TuningRecommendation> {
    let qualifying: Vec<&ReliabilityPoint> = result
        .reliability
        .iter()
        .filter(|p| p.count >= MIN_BIN_SAMPLES)
        .collect();
    if qualifying.is_empty() {
        return None;
    }
    let samples: usize = qualifying.iter().map(|p| p.count).sum();

    let (next, reason) = match qualifying
        .iter()
        .find(|p| p.mean_actual > tuning::BREAK_EVEN_PROB)
    {
        Some(bin) => (
            bin.lower,
            format!(
                "bin {} wins {:.1}% against break-even {:.1}%",
                bin.bin,
                bin.mean_actual * 100.0,
                tuning::BREAK_EVEN_PROB * 100.0
            ),
        ),
        None => (
            (current.confidence_threshold + tuning::CONFIDENCE_STEP)
                .min(tuning::CONFIDENCE_CEILING),
            "no probability band beats break-even, raising the bar".to_string(),
        ),
    };
    if (next - current.confidence_threshold).abs() < 1e-9 {
        return None;
    }

    Some(TuningRecommendation {
        segment: segment.clone(),
        parameter: TunedParameter::ConfidenceThreshold,
        current: json!(current.confidence_threshold),
        recommended: json!(next),
        reason,
        confidence: bounded_confidence(samples, (next - current.confidence_threshold).abs()),
        sample_size: samples,
    })
}

/// Propose factor-map updates only when the segment is measurably
/// miscalibrated, and only for bins that deviate meaningfully from neutral.
fn factor_map_rule(
    segment: &Segment,
    result: &CalibrationResult,
    current: &CurrentParams,
) -> Option<TuningRecommendation> {
    if result.ece <= tuning::ECE_LIMIT {
        return None;
    }
    let deviating: BTreeMap<String, f64> = result
        .factors
        .iter()
        .filter(|(_, factor)| (*factor - 1.0).abs() > tuning::FACTOR_DEVIATION)
        .map(|(label, factor)| (label.clone(), *factor))
        .collect();
    if deviating.is_empty() {
        return None;
    }

    let previous: BTreeMap<String, f64> = deviating
        .keys()
        .map(|label| (label.clone(), current.factors.get(label).copied().unwrap_or(1.0)))
        .collect();
    let samples = result.resolved_predictions;

    Some(TuningRecommendation {
        segment: segment.clone(),
        parameter: TunedParameter::CalibrationFactors,
        current: json!(previous),
        recommended: json!(&deviating),
        reason: format!(
            "ece {:.3} exceeds {:.3}, remapping {} bins",
            result.ece,
            tuning::ECE_LIMIT,
            deviating.len()
        ),
        confidence: bounded_confidence(samples, result.ece),
        sample_size: samples,
    })
}

/// Sample-size-dominated confidence, capped below certainty.
fn bounded_confidence(sample_size: usize, deviation: f64) -> f64 {
    let sample_term = sample_size as f64 / (sample_size as f64 + 100.0);
    let deviation_term = (deviation.abs() / 0.25).min(1.0);
    (0.7 * sample_term + 0.3 * deviation_term).clamp(0.05, 0.95)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibration::CalibrationEngine;
    use crate::types::MarketKind;

    fn seg() -> Segment {
        Segment::new("nba", MarketKind::Moneyline)
    }

    fn result_from(fills: &[(f64, usize, usize)]) -> CalibrationResult {
        let mut engine = CalibrationEngine::new();
        for &(p, n, wins) in fills {
            for i in 0..n {
                let outcome = if i < wins { 1.0 } else { 0.0 };
                engine.add_prediction(p, outcome, None, None);
            }
        }
        engine.snapshot(0, 1_000, fills.iter().map(|f| f.1).sum())
    }

    #[test]
    fn overconfident_model_gets_bounded_stake_cut() {
        // Ratio 0.625: far below the decrease band.
        let result = result_from(&[(0.80, 40, 20)]);
        let current = CurrentParams {
            stake_fraction: 0.02,
            ..Default::default()
        };
        let recs = recommend(&seg(), &result, &current);
        let stake = recs
            .iter()
            .find(|r| r.parameter == TunedParameter::StakeFraction)
            .expect("stake recommendation");
        let next = stake.recommended.as_f64().unwrap();
        // One bounded step, regardless of how bad the ratio is.
        assert!((next - (0.02 - tuning::DECREASE_STEP)).abs() < 1e-9);
        assert!(stake.confidence < 1.0);
    }

    #[test]
    fn underconfident_model_gets_smaller_increase() {
        // 40 samples at 0.55 that win 80% of the time: ratio 1.45.
        let result = result_from(&[(0.55, 40, 32)]);
        let current = CurrentParams {
            stake_fraction: 0.02,
            ..Default::default()
        };
        let recs = recommend(&seg(), &result, &current);
        let stake = recs
            .iter()
            .find(|r| r.parameter == TunedParameter::StakeFraction)
            .expect("stake recommendation");
        let next = stake.recommended.as_f64().unwrap();
        assert!((next - (0.02 + tuning::INCREASE_STEP)).abs() < 1e-9);
        assert!(tuning::INCREASE_STEP < tuning::DECREASE_STEP);
    }

    #[test]
    fn calibrated_ratio_leaves_stake_alone() {
        let result = result_from(&[(0.60, 40, 24)]); // ratio exactly 1.0
        let recs = recommend(&seg(), &result, &CurrentParams::default());
        assert!(recs
            .iter()
            .all(|r| r.parameter != TunedParameter::StakeFraction));
    }

    #[test]
    fn stake_never_drops_below_floor() {
        let result = result_from(&[(0.80, 40, 20)]);
        let current = CurrentParams {
            stake_fraction: tuning::STAKE_FLOOR,
            ..Default::default()
        };
        let recs = recommend(&seg(), &result, &current);
        assert!(recs
            .iter()
            .all(|r| r.parameter != TunedParameter::StakeFraction));
    }

    #[test]
    fn insufficient_data_yields_no_recommendations() {
        // 5 samples per bin: nothing qualifies anywhere.
        let result = result_from(&[(0.60, 5, 3), (0.70, 5, 4)]);
        let recs = recommend(&seg(), &result, &CurrentParams::default());
        assert!(recs.is_empty());
    }

    #[test]
    fn threshold_moves_to_cheapest_profitable_band() {
        // 55-60% band wins 45% (unprofitable), 65-70% band wins 65%.
        let result = result_from(&[(0.57, 20, 9), (0.67, 20, 13)]);
        let current = CurrentParams {
            confidence_threshold: 0.55,
            ..Default::default()
        };
        let recs = recommend(&seg(), &result, &current);
        let threshold = recs
            .iter()
            .find(|r| r.parameter == TunedParameter::ConfidenceThreshold)
            .expect("threshold recommendation");
        assert!((threshold.recommended.as_f64().unwrap() - 0.65).abs() < 1e-9);
    }

    #[test]
    fn no_profitable_band_raises_toward_ceiling() {
        let result = result_from(&[(0.57, 20, 9), (0.67, 20, 10)]);
        let current = CurrentParams {
            confidence_threshold: 0.60,
            ..Default::default()
        };
        let recs = recommend(&seg(), &result, &current);
        let threshold = recs
            .iter()
            .find(|r| r.parameter == TunedParameter::ConfidenceThreshold)
            .expect("threshold recommendation");
        assert!((threshold.recommended.as_f64().unwrap() - 0.65).abs() < 1e-9);

        // Already at the ceiling: no churn.
        let capped = CurrentParams {
            confidence_threshold: tuning::CONFIDENCE_CEILING,
            ..Default::default()
        };
        let recs = recommend(&seg(), &result, &capped);
        assert!(recs
            .iter()
            .all(|r| r.parameter != TunedParameter::ConfidenceThreshold));
    }

    #[test]
    fn factor_rule_needs_high_ece_and_real_deviation() {
        // Well calibrated: ece ~0, no factor rec even though factors exist.
        let calibrated = result_from(&[(0.70, 40, 28)]);
        let recs = recommend(&seg(), &calibrated, &CurrentParams::default());
        assert!(recs
            .iter()
            .all(|r| r.parameter != TunedParameter::CalibrationFactors));

        // Overconfident: ece 0.3, factor 0.625 deviates well past 5%.
        let skewed = result_from(&[(0.80, 40, 20)]);
        let recs = recommend(&seg(), &skewed, &CurrentParams::default());
        let factors = recs
            .iter()
            .find(|r| r.parameter == TunedParameter::CalibrationFactors)
            .expect("factor recommendation");
        let map = factors.recommended.as_object().unwrap();
        assert_eq!(map.len(), 1);
        assert!((map["80-85%"].as_f64().unwrap() - 0.625).abs() < 1e-9);
    }

    #[test]
    fn every_confidence_stays_below_one() {
        let results = [
            result_from(&[(0.80, 500, 250)]),
            result_from(&[(0.57, 20, 9), (0.67, 20, 13)]),
            result_from(&[(0.55, 1000, 800)]),
        ];
        for result in &results {
            for rec in recommend(&seg(), result, &CurrentParams::default()) {
                assert!(rec.confidence < 1.0, "{}: {}", rec.parameter, rec.confidence);
                assert!(rec.confidence > 0.0);
            }
        }
    }
}
