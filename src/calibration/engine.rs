use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calibration::bins::{bins_from_boundaries, uniform_boundaries, CalibrationBin};
use crate::config::{
    CALIBRATED_PROB_MAX, CALIBRATED_PROB_MIN, DEFAULT_BIN_WIDTH, LOG_LOSS_EPSILON, MIN_BIN_SAMPLES,
};

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One graded observation, the unit of bulk ingestion.
#[derive(Debug, Clone, Copy)]
pub struct CalibrationSample {
    pub predicted: f64,
    pub outcome: f64,
    pub edge: Option<f64>,
    pub profit: Option<f64>,
}

/// Accumulates graded (predicted, outcome) pairs for one segment and computes
/// calibration diagnostics over them. Pure and synchronous — callers feed it
/// from the store and persist whatever `snapshot` returns.
#[derive(Debug, Clone)]
pub struct CalibrationEngine {
    bins: Vec<CalibrationBin>,
    min_bin_samples: usize,
    samples: usize,
    brier_sum: f64,
    log_loss_sum: f64,
    outcome_sum: f64,
    edge_sum: f64,
    edge_count: usize,
    profit_sum: f64,
    profit_count: usize,
}

impl Default for CalibrationEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CalibrationEngine {
    pub fn new() -> Self {
        Self::with_boundaries(&uniform_boundaries(DEFAULT_BIN_WIDTH))
    }

    pub fn with_bin_width(width: f64) -> Self {
        Self::with_boundaries(&uniform_boundaries(width))
    }

    /// Custom bin edges, e.g. coarser tails. Edges must be ascending.
    pub fn with_boundaries(boundaries: &[f64]) -> Self {
        Self {
            bins: bins_from_boundaries(boundaries),
            min_bin_samples: MIN_BIN_SAMPLES,
            samples: 0,
            brier_sum: 0.0,
            log_loss_sum: 0.0,
            outcome_sum: 0.0,
            edge_sum: 0.0,
            edge_count: 0,
            profit_sum: 0.0,
            profit_count: 0,
        }
    }

    pub fn with_min_bin_samples(mut self, n: usize) -> Self {
        self.min_bin_samples = n;
        self
    }

    /// Ingest one graded sample. `outcome` is 1.0 for a win, 0.0 for a loss;
    /// `profit` is per unit staked. Non-finite inputs are dropped and the
    /// method reports whether the sample was taken.
    pub fn add_prediction(
        &mut self,
        predicted: f64,
        outcome: f64,
        edge: Option<f64>,
        profit: Option<f64>,
    ) -> bool {
        if !predicted.is_finite() || !outcome.is_finite() || self.bins.is_empty() {
            return false;
        }
        let predicted = predicted.clamp(0.0, 1.0);
        let outcome = outcome.clamp(0.0, 1.0);

        self.samples += 1;
        self.brier_sum += (predicted - outcome).powi(2);
        let clamped = predicted.clamp(LOG_LOSS_EPSILON, 1.0 - LOG_LOSS_EPSILON);
        self.log_loss_sum -= outcome * clamped.ln() + (1.0 - outcome) * (1.0 - clamped).ln();
        self.outcome_sum += outcome;
        if let Some(e) = edge {
            if e.is_finite() {
                self.edge_sum += e;
                self.edge_count += 1;
            }
        }
        if let Some(p) = profit {
            if p.is_finite() {
                self.profit_sum += p;
                self.profit_count += 1;
            }
        }

        let terminal_idx = self.bins.len() - 1;
        if let Some(bin) = self
            .bins
            .iter_mut()
            .enumerate()
            .find(|(i, b)| b.contains(predicted, *i == terminal_idx))
            .map(|(_, b)| b)
        {
            bin.record(predicted, outcome, profit);
        }
        true
    }

    /// Bulk ingest, skipping malformed samples. Returns how many were taken.
    pub fn add_batch(&mut self, samples: impl IntoIterator<Item = CalibrationSample>) -> usize {
        samples
            .into_iter()
            .filter(|s| self.add_prediction(s.predicted, s.outcome, s.edge, s.profit))
            .count()
    }

    pub fn sample_count(&self) -> usize {
        self.samples
    }

    // --- Aggregate scores -------------------------------------------------

    /// Mean squared error of predictions. 0.0 with no samples.
    pub fn brier_score(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.brier_sum / self.samples as f64
        }
    }

    /// Mean clamped negative log likelihood. 0.0 with no samples.
    pub fn log_loss(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.log_loss_sum / self.samples as f64
        }
    }

    pub fn hit_rate(&self) -> f64 {
        if self.samples == 0 {
            0.0
        } else {
            self.outcome_sum / self.samples as f64
        }
    }

    /// Mean profit per unit staked, over samples that carried a profit.
    pub fn roi(&self) -> f64 {
        if self.profit_count == 0 {
            0.0
        } else {
            self.profit_sum / self.profit_count as f64
        }
    }

    pub fn mean_edge(&self) -> f64 {
        if self.edge_count == 0 {
            0.0
        } else {
            self.edge_sum / self.edge_count as f64
        }
    }

    /// Expected calibration error: per-bin |predicted - actual| gaps weighted
    /// by each qualifying bin's share of qualifying samples.
    pub fn ece(&self) -> f64 {
        let qualifying: Vec<&CalibrationBin> = self
            .bins
            .iter()
            .filter(|b| b.count() >= self.min_bin_samples)
            .collect();
        let total: usize = qualifying.iter().map(|b| b.count()).sum();
        if total == 0 {
            return 0.0;
        }
        qualifying
            .iter()
            .map(|b| (b.count() as f64 / total as f64) * b.calibration_error())
            .sum()
    }

    /// Maximum calibration error across qualifying bins.
    pub fn mce(&self) -> f64 {
        self.bins
            .iter()
            .filter(|b| b.count() >= self.min_bin_samples)
            .map(|b| b.calibration_error())
            .fold(0.0, f64::max)
    }

    // --- Per-bin views ----------------------------------------------------

    /// Predicted-vs-actual points for every non-empty bin, in probability
    /// order. Consumers filter by `count` where qualification matters.
    pub fn reliability_curve(&self) -> Vec<ReliabilityPoint> {
        self.bins
            .iter()
            .filter(|b| b.count() > 0)
            .map(|b| ReliabilityPoint {
                bin: b.label.clone(),
                lower: b.lower,
                upper: b.upper,
                count: b.count(),
                mean_predicted: b.mean_predicted(),
                mean_actual: b.mean_actual(),
                calibration_error: b.calibration_error(),
            })
            .collect()
    }

    /// Multiplicative factor per bin label. Under-sampled bins stay at 1.0.
    pub fn calibration_factors(&self) -> BTreeMap<String, f64> {
        self.bins
            .iter()
            .map(|b| {
                let factor = if b.count() >= self.min_bin_samples {
                    b.calibration_factor()
                } else {
                    1.0
                };
                (b.label.clone(), factor)
            })
            .collect()
    }

    /// Monotonic probability map: (bin midpoint, running max of observed win
    /// frequency) over qualifying bins, in ascending probability order.
    pub fn isotonic_map(&self) -> Vec<(f64, f64)> {
        let mut running_max = 0.0_f64;
        self.bins
            .iter()
            .filter(|b| b.count() >= self.min_bin_samples)
            .map(|b| {
                running_max = running_max.max(b.mean_actual());
                (b.midpoint(), running_max)
            })
            .collect()
    }

    /// Weighted actual/predicted ratio over qualifying bins. None when no bin
    /// qualifies — callers must distinguish "don't know" from "ratio 1.0".
    pub fn weighted_confidence_ratio(&self) -> Option<ConfidenceRatio> {
        let mut predicted_sum = 0.0;
        let mut actual_sum = 0.0;
        let mut sample_size = 0;
        for bin in self.bins.iter().filter(|b| b.count() >= self.min_bin_samples) {
            predicted_sum += bin.mean_predicted() * bin.count() as f64;
            actual_sum += bin.mean_actual() * bin.count() as f64;
            sample_size += bin.count();
        }
        if sample_size == 0 || predicted_sum <= f64::EPSILON {
            return None;
        }
        Some(ConfidenceRatio {
            ratio: actual_sum / predicted_sum,
            sample_size,
        })
    }

    // --- Corrections ------------------------------------------------------

    /// Correct a raw model probability with the chosen method. Inputs the
    /// engine cannot place (non-finite, outside [0,1], empty map) come back
    /// unchanged; everything else is clamped away from certainty.
    /// Serving paths apply persisted factor maps instead (`LiveParams`); this
    /// is the in-memory counterpart for analysis over a loaded engine.
    #[allow(dead_code)]
    pub fn apply_calibration(&self, raw_prob: f64, method: CalibrationMethod) -> f64 {
        if !raw_prob.is_finite() || !(0.0..=1.0).contains(&raw_prob) || self.bins.is_empty() {
            return raw_prob;
        }
        match method {
            CalibrationMethod::Factor => {
                let terminal_idx = self.bins.len() - 1;
                let factor = self
                    .bins
                    .iter()
                    .enumerate()
                    .find(|(i, b)| b.contains(raw_prob, *i == terminal_idx))
                    .map(|(_, b)| {
                        if b.count() >= self.min_bin_samples {
                            b.calibration_factor()
                        } else {
                            1.0
                        }
                    });
                match factor {
                    Some(f) => (raw_prob * f).clamp(CALIBRATED_PROB_MIN, CALIBRATED_PROB_MAX),
                    None => raw_prob,
                }
            }
            CalibrationMethod::Isotonic => {
                let map = self.isotonic_map();
                if map.is_empty() {
                    return raw_prob;
                }
                interpolate(&map, raw_prob).clamp(CALIBRATED_PROB_MIN, CALIBRATED_PROB_MAX)
            }
        }
    }

    /// Freeze current state into an immutable result for persistence.
    /// `total_predictions` counts every record in the window, graded or not.
    pub fn snapshot(
        &self,
        window_start: i64,
        window_end: i64,
        total_predictions: usize,
    ) -> CalibrationResult {
        CalibrationResult {
            window_start,
            window_end,
            total_predictions,
            resolved_predictions: self.samples,
            brier_score: self.brier_score(),
            log_loss: self.log_loss(),
            ece: self.ece(),
            mce: self.mce(),
            hit_rate: self.hit_rate(),
            roi: self.roi(),
            mean_edge: self.mean_edge(),
            factors: self.calibration_factors(),
            reliability: self.reliability_curve(),
        }
    }
}

/// Piecewise-linear lookup with flat extrapolation beyond the endpoints.
fn interpolate(map: &[(f64, f64)], x: f64) -> f64 {
    let first = map[0];
    let last = map[map.len() - 1];
    if x <= first.0 {
        return first.1;
    }
    if x >= last.0 {
        return last.1;
    }
    for window in map.windows(2) {
        let (x0, y0) = window[0];
        let (x1, y1) = window[1];
        if x >= x0 && x <= x1 {
            if (x1 - x0).abs() <= f64::EPSILON {
                return y0;
            }
            let t = (x - x0) / (x1 - x0);
            return y0 + t * (y1 - y0);
        }
    }
    last.1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationMethod {
    Factor,
    Isotonic,
}

#[derive(Debug, Clone, Copy)]
pub struct ConfidenceRatio {
    /// Weighted mean actual over weighted mean predicted. 1.0 = calibrated,
    /// below 1.0 = overconfident.
    pub ratio: f64,
    pub sample_size: usize,
}

// ---------------------------------------------------------------------------
// Snapshot types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityPoint {
    pub bin: String,
    pub lower: f64,
    pub upper: f64,
    pub count: usize,
    pub mean_predicted: f64,
    pub mean_actual: f64,
    pub calibration_error: f64,
}

/// Immutable calibration snapshot. The (segment, model version) key lives
/// with the persistence layer; this struct is pure measurement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalibrationResult {
    pub window_start: i64,
    pub window_end: i64,
    pub total_predictions: usize,
    pub resolved_predictions: usize,
    pub brier_score: f64,
    pub log_loss: f64,
    pub ece: f64,
    pub mce: f64,
    pub hit_rate: f64,
    pub roi: f64,
    pub mean_edge: f64,
    pub factors: BTreeMap<String, f64>,
    pub reliability: Vec<ReliabilityPoint>,
}
