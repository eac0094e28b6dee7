use serde::{Deserialize, Serialize};

use crate::backtest::BacktestRecord;
use crate::config::transform_fit;

/// Two-parameter rescale on log-odds plus a shrinkage blend toward the
/// market-implied probability. Applied at decision time before the edge is
/// computed, and during backtests before bets are simulated.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProbTransform {
    pub scale: f64,
    pub bias: f64,
    pub shrinkage: f64,
}

impl Default for ProbTransform {
    /// Identity: raw probabilities pass through untouched.
    fn default() -> Self {
        Self {
            scale: 1.0,
            bias: 0.0,
            shrinkage: 0.0,
        }
    }
}

impl ProbTransform {
    pub fn is_identity(&self) -> bool {
        self.scale == 1.0 && self.bias == 0.0 && self.shrinkage == 0.0
    }

    /// sigmoid(scale * logit(raw) + bias), then blended toward the market.
    pub fn apply(&self, raw_prob: f64, market_prob: f64) -> f64 {
        if !raw_prob.is_finite() {
            return raw_prob;
        }
        let rescaled = sigmoid(self.scale * logit(raw_prob) + self.bias);
        let market = if market_prob.is_finite() {
            market_prob.clamp(0.0, 1.0)
        } else {
            rescaled
        };
        (1.0 - self.shrinkage) * rescaled + self.shrinkage * market
    }
}

fn logit(p: f64) -> f64 {
    let p = p.clamp(1e-9, 1.0 - 1e-9);
    (p / (1.0 - p)).ln()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Fit (scale, bias) then shrinkage by exhaustive grid search, minimizing the
/// Brier score over the fitting sample. Pushes and voids carry no binary
/// outcome and are skipped; with no usable rows the identity comes back.
pub fn fit(records: &[BacktestRecord]) -> ProbTransform {
    let samples: Vec<(f64, f64, f64)> = records
        .iter()
        .filter_map(|r| {
            r.result
                .binary()
                .map(|outcome| (r.predicted_prob, r.market_prob, outcome))
        })
        .collect();
    if samples.is_empty() {
        return ProbTransform::default();
    }

    let mut best = ProbTransform::default();
    let mut best_brier = brier_for(&samples, &best);

    // Pass 1: scale and bias with no shrinkage.
    let mut scale = transform_fit::SCALE_MIN;
    while scale <= transform_fit::SCALE_MAX + 1e-9 {
        let mut bias = transform_fit::BIAS_MIN;
        while bias <= transform_fit::BIAS_MAX + 1e-9 {
            let candidate = ProbTransform {
                scale,
                bias,
                shrinkage: 0.0,
            };
            let brier = brier_for(&samples, &candidate);
            if brier < best_brier {
                best_brier = brier;
                best = candidate;
            }
            bias += transform_fit::BIAS_STEP;
        }
        scale += transform_fit::SCALE_STEP;
    }

    // Pass 2: shrinkage toward the market, holding (scale, bias) fixed.
    let mut chosen = ProbTransform {
        shrinkage: transform_fit::SHRINKAGE_MIN,
        ..best
    };
    let mut chosen_brier = f64::INFINITY;
    let mut shrinkage = transform_fit::SHRINKAGE_MIN;
    while shrinkage <= transform_fit::SHRINKAGE_MAX + 1e-9 {
        let candidate = ProbTransform { shrinkage, ..best };
        let brier = brier_for(&samples, &candidate);
        if brier < chosen_brier {
            chosen_brier = brier;
            chosen = candidate;
        }
        shrinkage += transform_fit::SHRINKAGE_STEP;
    }
    chosen
}

fn brier_for(samples: &[(f64, f64, f64)], transform: &ProbTransform) -> f64 {
    let sum: f64 = samples
        .iter()
        .map(|&(raw, market, outcome)| {
            let p = transform.apply(raw, market);
            (p - outcome).powi(2)
        })
        .sum();
    sum / samples.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketKind, OutcomeResult, Segment};

    fn record(predicted: f64, market: f64, result: OutcomeResult) -> BacktestRecord {
        BacktestRecord {
            created_at: 0,
            segment: Segment::new("nba", MarketKind::Moneyline),
            predicted_prob: predicted,
            market_prob: market,
            decimal_odds: None,
            result,
        }
    }

    #[test]
    fn identity_transform_passes_probabilities_through() {
        let t = ProbTransform::default();
        assert!(t.is_identity());
        for p in [0.1, 0.5, 0.73, 0.9] {
            assert!((t.apply(p, 0.5) - p).abs() < 1e-9);
        }
    }

    #[test]
    fn shrinkage_pulls_toward_market() {
        let t = ProbTransform {
            scale: 1.0,
            bias: 0.0,
            shrinkage: 0.25,
        };
        let out = t.apply(0.70, 0.50);
        assert!((out - (0.75 * 0.70 + 0.25 * 0.50)).abs() < 1e-9);
    }

    #[test]
    fn negative_bias_deflates_probabilities() {
        let t = ProbTransform {
            scale: 1.0,
            bias: -0.4,
            shrinkage: 0.0,
        };
        assert!(t.apply(0.70, 0.5) < 0.70);
        // Scale below 1 compresses toward 0.5 from both sides.
        let t = ProbTransform {
            scale: 0.5,
            bias: 0.0,
            shrinkage: 0.0,
        };
        assert!(t.apply(0.80, 0.5) < 0.80);
        assert!(t.apply(0.20, 0.5) > 0.20);
    }

    #[test]
    fn fit_on_empty_sample_is_identity() {
        assert!(fit(&[]).is_identity());
        // Pushes only — still nothing to fit on.
        let pushes = vec![record(0.6, 0.5, OutcomeResult::Push)];
        assert!(fit(&pushes).is_identity());
    }

    #[test]
    fn fit_corrects_systematic_overconfidence() {
        // Model says 0.75, true rate is 0.55: the fitted transform must pull
        // predictions down and beat the raw Brier score in-sample.
        let mut records = Vec::new();
        for i in 0..200 {
            let result = if i % 100 < 55 {
                OutcomeResult::Win
            } else {
                OutcomeResult::Loss
            };
            records.push(record(0.75, 0.55, result));
        }
        let fitted = fit(&records);
        let corrected = fitted.apply(0.75, 0.55);
        assert!(corrected < 0.70, "corrected {corrected} should drop");

        let samples: Vec<(f64, f64, f64)> = records
            .iter()
            .filter_map(|r| r.result.binary().map(|o| (0.75, 0.55, o)))
            .collect();
        let raw_brier = brier_for(&samples, &ProbTransform::default());
        let fit_brier = brier_for(&samples, &fitted);
        assert!(fit_brier < raw_brier);
    }

    #[test]
    fn fitted_shrinkage_stays_inside_grid() {
        let mut records = Vec::new();
        for i in 0..100 {
            let result = if i % 2 == 0 {
                OutcomeResult::Win
            } else {
                OutcomeResult::Loss
            };
            records.push(record(0.6, 0.5, result));
        }
        let fitted = fit(&records);
        assert!(fitted.shrinkage >= transform_fit::SHRINKAGE_MIN - 1e-9);
        assert!(fitted.shrinkage <= transform_fit::SHRINKAGE_MAX + 1e-9);
    }
}
