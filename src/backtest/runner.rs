use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{info, warn};

use crate::backtest::split::{time_split, verify_temporal_integrity, TimeSplit};
use crate::backtest::threshold::{candidate_grid, evaluate_candidate, select_threshold, SimBet};
use crate::backtest::transform::{self, ProbTransform};
use crate::backtest::BacktestRecord;
use crate::calibration::{CalibrationEngine, CalibrationResult};
use crate::config::feedback::DEFAULT_BASE_THRESHOLD;
use crate::error::{AppError, Result};
use crate::types::Segment;

/// Per-segment products of one backtest: the threshold that survived the
/// grid and the transform fitted on the train window.
#[derive(Debug, Clone)]
pub struct SegmentFit {
    pub segment: Segment,
    pub threshold: f64,
    /// True when no candidate qualified and the fallback was used.
    pub threshold_is_default: bool,
    pub transform: ProbTransform,
    pub train_rows: usize,
    pub test_rows: usize,
}

#[derive(Debug)]
pub struct BacktestReport {
    pub split: TimeSplit,
    pub fits: Vec<SegmentFit>,
    /// Out-of-sample measurement across every simulated bet.
    pub aggregate: CalibrationResult,
    pub per_segment: Vec<(Segment, CalibrationResult)>,
}

/// Chronological backtest: fit thresholds and transforms on the early part
/// of a window, then measure them on the later part. Pure in-memory — the
/// caller loads records and persists whatever it wants from the report, so
/// a cancelled run never leaves partial state anywhere.
pub struct BacktestRunner {
    train_fraction: f64,
    fallback_threshold: f64,
    cancel: Arc<AtomicBool>,
}

impl BacktestRunner {
    pub fn new(train_fraction: f64) -> Self {
        Self {
            train_fraction,
            fallback_threshold: DEFAULT_BASE_THRESHOLD,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Shared flag checked between candidate evaluations. Setting it makes
    /// the in-flight run return an error instead of a report.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn cancelled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn run(
        &self,
        mut records: Vec<BacktestRecord>,
        window_start: i64,
        window_end: i64,
    ) -> Result<BacktestReport> {
        let split = time_split(window_start, window_end, self.train_fraction)?;
        records.sort_by_key(|r| r.created_at);

        let mut train = Vec::new();
        let mut test = Vec::new();
        for record in records {
            if split.is_train(record.created_at) {
                train.push(record);
            } else if split.is_test(record.created_at) {
                test.push(record);
            }
        }
        if train.is_empty() {
            return Err(AppError::Backtest(
                "no records in the training window".to_string(),
            ));
        }
        if test.is_empty() {
            return Err(AppError::Backtest(
                "no records in the test window".to_string(),
            ));
        }
        verify_temporal_integrity(&train, &test);

        // Group both sides by segment, deterministically ordered.
        let mut segments: BTreeMap<String, SegmentSlice> = BTreeMap::new();
        for record in train {
            segments
                .entry(record.segment.key())
                .or_insert_with(|| SegmentSlice::new(record.segment.clone()))
                .train
                .push(record);
        }
        for record in test {
            segments
                .entry(record.segment.key())
                .or_insert_with(|| SegmentSlice::new(record.segment.clone()))
                .test
                .push(record);
        }

        let grid = candidate_grid();
        let mut fits = Vec::new();
        let mut per_segment = Vec::new();
        let mut aggregate = CalibrationEngine::new();
        let mut aggregate_test_rows = 0usize;

        for slice in segments.values() {
            if self.cancelled() {
                return Err(AppError::Backtest("run cancelled".to_string()));
            }

            let fitted = transform::fit(&slice.train);
            let train_bets = sim_bets(&slice.train, &fitted);

            let mut evals = Vec::with_capacity(grid.len());
            for &threshold in &grid {
                if self.cancelled() {
                    return Err(AppError::Backtest("run cancelled".to_string()));
                }
                evals.push(evaluate_candidate(threshold, &train_bets));
            }

            let (threshold, is_default) = match select_threshold(&evals) {
                Some(eval) => (eval.threshold, false),
                None => {
                    warn!(
                        segment = %slice.segment,
                        train_rows = slice.train.len(),
                        fallback = self.fallback_threshold,
                        "no threshold candidate qualified, using fallback"
                    );
                    (self.fallback_threshold, true)
                }
            };

            // Out-of-sample: same transform, chosen threshold, later rows.
            let mut segment_engine = CalibrationEngine::new();
            for bet in oos_bets(&slice.test, &fitted, threshold) {
                segment_engine.add_prediction(bet.0, bet.1, Some(bet.2), Some(bet.3));
                aggregate.add_prediction(bet.0, bet.1, Some(bet.2), Some(bet.3));
            }
            aggregate_test_rows += slice.test.len();

            info!(
                segment = %slice.segment,
                threshold,
                is_default,
                scale = fitted.scale,
                bias = fitted.bias,
                shrinkage = fitted.shrinkage,
                oos_bets = segment_engine.sample_count(),
                "segment backtest complete"
            );

            per_segment.push((
                slice.segment.clone(),
                segment_engine.snapshot(split.split, split.end, slice.test.len()),
            ));
            fits.push(SegmentFit {
                segment: slice.segment.clone(),
                threshold,
                threshold_is_default: is_default,
                transform: fitted,
                train_rows: slice.train.len(),
                test_rows: slice.test.len(),
            });
        }

        Ok(BacktestReport {
            split,
            fits,
            aggregate: aggregate.snapshot(split.split, split.end, aggregate_test_rows),
            per_segment,
        })
    }
}

struct SegmentSlice {
    segment: Segment,
    train: Vec<BacktestRecord>,
    test: Vec<BacktestRecord>,
}

impl SegmentSlice {
    fn new(segment: Segment) -> Self {
        Self {
            segment,
            train: Vec::new(),
            test: Vec::new(),
        }
    }
}

fn sim_bets(records: &[BacktestRecord], transform: &ProbTransform) -> Vec<SimBet> {
    records
        .iter()
        .map(|r| {
            let p = transform.apply(r.predicted_prob, r.market_prob);
            SimBet {
                created_at: r.created_at,
                edge: p - r.market_prob,
                result: r.result,
                unit_profit: r.unit_profit(),
            }
        })
        .collect()
}

/// (calibrated prob, binary outcome, edge, unit profit) for each decided
/// test row the threshold would have bet. Pushes and voids drop out here.
fn oos_bets(
    records: &[BacktestRecord],
    transform: &ProbTransform,
    threshold: f64,
) -> Vec<(f64, f64, f64, f64)> {
    records
        .iter()
        .filter_map(|r| {
            let p = transform.apply(r.predicted_prob, r.market_prob);
            let edge = p - r.market_prob;
            if edge < threshold {
                return None;
            }
            r.result
                .binary()
                .map(|outcome| (p, outcome, edge, r.unit_profit()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketKind, OutcomeResult};

    fn record(
        created_at: i64,
        segment: Segment,
        predicted: f64,
        market: f64,
        result: OutcomeResult,
    ) -> BacktestRecord {
        BacktestRecord {
            created_at,
            segment,
            predicted_prob: predicted,
            market_prob: market,
            decimal_odds: None,
            result,
        }
    }

    /// 150 train rows then 50 test rows of a 58%-true model priced at 0.50.
    fn synthetic_segment(segment: &Segment) -> Vec<BacktestRecord> {
        let mut records = Vec::new();
        for i in 0..150_i64 {
            let result = if i % 50 < 29 {
                OutcomeResult::Win
            } else {
                OutcomeResult::Loss
            };
            records.push(record(i, segment.clone(), 0.60, 0.50, result));
        }
        for i in 0..50_i64 {
            let result = if i % 50 < 29 {
                OutcomeResult::Win
            } else {
                OutcomeResult::Loss
            };
            records.push(record(700 + i, segment.clone(), 0.60, 0.50, result));
        }
        records
    }

    #[test]
    fn empty_train_window_fails_hard() {
        let seg = Segment::new("nba", MarketKind::Moneyline);
        let records = vec![record(950, seg, 0.6, 0.5, OutcomeResult::Win)];
        let err = BacktestRunner::new(0.7).run(records, 0, 1000).unwrap_err();
        assert!(err.to_string().contains("training window"));
    }

    #[test]
    fn empty_test_window_fails_hard() {
        let seg = Segment::new("nba", MarketKind::Moneyline);
        let records = vec![
            record(10, seg.clone(), 0.6, 0.5, OutcomeResult::Win),
            record(20, seg, 0.6, 0.5, OutcomeResult::Loss),
        ];
        let err = BacktestRunner::new(0.7).run(records, 0, 1000).unwrap_err();
        assert!(err.to_string().contains("test window"));
    }

    #[test]
    fn profitable_segment_gets_grid_threshold_and_oos_metrics() {
        let seg = Segment::new("nba", MarketKind::Moneyline);
        let report = BacktestRunner::new(0.7)
            .run(synthetic_segment(&seg), 0, 1000)
            .unwrap();

        assert_eq!(report.split.split, 700);
        assert_eq!(report.fits.len(), 1);
        let fit = &report.fits[0];
        assert!(!fit.threshold_is_default);
        // Same bet set at every qualifying threshold -> tie broken low.
        assert!((fit.threshold - 0.01).abs() < 1e-9);
        assert_eq!(fit.train_rows, 150);
        assert_eq!(fit.test_rows, 50);

        // All 50 decided test rows clear the lowest threshold.
        assert_eq!(report.aggregate.resolved_predictions, 50);
        assert_eq!(report.aggregate.total_predictions, 50);
        assert!((report.aggregate.hit_rate - 0.58).abs() < 1e-9);
        assert_eq!(report.per_segment.len(), 1);
    }

    #[test]
    fn sparse_segment_falls_back_to_default_threshold() {
        let nba = Segment::new("nba", MarketKind::Moneyline);
        let nhl = Segment::new("nhl", MarketKind::Total);
        let mut records = synthetic_segment(&nba);
        // Ten train rows and one test row cannot clear the volume floor.
        for i in 0..10_i64 {
            records.push(record(i, nhl.clone(), 0.55, 0.50, OutcomeResult::Win));
        }
        records.push(record(750, nhl.clone(), 0.55, 0.50, OutcomeResult::Win));

        let report = BacktestRunner::new(0.7).run(records, 0, 1000).unwrap();
        let nhl_fit = report
            .fits
            .iter()
            .find(|f| f.segment == nhl)
            .expect("nhl fit present");
        assert!(nhl_fit.threshold_is_default);
        assert!((nhl_fit.threshold - DEFAULT_BASE_THRESHOLD).abs() < 1e-9);

        let nba_fit = report.fits.iter().find(|f| f.segment == nba).unwrap();
        assert!(!nba_fit.threshold_is_default);
    }

    #[test]
    fn cancelled_run_returns_error_not_partial_report() {
        let seg = Segment::new("nba", MarketKind::Moneyline);
        let runner = BacktestRunner::new(0.7);
        runner.cancel_flag().store(true, Ordering::Relaxed);
        let err = runner.run(synthetic_segment(&seg), 0, 1000).unwrap_err();
        assert!(err.to_string().contains("cancelled"));
    }

    #[test]
    fn rows_outside_the_window_are_ignored() {
        let seg = Segment::new("nba", MarketKind::Moneyline);
        let mut records = synthetic_segment(&seg);
        records.push(record(-50, seg.clone(), 0.9, 0.5, OutcomeResult::Win));
        records.push(record(2000, seg.clone(), 0.9, 0.5, OutcomeResult::Win));
        let report = BacktestRunner::new(0.7).run(records, 0, 1000).unwrap();
        assert_eq!(report.fits[0].train_rows, 150);
        assert_eq!(report.fits[0].test_rows, 50);
    }
}
