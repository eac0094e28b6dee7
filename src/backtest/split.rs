use tracing::warn;

use crate::backtest::BacktestRecord;
use crate::error::{AppError, Result};

/// A chronological train/test boundary. All bounds are unix seconds.
/// Train rows live in [start, split), test rows in [split, end].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSplit {
    pub start: i64,
    pub split: i64,
    pub end: i64,
}

impl TimeSplit {
    pub fn is_train(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.split
    }

    pub fn is_test(&self, ts: i64) -> bool {
        ts >= self.split && ts <= self.end
    }
}

/// split = start + floor((end - start) * train_fraction).
/// The fraction is clamped into [0, 1]; an empty window is an error.
pub fn time_split(start: i64, end: i64, train_fraction: f64) -> Result<TimeSplit> {
    if end <= start {
        return Err(AppError::Backtest(format!(
            "invalid backtest window: start {start} >= end {end}"
        )));
    }
    let fraction = if train_fraction.is_finite() {
        train_fraction.clamp(0.0, 1.0)
    } else {
        0.0
    };
    let split = start + ((end - start) as f64 * fraction).floor() as i64;
    Ok(TimeSplit { start, split, end })
}

/// Leakage check: every train timestamp must precede every test timestamp.
/// A violation is logged and reported, never raised — the caller decides
/// whether the run is still worth keeping.
pub fn verify_temporal_integrity(train: &[BacktestRecord], test: &[BacktestRecord]) -> bool {
    let max_train = train.iter().map(|r| r.created_at).max();
    let min_test = test.iter().map(|r| r.created_at).min();
    match (max_train, min_test) {
        (Some(max_train), Some(min_test)) if max_train >= min_test => {
            warn!(
                max_train,
                min_test, "temporal integrity violated: train rows overlap test window"
            );
            false
        }
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketKind, OutcomeResult, Segment};

    const DAY: i64 = 86_400;

    fn record(created_at: i64) -> BacktestRecord {
        BacktestRecord {
            created_at,
            segment: Segment::new("nba", MarketKind::Moneyline),
            predicted_prob: 0.6,
            market_prob: 0.5,
            decimal_odds: Some(1.91),
            result: OutcomeResult::Win,
        }
    }

    #[test]
    fn split_is_floor_of_fractional_point() {
        // 1000 days at 70% -> split exactly 700 days in.
        let split = time_split(0, 1000 * DAY, 0.7).unwrap();
        assert_eq!(split.split, 700 * DAY);

        // Fractional products floor toward start: floor(10 * 0.33) = 3.
        let split = time_split(0, 10, 0.33).unwrap();
        assert_eq!(split.split, 3);
    }

    #[test]
    fn split_assigns_rows_chronologically() {
        let split = time_split(0, 100, 0.7).unwrap();
        assert!(split.is_train(0));
        assert!(split.is_train(69));
        assert!(!split.is_train(70));
        assert!(split.is_test(70));
        assert!(split.is_test(100));
        assert!(!split.is_test(101));
    }

    #[test]
    fn empty_window_is_an_error() {
        assert!(time_split(100, 100, 0.7).is_err());
        assert!(time_split(200, 100, 0.7).is_err());
    }

    #[test]
    fn fraction_is_clamped() {
        let split = time_split(0, 100, 1.7).unwrap();
        assert_eq!(split.split, 100);
        let split = time_split(0, 100, -0.5).unwrap();
        assert_eq!(split.split, 0);
        let split = time_split(0, 100, f64::NAN).unwrap();
        assert_eq!(split.split, 0);
    }

    #[test]
    fn integrity_check_reports_overlap_without_failing() {
        let train = vec![record(10), record(50)];
        let test = vec![record(60), record(90)];
        assert!(verify_temporal_integrity(&train, &test));

        let leaky_test = vec![record(40)];
        assert!(!verify_temporal_integrity(&train, &leaky_test));

        // Empty sides are trivially ordered.
        assert!(verify_temporal_integrity(&[], &test));
        assert!(verify_temporal_integrity(&train, &[]));
    }
}
