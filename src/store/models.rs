//! Database row types. Used by sqlx for typed queries; enum-ish columns are
//! stored as their snake_case strings and parsed back on the way out.

use crate::backtest::BacktestRecord;
use crate::calibration::CalibrationSample;
use crate::types::{MarketKind, OutcomeResult, RecordStatus, Segment};

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PredictionRow {
    pub id: i64,
    pub created_at: i64,
    pub league: String,
    pub market: String,
    pub model_version: String,
    pub status: String,

    pub predicted_prob: f64,
    pub selection: String,
    pub dist_mean: Option<f64>,
    pub dist_std: Option<f64>,

    pub line: Option<f64>,
    pub prop_name: Option<String>,
    pub market_prob: f64,
    pub decimal_odds: Option<f64>,
    pub closing_prob: Option<f64>,

    pub outcome: Option<String>,
    pub actual_value: Option<f64>,
    pub resolved_at: Option<i64>,

    pub edge: f64,
    pub stake: Option<f64>,
    pub profit: Option<f64>,

    pub brier_component: Option<f64>,
    pub log_loss_component: Option<f64>,
    pub confidence_bin: Option<String>,
    pub percentile_rank: Option<f64>,
    pub edge_realized: Option<i64>,
    pub closing_line_value: Option<f64>,
    pub graded_at: Option<i64>,

    pub invalid_reason: Option<String>,
}

impl PredictionRow {
    pub fn record_status(&self) -> Option<RecordStatus> {
        RecordStatus::parse(&self.status)
    }

    pub fn market_kind(&self) -> Option<MarketKind> {
        MarketKind::parse(&self.market)
    }

    pub fn segment(&self) -> Option<Segment> {
        self.market_kind()
            .map(|kind| Segment::new(self.league.clone(), kind))
    }

    pub fn outcome_result(&self) -> Option<OutcomeResult> {
        self.outcome.as_deref().and_then(OutcomeResult::parse)
    }

    /// Profit per unit staked, when both sides are known.
    pub fn unit_profit(&self) -> Option<f64> {
        match (self.profit, self.stake) {
            (Some(profit), Some(stake)) if stake > 0.0 => Some(profit / stake),
            _ => None,
        }
    }

    /// Graded win/loss rows feed the calibration engine; pushes and voids
    /// have no binary outcome and are skipped.
    pub fn calibration_sample(&self) -> Option<CalibrationSample> {
        let outcome = self.outcome_result()?.binary()?;
        Some(CalibrationSample {
            predicted: self.predicted_prob,
            outcome,
            edge: Some(self.edge),
            profit: self.unit_profit(),
        })
    }

    /// Settled rows become backtest inputs; anything without an outcome or
    /// a recognizable segment is skipped.
    pub fn to_backtest_record(&self) -> Option<BacktestRecord> {
        let segment = self.segment()?;
        let result = self.outcome_result()?;
        Some(BacktestRecord {
            created_at: self.created_at,
            segment,
            predicted_prob: self.predicted_prob,
            market_prob: self.market_prob,
            decimal_odds: self.decimal_odds,
            result,
        })
    }
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CalibrationResultRow {
    pub id: i64,
    pub created_at: i64,
    pub league: String,
    pub market: String,
    pub model_version: String,
    pub window_start: i64,
    pub window_end: i64,
    pub total_predictions: i64,
    pub resolved_predictions: i64,
    pub brier_score: f64,
    pub log_loss: f64,
    pub ece: f64,
    pub mce: f64,
    pub hit_rate: f64,
    pub roi: f64,
    pub mean_edge: f64,
    pub factors_json: String,
    pub reliability_json: String,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConfigEntryRow {
    pub key: String,
    pub value: String,
    pub version: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ConfigBackupRow {
    pub id: String,
    pub created_at: i64,
    pub entries_json: String,
}
