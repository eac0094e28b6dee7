pub mod runner;
pub mod split;
pub mod threshold;
pub mod transform;

pub use runner::{BacktestReport, BacktestRunner, SegmentFit};
pub use split::{time_split, TimeSplit};
pub use threshold::CandidateEval;
pub use transform::ProbTransform;

use crate::types::{OutcomeResult, Segment};

/// The slice of a settled record the backtester needs. Built from store rows
/// by the caller; the runner itself never touches the database.
#[derive(Debug, Clone)]
pub struct BacktestRecord {
    pub created_at: i64,
    pub segment: Segment,
    pub predicted_prob: f64,
    pub market_prob: f64,
    pub decimal_odds: Option<f64>,
    pub result: OutcomeResult,
}

impl BacktestRecord {
    /// Decimal odds actually simulated: the quoted price when present,
    /// otherwise fair odds implied by the market probability.
    pub fn sim_odds(&self) -> f64 {
        match self.decimal_odds {
            Some(o) if o > 1.0 => o,
            _ => {
                if self.market_prob > f64::EPSILON {
                    1.0 / self.market_prob
                } else {
                    1.0
                }
            }
        }
    }

    /// Profit per unit staked if this bet had been placed.
    pub fn unit_profit(&self) -> f64 {
        match self.result {
            OutcomeResult::Win => self.sim_odds() - 1.0,
            OutcomeResult::Loss => -1.0,
            OutcomeResult::Push | OutcomeResult::Void => 0.0,
        }
    }
}
