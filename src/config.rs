use crate::error::{AppError, Result};

/// Default calibration bin width — 5% probability bands.
pub const DEFAULT_BIN_WIDTH: f64 = 0.05;

/// Bins with fewer samples than this report a neutral calibration factor
/// and are excluded from ECE/MCE and the isotonic map.
pub const MIN_BIN_SAMPLES: usize = 10;

/// Log-loss clamp: probabilities are pulled into [eps, 1-eps] before ln().
pub const LOG_LOSS_EPSILON: f64 = 1e-15;

/// Probabilities stored on a prediction record are clamped into this range.
/// Non-finite values are rejected outright.
pub const PROB_CLAMP_MIN: f64 = 0.001;
pub const PROB_CLAMP_MAX: f64 = 0.999;

/// Factor-calibrated probabilities are bounded away from certainty.
pub const CALIBRATED_PROB_MIN: f64 = 0.05;
pub const CALIBRATED_PROB_MAX: f64 = 0.95;

/// Batch job interval (seconds).
pub const BATCH_INTERVAL_SECS: u64 = 3600;

/// Default probability transform applied when a segment has no fitted one.
pub const IDENTITY_SCALE: f64 = 1.0;
pub const IDENTITY_BIAS: f64 = 0.0;

/// Edge-threshold grid searched by the backtester.
pub mod threshold_grid {
    pub const MIN_EDGE: f64 = 0.01;
    pub const MAX_EDGE: f64 = 0.10;
    pub const STEP: f64 = 0.005;
    /// Candidates that would have placed fewer bets than this are rejected.
    pub const MIN_BETS: usize = 100;
    /// Candidates with a simulated hit rate below this are rejected.
    pub const MIN_HIT_RATE: f64 = 0.45;
}

/// Grid bounds for probability-transform fitting. Scale/bias act on log-odds,
/// shrinkage blends the rescaled probability toward the market-implied one.
pub mod transform_fit {
    pub const SCALE_MIN: f64 = 0.5;
    pub const SCALE_MAX: f64 = 1.5;
    pub const SCALE_STEP: f64 = 0.05;
    pub const BIAS_MIN: f64 = -0.5;
    pub const BIAS_MAX: f64 = 0.5;
    pub const BIAS_STEP: f64 = 0.05;
    pub const SHRINKAGE_MIN: f64 = 0.05;
    pub const SHRINKAGE_MAX: f64 = 0.25;
    pub const SHRINKAGE_STEP: f64 = 0.05;
}

/// Tuner rule bands and step bounds.
pub mod tuning {
    /// Stake fraction assumed for a segment that has never been tuned.
    pub const DEFAULT_STAKE_FRACTION: f64 = 0.01;
    /// Confidence threshold assumed for a segment that has never been tuned.
    pub const DEFAULT_CONFIDENCE_THRESHOLD: f64 = 0.55;
    /// Confidence ratio below which the stake fraction is cut.
    pub const RATIO_DECREASE_BELOW: f64 = 0.90;
    /// Confidence ratio above which the stake fraction may be raised.
    pub const RATIO_INCREASE_ABOVE: f64 = 1.10;
    /// Largest stake-fraction decrease per tuning pass.
    pub const DECREASE_STEP: f64 = 0.005;
    /// Increases are more cautious than decreases.
    pub const INCREASE_STEP: f64 = 0.002;
    pub const STAKE_FLOOR: f64 = 0.005;
    pub const STAKE_CEILING: f64 = 0.05;
    /// Break-even win probability at standard -110 pricing.
    pub const BREAK_EVEN_PROB: f64 = 0.524;
    /// Ceiling the confidence threshold is pushed toward when no bin clears break-even.
    pub const CONFIDENCE_CEILING: f64 = 0.80;
    /// Step used when raising the confidence threshold toward the ceiling.
    pub const CONFIDENCE_STEP: f64 = 0.05;
    /// Factor-map recommendations only fire above this ECE.
    pub const ECE_LIMIT: f64 = 0.05;
    /// ...and only for bins whose factor deviates from 1.0 by more than this.
    pub const FACTOR_DEVIATION: f64 = 0.05;
}

/// ECE buckets used by the tuning summary.
pub mod health_buckets {
    pub const GOOD: f64 = 0.03;
    pub const ACCEPTABLE: f64 = 0.05;
    pub const NEEDS_ATTENTION: f64 = 0.08;
}

/// Dynamic threshold feedback bounds.
pub mod feedback {
    /// Settled predictions required before recent form is trusted.
    pub const MIN_WINDOW: usize = 20;
    /// How many recent graded records the policy reads.
    pub const WINDOW_SIZE: i64 = 50;
    /// Recent Brier above this means the model is running cold.
    pub const BRIER_COLD: f64 = 0.28;
    /// Recent Brier below this means the model is running hot.
    pub const BRIER_HOT: f64 = 0.22;
    /// Edge threshold enforced while cold.
    pub const COLD_THRESHOLD: f64 = 0.05;
    /// Edge threshold allowed while hot.
    pub const HOT_THRESHOLD: f64 = 0.03;
    /// Fallback edge threshold when no configured value exists.
    pub const DEFAULT_BASE_THRESHOLD: f64 = 0.04;
    /// A hot-streak tier upgrade requires the edge to be at least this
    /// multiple of the active threshold.
    pub const UPGRADE_EDGE_MULT: f64 = 2.0;
}

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Seconds between batch tuning runs (TUNER_BATCH_INTERVAL_SECS)
    pub batch_interval_secs: u64,
    /// Trailing calibration window in days (TUNER_WINDOW_DAYS)
    pub window_days: i64,
    /// Recommendations below this confidence are discarded (TUNER_MIN_CONFIDENCE)
    pub min_confidence: f64,
    /// Whether the batch job writes surviving recommendations (TUNER_AUTO_APPLY)
    pub auto_apply: bool,
    /// Train fraction for scheduled backtests (TUNER_TRAIN_FRACTION)
    pub train_fraction: f64,
    /// A full backtest runs every N batch runs (TUNER_BACKTEST_EVERY_RUNS)
    pub backtest_every_runs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "tuner.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            batch_interval_secs: std::env::var("TUNER_BATCH_INTERVAL_SECS")
                .unwrap_or_else(|_| BATCH_INTERVAL_SECS.to_string())
                .parse::<u64>()
                .unwrap_or(BATCH_INTERVAL_SECS),
            window_days: std::env::var("TUNER_WINDOW_DAYS")
                .unwrap_or_else(|_| "30".to_string())
                .parse::<i64>()
                .unwrap_or(30),
            min_confidence: std::env::var("TUNER_MIN_CONFIDENCE")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse::<f64>()
                .unwrap_or(0.5),
            auto_apply: std::env::var("TUNER_AUTO_APPLY")
                .unwrap_or_else(|_| "false".to_string())
                .parse::<bool>()
                .unwrap_or(false),
            train_fraction: std::env::var("TUNER_TRAIN_FRACTION")
                .unwrap_or_else(|_| "0.7".to_string())
                .parse::<f64>()
                .unwrap_or(0.7),
            backtest_every_runs: std::env::var("TUNER_BACKTEST_EVERY_RUNS")
                .unwrap_or_else(|_| "24".to_string())
                .parse::<u64>()
                .unwrap_or(24),
        })
    }
}
