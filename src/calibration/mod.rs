pub mod bins;
pub mod engine;

pub use bins::{bin_label, CalibrationBin};
pub use engine::{
    CalibrationEngine, CalibrationMethod, CalibrationResult, CalibrationSample, ConfidenceRatio,
    ReliabilityPoint,
};
