pub mod apply;
pub mod recommend;
pub mod summary;

pub use apply::{AppliedChange, ApplyOutcome, Tuner};
pub use recommend::{recommend, CurrentParams, TunedParameter, TuningRecommendation};
pub use summary::{tuning_summary, HealthBucket, SegmentHealth, TuningSummary};
