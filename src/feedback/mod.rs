pub mod live;
pub mod policy;

pub use live::LiveParams;
pub use policy::{
    classify_recent_form, ConfidenceTier, DynamicThresholdPolicy, ModelHealth, ThresholdDecision,
};
