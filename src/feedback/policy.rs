use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use crate::config::feedback;
use crate::feedback::live::LiveParams;
use crate::store::config_store::edge_threshold_key;
use crate::store::PredictionStore;
use crate::types::Segment;

// ---------------------------------------------------------------------------
// Recent-form classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelHealth {
    Cold,
    Normal,
    Hot,
}

impl std::fmt::Display for ModelHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ModelHealth::Cold => "cold",
            ModelHealth::Normal => "normal",
            ModelHealth::Hot => "hot",
        };
        write!(f, "{s}")
    }
}

/// Coarse trust bucket attached to each candidate bet. A is the most
/// trusted; the feedback loop only ever moves a candidate one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum ConfidenceTier {
    A,
    B,
    C,
}

impl ConfidenceTier {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "A" | "a" => Some(ConfidenceTier::A),
            "B" | "b" => Some(ConfidenceTier::B),
            "C" | "c" => Some(ConfidenceTier::C),
            _ => None,
        }
    }

    pub fn downgrade(self) -> Self {
        match self {
            ConfidenceTier::A => ConfidenceTier::B,
            ConfidenceTier::B | ConfidenceTier::C => ConfidenceTier::C,
        }
    }

    pub fn upgrade(self) -> Self {
        match self {
            ConfidenceTier::C => ConfidenceTier::B,
            ConfidenceTier::B | ConfidenceTier::A => ConfidenceTier::A,
        }
    }
}

impl std::fmt::Display for ConfidenceTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConfidenceTier::A => "A",
            ConfidenceTier::B => "B",
            ConfidenceTier::C => "C",
        };
        write!(f, "{s}")
    }
}

/// Bucket recent scoring into cold/normal/hot. Below the minimum window the
/// answer is always Normal: thin evidence never moves the threshold.
pub fn classify_recent_form(recent_brier: Option<f64>, samples: usize) -> ModelHealth {
    if samples < feedback::MIN_WINDOW {
        return ModelHealth::Normal;
    }
    match recent_brier {
        Some(brier) if brier > feedback::BRIER_COLD => ModelHealth::Cold,
        Some(brier) if brier < feedback::BRIER_HOT => ModelHealth::Hot,
        _ => ModelHealth::Normal,
    }
}

// ---------------------------------------------------------------------------
// Decision-time policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ThresholdDecision {
    pub threshold: f64,
    pub health: ModelHealth,
    pub tier: ConfidenceTier,
}

/// Widens or narrows the acceptance bar from how the segment has scored
/// lately. Read-only and infallible: if the record store cannot be reached
/// the policy answers with the configured base threshold and leaves the
/// tier alone.
pub struct DynamicThresholdPolicy {
    store: PredictionStore,
    live: Arc<LiveParams>,
}

impl DynamicThresholdPolicy {
    pub fn new(store: PredictionStore, live: Arc<LiveParams>) -> Self {
        Self { store, live }
    }

    pub async fn decision_threshold(
        &self,
        segment: &Segment,
        candidate_edge: f64,
        tier: ConfidenceTier,
    ) -> ThresholdDecision {
        let base = self
            .live
            .calibrated_parameter(&edge_threshold_key(segment), feedback::DEFAULT_BASE_THRESHOLD)
            .await;

        let (recent_brier, samples) = match self.recent_form(segment).await {
            Ok(form) => form,
            Err(err) => {
                debug!(segment = %segment, error = %err, "recent form unavailable, using base threshold");
                return ThresholdDecision {
                    threshold: base,
                    health: ModelHealth::Normal,
                    tier,
                };
            }
        };

        match classify_recent_form(recent_brier, samples) {
            ModelHealth::Cold => ThresholdDecision {
                threshold: feedback::COLD_THRESHOLD,
                health: ModelHealth::Cold,
                tier: tier.downgrade(),
            },
            ModelHealth::Hot => {
                let threshold = feedback::HOT_THRESHOLD;
                let tier = if candidate_edge >= feedback::UPGRADE_EDGE_MULT * threshold {
                    tier.upgrade()
                } else {
                    tier
                };
                ThresholdDecision {
                    threshold,
                    health: ModelHealth::Hot,
                    tier,
                }
            }
            ModelHealth::Normal => ThresholdDecision {
                threshold: base,
                health: ModelHealth::Normal,
                tier,
            },
        }
    }

    /// Mean Brier component over the segment's most recent graded records.
    /// Pushes and voids carry no component and don't count toward the
    /// sample window.
    async fn recent_form(&self, segment: &Segment) -> crate::error::Result<(Option<f64>, usize)> {
        let rows = self
            .store
            .recent_graded(segment, feedback::WINDOW_SIZE)
            .await?;
        let components: Vec<f64> = rows.iter().filter_map(|r| r.brier_component).collect();
        if components.is_empty() {
            return Ok((None, 0));
        }
        let mean = components.iter().sum::<f64>() / components.len() as f64;
        Ok((Some(mean), components.len()))
    }
}
