use std::sync::Arc;

use dashmap::DashMap;
use serde_json::Value;
use tracing::debug;

use crate::backtest::ProbTransform;
use crate::calibration::bin_label;
use crate::config::{CALIBRATED_PROB_MAX, CALIBRATED_PROB_MIN};
use crate::error::Result;
use crate::store::config_store::{calibration_factors_key, prob_transform_key};
use crate::store::ConfigStore;
use crate::types::Segment;

/// Decision-time view of tuned parameters, cached in a dashmap so the hot
/// path never waits on sqlite. Reads fall through to the store on a cache
/// miss and to the caller's default when the store is unreachable — no
/// method here returns an error.
pub struct LiveParams {
    config: ConfigStore,
    cache: DashMap<String, Value>,
}

impl LiveParams {
    pub fn new(config: ConfigStore) -> Arc<Self> {
        Arc::new(Self {
            config,
            cache: DashMap::new(),
        })
    }

    /// Reload the whole cache from the store. Called after tuning writes and
    /// on startup; unlike the read path this surfaces store errors so the
    /// batch job can log them.
    pub async fn refresh(&self) -> Result<usize> {
        let entries = self.config.all().await?;
        self.cache.clear();
        for entry in &entries {
            if let Ok(value) = serde_json::from_str::<Value>(&entry.value) {
                self.cache.insert(entry.key.clone(), value);
            }
        }
        Ok(self.cache.len())
    }

    /// Cache → store → None. Store failures are logged and swallowed.
    async fn lookup(&self, key: &str) -> Option<Value> {
        if let Some(cached) = self.cache.get(key) {
            return Some(cached.clone());
        }
        match self.config.get(key).await {
            Ok(Some(value)) => {
                self.cache.insert(key.to_string(), value.clone());
                Some(value)
            }
            Ok(None) => None,
            Err(err) => {
                debug!(key, error = %err, "config read failed, using default");
                None
            }
        }
    }

    /// Tuned scalar by key, or `default` when unset or unreadable.
    pub async fn calibrated_parameter(&self, key: &str, default: f64) -> f64 {
        match self.lookup(key).await.and_then(|v| v.as_f64()) {
            Some(value) if value.is_finite() => value,
            _ => default,
        }
    }

    /// Remap a raw model probability through the segment's stored factor map.
    /// Unmatched bins keep their factor at 1.0, malformed input passes
    /// through untouched, and remapped output is clamped to the tradable
    /// probability range.
    pub async fn apply_calibration(&self, raw_prob: f64, segment: &Segment) -> f64 {
        if !raw_prob.is_finite() || !(0.0..=1.0).contains(&raw_prob) {
            return raw_prob;
        }
        let factor = match self.lookup(&calibration_factors_key(segment)).await {
            Some(value) => value
                .get(bin_label(raw_prob))
                .and_then(|f| f.as_f64())
                .unwrap_or(1.0),
            None => 1.0,
        };
        (raw_prob * factor).clamp(CALIBRATED_PROB_MIN, CALIBRATED_PROB_MAX)
    }

    /// The segment's backtest-fitted probability transform, identity when
    /// none has been persisted.
    pub async fn prob_transform(&self, segment: &Segment) -> ProbTransform {
        match self.lookup(&prob_transform_key(segment)).await {
            Some(value) => serde_json::from_value(value).unwrap_or_default(),
            None => ProbTransform::default(),
        }
    }
}
