use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::tuning;
use crate::error::Result;
use crate::store::config_store::{
    calibration_factors_key, confidence_threshold_key, stake_fraction_key,
};
use crate::store::ConfigStore;
use crate::tuner::recommend::{CurrentParams, TunedParameter, TuningRecommendation};
use crate::types::Segment;

/// One key that changed in an apply pass. `previous` is the stored value
/// before the write, None for a key that had never been set.
#[derive(Debug, Clone)]
pub struct AppliedChange {
    pub key: String,
    pub previous: Option<Value>,
    pub next: Value,
}

#[derive(Debug, Default)]
pub struct ApplyOutcome {
    pub applied: usize,
    pub discarded: usize,
    pub backup_id: Option<String>,
    pub changes: Vec<AppliedChange>,
}

/// Writes recommendations through the config store. Every mutating pass
/// snapshots the full configuration first, so any apply can be undone with
/// `rollback`.
pub struct Tuner {
    config: ConfigStore,
    min_confidence: f64,
}

impl Tuner {
    pub fn new(config: ConfigStore, min_confidence: f64) -> Self {
        Self {
            config,
            min_confidence,
        }
    }

    /// Live parameters for one segment, falling back to defaults for keys
    /// that have never been tuned.
    pub async fn current_params(&self, segment: &Segment) -> Result<CurrentParams> {
        let stake_fraction = self
            .config
            .get_f64(&stake_fraction_key(segment))
            .await?
            .unwrap_or(tuning::DEFAULT_STAKE_FRACTION);
        let confidence_threshold = self
            .config
            .get_f64(&confidence_threshold_key(segment))
            .await?
            .unwrap_or(tuning::DEFAULT_CONFIDENCE_THRESHOLD);
        let factors = match self.config.get(&calibration_factors_key(segment)).await? {
            Some(value) => serde_json::from_value(value)?,
            None => BTreeMap::new(),
        };
        Ok(CurrentParams {
            stake_fraction,
            confidence_threshold,
            factors,
        })
    }

    /// Persist recommendations that clear the confidence bar. Factor maps
    /// merge into the stored map key-wise; scalars overwrite. With `backup`
    /// set, the configuration is snapshotted before the write and the write
    /// is skipped entirely if the snapshot fails.
    pub async fn apply(
        &self,
        recommendations: &[TuningRecommendation],
        backup: bool,
    ) -> Result<ApplyOutcome> {
        let mut outcome = ApplyOutcome::default();
        let mut pending: BTreeMap<String, Value> = BTreeMap::new();

        for rec in recommendations {
            if rec.confidence < self.min_confidence {
                debug!(
                    segment = %rec.segment,
                    parameter = %rec.parameter,
                    confidence = rec.confidence,
                    min_confidence = self.min_confidence,
                    "discarding low-confidence recommendation"
                );
                outcome.discarded += 1;
                continue;
            }

            let key = rec.parameter.config_key(&rec.segment);
            let next = match rec.parameter {
                TunedParameter::CalibrationFactors => {
                    self.merged_factors(&key, &rec.recommended).await?
                }
                _ => rec.recommended.clone(),
            };
            pending.insert(key, next);
            outcome.applied += 1;
        }

        if pending.is_empty() {
            // Nothing cleared the bar: no write, so no backup either.
            return Ok(outcome);
        }

        for (key, next) in &pending {
            let previous = self.config.get(key).await?;
            outcome.changes.push(AppliedChange {
                key: key.clone(),
                previous,
                next: next.clone(),
            });
        }

        let entries: Vec<(String, Value)> = pending.into_iter().collect();
        if backup {
            let backup_id = self.config.write_with_backup(&entries, "tuning").await?;
            outcome.backup_id = Some(backup_id);
        } else {
            self.config.set_many(&entries).await?;
        }

        info!(
            applied = outcome.applied,
            discarded = outcome.discarded,
            keys = entries.len(),
            backup_id = outcome.backup_id.as_deref().unwrap_or("none"),
            "applied tuning recommendations"
        );
        Ok(outcome)
    }

    /// Restore the configuration snapshot taken by a previous apply.
    pub async fn rollback(&self, backup_id: &str) -> Result<()> {
        self.config.restore(backup_id).await?;
        info!(backup_id, "rolled back tuning changes");
        Ok(())
    }

    /// Overlay recommended factors onto the stored map so bins the
    /// recommendation did not touch keep their current values.
    async fn merged_factors(&self, key: &str, recommended: &Value) -> Result<Value> {
        let mut merged: BTreeMap<String, f64> = match self.config.get(key).await? {
            Some(stored) => serde_json::from_value(stored)?,
            None => BTreeMap::new(),
        };
        let updates: BTreeMap<String, f64> = serde_json::from_value(recommended.clone())?;
        merged.extend(updates);
        Ok(serde_json::to_value(merged)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sqlx::sqlite::SqlitePoolOptions;

    use crate::types::MarketKind;

    async fn test_store() -> ConfigStore {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        ConfigStore::new(pool)
    }

    fn seg() -> Segment {
        Segment::new("nba", MarketKind::Moneyline)
    }

    fn rec(parameter: TunedParameter, recommended: Value, confidence: f64) -> TuningRecommendation {
        TuningRecommendation {
            segment: seg(),
            parameter,
            current: json!(null),
            recommended,
            reason: "test".into(),
            confidence,
            sample_size: 200,
        }
    }

    #[tokio::test]
    async fn low_confidence_recommendations_are_discarded() {
        let tuner = Tuner::new(test_store().await, 0.5);
        let recs = vec![
            rec(TunedParameter::StakeFraction, json!(0.015), 0.3),
            rec(TunedParameter::ConfidenceThreshold, json!(0.60), 0.7),
        ];
        let outcome = tuner.apply(&recs, false).await.unwrap();
        assert_eq!(outcome.discarded, 1);
        assert_eq!(outcome.applied, 1);

        let params = tuner.current_params(&seg()).await.unwrap();
        assert!((params.stake_fraction - tuning::DEFAULT_STAKE_FRACTION).abs() < 1e-9);
        assert!((params.confidence_threshold - 0.60).abs() < 1e-9);
    }

    #[tokio::test]
    async fn nothing_accepted_means_no_backup() {
        let tuner = Tuner::new(test_store().await, 0.9);
        let recs = vec![rec(TunedParameter::StakeFraction, json!(0.015), 0.3)];
        let outcome = tuner.apply(&recs, true).await.unwrap();
        assert_eq!(outcome.applied, 0);
        assert!(outcome.backup_id.is_none());
        assert!(outcome.changes.is_empty());
    }

    #[tokio::test]
    async fn backup_captures_state_before_the_write() {
        let store = test_store().await;
        store
            .set(&stake_fraction_key(&seg()), &json!(0.02))
            .await
            .unwrap();
        let tuner = Tuner::new(store, 0.0);

        let outcome = tuner
            .apply(&[rec(TunedParameter::StakeFraction, json!(0.015), 0.8)], true)
            .await
            .unwrap();
        let backup_id = outcome.backup_id.expect("backup id");
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].previous, Some(json!(0.02)));

        let params = tuner.current_params(&seg()).await.unwrap();
        assert!((params.stake_fraction - 0.015).abs() < 1e-9);

        tuner.rollback(&backup_id).await.unwrap();
        let params = tuner.current_params(&seg()).await.unwrap();
        assert!((params.stake_fraction - 0.02).abs() < 1e-9);
    }

    #[tokio::test]
    async fn factor_maps_merge_with_stored_bins() {
        let store = test_store().await;
        store
            .set(
                &calibration_factors_key(&seg()),
                &json!({"55-60%": 1.08, "80-85%": 0.90}),
            )
            .await
            .unwrap();
        let tuner = Tuner::new(store, 0.0);

        tuner
            .apply(
                &[rec(
                    TunedParameter::CalibrationFactors,
                    json!({"80-85%": 0.70}),
                    0.8,
                )],
                false,
            )
            .await
            .unwrap();

        let params = tuner.current_params(&seg()).await.unwrap();
        assert_eq!(params.factors.len(), 2);
        assert!((params.factors["55-60%"] - 1.08).abs() < 1e-9);
        assert!((params.factors["80-85%"] - 0.70).abs() < 1e-9);
    }

    #[tokio::test]
    async fn rollback_of_unknown_backup_fails() {
        let tuner = Tuner::new(test_store().await, 0.0);
        assert!(tuner.rollback("no-such-backup").await.is_err());
    }
}
