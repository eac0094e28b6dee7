use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{error, info, warn};

use crate::api::health::BatchHealth;
use crate::api::timing::RunTimings;
use crate::backtest::{BacktestRecord, BacktestRunner};
use crate::calibration::CalibrationEngine;
use crate::config::{Config, MIN_BIN_SAMPLES};
use crate::error::Result;
use crate::feedback::LiveParams;
use crate::store::config_store::{edge_threshold_key, prob_transform_key};
use crate::store::{ConfigStore, PredictionStore, QueryFilter, ResultStore};
use crate::tuner::{recommend, Tuner, TuningRecommendation};
use crate::types::{RecordStatus, Segment};

/// Upper bound on records graded in one pass so a backlog can't stall a run.
const GRADE_BATCH_LIMIT: i64 = 5_000;

/// Periodic pipeline: grade pending records, snapshot per-segment
/// calibration over the trailing window, turn snapshots into
/// recommendations, and conditionally apply them. Every Nth run also refits
/// thresholds and transforms with a chronological backtest.
pub struct BatchJob {
    cfg: Config,
    records: PredictionStore,
    results: ResultStore,
    config: ConfigStore,
    live: Arc<LiveParams>,
    health: Arc<BatchHealth>,
    timings: Arc<RunTimings>,
}

impl BatchJob {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: Config,
        records: PredictionStore,
        results: ResultStore,
        config: ConfigStore,
        live: Arc<LiveParams>,
        health: Arc<BatchHealth>,
        timings: Arc<RunTimings>,
    ) -> Self {
        Self {
            cfg,
            records,
            results,
            config,
            live,
            health,
            timings,
        }
    }

    pub async fn run(self) {
        let mut interval =
            tokio::time::interval(Duration::from_secs(self.cfg.batch_interval_secs));
        interval.tick().await; // consume immediate first tick

        let mut run_index: u64 = 0;
        loop {
            interval.tick().await;
            run_index += 1;
            let with_backtest =
                self.cfg.backtest_every_runs > 0 && run_index % self.cfg.backtest_every_runs == 0;

            let started = Instant::now();
            match self.run_once(with_backtest).await {
                Ok(()) => self.health.mark_run_completed(now_s() as u64),
                Err(e) => {
                    error!("batch run failed: {e}");
                    self.health.mark_run_failed();
                }
            }
            self.timings.record(started.elapsed());
        }
    }

    pub async fn run_once(&self, with_backtest: bool) -> Result<()> {
        let now = now_s();
        let window_start = now - self.cfg.window_days * 86_400;

        let grades = self.records.grade_pending(GRADE_BATCH_LIMIT).await?;
        self.health.add_records_graded(grades.graded);

        let segments = self.records.graded_segments(window_start).await?;
        let tuner = Tuner::new(self.config.clone(), self.cfg.min_confidence);
        let mut snapshots = 0usize;
        let mut skipped = 0usize;
        let mut recommendations: Vec<TuningRecommendation> = Vec::new();

        for segment in &segments {
            match self
                .snapshot_segment(segment, window_start, now, &tuner)
                .await?
            {
                Some(recs) => {
                    snapshots += 1;
                    recommendations.extend(recs);
                }
                None => skipped += 1,
            }
        }

        let (applied, discarded) = self.dispatch(&tuner, &recommendations).await?;

        let mut backtest_keys = 0usize;
        if with_backtest {
            // Refits need more history than one calibration window, so the
            // backtest looks back twice as far.
            match self.refit_from_backtest(now - 2 * self.cfg.window_days * 86_400, now).await {
                Ok(n) => backtest_keys = n,
                Err(e) => warn!("backtest refit skipped: {e}"),
            }
        }

        info!(
            graded = grades.graded,
            grade_failures = grades.failed,
            segments = snapshots,
            segments_skipped = skipped,
            recommendations = recommendations.len(),
            applied,
            discarded,
            backtest_keys,
            "batch run complete"
        );
        Ok(())
    }

    /// Calibrate one segment over the trailing window and derive
    /// recommendations. None when the window holds too few scorable rows.
    async fn snapshot_segment(
        &self,
        segment: &Segment,
        window_start: i64,
        now: i64,
        tuner: &Tuner,
    ) -> Result<Option<Vec<TuningRecommendation>>> {
        let filter = QueryFilter {
            league: Some(segment.league.clone()),
            market: Some(segment.market),
            model_version: None,
            status: Some(RecordStatus::Graded),
            from_ts: Some(window_start),
            to_ts: Some(now),
        };
        let rows = self.records.query_all(&filter).await?;

        let mut engine = CalibrationEngine::new();
        let ingested = engine.add_batch(rows.iter().filter_map(|r| r.calibration_sample()));
        if ingested < MIN_BIN_SAMPLES {
            return Ok(None);
        }

        let total = self
            .records
            .count_in_window(segment, window_start, now)
            .await? as usize;
        let result = engine.snapshot(window_start, now, total);
        info!(
            segment = %segment,
            samples = ingested,
            brier = result.brier_score,
            ece = result.ece,
            hit_rate = result.hit_rate,
            confidence_ratio = engine.weighted_confidence_ratio().map(|c| c.ratio),
            "segment calibration snapshot"
        );
        // Rows come back oldest-first; the newest row names the live model.
        let model_version = rows
            .last()
            .map(|r| r.model_version.clone())
            .unwrap_or_default();
        self.results.insert(segment, &model_version, &result).await?;

        let params = tuner.current_params(segment).await?;
        Ok(Some(recommend(segment, &result, &params)))
    }

    /// Apply recommendations when auto-apply is on, otherwise log them as
    /// advisory. Returns (applied, discarded).
    async fn dispatch(
        &self,
        tuner: &Tuner,
        recommendations: &[TuningRecommendation],
    ) -> Result<(usize, usize)> {
        if recommendations.is_empty() {
            return Ok((0, 0));
        }
        if !self.cfg.auto_apply {
            for rec in recommendations {
                info!(
                    segment = %rec.segment,
                    parameter = %rec.parameter,
                    current = %rec.current,
                    recommended = %rec.recommended,
                    confidence = rec.confidence,
                    samples = rec.sample_size,
                    reason = %rec.reason,
                    "tuning recommendation (auto-apply off)"
                );
            }
            return Ok((0, 0));
        }

        let outcome = tuner.apply(recommendations, true).await?;
        if outcome.applied > 0 {
            if let Err(e) = self.live.refresh().await {
                warn!("live parameter refresh failed: {e}");
            }
        }
        Ok((outcome.applied, outcome.discarded))
    }

    /// Run a chronological backtest over settled records and persist the
    /// per-segment fits. Returns how many config keys were written.
    async fn refit_from_backtest(&self, from: i64, to: i64) -> Result<usize> {
        let rows = self.records.settled_in_window(from, to).await?;
        let records: Vec<BacktestRecord> =
            rows.iter().filter_map(|r| r.to_backtest_record()).collect();
        let runner = BacktestRunner::new(self.cfg.train_fraction);
        let report = runner.run(records, from, to)?;

        let mut entries = Vec::new();
        for fit in &report.fits {
            if !fit.threshold_is_default {
                entries.push((
                    edge_threshold_key(&fit.segment),
                    serde_json::json!(fit.threshold),
                ));
            }
            if !fit.transform.is_identity() {
                entries.push((
                    prob_transform_key(&fit.segment),
                    serde_json::to_value(fit.transform)?,
                ));
            }
        }
        if entries.is_empty() {
            info!(
                segments = report.fits.len(),
                oos_brier = report.aggregate.brier_score,
                "backtest produced no qualifying fits"
            );
            return Ok(0);
        }

        let backup_id = self.config.write_with_backup(&entries, "backtest").await?;
        if let Err(e) = self.live.refresh().await {
            warn!("live parameter refresh failed: {e}");
        }
        info!(
            segments = report.fits.len(),
            keys = entries.len(),
            backup_id = %backup_id,
            oos_brier = report.aggregate.brier_score,
            oos_hit_rate = report.aggregate.hit_rate,
            "backtest fits written"
        );
        Ok(entries.len())
    }
}

fn now_s() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
