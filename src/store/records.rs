use futures_util::stream::BoxStream;
use futures_util::TryStreamExt;
use statrs::distribution::{ContinuousCDF, Normal};
use tracing::warn;

use crate::calibration::bins::bin_label;
use crate::config::{LOG_LOSS_EPSILON, PROB_CLAMP_MAX, PROB_CLAMP_MIN};
use crate::error::{AppError, Result};
use crate::store::models::PredictionRow;
use crate::types::{
    GradedMetrics, MarketPayload, OutcomePayload, OutcomeResult, PredictionPayload, RecordStatus,
    Segment,
};

/// Filter for lazy record queries. Unset fields match everything.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub league: Option<String>,
    pub market: Option<crate::types::MarketKind>,
    pub model_version: Option<String>,
    pub status: Option<RecordStatus>,
    pub from_ts: Option<i64>,
    pub to_ts: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusCounts {
    pub pending: i64,
    pub resolved: i64,
    pub graded: i64,
    pub invalid: i64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct GradeStats {
    pub graded: u64,
    pub failed: u64,
}

const SELECT_COLUMNS: &str = "id, created_at, league, market, model_version, status, \
     predicted_prob, selection, dist_mean, dist_std, line, prop_name, market_prob, \
     decimal_odds, closing_prob, outcome, actual_value, resolved_at, edge, stake, profit, \
     brier_component, log_loss_component, confidence_bin, percentile_rank, edge_realized, \
     closing_line_value, graded_at, invalid_reason";

const FILTERED_QUERY_SQL: &str = "SELECT id, created_at, league, market, model_version, status, \
     predicted_prob, selection, dist_mean, dist_std, line, prop_name, market_prob, \
     decimal_odds, closing_prob, outcome, actual_value, resolved_at, edge, stake, profit, \
     brier_component, log_loss_component, confidence_bin, percentile_rank, edge_realized, \
     closing_line_value, graded_at, invalid_reason \
     FROM predictions \
     WHERE (?1 IS NULL OR league = ?1) \
       AND (?2 IS NULL OR market = ?2) \
       AND (?3 IS NULL OR model_version = ?3) \
       AND (?4 IS NULL OR status = ?4) \
       AND (?5 IS NULL OR created_at >= ?5) \
       AND (?6 IS NULL OR created_at <= ?6) \
     ORDER BY created_at, id";

/// Lifecycle store for prediction records: create pending, attach outcomes,
/// grade settled rows with per-record metrics. Transitions only ever move
/// forward; violations are logged and ignored rather than applied.
#[derive(Clone)]
pub struct PredictionStore {
    pool: sqlx::SqlitePool,
}

impl PredictionStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a new pending record and return its id. Probabilities are
    /// clamped into the storable range; non-numeric payloads are rejected.
    pub async fn create(
        &self,
        prediction: &PredictionPayload,
        market: &MarketPayload,
        league: &str,
        model_version: &str,
        stake: Option<f64>,
    ) -> Result<i64> {
        if !prediction.probability.is_finite() {
            return Err(AppError::Data(
                "prediction probability is not numeric".to_string(),
            ));
        }
        if !market.implied_prob().is_finite() {
            return Err(AppError::Data(
                "market implied probability is not numeric".to_string(),
            ));
        }
        if let Some(d) = &prediction.distribution {
            if !d.mean.is_finite() || !d.std_dev.is_finite() || d.std_dev < 0.0 {
                return Err(AppError::Data(
                    "prediction distribution is not numeric".to_string(),
                ));
            }
        }
        if let Some(odds) = market.decimal_odds() {
            if !odds.is_finite() || odds <= 1.0 {
                return Err(AppError::Data(format!(
                    "decimal odds must exceed 1.0, got {odds}"
                )));
            }
        }
        if let Some(s) = stake {
            if !s.is_finite() || s <= 0.0 {
                return Err(AppError::Data(format!("stake must be positive, got {s}")));
            }
        }

        let predicted = prediction.probability.clamp(PROB_CLAMP_MIN, PROB_CLAMP_MAX);
        let market_prob = market.implied_prob().clamp(PROB_CLAMP_MIN, PROB_CLAMP_MAX);
        let edge = predicted - market_prob;
        let kind = market.kind().to_string();
        let (dist_mean, dist_std) = match &prediction.distribution {
            Some(d) => (Some(d.mean), Some(d.std_dev)),
            None => (None, None),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO predictions (
                created_at, league, market, model_version, status,
                predicted_prob, selection, dist_mean, dist_std,
                line, prop_name, market_prob, decimal_odds,
                edge, stake
            ) VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(now_s())
        .bind(league)
        .bind(&kind)
        .bind(model_version)
        .bind(predicted)
        .bind(&prediction.selection)
        .bind(dist_mean)
        .bind(dist_std)
        .bind(market.line())
        .bind(market.prop())
        .bind(market_prob)
        .bind(market.decimal_odds())
        .bind(edge)
        .bind(stake)
        .execute(&self.pool)
        .await?;

        Ok(result.last_insert_rowid())
    }

    pub async fn get(&self, id: i64) -> Result<Option<PredictionRow>> {
        let sql = format!("SELECT {SELECT_COLUMNS} FROM predictions WHERE id = ?");
        let row = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    /// Attach an outcome to a pending record. Profit settles here when a
    /// stake was recorded: win pays stake * (odds - 1), loss costs the
    /// stake, push and void return it. Re-resolving is a logged no-op.
    pub async fn resolve(&self, id: i64, outcome: &OutcomePayload) -> Result<()> {
        let row = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::Data(format!("unknown prediction id {id}")))?;

        match row.record_status() {
            Some(RecordStatus::Pending) => {}
            Some(status) => {
                warn!(id, %status, "resolve on non-pending record ignored");
                return Ok(());
            }
            None => {
                return Err(AppError::Data(format!(
                    "record {id} has unrecognized status {:?}",
                    row.status
                )));
            }
        }
        if let Some(v) = outcome.actual_value {
            if !v.is_finite() {
                return Err(AppError::Data("actual value is not numeric".to_string()));
            }
        }
        if let Some(c) = outcome.closing_prob {
            if !c.is_finite() {
                return Err(AppError::Data(
                    "closing probability is not numeric".to_string(),
                ));
            }
        }

        let odds = match row.decimal_odds {
            Some(o) if o > 1.0 => o,
            _ => 1.0 / row.market_prob.max(PROB_CLAMP_MIN),
        };
        let profit = row.stake.map(|stake| match outcome.result {
            OutcomeResult::Win => stake * (odds - 1.0),
            OutcomeResult::Loss => -stake,
            OutcomeResult::Push | OutcomeResult::Void => 0.0,
        });
        let closing = outcome
            .closing_prob
            .map(|c| c.clamp(PROB_CLAMP_MIN, PROB_CLAMP_MAX));

        sqlx::query(
            r#"
            UPDATE predictions
            SET status = 'resolved',
                outcome = ?,
                actual_value = ?,
                closing_prob = COALESCE(?, closing_prob),
                resolved_at = ?,
                profit = ?
            WHERE id = ?
            "#,
        )
        .bind(outcome.result.to_string())
        .bind(outcome.actual_value)
        .bind(closing)
        .bind(now_s())
        .bind(profit)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Capture the closing line after placement. Allowed until grading.
    pub async fn record_closing_prob(&self, id: i64, closing_prob: f64) -> Result<()> {
        if !closing_prob.is_finite() {
            return Err(AppError::Data(
                "closing probability is not numeric".to_string(),
            ));
        }
        let row = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::Data(format!("unknown prediction id {id}")))?;
        match row.record_status() {
            Some(RecordStatus::Pending) | Some(RecordStatus::Resolved) => {}
            Some(status) => {
                warn!(id, %status, "closing line update on settled record ignored");
                return Ok(());
            }
            None => {
                return Err(AppError::Data(format!(
                    "record {id} has unrecognized status {:?}",
                    row.status
                )));
            }
        }
        sqlx::query("UPDATE predictions SET closing_prob = ? WHERE id = ?")
            .bind(closing_prob.clamp(PROB_CLAMP_MIN, PROB_CLAMP_MAX))
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Compute and persist per-record metrics for a resolved record.
    /// Grading an already-graded record returns the stored metrics.
    pub async fn grade(&self, id: i64) -> Result<GradedMetrics> {
        let row = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::Data(format!("unknown prediction id {id}")))?;

        match row.record_status() {
            Some(RecordStatus::Resolved) => {}
            Some(RecordStatus::Graded) => {
                warn!(id, "grade on already-graded record, returning stored metrics");
                return Ok(stored_metrics(&row));
            }
            Some(status) => {
                return Err(AppError::Data(format!(
                    "cannot grade record {id} in status {status}"
                )));
            }
            None => {
                return Err(AppError::Data(format!(
                    "record {id} has unrecognized status {:?}",
                    row.status
                )));
            }
        }

        let metrics = compute_metrics(&row)?;
        sqlx::query(
            r#"
            UPDATE predictions
            SET status = 'graded',
                brier_component = ?,
                log_loss_component = ?,
                confidence_bin = ?,
                percentile_rank = ?,
                edge_realized = ?,
                closing_line_value = ?,
                graded_at = ?
            WHERE id = ?
            "#,
        )
        .bind(metrics.brier_component)
        .bind(metrics.log_loss_component)
        .bind(&metrics.confidence_bin)
        .bind(metrics.percentile_rank)
        .bind(i64::from(metrics.edge_realized))
        .bind(metrics.closing_line_value)
        .bind(now_s())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(metrics)
    }

    /// Grade every resolved record, oldest first. Individual failures are
    /// logged and counted, never propagated.
    pub async fn grade_pending(&self, limit: i64) -> Result<GradeStats> {
        let ids: Vec<(i64,)> = sqlx::query_as(
            "SELECT id FROM predictions WHERE status = 'resolved' ORDER BY resolved_at, id LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        let mut stats = GradeStats::default();
        for (id,) in ids {
            match self.grade(id).await {
                Ok(_) => stats.graded += 1,
                Err(e) => {
                    warn!(id, "grading failed: {e}");
                    stats.failed += 1;
                }
            }
        }
        Ok(stats)
    }

    /// Terminal invalidation for records that should never be scored
    /// (bad feed data, duplicated entry). Settled records stay as they are.
    pub async fn mark_invalid(&self, id: i64, reason: &str) -> Result<()> {
        let row = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::Data(format!("unknown prediction id {id}")))?;
        let status = row.record_status().ok_or_else(|| {
            AppError::Data(format!("record {id} has unrecognized status {:?}", row.status))
        })?;
        if !status.can_transition_to(RecordStatus::Invalid) {
            warn!(id, %status, "invalidation of terminal record ignored");
            return Ok(());
        }
        sqlx::query("UPDATE predictions SET status = 'invalid', invalid_reason = ? WHERE id = ?")
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Lazy filtered scan in (created_at, id) order.
    pub fn query(&self, filter: &QueryFilter) -> BoxStream<'_, sqlx::Result<PredictionRow>> {
        sqlx::query_as::<_, PredictionRow>(FILTERED_QUERY_SQL)
            .bind(filter.league.clone())
            .bind(filter.market.map(|m| m.to_string()))
            .bind(filter.model_version.clone())
            .bind(filter.status.map(|s| s.to_string()))
            .bind(filter.from_ts)
            .bind(filter.to_ts)
            .fetch(&self.pool)
    }

    pub async fn query_all(&self, filter: &QueryFilter) -> Result<Vec<PredictionRow>> {
        self.query(filter)
            .try_collect()
            .await
            .map_err(AppError::from)
    }

    /// Distinct segments with graded rows created at or after `since`.
    pub async fn graded_segments(&self, since: i64) -> Result<Vec<Segment>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT DISTINCT league, market FROM predictions \
             WHERE status = 'graded' AND created_at >= ? ORDER BY league, market",
        )
        .bind(since)
        .fetch_all(&self.pool)
        .await?;

        let mut segments = Vec::with_capacity(rows.len());
        for (league, market) in rows {
            match crate::types::MarketKind::parse(&market) {
                Some(kind) => segments.push(Segment::new(league, kind)),
                None => warn!(league, market, "skipping segment with unknown market kind"),
            }
        }
        Ok(segments)
    }

    /// Newest graded rows for a segment, most recently resolved first.
    pub async fn recent_graded(&self, segment: &Segment, limit: i64) -> Result<Vec<PredictionRow>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM predictions \
             WHERE status = 'graded' AND league = ? AND market = ? \
             ORDER BY resolved_at DESC, id DESC LIMIT ?"
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(&segment.league)
            .bind(segment.market.to_string())
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    /// Every record created in the window, regardless of status.
    pub async fn count_in_window(&self, segment: &Segment, from: i64, to: i64) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM predictions \
             WHERE league = ? AND market = ? AND created_at >= ? AND created_at <= ?",
        )
        .bind(&segment.league)
        .bind(segment.market.to_string())
        .bind(from)
        .bind(to)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    /// Settled rows (resolved or graded) across all segments, for backtests.
    pub async fn settled_in_window(&self, from: i64, to: i64) -> Result<Vec<PredictionRow>> {
        let sql = format!(
            "SELECT {SELECT_COLUMNS} FROM predictions \
             WHERE status IN ('resolved', 'graded') AND created_at >= ? AND created_at <= ? \
             ORDER BY created_at, id"
        );
        let rows = sqlx::query_as::<_, PredictionRow>(&sql)
            .bind(from)
            .bind(to)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows)
    }

    pub async fn counts_by_status(&self) -> Result<StatusCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM predictions GROUP BY status")
                .fetch_all(&self.pool)
                .await?;
        let mut counts = StatusCounts::default();
        for (status, count) in rows {
            match RecordStatus::parse(&status) {
                Some(RecordStatus::Pending) => counts.pending = count,
                Some(RecordStatus::Resolved) => counts.resolved = count,
                Some(RecordStatus::Graded) => counts.graded = count,
                Some(RecordStatus::Invalid) => counts.invalid = count,
                None => warn!(status, "unrecognized status in counts"),
            }
        }
        Ok(counts)
    }
}

/// Per-record metrics from a resolved row. Push and void settle without
/// scoring components; they still grade so the lifecycle can complete.
fn compute_metrics(row: &PredictionRow) -> Result<GradedMetrics> {
    let result = row
        .outcome_result()
        .ok_or_else(|| AppError::Data(format!("record {} has no usable outcome", row.id)))?;
    let binary = result.binary();
    let p = row.predicted_prob;

    let brier_component = binary.map(|o| (p - o).powi(2));
    let log_loss_component = binary.map(|o| {
        let clamped = p.clamp(LOG_LOSS_EPSILON, 1.0 - LOG_LOSS_EPSILON);
        -(o * clamped.ln() + (1.0 - o) * (1.0 - clamped).ln())
    });

    let percentile_rank = match (row.actual_value, row.dist_mean, row.dist_std) {
        (Some(actual), Some(mean), Some(std)) if std > 0.0 => Normal::new(mean, std)
            .ok()
            .map(|dist| dist.cdf(actual)),
        _ => None,
    };

    Ok(GradedMetrics {
        brier_component,
        log_loss_component,
        confidence_bin: bin_label(p),
        percentile_rank,
        edge_realized: row.edge > 0.0 && result == OutcomeResult::Win,
        closing_line_value: row.closing_prob.map(|c| c - row.market_prob),
    })
}

fn stored_metrics(row: &PredictionRow) -> GradedMetrics {
    GradedMetrics {
        brier_component: row.brier_component,
        log_loss_component: row.log_loss_component,
        confidence_bin: row.confidence_bin.clone().unwrap_or_default(),
        percentile_rank: row.percentile_rank,
        edge_realized: row.edge_realized.map(|v| v != 0).unwrap_or(false),
        closing_line_value: row.closing_line_value,
    }
}

fn now_s() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketKind, OutcomeDistribution};
    use sqlx::sqlite::SqlitePoolOptions;

    async fn test_store() -> PredictionStore {
        // One connection so the in-memory database is shared.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        sqlx::migrate!("./migrations").run(&pool).await.unwrap();
        PredictionStore::new(pool)
    }

    fn prediction(prob: f64) -> PredictionPayload {
        PredictionPayload {
            probability: prob,
            selection: "home".to_string(),
            distribution: None,
        }
    }

    fn moneyline(implied: f64, odds: Option<f64>) -> MarketPayload {
        MarketPayload::Moneyline {
            implied_prob: implied,
            decimal_odds: odds,
        }
    }

    fn outcome(result: OutcomeResult) -> OutcomePayload {
        OutcomePayload {
            result,
            actual_value: None,
            closing_prob: None,
        }
    }

    #[tokio::test]
    async fn create_inserts_pending_row_with_edge() {
        let store = test_store().await;
        let id = store
            .create(&prediction(0.60), &moneyline(0.55, Some(1.82)), "nba", "v3", None)
            .await
            .unwrap();
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, "pending");
        assert_eq!(row.league, "nba");
        assert_eq!(row.market, "moneyline");
        assert!((row.edge - 0.05).abs() < 1e-9);
        assert!(row.brier_component.is_none());
        assert!(row.graded_at.is_none());
    }

    #[tokio::test]
    async fn create_rejects_non_numeric_probability() {
        let store = test_store().await;
        let err = store
            .create(&prediction(f64::NAN), &moneyline(0.5, None), "nba", "v3", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Data(_)));
    }

    #[tokio::test]
    async fn create_clamps_out_of_range_probability() {
        let store = test_store().await;
        let id = store
            .create(&prediction(1.7), &moneyline(0.5, None), "nba", "v3", None)
            .await
            .unwrap();
        let row = store.get(id).await.unwrap().unwrap();
        assert!((row.predicted_prob - PROB_CLAMP_MAX).abs() < 1e-9);
    }

    #[tokio::test]
    async fn win_lifecycle_settles_profit_and_grades() {
        let store = test_store().await;
        let id = store
            .create(
                &prediction(0.62),
                &moneyline(0.55, Some(1.91)),
                "nba",
                "v3",
                Some(10.0),
            )
            .await
            .unwrap();
        store.resolve(id, &outcome(OutcomeResult::Win)).await.unwrap();

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, "resolved");
        assert!((row.profit.unwrap() - 9.1).abs() < 1e-9);
        assert!(row.resolved_at.is_some());

        let metrics = store.grade(id).await.unwrap();
        assert!((metrics.brier_component.unwrap() - (0.62_f64 - 1.0).powi(2)).abs() < 1e-9);
        assert_eq!(metrics.confidence_bin, "60-65%");
        assert!(metrics.edge_realized);

        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, "graded");
        assert!(row.brier_component.is_some());
        assert!(row.log_loss_component.is_some());
        assert!(row.graded_at.is_some());
    }

    #[tokio::test]
    async fn loss_costs_the_stake() {
        let store = test_store().await;
        let id = store
            .create(
                &prediction(0.62),
                &moneyline(0.55, Some(1.91)),
                "nba",
                "v3",
                Some(10.0),
            )
            .await
            .unwrap();
        store.resolve(id, &outcome(OutcomeResult::Loss)).await.unwrap();
        let row = store.get(id).await.unwrap().unwrap();
        assert!((row.profit.unwrap() + 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn push_settles_flat_and_grades_without_scores() {
        let store = test_store().await;
        let id = store
            .create(
                &prediction(0.58),
                &moneyline(0.52, Some(1.91)),
                "nfl",
                "v3",
                Some(25.0),
            )
            .await
            .unwrap();
        store.resolve(id, &outcome(OutcomeResult::Push)).await.unwrap();
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.profit, Some(0.0));

        let metrics = store.grade(id).await.unwrap();
        assert!(metrics.brier_component.is_none());
        assert!(metrics.log_loss_component.is_none());
        assert!(!metrics.edge_realized);
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, "graded");
    }

    #[tokio::test]
    async fn re_resolve_is_a_noop() {
        let store = test_store().await;
        let id = store
            .create(
                &prediction(0.60),
                &moneyline(0.50, Some(2.0)),
                "nba",
                "v3",
                Some(10.0),
            )
            .await
            .unwrap();
        store.resolve(id, &outcome(OutcomeResult::Win)).await.unwrap();
        // A contradictory second outcome must not take.
        store.resolve(id, &outcome(OutcomeResult::Loss)).await.unwrap();
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.outcome.as_deref(), Some("win"));
        assert!((row.profit.unwrap() - 10.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn resolve_unknown_id_fails() {
        let store = test_store().await;
        let err = store.resolve(999, &outcome(OutcomeResult::Win)).await.unwrap_err();
        assert!(err.to_string().contains("unknown prediction id"));
    }

    #[tokio::test]
    async fn grade_requires_resolution_first() {
        let store = test_store().await;
        let id = store
            .create(&prediction(0.60), &moneyline(0.50, None), "nba", "v3", None)
            .await
            .unwrap();
        let err = store.grade(id).await.unwrap_err();
        assert!(err.to_string().contains("pending"));
    }

    #[tokio::test]
    async fn percentile_rank_uses_predicted_distribution() {
        let store = test_store().await;
        let payload = PredictionPayload {
            probability: 0.60,
            selection: "over".to_string(),
            distribution: Some(OutcomeDistribution {
                mean: 220.0,
                std_dev: 10.0,
            }),
        };
        let market = MarketPayload::Total {
            line: 215.5,
            implied_prob: 0.52,
            decimal_odds: Some(1.91),
        };
        let id = store.create(&payload, &market, "nba", "v3", None).await.unwrap();
        store
            .resolve(
                id,
                &OutcomePayload {
                    result: OutcomeResult::Win,
                    actual_value: Some(220.0),
                    closing_prob: None,
                },
            )
            .await
            .unwrap();
        let metrics = store.grade(id).await.unwrap();
        // Landed exactly on the predicted mean -> 50th percentile.
        assert!((metrics.percentile_rank.unwrap() - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn closing_line_value_is_close_minus_placement() {
        let store = test_store().await;
        let id = store
            .create(&prediction(0.60), &moneyline(0.50, Some(2.0)), "nba", "v3", None)
            .await
            .unwrap();
        store.record_closing_prob(id, 0.56).await.unwrap();
        store.resolve(id, &outcome(OutcomeResult::Loss)).await.unwrap();
        let metrics = store.grade(id).await.unwrap();
        assert!((metrics.closing_line_value.unwrap() - 0.06).abs() < 1e-9);
        // Edge was positive but the bet lost: not realized.
        assert!(!metrics.edge_realized);
    }

    #[tokio::test]
    async fn invalidation_is_terminal_and_respects_grading() {
        let store = test_store().await;
        let id = store
            .create(&prediction(0.60), &moneyline(0.50, None), "nba", "v3", None)
            .await
            .unwrap();
        store.mark_invalid(id, "duplicate feed entry").await.unwrap();
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, "invalid");
        assert_eq!(row.invalid_reason.as_deref(), Some("duplicate feed entry"));

        // Resolving an invalid record is ignored.
        store.resolve(id, &outcome(OutcomeResult::Win)).await.unwrap();
        let row = store.get(id).await.unwrap().unwrap();
        assert_eq!(row.status, "invalid");

        // A graded record cannot be invalidated.
        let graded = store
            .create(
                &prediction(0.60),
                &moneyline(0.50, Some(2.0)),
                "nba",
                "v3",
                Some(5.0),
            )
            .await
            .unwrap();
        store.resolve(graded, &outcome(OutcomeResult::Win)).await.unwrap();
        store.grade(graded).await.unwrap();
        store.mark_invalid(graded, "too late").await.unwrap();
        let row = store.get(graded).await.unwrap().unwrap();
        assert_eq!(row.status, "graded");
    }

    #[tokio::test]
    async fn grade_pending_processes_all_resolved_rows() {
        let store = test_store().await;
        for i in 0..5 {
            let id = store
                .create(
                    &prediction(0.55 + i as f64 * 0.01),
                    &moneyline(0.50, Some(2.0)),
                    "nba",
                    "v3",
                    Some(10.0),
                )
                .await
                .unwrap();
            let result = if i % 2 == 0 {
                OutcomeResult::Win
            } else {
                OutcomeResult::Loss
            };
            store.resolve(id, &outcome(result)).await.unwrap();
        }
        // One record stays pending and must be untouched.
        store
            .create(&prediction(0.70), &moneyline(0.60, None), "nba", "v3", None)
            .await
            .unwrap();

        let stats = store.grade_pending(100).await.unwrap();
        assert_eq!(stats.graded, 5);
        assert_eq!(stats.failed, 0);

        let counts = store.counts_by_status().await.unwrap();
        assert_eq!(counts.graded, 5);
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.resolved, 0);
    }

    #[tokio::test]
    async fn filtered_query_respects_segment_and_status() {
        let store = test_store().await;
        let a = store
            .create(&prediction(0.60), &moneyline(0.50, Some(2.0)), "nba", "v3", None)
            .await
            .unwrap();
        store
            .create(&prediction(0.55), &moneyline(0.50, None), "nhl", "v3", None)
            .await
            .unwrap();
        store.resolve(a, &outcome(OutcomeResult::Win)).await.unwrap();

        let filter = QueryFilter {
            league: Some("nba".to_string()),
            status: Some(RecordStatus::Resolved),
            ..Default::default()
        };
        let rows = store.query_all(&filter).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, a);

        let all = store.query_all(&QueryFilter::default()).await.unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.windows(2).all(|w| {
            (w[0].created_at, w[0].id) <= (w[1].created_at, w[1].id)
        }));
    }

    #[tokio::test]
    async fn recent_graded_returns_newest_first() {
        let store = test_store().await;
        let seg = Segment::new("nba", MarketKind::Moneyline);
        let mut last_id = 0;
        for _ in 0..3 {
            let id = store
                .create(&prediction(0.60), &moneyline(0.50, Some(2.0)), "nba", "v3", None)
                .await
                .unwrap();
            store.resolve(id, &outcome(OutcomeResult::Win)).await.unwrap();
            store.grade(id).await.unwrap();
            last_id = id;
        }
        let rows = store.recent_graded(&seg, 2).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].id, last_id);
    }
}
