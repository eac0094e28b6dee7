use crate::calibration::CalibrationResult;
use crate::error::Result;
use crate::store::models::CalibrationResultRow;
use crate::types::Segment;

/// Append-only persistence for calibration snapshots. Rows are inserted by
/// batch runs and read by the API and the tuning summary; nothing updates
/// them after the fact.
#[derive(Clone)]
pub struct ResultStore {
    pool: sqlx::SqlitePool,
}

impl ResultStore {
    pub fn new(pool: sqlx::SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(
        &self,
        segment: &Segment,
        model_version: &str,
        result: &CalibrationResult,
    ) -> Result<i64> {
        let factors_json = serde_json::to_string(&result.factors)?;
        let reliability_json = serde_json::to_string(&result.reliability)?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO calibration_results (
                created_at, league, market, model_version,
                window_start, window_end, total_predictions, resolved_predictions,
                brier_score, log_loss, ece, mce, hit_rate, roi, mean_edge,
                factors_json, reliability_json
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(now_s())
        .bind(&segment.league)
        .bind(segment.market.to_string())
        .bind(model_version)
        .bind(result.window_start)
        .bind(result.window_end)
        .bind(result.total_predictions as i64)
        .bind(result.resolved_predictions as i64)
        .bind(result.brier_score)
        .bind(result.log_loss)
        .bind(result.ece)
        .bind(result.mce)
        .bind(result.hit_rate)
        .bind(result.roi)
        .bind(result.mean_edge)
        .bind(factors_json)
        .bind(reliability_json)
        .execute(&self.pool)
        .await?;
        Ok(inserted.last_insert_rowid())
    }

    /// Newest snapshot for one segment, any model version.
    pub async fn latest(&self, segment: &Segment) -> Result<Option<CalibrationResultRow>> {
        let row = sqlx::query_as::<_, CalibrationResultRow>(
            "SELECT * FROM calibration_results WHERE league = ? AND market = ? \
             ORDER BY id DESC LIMIT 1",
        )
        .bind(&segment.league)
        .bind(segment.market.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    pub async fn recent(&self, limit: i64) -> Result<Vec<CalibrationResultRow>> {
        let rows = sqlx::query_as::<_, CalibrationResultRow>(
            "SELECT * FROM calibration_results ORDER BY id DESC LIMIT ?",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    /// Newest snapshot per (league, market), for the tuning summary.
    pub async fn latest_per_segment(&self) -> Result<Vec<CalibrationResultRow>> {
        let rows = sqlx::query_as::<_, CalibrationResultRow>(
            "SELECT * FROM calibration_results WHERE id IN \
             (SELECT MAX(id) FROM calibration_results GROUP BY league, market) \
             ORDER BY league, market",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    pub async fn history(
        &self,
        segment: &Segment,
        limit: i64,
    ) -> Result<Vec<CalibrationResultRow>> {
        let rows = sqlx::query_as::<_, CalibrationResultRow>(
            "SELECT * FROM calibration_results WHERE league = ? AND market = ? \
             ORDER BY id DESC LIMIT ?",
        )
        .bind(&segment.league)
        .bind(segment.market.to_string())
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

/// Rehydrate the measurement struct from a stored row.
pub fn row_to_result(row: &CalibrationResultRow) -> Result<CalibrationResult> {
    Ok(CalibrationResult {
        window_start: row.window_start,
        window_end: row.window_end,
        total_predictions: row.total_predictions as usize,
        resolved_predictions: row.resolved_predictions as usize,
        brier_score: row.brier_score,
        log_loss: row.log_loss,
        ece: row.ece,
        mce: row.mce,
        hit_rate: row.hit_rate,
        roi: row.roi,
        mean_edge: row.mean_edge,
        factors: serde_json::from_str(&row.factors_json)?,
        reliability: serde_json::from_str(&row.reliability_json)?,
    })
}

fn now_s() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
