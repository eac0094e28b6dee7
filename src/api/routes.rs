use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::health::BatchHealth;
use crate::api::timing::RunTimings;
use crate::error::AppError;
use crate::feedback::{ConfidenceTier, DynamicThresholdPolicy, LiveParams, ModelHealth};
use crate::store::results::row_to_result;
use crate::store::{PredictionStore, ResultStore};
use crate::tuner::{tuning_summary, TuningSummary};
use crate::types::{MarketKind, Segment};

#[derive(Clone)]
pub struct ApiState {
    pub records: PredictionStore,
    pub results: ResultStore,
    pub live: Arc<LiveParams>,
    pub policy: Arc<DynamicThresholdPolicy>,
    pub health: Arc<BatchHealth>,
    pub timings: Arc<RunTimings>,
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(get_health))
        .route("/calibration/recent", get(get_recent_calibration))
        .route("/calibration/:league/:market", get(get_segment_calibration))
        .route("/decision/:league/:market", get(get_decision))
        .route("/tuning/summary", get(get_tuning_summary))
        .route("/stats/timing", get(get_stats_timing))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query param structs
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
pub struct RecentQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<i64>,
}

#[derive(Deserialize)]
pub struct DecisionQuery {
    /// Candidate edge as a fraction, e.g. 0.045 for 4.5%.
    pub edge: f64,
    /// Raw model probability; when present the response includes its
    /// calibrated counterpart.
    pub prob: Option<f64>,
    /// Confidence tier letter (A/B/C). Defaults to B.
    pub tier: Option<String>,
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub last_run_at: u64,
    pub runs_completed: u64,
    pub runs_failed: u64,
    pub records_graded: u64,
    pub pending: i64,
    pub resolved: i64,
    pub graded: i64,
    pub invalid: i64,
}

#[derive(Serialize)]
pub struct SnapshotResponse {
    pub league: String,
    pub market: String,
    pub model_version: String,
    pub created_at: i64,
    pub window_start: i64,
    pub window_end: i64,
    pub total_predictions: i64,
    pub resolved_predictions: i64,
    pub brier_score: f64,
    pub log_loss: f64,
    pub ece: f64,
    pub mce: f64,
    pub hit_rate: f64,
    pub roi: f64,
    pub mean_edge: f64,
}

#[derive(Serialize)]
pub struct SegmentHistoryResponse {
    pub league: String,
    pub market: String,
    pub snapshots: Vec<SnapshotResponse>,
    /// Factor map and reliability curve of the newest snapshot.
    pub latest_factors: Option<serde_json::Value>,
    pub latest_reliability: Option<serde_json::Value>,
}

#[derive(Serialize)]
pub struct DecisionResponse {
    pub league: String,
    pub market: String,
    pub edge: f64,
    pub threshold: f64,
    pub health: ModelHealth,
    pub tier: ConfidenceTier,
    pub accept: bool,
    pub calibrated_prob: Option<f64>,
}

#[derive(Serialize)]
pub struct TimingResponse {
    pub runs: u64,
    pub p50_ms: Option<u64>,
    pub p95_ms: Option<u64>,
    pub p99_ms: Option<u64>,
}

fn snapshot_response(row: &crate::store::models::CalibrationResultRow) -> SnapshotResponse {
    SnapshotResponse {
        league: row.league.clone(),
        market: row.market.clone(),
        model_version: row.model_version.clone(),
        created_at: row.created_at,
        window_start: row.window_start,
        window_end: row.window_end,
        total_predictions: row.total_predictions,
        resolved_predictions: row.resolved_predictions,
        brier_score: row.brier_score,
        log_loss: row.log_loss,
        ece: row.ece,
        mce: row.mce,
        hit_rate: row.hit_rate,
        roi: row.roi,
        mean_edge: row.mean_edge,
    }
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn get_health(State(state): State<ApiState>) -> Result<Json<HealthResponse>, AppError> {
    let counts = state.records.counts_by_status().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        last_run_at: state.health.last_run_at_s(),
        runs_completed: state.health.runs_completed(),
        runs_failed: state.health.runs_failed(),
        records_graded: state.health.records_graded(),
        pending: counts.pending,
        resolved: counts.resolved,
        graded: counts.graded,
        invalid: counts.invalid,
    }))
}

async fn get_recent_calibration(
    State(state): State<ApiState>,
    Query(params): Query<RecentQuery>,
) -> Result<Json<Vec<SnapshotResponse>>, AppError> {
    let limit = params.limit.unwrap_or(50).clamp(1, 500);
    let rows = state.results.recent(limit).await?;
    Ok(Json(rows.iter().map(snapshot_response).collect()))
}

async fn get_segment_calibration(
    State(state): State<ApiState>,
    Path((league, market)): Path<(String, String)>,
    Query(params): Query<HistoryQuery>,
) -> Result<Json<SegmentHistoryResponse>, AppError> {
    let kind = MarketKind::parse(&market)
        .ok_or_else(|| AppError::Data(format!("unknown market kind {market}")))?;
    let segment = Segment::new(&league, kind);
    let limit = params.limit.unwrap_or(20).clamp(1, 200);

    let rows = state.results.history(&segment, limit).await?;
    let latest = rows.first();
    let latest_factors = latest.and_then(|r| serde_json::from_str(&r.factors_json).ok());
    let latest_reliability = latest.and_then(|r| serde_json::from_str(&r.reliability_json).ok());

    Ok(Json(SegmentHistoryResponse {
        league,
        market,
        snapshots: rows.iter().map(snapshot_response).collect(),
        latest_factors,
        latest_reliability,
    }))
}

async fn get_decision(
    State(state): State<ApiState>,
    Path((league, market)): Path<(String, String)>,
    Query(params): Query<DecisionQuery>,
) -> Result<Json<DecisionResponse>, AppError> {
    let kind = MarketKind::parse(&market)
        .ok_or_else(|| AppError::Data(format!("unknown market kind {market}")))?;
    let tier = match &params.tier {
        Some(s) => ConfidenceTier::parse(s)
            .ok_or_else(|| AppError::Data(format!("unknown confidence tier {s}")))?,
        None => ConfidenceTier::B,
    };
    let segment = Segment::new(&league, kind);

    let decision = state
        .policy
        .decision_threshold(&segment, params.edge, tier)
        .await;
    let calibrated_prob = match params.prob {
        Some(p) => Some(state.live.apply_calibration(p, &segment).await),
        None => None,
    };

    Ok(Json(DecisionResponse {
        league,
        market,
        edge: params.edge,
        threshold: decision.threshold,
        health: decision.health,
        tier: decision.tier,
        accept: params.edge >= decision.threshold,
        calibrated_prob,
    }))
}

async fn get_tuning_summary(
    State(state): State<ApiState>,
) -> Result<Json<TuningSummary>, AppError> {
    let rows = state.results.latest_per_segment().await?;
    let mut pairs = Vec::with_capacity(rows.len());
    for row in &rows {
        let Some(kind) = MarketKind::parse(&row.market) else {
            warn!(league = %row.league, market = %row.market, "skipping snapshot with unknown market kind");
            continue;
        };
        match row_to_result(row) {
            Ok(result) => pairs.push((Segment::new(&row.league, kind), result)),
            Err(err) => {
                warn!(id = row.id, error = %err, "skipping undecodable snapshot");
            }
        }
    }
    Ok(Json(tuning_summary(&pairs)))
}

async fn get_stats_timing(State(state): State<ApiState>) -> Json<TimingResponse> {
    let (p50, p95, p99) = state.timings.percentiles();
    Json(TimingResponse {
        runs: state.timings.len(),
        p50_ms: p50,
        p95_ms: p95,
        p99_ms: p99,
    })
}
