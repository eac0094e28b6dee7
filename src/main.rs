mod api;
mod backtest;
mod batch;
mod calibration;
mod config;
mod error;
mod feedback;
mod store;
mod tuner;
mod types;

use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::health::BatchHealth;
use crate::api::routes::{router, ApiState};
use crate::api::timing::RunTimings;
use crate::batch::BatchJob;
use crate::config::Config;
use crate::error::Result;
use crate::feedback::{DynamicThresholdPolicy, LiveParams};
use crate::store::{ConfigStore, PredictionStore, ResultStore};

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Database setup ---
    let pool =
        sqlx::SqlitePool::connect(&format!("sqlite:{}?mode=rwc", cfg.db_path)).await?;
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Database ready at {}", cfg.db_path);

    // --- Stores ---
    let records = PredictionStore::new(pool.clone());
    let results = ResultStore::new(pool.clone());
    let config_store = ConfigStore::new(pool.clone());

    // --- Live parameter cache ---
    let live = LiveParams::new(config_store.clone());
    match live.refresh().await {
        Ok(n) => info!("Preloaded {n} tuned parameters"),
        Err(e) => warn!("Parameter preload failed, serving defaults: {e}"),
    }

    // --- Shared batch telemetry ---
    let health = Arc::new(BatchHealth::new());
    let timings = Arc::new(RunTimings::new());

    // --- Decision-time threshold policy ---
    let policy = Arc::new(DynamicThresholdPolicy::new(
        records.clone(),
        Arc::clone(&live),
    ));

    // --- Spawn tasks ---

    // Batch job: grade → calibrate → tune on a fixed cadence
    let job = BatchJob::new(
        cfg.clone(),
        records.clone(),
        results.clone(),
        config_store.clone(),
        Arc::clone(&live),
        Arc::clone(&health),
        Arc::clone(&timings),
    );
    info!(
        interval_s = cfg.batch_interval_secs,
        window_days = cfg.window_days,
        auto_apply = cfg.auto_apply,
        backtest_every_runs = cfg.backtest_every_runs,
        "Starting batch tuning job"
    );
    tokio::spawn(async move { job.run().await });

    // HTTP API server
    let api_state = ApiState {
        records,
        results,
        live,
        policy,
        health,
        timings,
    };
    let app = router(api_state);
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app).await?;

    Ok(())
}
