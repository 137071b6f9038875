mod config;
mod db;
mod pump;
mod scheduler;
mod state;
mod web;

use anyhow::{Context, Result};
use garden_core::{hydrate_zones, seed_zones, Controller, SensorSimulator};
use std::{env, sync::Arc};
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use db::Db;
use pump::PumpBoard;
use state::SystemState;
use web::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // ── Env config ──────────────────────────────────────────────────
    let db_url = env::var("DB_URL").unwrap_or_else(|_| "sqlite:garden.db?mode=rwc".to_string());
    let run_once = env::var("RUN_ONCE")
        .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
        .unwrap_or(false);

    // ── Database ────────────────────────────────────────────────────
    let db = Db::connect(&db_url).await?;
    db.migrate().await?;

    // ── Config file (zones + controller/simulator settings) ─────────
    // An explicit CONFIG_PATH must exist; the default one is optional.
    let cfg = match env::var("CONFIG_PATH") {
        Ok(path) => config::load(&path)?,
        Err(_) => config::load_optional(config::DEFAULT_CONFIG_PATH)?,
    };
    config::apply(&cfg, &db).await?;

    if db.load_zones().await?.is_empty() {
        warn!("no zones configured, seeding defaults");
        for z in seed_zones() {
            db.upsert_zone(&z).await?;
        }
    }

    // Zones come from the DB, which is the source of truth.
    let zones = hydrate_zones(&db).await.context("failed to load zones")?;
    info!(zones = zones.len(), "db ready");

    // ── Pump board ──────────────────────────────────────────────────
    let mut pumps = PumpBoard::new(zones.iter().map(|z| z.id()));
    pumps.all_off();

    // ── Controller ──────────────────────────────────────────────────
    let sim_config = cfg.simulator_config();
    let simulator = match cfg.simulator.seed {
        Some(seed) => SensorSimulator::with_rng(sim_config, fastrand::Rng::with_seed(seed)),
        None => SensorSimulator::new(sim_config),
    }
    .context("invalid simulator config")?;

    let controller =
        Controller::new(zones, simulator, pumps, db.clone()).context("invalid zone set")?;

    // ── Shared state ────────────────────────────────────────────────
    let shared = Arc::new(RwLock::new(SystemState::new(controller)));
    {
        let mut st = shared.write().await;
        st.record_system("hub started".to_string());
    }

    if run_once {
        let report = scheduler::run_tick(&shared).await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        shared.write().await.controller.stop_all().await;
        db.close().await;
        return Ok(());
    }

    // ── Web server + scheduler ──────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let app = AppState {
        shared: Arc::clone(&shared),
        db: db.clone(),
    };
    let mut web_task = tokio::spawn(web::serve(app, shutdown_rx.clone()));
    let sched_task = tokio::spawn(scheduler::run(
        Arc::clone(&shared),
        db.clone(),
        cfg.schedule(),
        shutdown_rx,
    ));

    let web_exited = tokio::select! {
        res = tokio::signal::ctrl_c() => {
            res.context("failed to listen for ctrl-c")?;
            info!("shutdown requested");
            None
        }
        res = &mut web_task => Some(res),
    };

    // ── Shutdown ────────────────────────────────────────────────────
    let _ = shutdown_tx.send(true);

    if let Err(e) = sched_task.await {
        error!("scheduler task failed: {e}");
    }
    let web_result = match web_exited {
        Some(res) => res,
        None => web_task.await,
    };
    match web_result {
        Ok(Err(e)) => error!("web server error: {e:#}"),
        Err(e) => error!("web task failed: {e}"),
        Ok(Ok(())) => {}
    }

    let report = shared.write().await.controller.stop_all().await;
    info!(stopped = report.transitions.len(), "pumps off");

    db.close().await;
    info!("hub stopped");
    Ok(())
}
