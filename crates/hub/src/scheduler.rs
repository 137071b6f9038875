//! Control loop: runs a controller tick every `tick_interval` and a retention
//! cleanup every `cleanup_interval` until shutdown is signalled.
//!
//! Each tick holds the shared state's write lock for its whole duration, so
//! ticks from here and from `POST /api/tick` never interleave. Shutdown is
//! only observed between ticks; an in-flight tick always completes.

use std::time::Duration;

use garden_core::{Clock, FailureStage, Store, TickReport};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use crate::db::Db;
use crate::state::SharedState;

/// Timing for the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    pub tick_interval: Duration,
    pub cleanup_interval: Duration,
    pub retention_days: u32,
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

/// Run the scheduler loop. Intended to be `tokio::spawn`-ed from main.
pub async fn run(
    shared: SharedState,
    db: Db,
    schedule: Schedule,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(schedule.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut cleanup = tokio::time::interval(schedule.cleanup_interval);
    cleanup.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(
        tick_sec = schedule.tick_interval.as_secs(),
        cleanup_hours = schedule.cleanup_interval.as_secs() / 3600,
        retention_days = schedule.retention_days,
        "scheduler started"
    );
    {
        let mut st = shared.write().await;
        st.record_system(format!(
            "scheduler started (tick every {}s, keep {} days)",
            schedule.tick_interval.as_secs(),
            schedule.retention_days
        ));
    }

    loop {
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            biased;

            res = shutdown.changed() => {
                // A dropped sender also means stop.
                if res.is_err() || *shutdown.borrow() {
                    break;
                }
            }
            _ = ticker.tick() => {
                run_tick(&shared).await;
            }
            _ = cleanup.tick() => {
                run_cleanup(&shared, &db, schedule.retention_days).await;
            }
        }
    }

    info!("scheduler stopped");
}

// ---------------------------------------------------------------------------
// Steps
// ---------------------------------------------------------------------------

/// One controller tick under the write lock.
pub async fn run_tick(shared: &SharedState) -> TickReport {
    let mut st = shared.write().await;
    let report = st.tick().await;

    for f in &report.failures {
        match f.stage {
            FailureStage::Actuator => {
                warn!(zone = %f.zone_id, "scheduler: pump command failed, will retry: {}", f.detail)
            }
            FailureStage::Store => {
                warn!(zone = %f.zone_id, "scheduler: store write failed: {}", f.detail)
            }
        }
    }

    report
}

/// Drop history older than `retention_days`, measured on the controller's
/// clock. Returns how many records went, or `None` if the store failed.
pub async fn run_cleanup(shared: &SharedState, db: &Db, retention_days: u32) -> Option<u64> {
    let now = shared.read().await.controller.clock().now();
    match db.cleanup_older_than(retention_days, now).await {
        Ok(removed) => {
            info!(removed, retention_days, "retention cleanup done");
            let mut st = shared.write().await;
            st.record_system(format!(
                "retention cleanup removed {removed} record(s) older than {retention_days} days"
            ));
            Some(removed)
        }
        Err(e) => {
            error!("retention cleanup failed: {e}");
            let mut st = shared.write().await;
            st.record_error(format!("retention cleanup failed: {e}"));
            None
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
