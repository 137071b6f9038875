use garden_core::{Controller, Plant, PumpStatus, TickReport, Zone};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::db::Db;
use crate::pump::PumpBoard;

/// Maximum number of events retained in the ring buffer.
const MAX_EVENTS: usize = 200;

// ---------------------------------------------------------------------------
// Public type alias
// ---------------------------------------------------------------------------

pub type SharedState = Arc<RwLock<SystemState>>;

pub type GardenController = Controller<PumpBoard, Db>;

// ---------------------------------------------------------------------------
// Core types
// ---------------------------------------------------------------------------

pub struct SystemState {
    pub started_at: Instant,
    pub controller: GardenController,
    pub events: VecDeque<SystemEvent>,
    pub last_tick: Option<TickReport>,
}

#[derive(Clone, Serialize)]
pub struct SystemEvent {
    #[serde(with = "time::serde::rfc3339")]
    pub ts: OffsetDateTime,
    pub kind: EventKind,
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Reading,
    Pump,
    Error,
    System,
}

// ---------------------------------------------------------------------------
// JSON response (what the API returns)
// ---------------------------------------------------------------------------

#[derive(Serialize)]
pub struct StatusResponse {
    pub uptime_secs: u64,
    pub zones: Vec<ZoneStatus>,
    pub last_tick: Option<TickReport>,
    pub events: Vec<SystemEvent>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ZoneStatus {
    pub zone_id: String,
    pub name: String,
    pub plant_type: String,
    pub moisture_threshold: f64,
    pub ph_min: f64,
    pub ph_max: f64,
    pub max_runtime_minutes: i64,
    pub moisture: Option<f64>,
    pub ph: Option<f64>,
    pub ph_out_of_range: bool,
    pub pump_status: PumpStatus,
    #[serde(with = "time::serde::rfc3339::option")]
    pub pump_start_time: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub last_watering_time: Option<OffsetDateTime>,
    pub plants: Vec<Plant>,
}

impl From<&Zone> for ZoneStatus {
    fn from(z: &Zone) -> Self {
        let ph = z.ph_range();
        Self {
            zone_id: z.id().to_string(),
            name: z.name().to_string(),
            plant_type: z.plant_type().to_string(),
            moisture_threshold: z.moisture_threshold(),
            ph_min: ph.min,
            ph_max: ph.max,
            max_runtime_minutes: z.max_runtime().whole_minutes(),
            moisture: z.moisture(),
            ph: z.ph(),
            ph_out_of_range: z.ph_out_of_range(),
            pump_status: z.pump_status(),
            pump_start_time: z.pump_start_time(),
            last_watering_time: z.last_watering_time(),
            plants: z.plants().to_vec(),
        }
    }
}

// ---------------------------------------------------------------------------
// Construction & mutation
// ---------------------------------------------------------------------------

impl SystemState {
    pub fn new(controller: GardenController) -> Self {
        Self {
            started_at: Instant::now(),
            controller,
            events: VecDeque::with_capacity(MAX_EVENTS),
            last_tick: None,
        }
    }

    /// Run one controller tick and record what it did.
    pub async fn tick(&mut self) -> TickReport {
        let report = self.controller.tick().await;
        self.record_tick(&report);
        report
    }

    /// Push ring-buffer events for a tick and keep it as the latest.
    pub fn record_tick(&mut self, report: &TickReport) {
        if !report.readings.is_empty() {
            let detail = report
                .readings
                .iter()
                .map(|r| format!("{}={:.2}%/pH {:.2}", r.zone_id, r.moisture, r.ph))
                .collect::<Vec<_>>()
                .join(", ");
            self.push_event(EventKind::Reading, detail);
        }

        for t in &report.transitions {
            self.push_event(
                EventKind::Pump,
                format!("{} set {} ({})", t.zone_id, t.status, t.reason),
            );
        }

        for f in &report.failures {
            self.push_event(
                EventKind::Error,
                format!("{} {:?} failure: {}", f.zone_id, f.stage, f.detail),
            );
        }

        self.last_tick = Some(report.clone());
    }

    /// Record an error event.
    pub fn record_error(&mut self, detail: String) {
        self.push_event(EventKind::Error, detail);
    }

    /// Record a generic system event.
    pub fn record_system(&mut self, detail: String) {
        self.push_event(EventKind::System, detail);
    }

    /// Build the JSON-serialisable status snapshot.
    pub fn to_status(&self) -> StatusResponse {
        StatusResponse {
            uptime_secs: self.started_at.elapsed().as_secs(),
            zones: self.controller.zones().iter().map(ZoneStatus::from).collect(),
            last_tick: self.last_tick.clone(),
            events: self.events.iter().rev().cloned().collect(),
        }
    }

    fn push_event(&mut self, kind: EventKind, detail: String) {
        if self.events.len() >= MAX_EVENTS {
            self.events.pop_front();
        }
        self.events.push_back(SystemEvent {
            ts: OffsetDateTime::now_utc(),
            kind,
            detail,
        });
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use garden_core::{hydrate_zones, seed_zones, SensorSimulator, SimulatorConfig};

    /// Seeded in-memory DB plus a controller over the seed zones.
    pub(crate) async fn test_state(sim: SimulatorConfig) -> (SharedState, Db) {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();
        for z in seed_zones() {
            db.upsert_zone(&z).await.unwrap();
        }

        let zones = hydrate_zones(&db).await.unwrap();
        let pump = PumpBoard::new(zones.iter().map(|z| z.id()));
        let simulator = SensorSimulator::with_rng(sim, fastrand::Rng::with_seed(7)).unwrap();
        let controller = Controller::new(zones, simulator, pump, db.clone()).unwrap();

        (Arc::new(RwLock::new(SystemState::new(controller))), db)
    }

    pub(crate) fn dry() -> SimulatorConfig {
        SimulatorConfig {
            default: garden_core::ReadingRange {
                moisture: (15.0, 15.0),
                ph: (6.5, 6.5),
            },
            per_zone: Default::default(),
        }
    }

    #[tokio::test]
    async fn new_state_lists_zones_idle() {
        let (shared, _db) = test_state(SimulatorConfig::default()).await;
        let st = shared.read().await;
        let status = st.to_status();

        assert_eq!(status.zones.len(), 3);
        assert!(status.zones.iter().all(|z| z.pump_status == PumpStatus::Off));
        assert!(status.zones.iter().all(|z| z.moisture.is_none()));
        assert!(status.last_tick.is_none());
        assert!(status.events.is_empty());
    }

    #[tokio::test]
    async fn tick_records_reading_and_pump_events() {
        let (shared, _db) = test_state(dry()).await;
        let mut st = shared.write().await;

        let report = st.tick().await;

        assert_eq!(report.transitions.len(), 3);
        let kinds: Vec<EventKind> = st.events.iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![EventKind::Reading, EventKind::Pump, EventKind::Pump, EventKind::Pump]
        );
        assert_eq!(st.events[1].detail, "A set ON (moisture_low)");
        assert_eq!(st.controller.pump().is_on("A"), Some(true));

        let status = st.to_status();
        assert_eq!(status.zones[0].moisture, Some(15.0));
        assert!(status.zones[0].pump_start_time.is_some());
        assert!(status.last_tick.is_some());
    }

    #[tokio::test]
    async fn events_ring_buffer_capped() {
        let (shared, _db) = test_state(SimulatorConfig::default()).await;
        let mut st = shared.write().await;
        for i in 0..(MAX_EVENTS + 25) {
            st.record_system(format!("event {i}"));
        }
        assert_eq!(st.events.len(), MAX_EVENTS);
        // Newest first in the status snapshot.
        let status = st.to_status();
        assert_eq!(status.events[0].detail, format!("event {}", MAX_EVENTS + 24));
    }

    #[tokio::test]
    async fn status_serialises_upper_case_pump_status() {
        let (shared, _db) = test_state(SimulatorConfig::default()).await;
        let st = shared.read().await;
        let json = serde_json::to_value(st.to_status()).unwrap();
        assert_eq!(json["zones"][0]["pump_status"], "OFF");
        assert_eq!(json["zones"][0]["zone_id"], "A");
        assert_eq!(json["zones"][0]["max_runtime_minutes"], 30);
    }
}
