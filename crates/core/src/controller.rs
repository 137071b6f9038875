//! Automation controller: one tick refreshes readings, records them, and
//! drives each zone's pump state machine through the actuator.
//!
//! Per zone, in collection order:
//!
//! 1. refresh readings (simulator, or externally supplied)
//! 2. append a sensor reading
//! 3. pump on  -> stop if `should_deactivate_pump`
//!    pump off -> start if `should_activate_pump`
//! 4. append a pump event for any transition
//!
//! A zone without a complete reading this tick is only checked against its
//! runtime cap.
//!
//! Failures stay inside the zone that caused them. A store error is logged
//! and the zone's in-memory state is kept. An actuator error leaves the zone
//! in its previous state so the transition is retried next tick.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, error, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::pump::PumpActuator;
use crate::seed::seed_zones;
use crate::sim::SensorSimulator;
use crate::store::{PumpEvent, SensorReading, Store, StoreError};
use crate::zone::{Plant, PumpStatus, Reading, Zone, ZoneError};

// ---------------------------------------------------------------------------
// Tick report
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionReason {
    /// Moisture below threshold and cooldown elapsed.
    MoistureLow,
    /// Moisture back at or above threshold.
    MoistureRestored,
    /// Pump ran longer than the zone's cap.
    MaxRuntime,
    /// Pump stopped because the controller is shutting down or the zone was
    /// removed.
    Shutdown,
}

impl TransitionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MoistureLow => "moisture_low",
            Self::MoistureRestored => "moisture_restored",
            Self::MaxRuntime => "max_runtime",
            Self::Shutdown => "shutdown",
        }
    }
}

impl fmt::Display for TransitionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Transition {
    pub zone_id: String,
    pub status: PumpStatus,
    pub reason: TransitionReason,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Actuator,
    Store,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneFailure {
    pub zone_id: String,
    pub stage: FailureStage,
    pub detail: String,
}

/// What one tick did.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TickReport {
    #[serde(with = "time::serde::rfc3339")]
    pub at: OffsetDateTime,
    /// Readings the store accepted. A failed write shows up in `failures`.
    pub readings: Vec<SensorReading>,
    pub transitions: Vec<Transition>,
    pub failures: Vec<ZoneFailure>,
}

impl TickReport {
    fn new(at: OffsetDateTime) -> Self {
        Self {
            at,
            readings: Vec::new(),
            transitions: Vec::new(),
            failures: Vec::new(),
        }
    }

    fn fail(&mut self, zone_id: &str, stage: FailureStage, detail: String) {
        self.failures.push(ZoneFailure {
            zone_id: zone_id.to_string(),
            stage,
            detail,
        });
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

pub struct Controller<P, S, C = SystemClock> {
    zones: Vec<Zone>,
    simulator: SensorSimulator,
    pump: P,
    store: S,
    clock: C,
}

impl<P, S> Controller<P, S, SystemClock>
where
    P: PumpActuator,
    S: Store,
{
    pub fn new(
        zones: Vec<Zone>,
        simulator: SensorSimulator,
        pump: P,
        store: S,
    ) -> Result<Self, ZoneError> {
        Self::with_clock(zones, simulator, pump, store, SystemClock)
    }
}

impl<P, S, C> Controller<P, S, C>
where
    P: PumpActuator,
    S: Store,
    C: Clock,
{
    /// Zone ids must be unique.
    pub fn with_clock(
        zones: Vec<Zone>,
        simulator: SensorSimulator,
        pump: P,
        store: S,
        clock: C,
    ) -> Result<Self, ZoneError> {
        let mut controller = Self {
            zones: Vec::with_capacity(zones.len()),
            simulator,
            pump,
            store,
            clock,
        };
        for zone in zones {
            controller.add_zone(zone)?;
        }
        Ok(controller)
    }

    pub fn zones(&self) -> &[Zone] {
        &self.zones
    }

    pub fn zone(&self, zone_id: &str) -> Option<&Zone> {
        self.zones.iter().find(|z| z.id() == zone_id)
    }

    pub fn pump(&self) -> &P {
        &self.pump
    }

    pub fn pump_mut(&mut self) -> &mut P {
        &mut self.pump
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    // -- Zone management -----------------------------------------------------

    pub fn add_zone(&mut self, zone: Zone) -> Result<(), ZoneError> {
        if self.zone(zone.id()).is_some() {
            return Err(ZoneError::Duplicate(zone.id().to_string()));
        }
        self.zones.push(zone);
        Ok(())
    }

    /// Remove a zone, switching its pump off first if it is running. If the
    /// pump cannot be stopped the zone stays under control and
    /// [`ZoneError::PumpFailed`] is returned.
    pub async fn remove_zone(&mut self, zone_id: &str) -> Result<Zone, ZoneError> {
        let pos = self
            .zones
            .iter()
            .position(|z| z.id() == zone_id)
            .ok_or_else(|| ZoneError::NotFound(zone_id.to_string()))?;

        let now = self.clock.now();
        let mut report = TickReport::new(now);
        let Self {
            zones, pump, store, ..
        } = self;
        if zones[pos].pump_status() == PumpStatus::On
            && !force_stop(&mut zones[pos], pump, store, now, &mut report).await
        {
            let detail = report
                .failures
                .pop()
                .map(|f| f.detail)
                .unwrap_or_default();
            return Err(ZoneError::PumpFailed {
                zone_id: zone_id.to_string(),
                detail,
            });
        }

        Ok(self.zones.remove(pos))
    }

    pub fn add_plant(&mut self, zone_id: &str, plant: Plant) -> Result<(), ZoneError> {
        let zone = self
            .zones
            .iter_mut()
            .find(|z| z.id() == zone_id)
            .ok_or_else(|| ZoneError::NotFound(zone_id.to_string()))?;
        zone.add_plant(plant);
        Ok(())
    }

    pub fn remove_plant(&mut self, plant_id: i64) -> Option<Plant> {
        self.zones.iter_mut().find_map(|z| z.remove_plant(plant_id))
    }

    // -- Ticks ---------------------------------------------------------------

    /// Simulate, record, decide and act for every zone.
    pub async fn tick(&mut self) -> TickReport {
        self.run_tick(None).await
    }

    /// Like [`tick`](Self::tick) but with readings supplied by the caller.
    /// Zones missing from `readings` keep their previous values and record
    /// no reading; only their runtime cap is enforced.
    pub async fn tick_with_readings(&mut self, readings: &HashMap<String, Reading>) -> TickReport {
        self.run_tick(Some(readings)).await
    }

    /// Switch off every running pump. Used on shutdown.
    pub async fn stop_all(&mut self) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport::new(now);
        let Self {
            zones, pump, store, ..
        } = self;
        for zone in zones.iter_mut() {
            if zone.pump_status() == PumpStatus::On {
                force_stop(zone, pump, store, now, &mut report).await;
            }
        }
        report
    }

    async fn run_tick(&mut self, supplied: Option<&HashMap<String, Reading>>) -> TickReport {
        let now = self.clock.now();
        let mut report = TickReport::new(now);

        let Self {
            zones,
            simulator,
            pump,
            store,
            ..
        } = self;

        for zone in zones.iter_mut() {
            let refreshed = match supplied {
                None => {
                    simulator.simulate_zone(zone);
                    true
                }
                Some(readings) => match readings.get(zone.id()) {
                    Some(r) => {
                        zone.update_readings(r.moisture, r.ph);
                        true
                    }
                    None => false,
                },
            };

            let sampled = refreshed && record_reading(zone, store, now, &mut report).await;

            if sampled {
                evaluate_zone(zone, pump, store, now, &mut report).await;
            } else {
                enforce_runtime_cap(zone, pump, store, now, &mut report).await;
            }
        }

        info!(
            zones = zones.len(),
            readings = report.readings.len(),
            transitions = report.transitions.len(),
            failures = report.failures.len(),
            "tick complete"
        );

        report
    }
}

// ---------------------------------------------------------------------------
// Per-zone steps
// ---------------------------------------------------------------------------

/// Returns whether the zone had a complete reading to record. A store
/// failure still counts as sampled.
async fn record_reading<S: Store>(
    zone: &Zone,
    store: &S,
    now: OffsetDateTime,
    report: &mut TickReport,
) -> bool {
    let Some(r) = zone.reading() else {
        debug!(zone = %zone.id(), "no complete reading, nothing recorded");
        return false;
    };

    let reading = SensorReading {
        zone_id: zone.id().to_string(),
        moisture: r.moisture,
        ph: r.ph,
        timestamp: now,
    };

    if zone.ph_out_of_range() {
        warn!(
            zone = %zone.id(),
            ph = r.ph,
            min = zone.ph_range().min,
            max = zone.ph_range().max,
            "pH out of range"
        );
    }

    match store.record_reading(&reading).await {
        Ok(()) => report.readings.push(reading),
        Err(e) => {
            warn!(zone = %zone.id(), "record_reading failed: {e}");
            report.fail(zone.id(), FailureStage::Store, e.to_string());
        }
    }
    true
}

async fn evaluate_zone<P: PumpActuator, S: Store>(
    zone: &mut Zone,
    pump: &mut P,
    store: &S,
    now: OffsetDateTime,
    report: &mut TickReport,
) {
    match zone.pump_status() {
        PumpStatus::On => {
            if !zone.should_deactivate_pump(now) {
                return; // keep watering
            }
            let reason = if zone.has_sufficient_moisture() {
                TransitionReason::MoistureRestored
            } else {
                TransitionReason::MaxRuntime
            };
            stop_zone(zone, pump, store, now, reason, report).await;
        }
        PumpStatus::Off => {
            if !zone.needs_watering() {
                return;
            }
            if !zone.can_water(now) {
                debug!(
                    zone = %zone.id(),
                    moisture = zone.moisture(),
                    "moisture low but still in cooldown"
                );
                return;
            }

            if let Err(e) = pump.activate(zone.id()) {
                error!(zone = %zone.id(), "pump activate failed: {e}");
                report.fail(zone.id(), FailureStage::Actuator, e.to_string());
                return;
            }
            zone.start_pump(now);

            info!(
                zone = %zone.id(),
                moisture = zone.moisture(),
                threshold = zone.moisture_threshold(),
                "pump started"
            );
            record_transition(zone, store, now, TransitionReason::MoistureLow, report).await;
        }
    }
}

/// Without a fresh reading only the runtime cap can stop a pump, and a
/// stopped pump is never started.
async fn enforce_runtime_cap<P: PumpActuator, S: Store>(
    zone: &mut Zone,
    pump: &mut P,
    store: &S,
    now: OffsetDateTime,
    report: &mut TickReport,
) {
    if zone.is_max_runtime_reached(now) {
        stop_zone(zone, pump, store, now, TransitionReason::MaxRuntime, report).await;
    }
}

/// Returns false if the actuator refused; the zone then stays on.
async fn stop_zone<P: PumpActuator, S: Store>(
    zone: &mut Zone,
    pump: &mut P,
    store: &S,
    now: OffsetDateTime,
    reason: TransitionReason,
    report: &mut TickReport,
) -> bool {
    if let Err(e) = pump.deactivate(zone.id()) {
        error!(zone = %zone.id(), "pump deactivate failed: {e}");
        report.fail(zone.id(), FailureStage::Actuator, e.to_string());
        return false;
    }
    let ran_for = zone.pump_start_time().map(|since| now - since);
    zone.stop_pump(now);

    info!(
        zone = %zone.id(),
        moisture = zone.moisture(),
        %reason,
        ran_secs = ran_for.map(|d| d.whole_seconds()),
        "pump stopped"
    );
    record_transition(zone, store, now, reason, report).await;
    true
}

async fn force_stop<P: PumpActuator, S: Store>(
    zone: &mut Zone,
    pump: &mut P,
    store: &S,
    now: OffsetDateTime,
    report: &mut TickReport,
) -> bool {
    stop_zone(zone, pump, store, now, TransitionReason::Shutdown, report).await
}

async fn record_transition<S: Store>(
    zone: &Zone,
    store: &S,
    now: OffsetDateTime,
    reason: TransitionReason,
    report: &mut TickReport,
) {
    let event = PumpEvent {
        zone_id: zone.id().to_string(),
        status: zone.pump_status(),
        timestamp: now,
    };
    if let Err(e) = store.record_pump_event(&event).await {
        warn!(zone = %zone.id(), status = %event.status, "record_pump_event failed: {e}");
        report.fail(zone.id(), FailureStage::Store, e.to_string());
    }
    report.transitions.push(Transition {
        zone_id: event.zone_id,
        status: event.status,
        reason,
    });
}

// ---------------------------------------------------------------------------
// Start-up hydration
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum HydrateError {
    #[error("failed to load zones: {0}")]
    Store(#[from] StoreError),
    #[error("no valid zones to control")]
    NoValidZones,
}

/// Build zones from the store, falling back to [`seed_zones`] when it has
/// none. Invalid configs are skipped with a warning; a plant lookup failure
/// leaves that zone without plants.
pub async fn hydrate_zones<S: Store + ?Sized>(store: &S) -> Result<Vec<Zone>, HydrateError> {
    let mut configs = store.load_zones().await?;
    if configs.is_empty() {
        warn!("no zones stored, using seed configuration");
        configs = seed_zones();
    }

    let mut zones = Vec::with_capacity(configs.len());
    for config in configs {
        let zone_id = config.zone_id.clone();
        let zone = match Zone::new(config) {
            Ok(z) => z,
            Err(e) => {
                warn!(zone = %zone_id, "skipping zone: {e}");
                continue;
            }
        };
        let plants = match store.load_plants(&zone_id).await {
            Ok(p) => p,
            Err(e) => {
                warn!(zone = %zone_id, "load_plants failed: {e}");
                Vec::new()
            }
        };
        zones.push(zone.with_plants(plants));
    }

    if zones.is_empty() {
        return Err(HydrateError::NoValidZones);
    }
    Ok(zones)
}

// ===========================================================================
// Tests
// ===========================================================================
