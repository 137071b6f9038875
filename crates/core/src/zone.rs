//! Zone entity: immutable watering configuration, live sensor readings and
//! the per-zone pump state machine.
//!
//! ```text
//! Idle ──[should_activate_pump]──▶ Watering { since }
//!  ▲                                    │
//!  └──────[should_deactivate_pump]──────┘
//! ```
//!
//! Every predicate takes `now` explicitly so callers (and tests) decide what
//! the wall clock says.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use time::{Date, Duration, OffsetDateTime};

/// Minimum time between the end of one watering cycle and the next start.
pub const COOLDOWN: Duration = Duration::hours(2);

/// Runtime cap used when a zone config does not set one.
pub const DEFAULT_MAX_RUNTIME_MINUTES: u32 = 30;

const PH_SCALE: (f64, f64) = (0.0, 14.0);
const MOISTURE_SCALE: (f64, f64) = (0.0, 100.0);

// ---------------------------------------------------------------------------
// Pump status
// ---------------------------------------------------------------------------

/// Last-known pump status. Serialised as `"ON"` / `"OFF"` everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PumpStatus {
    On,
    Off,
}

impl PumpStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::On => "ON",
            Self::Off => "OFF",
        }
    }
}

impl fmt::Display for PumpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown pump status '{0}' (use ON/OFF)")]
pub struct ParsePumpStatusError(String);

impl FromStr for PumpStatus {
    type Err = ParsePumpStatusError;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_uppercase();
        match s.as_str() {
            "ON" => Ok(Self::On),
            "OFF" => Ok(Self::Off),
            _ => Err(ParsePumpStatusError(s)),
        }
    }
}

/// Pump state of a zone. The start time only exists while watering, so
/// "start time set iff pump on" holds by construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PumpState {
    Idle,
    Watering { since: OffsetDateTime },
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_max_runtime() -> u32 {
    DEFAULT_MAX_RUNTIME_MINUTES
}

/// Persisted / user-supplied zone configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneConfig {
    pub zone_id: String,
    pub name: String,
    #[serde(default)]
    pub plant_type: String,
    pub moisture_threshold: f64,
    pub ph_min: f64,
    pub ph_max: f64,
    #[serde(default = "default_max_runtime")]
    pub max_runtime_minutes: u32,
    /// End of the most recent watering cycle, if any.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub last_watered: Option<OffsetDateTime>,
}

impl ZoneConfig {
    /// Every problem with this config, in field order. Empty means valid.
    pub fn violations(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.zone_id.trim().is_empty() {
            errors.push("zone_id is empty".to_string());
        }
        if self.name.trim().is_empty() {
            errors.push("name is empty".to_string());
        }

        let (lo, hi) = MOISTURE_SCALE;
        if !(lo..=hi).contains(&self.moisture_threshold) {
            errors.push(format!(
                "moisture_threshold {} out of range [{lo}, {hi}]",
                self.moisture_threshold
            ));
        }

        let (lo, hi) = PH_SCALE;
        if !(lo..=hi).contains(&self.ph_min) {
            errors.push(format!("ph_min {} out of range [{lo}, {hi}]", self.ph_min));
        }
        if !(lo..=hi).contains(&self.ph_max) {
            errors.push(format!("ph_max {} out of range [{lo}, {hi}]", self.ph_max));
        }
        if self.ph_min >= self.ph_max {
            errors.push(format!(
                "ph_min ({}) must be less than ph_max ({})",
                self.ph_min, self.ph_max
            ));
        }

        if self.max_runtime_minutes == 0 {
            errors.push("max_runtime_minutes must be positive".to_string());
        }

        errors
    }

    pub fn validate(&self) -> Result<(), ZoneError> {
        let reasons = self.violations();
        if reasons.is_empty() {
            Ok(())
        } else {
            Err(ZoneError::Invalid {
                zone_id: self.zone_id.clone(),
                reasons,
            })
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ZoneError {
    #[error("invalid zone '{zone_id}': {}", .reasons.join("; "))]
    Invalid {
        zone_id: String,
        reasons: Vec<String>,
    },
    #[error("zone '{0}' already exists")]
    Duplicate(String),
    #[error("zone '{0}' not found")]
    NotFound(String),
    #[error("pump for zone '{zone_id}' could not be stopped: {detail}")]
    PumpFailed { zone_id: String, detail: String },
}

// ---------------------------------------------------------------------------
// Plants and readings
// ---------------------------------------------------------------------------

/// A plant attached to a zone. Informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plant {
    pub id: i64,
    pub zone_id: String,
    pub name: String,
    pub plant_type: String,
    #[serde(default)]
    pub planting_date: Option<Date>,
    #[serde(default)]
    pub notes: Option<String>,
}

/// One moisture/pH sample for a zone.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    pub moisture: f64,
    pub ph: f64,
}

/// Inclusive acceptable pH band.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PhRange {
    pub min: f64,
    pub max: f64,
}

impl PhRange {
    pub fn contains(&self, ph: f64) -> bool {
        (self.min..=self.max).contains(&ph)
    }
}

// ---------------------------------------------------------------------------
// Zone
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Zone {
    id: String,
    name: String,
    plant_type: String,
    moisture_threshold: f64,
    ph_range: PhRange,
    max_runtime: Duration,

    moisture: Option<f64>,
    ph: Option<f64>,
    pump: PumpState,
    last_watering_time: Option<OffsetDateTime>,

    plants: Vec<Plant>,
}

impl Zone {
    /// Build a zone from its config. Degenerate configs (inverted pH band,
    /// threshold outside 0-100, zero runtime cap, ...) are rejected.
    pub fn new(config: ZoneConfig) -> Result<Self, ZoneError> {
        config.validate()?;

        Ok(Self {
            id: config.zone_id,
            name: config.name,
            plant_type: config.plant_type,
            moisture_threshold: config.moisture_threshold,
            ph_range: PhRange {
                min: config.ph_min,
                max: config.ph_max,
            },
            max_runtime: Duration::minutes(i64::from(config.max_runtime_minutes)),
            moisture: None,
            ph: None,
            pump: PumpState::Idle,
            last_watering_time: config.last_watered,
            plants: Vec::new(),
        })
    }

    pub fn with_plants(mut self, plants: Vec<Plant>) -> Self {
        self.plants = plants;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn plant_type(&self) -> &str {
        &self.plant_type
    }

    pub fn moisture_threshold(&self) -> f64 {
        self.moisture_threshold
    }

    pub fn ph_range(&self) -> PhRange {
        self.ph_range
    }

    pub fn max_runtime(&self) -> Duration {
        self.max_runtime
    }

    pub fn moisture(&self) -> Option<f64> {
        self.moisture
    }

    pub fn ph(&self) -> Option<f64> {
        self.ph
    }

    /// Both readings, once the zone has been sampled.
    pub fn reading(&self) -> Option<Reading> {
        Some(Reading {
            moisture: self.moisture?,
            ph: self.ph?,
        })
    }

    pub fn pump_state(&self) -> PumpState {
        self.pump
    }

    pub fn pump_status(&self) -> PumpStatus {
        match self.pump {
            PumpState::Idle => PumpStatus::Off,
            PumpState::Watering { .. } => PumpStatus::On,
        }
    }

    pub fn pump_start_time(&self) -> Option<OffsetDateTime> {
        match self.pump {
            PumpState::Idle => None,
            PumpState::Watering { since } => Some(since),
        }
    }

    pub fn last_watering_time(&self) -> Option<OffsetDateTime> {
        self.last_watering_time
    }

    pub fn plants(&self) -> &[Plant] {
        &self.plants
    }

    pub fn add_plant(&mut self, plant: Plant) {
        self.plants.push(plant);
    }

    pub fn remove_plant(&mut self, plant_id: i64) -> Option<Plant> {
        let pos = self.plants.iter().position(|p| p.id == plant_id)?;
        Some(self.plants.remove(pos))
    }

    // -- Readings -----------------------------------------------------------

    /// Store a new sample. Values are clamped to the physical scale; a
    /// non-finite value is treated as a missing reading.
    pub fn update_readings(&mut self, moisture: f64, ph: f64) {
        self.moisture = moisture
            .is_finite()
            .then(|| moisture.clamp(MOISTURE_SCALE.0, MOISTURE_SCALE.1));
        self.ph = ph.is_finite().then(|| ph.clamp(PH_SCALE.0, PH_SCALE.1));
    }

    // -- Predicates ---------------------------------------------------------

    /// Moisture is known and below the threshold. No data never waters.
    pub fn needs_watering(&self) -> bool {
        self.moisture.is_some_and(|m| m < self.moisture_threshold)
    }

    /// Moisture is known and at or above the threshold.
    pub fn has_sufficient_moisture(&self) -> bool {
        self.moisture.is_some_and(|m| m >= self.moisture_threshold)
    }

    /// Outside the cooldown window. Exactly `COOLDOWN` after the last stop
    /// is already eligible.
    pub fn can_water(&self, now: OffsetDateTime) -> bool {
        match self.last_watering_time {
            None => true,
            Some(last) => now - last >= COOLDOWN,
        }
    }

    /// Only meaningful while the pump is off.
    pub fn should_activate_pump(&self, now: OffsetDateTime) -> bool {
        self.needs_watering() && self.can_water(now)
    }

    /// Pump has run strictly longer than the cap. Exactly at the cap it
    /// keeps running.
    pub fn is_max_runtime_reached(&self, now: OffsetDateTime) -> bool {
        match self.pump {
            PumpState::Idle => false,
            PumpState::Watering { since } => now - since > self.max_runtime,
        }
    }

    /// Only meaningful while the pump is on.
    pub fn should_deactivate_pump(&self, now: OffsetDateTime) -> bool {
        self.has_sufficient_moisture() || self.is_max_runtime_reached(now)
    }

    pub fn ph_out_of_range(&self) -> bool {
        self.ph.is_some_and(|ph| !self.ph_range.contains(ph))
    }

    // -- Transitions --------------------------------------------------------

    /// `Idle -> Watering`. Returns false (and changes nothing) if the pump is
    /// already running.
    pub fn start_pump(&mut self, now: OffsetDateTime) -> bool {
        match self.pump {
            PumpState::Watering { .. } => false,
            PumpState::Idle => {
                self.pump = PumpState::Watering { since: now };
                true
            }
        }
    }

    /// `Watering -> Idle`, stamping the end of the cycle. Returns false (and
    /// changes nothing) if the pump is already off.
    pub fn stop_pump(&mut self, now: OffsetDateTime) -> bool {
        match self.pump {
            PumpState::Idle => false,
            PumpState::Watering { .. } => {
                self.pump = PumpState::Idle;
                self.last_watering_time = Some(now);
                true
            }
        }
    }
}

// ===========================================================================
// Tests
// ===========================================================================
