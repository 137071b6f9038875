//! Sensor simulator for development and tests.
//!
//! Each call draws one moisture and one pH value per zone, uniformly from a
//! configured range. Ranges come from a [`SimulatorConfig`]: a default range
//! plus optional per-zone overrides, fixed when the simulator is built. The
//! random source is injectable so runs can be reproduced from a seed.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

use crate::zone::Zone;

// ---------------------------------------------------------------------------
// Ranges and presets
// ---------------------------------------------------------------------------

/// Inclusive bounds for generated readings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ReadingRange {
    pub moisture: (f64, f64),
    pub ph: (f64, f64),
}

impl ReadingRange {
    /// Moisture 10-90 %, pH 5.0-8.5.
    pub const WIDE: Self = Self {
        moisture: (10.0, 90.0),
        ph: (5.0, 8.5),
    };

    /// Moisture 20-80 %, pH 5.5-7.5.
    pub const NARROW: Self = Self {
        moisture: (20.0, 80.0),
        ph: (5.5, 7.5),
    };

    /// Every problem with this range, prefixed with `label`.
    pub fn violations(&self, label: &str) -> Vec<String> {
        let mut errors = Vec::new();
        check_bounds(&mut errors, label, "moisture", self.moisture, (0.0, 100.0));
        check_bounds(&mut errors, label, "ph", self.ph, (0.0, 14.0));
        errors
    }
}

fn check_bounds(
    errors: &mut Vec<String>,
    label: &str,
    field: &str,
    (lo, hi): (f64, f64),
    (scale_lo, scale_hi): (f64, f64),
) {
    let scale = scale_lo..=scale_hi;
    if !scale.contains(&lo) || !scale.contains(&hi) {
        errors.push(format!(
            "{label}: {field} range ({lo}, {hi}) outside [{scale_lo}, {scale_hi}]"
        ));
    }
    if lo > hi {
        errors.push(format!(
            "{label}: {field} min ({lo}) greater than max ({hi})"
        ));
    }
}

/// Named default ranges, selectable from config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RangePreset {
    /// Moisture swings far enough to exercise both pump transitions often.
    #[default]
    Wide,
    /// Calmer readings, closer to a healthy bed.
    Narrow,
}

impl RangePreset {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "narrow" => Self::Narrow,
            _ => Self::Wide,
        }
    }

    pub fn range(&self) -> ReadingRange {
        match self {
            Self::Wide => ReadingRange::WIDE,
            Self::Narrow => ReadingRange::NARROW,
        }
    }
}

impl fmt::Display for RangePreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Wide => write!(f, "wide"),
            Self::Narrow => write!(f, "narrow"),
        }
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct SimulatorConfig {
    pub default: ReadingRange,
    pub per_zone: HashMap<String, ReadingRange>,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::from_preset(RangePreset::default())
    }
}

impl SimulatorConfig {
    pub fn from_preset(preset: RangePreset) -> Self {
        Self {
            default: preset.range(),
            per_zone: HashMap::new(),
        }
    }

    pub fn with_zone(mut self, zone_id: impl Into<String>, range: ReadingRange) -> Self {
        self.per_zone.insert(zone_id.into(), range);
        self
    }

    pub fn range_for(&self, zone_id: &str) -> &ReadingRange {
        self.per_zone.get(zone_id).unwrap_or(&self.default)
    }

    pub fn validate(&self) -> Result<(), SimulatorError> {
        let mut errors = self.default.violations("default");

        let mut zone_ids: Vec<&String> = self.per_zone.keys().collect();
        zone_ids.sort();
        for zone_id in zone_ids {
            errors.extend(self.per_zone[zone_id].violations(&format!("zone '{zone_id}'")));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(SimulatorError::InvalidRange(errors))
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum SimulatorError {
    #[error("invalid simulator ranges: {}", .0.join("; "))]
    InvalidRange(Vec<String>),
}

// ---------------------------------------------------------------------------
// Simulator
// ---------------------------------------------------------------------------

pub struct SensorSimulator {
    config: SimulatorConfig,
    rng: fastrand::Rng,
}

impl SensorSimulator {
    /// Entropy-seeded simulator.
    pub fn new(config: SimulatorConfig) -> Result<Self, SimulatorError> {
        Self::with_rng(config, fastrand::Rng::new())
    }

    /// Simulator drawing from `rng`; use `fastrand::Rng::with_seed` for
    /// reproducible runs.
    pub fn with_rng(config: SimulatorConfig, rng: fastrand::Rng) -> Result<Self, SimulatorError> {
        config.validate()?;
        Ok(Self { config, rng })
    }

    /// Refresh readings on every zone, in order. An empty slice is a no-op.
    pub fn simulate(&mut self, zones: &mut [Zone]) {
        for zone in zones {
            self.simulate_zone(zone);
        }
    }

    pub fn simulate_zone(&mut self, zone: &mut Zone) {
        let range = *self.config.range_for(zone.id());
        let moisture = self.draw(range.moisture);
        let ph = self.draw(range.ph);
        zone.update_readings(moisture, ph);
    }

    /// Uniform draw rounded to two decimals, kept inside the bounds.
    fn draw(&mut self, (lo, hi): (f64, f64)) -> f64 {
        let v = lo + self.rng.f64() * (hi - lo);
        ((v * 100.0).round() / 100.0).clamp(lo, hi)
    }
}

impl fmt::Debug for SensorSimulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SensorSimulator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::seed_zones;

    fn zones() -> Vec<Zone> {
        seed_zones()
            .into_iter()
            .map(|c| Zone::new(c).unwrap())
            .collect()
    }

    fn seeded(config: SimulatorConfig, seed: u64) -> SensorSimulator {
        SensorSimulator::with_rng(config, fastrand::Rng::with_seed(seed)).unwrap()
    }

    #[test]
    fn readings_within_default_range() {
        let mut sim = seeded(SimulatorConfig::default(), 1);
        let mut zones = zones();
        for _ in 0..500 {
            sim.simulate(&mut zones);
            for z in &zones {
                let m = z.moisture().unwrap();
                let ph = z.ph().unwrap();
                assert!((10.0..=90.0).contains(&m), "moisture out of range: {m}");
                assert!((5.0..=8.5).contains(&ph), "ph out of range: {ph}");
            }
        }
    }

    #[test]
    fn readings_rounded_to_two_decimals() {
        let mut sim = seeded(SimulatorConfig::default(), 2);
        let mut zones = zones();
        sim.simulate(&mut zones);
        for z in &zones {
            let m = z.moisture().unwrap();
            assert!(((m * 100.0).round() - m * 100.0).abs() < 1e-6, "not rounded: {m}");
        }
    }

    #[test]
    fn per_zone_range_overrides_default() {
        let pinned = ReadingRange {
            moisture: (33.0, 33.0),
            ph: (6.4, 6.4),
        };
        let mut sim = seeded(SimulatorConfig::default().with_zone("B", pinned), 3);
        let mut zones = zones();
        for _ in 0..50 {
            sim.simulate(&mut zones);
            assert_eq!(zones[1].moisture(), Some(33.0));
            assert_eq!(zones[1].ph(), Some(6.4));
        }
    }

    #[test]
    fn narrow_preset_stays_narrow() {
        let mut sim = seeded(SimulatorConfig::from_preset(RangePreset::Narrow), 4);
        let mut zones = zones();
        for _ in 0..200 {
            sim.simulate(&mut zones);
            for z in &zones {
                assert!((20.0..=80.0).contains(&z.moisture().unwrap()));
                assert!((5.5..=7.5).contains(&z.ph().unwrap()));
            }
        }
    }

    #[test]
    fn same_seed_same_readings() {
        let mut a = seeded(SimulatorConfig::default(), 42);
        let mut b = seeded(SimulatorConfig::default(), 42);
        let mut za = zones();
        let mut zb = zones();
        for _ in 0..10 {
            a.simulate(&mut za);
            b.simulate(&mut zb);
            for (x, y) in za.iter().zip(&zb) {
                assert_eq!(x.reading(), y.reading());
            }
        }
    }

    #[test]
    fn readings_vary_across_ticks() {
        let mut sim = seeded(SimulatorConfig::default(), 5);
        let mut zones = zones();
        let mut seen = Vec::new();
        for _ in 0..20 {
            sim.simulate(&mut zones);
            seen.push(zones[0].moisture().unwrap());
        }
        seen.dedup();
        assert!(seen.len() > 1, "simulator produced a constant series");
    }

    #[test]
    fn simulate_empty_collection_is_noop() {
        let mut sim = seeded(SimulatorConfig::default(), 6);
        sim.simulate(&mut []);
    }

    #[test]
    fn simulate_leaves_pump_state_alone() {
        let mut sim = seeded(SimulatorConfig::default(), 7);
        let mut zones = zones();
        let now = time::macros::datetime!(2024-06-01 12:00 UTC);
        zones[0].start_pump(now);
        sim.simulate(&mut zones);
        assert_eq!(zones[0].pump_start_time(), Some(now));
        assert_eq!(zones[0].moisture_threshold(), 40.0);
    }

    #[test]
    fn inverted_range_rejected() {
        let bad = ReadingRange {
            moisture: (80.0, 20.0),
            ph: (5.0, 8.0),
        };
        let err = SensorSimulator::new(SimulatorConfig::default().with_zone("A", bad)).unwrap_err();
        assert!(
            err.to_string().contains("zone 'A': moisture min (80) greater than max (20)"),
            "got: {err}"
        );
    }

    #[test]
    fn out_of_scale_default_rejected() {
        let config = SimulatorConfig {
            default: ReadingRange {
                moisture: (10.0, 90.0),
                ph: (5.0, 15.0),
            },
            per_zone: HashMap::new(),
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn preset_from_str_lossy() {
        assert_eq!(RangePreset::from_str_lossy("narrow"), RangePreset::Narrow);
        assert_eq!(RangePreset::from_str_lossy(" NARROW "), RangePreset::Narrow);
        assert_eq!(RangePreset::from_str_lossy("wide"), RangePreset::Wide);
        assert_eq!(RangePreset::from_str_lossy("unknown"), RangePreset::Wide);
        assert_eq!(RangePreset::from_str_lossy(""), RangePreset::Wide);
    }

    #[test]
    fn preset_display() {
        assert_eq!(RangePreset::Wide.to_string(), "wide");
        assert_eq!(RangePreset::Narrow.to_string(), "narrow");
    }
}
