//! TOML config file loading, validation, and database seeding for zones.

use anyhow::{bail, Context, Result};
use garden_core::{RangePreset, ReadingRange, SimulatorConfig, ZoneConfig, DEFAULT_MAX_RUNTIME_MINUTES};
use serde::Deserialize;
use std::collections::HashSet;
use std::io::ErrorKind;
use std::time::Duration;

use crate::db::Db;
use crate::scheduler::Schedule;

pub const DEFAULT_CONFIG_PATH: &str = "config.toml";

// ---------------------------------------------------------------------------
// Config file structures
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub controller: ControllerSection,
    #[serde(default)]
    pub simulator: SimulatorSection,
    #[serde(default)]
    pub zones: Vec<ZoneEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ControllerSection {
    pub tick_interval_secs: u64,
    pub retention_days: u32,
    pub cleanup_interval_hours: u64,
}

impl Default for ControllerSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: 30,
            retention_days: 60,
            cleanup_interval_hours: 24,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimulatorSection {
    pub preset: String,
    /// Fixed seed for reproducible runs; entropy-seeded when absent.
    pub seed: Option<u64>,
    pub zones: Vec<SimZoneEntry>,
}

impl Default for SimulatorSection {
    fn default() -> Self {
        Self {
            preset: RangePreset::Wide.to_string(),
            seed: None,
            zones: Vec::new(),
        }
    }
}

/// Per-zone override of the simulator's reading range.
#[derive(Debug, Deserialize)]
pub struct SimZoneEntry {
    pub zone_id: String,
    pub moisture_min: f64,
    pub moisture_max: f64,
    pub ph_min: f64,
    pub ph_max: f64,
}

impl SimZoneEntry {
    fn range(&self) -> ReadingRange {
        ReadingRange {
            moisture: (self.moisture_min, self.moisture_max),
            ph: (self.ph_min, self.ph_max),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ZoneEntry {
    pub zone_id: String,
    pub name: String,
    #[serde(default)]
    pub plant_type: String,
    pub moisture_threshold: f64,
    pub ph_min: f64,
    pub ph_max: f64,
    #[serde(default = "default_max_runtime")]
    pub max_runtime_minutes: u32,
}

fn default_max_runtime() -> u32 {
    DEFAULT_MAX_RUNTIME_MINUTES
}

impl ZoneEntry {
    pub fn to_zone_config(&self) -> ZoneConfig {
        ZoneConfig {
            zone_id: self.zone_id.clone(),
            name: self.name.clone(),
            plant_type: self.plant_type.clone(),
            moisture_threshold: self.moisture_threshold,
            ph_min: self.ph_min,
            ph_max: self.ph_max,
            max_runtime_minutes: self.max_runtime_minutes,
            last_watered: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Derived settings
// ---------------------------------------------------------------------------

impl Config {
    pub fn schedule(&self) -> Schedule {
        Schedule {
            tick_interval: Duration::from_secs(self.controller.tick_interval_secs),
            cleanup_interval: Duration::from_secs(self.controller.cleanup_interval_hours * 3600),
            retention_days: self.controller.retention_days,
        }
    }

    pub fn simulator_config(&self) -> SimulatorConfig {
        self.simulator.zones.iter().fold(
            SimulatorConfig::from_preset(RangePreset::from_str_lossy(&self.simulator.preset)),
            |cfg, z| cfg.with_zone(z.zone_id.clone(), z.range()),
        )
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl Config {
    /// Validate all config entries. Returns `Ok(())` or an error describing
    /// every violation found (not just the first one).
    pub fn validate(&self) -> Result<()> {
        let mut errors: Vec<String> = Vec::new();

        self.validate_controller(&mut errors);
        self.validate_simulator(&mut errors);
        self.validate_zones(&mut errors);

        if errors.is_empty() {
            Ok(())
        } else {
            bail!(
                "config validation failed ({} error{}):\n  - {}",
                errors.len(),
                if errors.len() == 1 { "" } else { "s" },
                errors.join("\n  - ")
            );
        }
    }

    fn validate_controller(&self, errors: &mut Vec<String>) {
        let c = &self.controller;
        if c.tick_interval_secs == 0 {
            errors.push("controller: tick_interval_secs must be positive".to_string());
        }
        if c.retention_days == 0 {
            errors.push("controller: retention_days must be positive".to_string());
        }
        if c.cleanup_interval_hours == 0 {
            errors.push("controller: cleanup_interval_hours must be positive".to_string());
        }
    }

    fn validate_simulator(&self, errors: &mut Vec<String>) {
        let preset = self.simulator.preset.trim().to_ascii_lowercase();
        if preset != "wide" && preset != "narrow" {
            errors.push(format!(
                "simulator: unknown preset '{}' (use wide or narrow)",
                self.simulator.preset
            ));
        }

        let mut seen_ids: HashSet<&str> = HashSet::new();
        for (i, z) in self.simulator.zones.iter().enumerate() {
            let ctx = if z.zone_id.trim().is_empty() {
                errors.push(format!("simulator.zones[{i}]: zone_id is empty"));
                format!("simulator.zones[{i}]")
            } else {
                if !seen_ids.insert(&z.zone_id) {
                    errors.push(format!("simulator zone '{}': duplicate zone_id", z.zone_id));
                }
                format!("simulator zone '{}'", z.zone_id)
            };
            errors.extend(z.range().violations(&ctx));
        }
    }

    fn validate_zones(&self, errors: &mut Vec<String>) {
        let mut seen_ids: HashSet<&str> = HashSet::new();

        for (i, z) in self.zones.iter().enumerate() {
            let ctx = if z.zone_id.trim().is_empty() {
                format!("zones[{i}]")
            } else {
                format!("zone '{}'", z.zone_id)
            };

            if !z.zone_id.trim().is_empty() && !seen_ids.insert(&z.zone_id) {
                errors.push(format!("{ctx}: duplicate zone_id"));
            }

            for v in z.to_zone_config().violations() {
                errors.push(format!("{ctx}: {v}"));
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Load + apply
// ---------------------------------------------------------------------------

/// Read, parse, and validate a TOML config file.
pub fn load(path: &str) -> Result<Config> {
    let contents =
        std::fs::read_to_string(path).with_context(|| format!("failed to read config: {path}"))?;
    parse(&contents).with_context(|| format!("invalid config: {path}"))
}

/// Like [`load`], but a missing file yields the default config.
pub fn load_optional(path: &str) -> Result<Config> {
    match std::fs::read_to_string(path) {
        Ok(contents) => parse(&contents).with_context(|| format!("invalid config: {path}")),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!(path, "no config file, using defaults");
            Ok(Config::default())
        }
        Err(e) => Err(e).with_context(|| format!("failed to read config: {path}")),
    }
}

fn parse(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).context("failed to parse config")?;
    config.validate()?;
    Ok(config)
}

/// Upsert all zones from the config into the database.
pub async fn apply(config: &Config, db: &Db) -> Result<()> {
    for z in &config.zones {
        db.upsert_zone(&z.to_zone_config())
            .await
            .with_context(|| format!("failed to upsert zone '{}'", z.zone_id))?;
    }

    tracing::info!(zones = config.zones.len(), "config applied");

    Ok(())
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    // -- Helper: build a valid baseline config that passes validation ------

    fn valid_zone() -> ZoneEntry {
        ZoneEntry {
            zone_id: "A".into(),
            name: "Zone A".into(),
            plant_type: "Cactus".into(),
            moisture_threshold: 40.0,
            ph_min: 6.0,
            ph_max: 7.0,
            max_runtime_minutes: 30,
        }
    }

    fn valid_sim_zone() -> SimZoneEntry {
        SimZoneEntry {
            zone_id: "A".into(),
            moisture_min: 20.0,
            moisture_max: 60.0,
            ph_min: 6.0,
            ph_max: 7.0,
        }
    }

    fn valid_config() -> Config {
        Config {
            controller: ControllerSection::default(),
            simulator: SimulatorSection {
                zones: vec![valid_sim_zone()],
                ..SimulatorSection::default()
            },
            zones: vec![valid_zone()],
        }
    }

    /// Assert validation fails and the error message contains `needle`.
    fn assert_validation_err(cfg: &Config, needle: &str) {
        let err = cfg.validate().unwrap_err();
        let msg = format!("{err:#}");
        assert!(
            msg.contains(needle),
            "expected error containing {needle:?}, got: {msg}"
        );
    }

    // -- Parsing ----------------------------------------------------------

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[controller]
tick_interval_secs = 10
retention_days = 30
cleanup_interval_hours = 12

[simulator]
preset = "narrow"
seed = 42

[[simulator.zones]]
zone_id = "A"
moisture_min = 20.0
moisture_max = 60.0
ph_min = 6.0
ph_max = 7.0

[[zones]]
zone_id = "A"
name = "Zone A"
plant_type = "Cactus"
moisture_threshold = 40.0
ph_min = 6.0
ph_max = 7.0
max_runtime_minutes = 20
"#;
        let config = parse(toml_str).unwrap();
        assert_eq!(config.controller.tick_interval_secs, 10);
        assert_eq!(config.simulator.seed, Some(42));
        assert_eq!(config.zones.len(), 1);
        assert_eq!(config.zones[0].max_runtime_minutes, 20);

        let sim = config.simulator_config();
        assert_eq!(sim.default, ReadingRange::NARROW);
        assert_eq!(sim.range_for("A").moisture, (20.0, 60.0));
        assert_eq!(sim.range_for("B"), &ReadingRange::NARROW);

        let schedule = config.schedule();
        assert_eq!(schedule.tick_interval, Duration::from_secs(10));
        assert_eq!(schedule.cleanup_interval, Duration::from_secs(12 * 3600));
        assert_eq!(schedule.retention_days, 30);
    }

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config = parse("").unwrap();
        assert!(config.zones.is_empty());
        assert_eq!(config.controller.tick_interval_secs, 30);
        assert_eq!(config.controller.retention_days, 60);
        assert_eq!(config.controller.cleanup_interval_hours, 24);
        assert_eq!(config.simulator.seed, None);
        assert_eq!(config.simulator_config(), SimulatorConfig::default());
    }

    #[test]
    fn zone_defaults_fill_optional_fields() {
        let toml_str = r#"
[[zones]]
zone_id = "B"
name = "Zone B"
moisture_threshold = 45.0
ph_min = 6.2
ph_max = 7.2
"#;
        let config = parse(toml_str).unwrap();
        assert_eq!(config.zones[0].max_runtime_minutes, 30);
        assert_eq!(config.zones[0].plant_type, "");
    }

    #[test]
    fn missing_required_field_fails_to_parse() {
        let toml_str = r#"
[[zones]]
zone_id = "B"
name = "Zone B"
"#;
        assert!(parse(toml_str).is_err());
    }

    // -- Validation: valid configs pass -----------------------------------

    #[test]
    fn valid_config_passes() {
        valid_config().validate().unwrap();
    }

    #[test]
    fn default_config_passes() {
        Config::default().validate().unwrap();
    }

    // -- Validation: controller -------------------------------------------

    #[test]
    fn zero_tick_interval_rejected() {
        let mut cfg = valid_config();
        cfg.controller.tick_interval_secs = 0;
        assert_validation_err(&cfg, "tick_interval_secs must be positive");
    }

    #[test]
    fn zero_retention_rejected() {
        let mut cfg = valid_config();
        cfg.controller.retention_days = 0;
        assert_validation_err(&cfg, "retention_days must be positive");
    }

    // -- Validation: simulator --------------------------------------------

    #[test]
    fn unknown_preset_rejected() {
        let mut cfg = valid_config();
        cfg.simulator.preset = "stormy".into();
        assert_validation_err(&cfg, "unknown preset 'stormy'");
    }

    #[test]
    fn preset_is_case_insensitive() {
        let mut cfg = valid_config();
        cfg.simulator.preset = "Narrow".into();
        cfg.validate().unwrap();
        assert_eq!(cfg.simulator_config().default, ReadingRange::NARROW);
    }

    #[test]
    fn inverted_sim_range_rejected() {
        let mut cfg = valid_config();
        cfg.simulator.zones[0].moisture_min = 70.0;
        assert_validation_err(&cfg, "simulator zone 'A': moisture min (70) greater than max (60)");
    }

    #[test]
    fn duplicate_sim_zone_rejected() {
        let mut cfg = valid_config();
        cfg.simulator.zones.push(valid_sim_zone());
        assert_validation_err(&cfg, "simulator zone 'A': duplicate zone_id");
    }

    // -- Validation: zones ------------------------------------------------

    #[test]
    fn zone_empty_id_rejected() {
        let mut cfg = valid_config();
        cfg.zones[0].zone_id = "".into();
        assert_validation_err(&cfg, "zones[0]: zone_id is empty");
    }

    #[test]
    fn zone_duplicate_id_rejected() {
        let mut cfg = valid_config();
        cfg.zones.push(valid_zone());
        assert_validation_err(&cfg, "zone 'A': duplicate zone_id");
    }

    #[test]
    fn zone_threshold_out_of_range() {
        let mut cfg = valid_config();
        cfg.zones[0].moisture_threshold = 120.0;
        assert_validation_err(&cfg, "zone 'A': moisture_threshold 120 out of range");
    }

    #[test]
    fn zone_inverted_ph_band() {
        let mut cfg = valid_config();
        cfg.zones[0].ph_min = 7.5;
        assert_validation_err(&cfg, "ph_min (7.5) must be less than ph_max (7)");
    }

    #[test]
    fn zone_zero_runtime_rejected() {
        let mut cfg = valid_config();
        cfg.zones[0].max_runtime_minutes = 0;
        assert_validation_err(&cfg, "max_runtime_minutes must be positive");
    }

    #[test]
    fn multiple_errors_collected() {
        let mut cfg = valid_config();
        cfg.controller.tick_interval_secs = 0;
        cfg.zones[0].name = " ".into();
        cfg.zones[0].ph_max = 15.0;

        let msg = format!("{:#}", cfg.validate().unwrap_err());
        assert!(msg.contains("3 errors"), "got: {msg}");
        assert!(msg.contains("tick_interval_secs"));
        assert!(msg.contains("name is empty"));
        assert!(msg.contains("ph_max 15 out of range"));
    }

    // -- Load -------------------------------------------------------------

    #[test]
    fn load_optional_missing_file_is_default() {
        let cfg = load_optional("/nonexistent/garden-config.toml").unwrap();
        assert!(cfg.zones.is_empty());
    }

    #[test]
    fn load_missing_file_is_error() {
        let err = load("/nonexistent/garden-config.toml").unwrap_err();
        assert!(format!("{err:#}").contains("failed to read config"));
    }

    // -- Apply ------------------------------------------------------------

    #[tokio::test]
    async fn apply_seeds_database() {
        let db = Db::connect("sqlite::memory:").await.unwrap();
        db.migrate().await.unwrap();

        let mut cfg = valid_config();
        let mut b = valid_zone();
        b.zone_id = "B".into();
        b.name = "Zone B".into();
        cfg.zones.push(b);
        apply(&cfg, &db).await.unwrap();

        let zones = db.load_zones().await.unwrap();
        assert_eq!(zones.len(), 2);
        assert_eq!(zones[0], cfg.zones[0].to_zone_config());
        assert_eq!(zones[1].zone_id, "B");

        // Re-applying is idempotent.
        apply(&cfg, &db).await.unwrap();
        assert_eq!(db.load_zones().await.unwrap().len(), 2);
    }
}
