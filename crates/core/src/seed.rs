//! Seed configuration used when no zones have been configured yet.

use crate::zone::{ZoneConfig, DEFAULT_MAX_RUNTIME_MINUTES};

/// Three zones with distinct thresholds, pH bands and plant types.
pub fn seed_zones() -> Vec<ZoneConfig> {
    let zone = |id: &str, plant_type: &str, threshold: f64, ph: (f64, f64)| ZoneConfig {
        zone_id: id.to_string(),
        name: format!("Zone {id}"),
        plant_type: plant_type.to_string(),
        moisture_threshold: threshold,
        ph_min: ph.0,
        ph_max: ph.1,
        max_runtime_minutes: DEFAULT_MAX_RUNTIME_MINUTES,
        last_watered: None,
    };

    vec![
        zone("A", "Cactus", 40.0, (6.0, 7.0)),
        zone("B", "Tomato", 45.0, (6.2, 7.2)),
        zone("C", "Sunflower", 50.0, (5.8, 6.8)),
    ]
}
