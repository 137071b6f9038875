//! Software pump board. Tracks the last commanded on/off state per zone and
//! logs every change; there is no hardware behind it.

use garden_core::{PumpActuator, PumpError, PumpStatus};
use std::collections::HashMap;
use tracing::{info, warn};

#[derive(Debug, Default)]
pub struct PumpBoard {
    pub(crate) zones: HashMap<String, bool>, // zone_id -> on/off state
}

impl PumpBoard {
    pub fn new<'a>(zone_ids: impl IntoIterator<Item = &'a str>) -> Self {
        let mut board = Self::default();
        for zone_id in zone_ids {
            board.register(zone_id);
        }
        info!(zones = board.zones.len(), "pump board initialised (no hardware)");
        board
    }

    /// Wire a zone, starting OFF. Re-registering keeps the current state.
    pub fn register(&mut self, zone_id: &str) {
        self.zones.entry(zone_id.to_string()).or_insert(false);
    }

    pub fn unregister(&mut self, zone_id: &str) {
        self.zones.remove(zone_id);
    }

    #[cfg(test)]
    pub fn is_on(&self, zone_id: &str) -> Option<bool> {
        self.zones.get(zone_id).copied()
    }

    pub fn set(&mut self, zone_id: &str, on: bool) -> Result<(), PumpError> {
        let Some(state) = self.zones.get_mut(zone_id) else {
            warn!("pump: unknown zone_id '{zone_id}'");
            return Err(PumpError::UnknownZone(zone_id.to_string()));
        };
        *state = on;
        let status = if on { PumpStatus::On } else { PumpStatus::Off };
        info!("pump zone={zone_id} set {status}");
        Ok(())
    }

    pub fn all_off(&mut self) {
        let keys: Vec<String> = self.zones.keys().cloned().collect();
        for k in keys {
            // Keys come from the map itself, so set cannot miss.
            let _ = self.set(&k, false);
        }
    }
}

impl PumpActuator for PumpBoard {
    fn activate(&mut self, zone_id: &str) -> Result<(), PumpError> {
        self.set(zone_id, true)
    }

    fn deactivate(&mut self, zone_id: &str) -> Result<(), PumpError> {
        self.set(zone_id, false)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pump_board_new_registers_zones_off() {
        let board = PumpBoard::new(["A", "B"]);
        assert_eq!(board.zones.len(), 2);
        assert_eq!(board.is_on("A"), Some(false));
    }

    #[test]
    fn pump_board_set_on_then_off() {
        let mut board = PumpBoard::new(["A"]);
        board.activate("A").unwrap();
        assert_eq!(board.is_on("A"), Some(true));
        board.deactivate("A").unwrap();
        assert_eq!(board.is_on("A"), Some(false));
    }

    #[test]
    fn pump_board_is_idempotent() {
        let mut board = PumpBoard::new(["A"]);
        board.activate("A").unwrap();
        board.activate("A").unwrap();
        assert_eq!(board.is_on("A"), Some(true));
    }

    #[test]
    fn pump_board_all_off_resets_everything() {
        let mut board = PumpBoard::new(["A", "B"]);
        board.set("A", true).unwrap();
        board.set("B", true).unwrap();
        board.all_off();
        assert_eq!(board.is_on("A"), Some(false));
        assert_eq!(board.is_on("B"), Some(false));
    }

    #[test]
    fn pump_board_unknown_zone_errors() {
        let mut board = PumpBoard::new(["A"]);
        assert_eq!(
            board.activate("nonexistent"),
            Err(PumpError::UnknownZone("nonexistent".into()))
        );
        assert_eq!(board.zones.len(), 1); // no new entry created
    }

    #[test]
    fn pump_board_register_and_unregister() {
        let mut board = PumpBoard::new(["A"]);
        board.set("A", true).unwrap();
        board.register("A");
        assert_eq!(board.is_on("A"), Some(true));

        board.register("D");
        board.activate("D").unwrap();
        board.unregister("D");
        assert_eq!(board.is_on("D"), None);
    }
}
