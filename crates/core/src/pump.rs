//! Pump actuator boundary.

use std::collections::HashSet;
use thiserror::Error;

use crate::zone::PumpStatus;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PumpError {
    #[error("no pump wired for zone '{0}'")]
    UnknownZone(String),
    #[error("pump on zone '{zone_id}' failed: {reason}")]
    Failed { zone_id: String, reason: String },
}

/// Switches a zone's pump. Both calls are idempotent.
pub trait PumpActuator: Send + Sync {
    fn activate(&mut self, zone_id: &str) -> Result<(), PumpError>;
    fn deactivate(&mut self, zone_id: &str) -> Result<(), PumpError>;
}

/// A call received by a [`RecordingPump`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PumpCall {
    pub zone_id: String,
    pub status: PumpStatus,
}

/// Test actuator: records every call and fails on request.
#[derive(Debug, Default)]
pub struct RecordingPump {
    calls: Vec<PumpCall>,
    failing: HashSet<String>,
}

impl RecordingPump {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call for `zone_id` fail.
    pub fn fail_zone(&mut self, zone_id: &str) {
        self.failing.insert(zone_id.to_string());
    }

    pub fn heal_zone(&mut self, zone_id: &str) {
        self.failing.remove(zone_id);
    }

    pub fn calls(&self) -> &[PumpCall] {
        &self.calls
    }

    fn record(&mut self, zone_id: &str, status: PumpStatus) -> Result<(), PumpError> {
        if self.failing.contains(zone_id) {
            return Err(PumpError::Failed {
                zone_id: zone_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.calls.push(PumpCall {
            zone_id: zone_id.to_string(),
            status,
        });
        Ok(())
    }
}

impl PumpActuator for RecordingPump {
    fn activate(&mut self, zone_id: &str) -> Result<(), PumpError> {
        self.record(zone_id, PumpStatus::On)
    }

    fn deactivate(&mut self, zone_id: &str) -> Result<(), PumpError> {
        self.record(zone_id, PumpStatus::Off)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_pump_records_in_order() {
        let mut pump = RecordingPump::new();
        pump.activate("A").unwrap();
        pump.deactivate("A").unwrap();
        assert_eq!(
            pump.calls(),
            &[
                PumpCall {
                    zone_id: "A".into(),
                    status: PumpStatus::On
                },
                PumpCall {
                    zone_id: "A".into(),
                    status: PumpStatus::Off
                },
            ]
        );
    }

    #[test]
    fn failing_zone_errors_without_recording() {
        let mut pump = RecordingPump::new();
        pump.fail_zone("B");
        assert!(matches!(pump.activate("B"), Err(PumpError::Failed { .. })));
        assert!(pump.calls().is_empty());

        pump.heal_zone("B");
        pump.activate("B").unwrap();
        assert_eq!(pump.calls().len(), 1);
    }
}
