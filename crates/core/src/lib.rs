//! Zone watering automation: the zone state machine, a sensor simulator, the
//! per-tick controller and the boundaries it drives (pump actuator, store).
//!
//! Nothing here does I/O on its own. The hub binary supplies a SQLite store
//! and a pump board and runs the controller on a timer.

pub mod clock;
pub mod controller;
pub mod pump;
pub mod seed;
pub mod sim;
pub mod store;
pub mod zone;

pub use clock::{Clock, FakeClock, SystemClock};
pub use controller::{
    hydrate_zones, Controller, FailureStage, HydrateError, TickReport, Transition,
    TransitionReason, ZoneFailure,
};
pub use pump::{PumpActuator, PumpCall, PumpError, RecordingPump};
pub use seed::seed_zones;
pub use sim::{RangePreset, ReadingRange, SensorSimulator, SimulatorConfig, SimulatorError};
pub use store::{MemoryStore, PumpEvent, SensorReading, Store, StoreError};
pub use zone::{
    PhRange, Plant, PumpState, PumpStatus, Reading, Zone, ZoneConfig, ZoneError, COOLDOWN,
    DEFAULT_MAX_RUNTIME_MINUTES,
};
