//! Persistence façade: append-only history, zone hydration and retention.

use async_trait::async_trait;
use serde::Serialize;
use std::error::Error as StdError;
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

use crate::zone::{Plant, PumpStatus, ZoneConfig};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn StdError + Send + Sync>),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn backend(err: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self::Backend(err.into())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    pub zone_id: String,
    pub moisture: f64,
    pub ph: f64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PumpEvent {
    pub zone_id: String,
    pub status: PumpStatus,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn record_reading(&self, reading: &SensorReading) -> Result<(), StoreError>;

    /// Append a pump transition. An `OFF` event also becomes the zone's
    /// persisted `last_watered`.
    async fn record_pump_event(&self, event: &PumpEvent) -> Result<(), StoreError>;

    async fn load_zones(&self) -> Result<Vec<ZoneConfig>, StoreError>;

    async fn load_plants(&self, zone_id: &str) -> Result<Vec<Plant>, StoreError>;

    /// Delete readings and pump events more than `days` older than `now`;
    /// returns how many records went.
    async fn cleanup_older_than(&self, days: u32, now: OffsetDateTime) -> Result<u64, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryInner {
    zones: Vec<ZoneConfig>,
    plants: Vec<Plant>,
    readings: Vec<SensorReading>,
    pump_events: Vec<PumpEvent>,
    fail_writes: bool,
}

/// Process-local store. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_zones(zones: Vec<ZoneConfig>) -> Self {
        let store = Self::new();
        store.lock().zones = zones;
        store
    }

    pub fn add_plant(&self, plant: Plant) {
        self.lock().plants.push(plant);
    }

    /// Make every append fail until switched back off.
    pub fn set_fail_writes(&self, fail: bool) {
        self.lock().fail_writes = fail;
    }

    pub fn readings(&self) -> Vec<SensorReading> {
        self.lock().readings.clone()
    }

    pub fn pump_events(&self) -> Vec<PumpEvent> {
        self.lock().pump_events.clone()
    }

    pub fn zones(&self) -> Vec<ZoneConfig> {
        self.lock().zones.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn writable(&self) -> Result<MutexGuard<'_, MemoryInner>, StoreError> {
        let inner = self.lock();
        if inner.fail_writes {
            return Err(StoreError::Unavailable("writes disabled".to_string()));
        }
        Ok(inner)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn record_reading(&self, reading: &SensorReading) -> Result<(), StoreError> {
        self.writable()?.readings.push(reading.clone());
        Ok(())
    }

    async fn record_pump_event(&self, event: &PumpEvent) -> Result<(), StoreError> {
        let mut inner = self.writable()?;
        if event.status == PumpStatus::Off {
            if let Some(z) = inner.zones.iter_mut().find(|z| z.zone_id == event.zone_id) {
                z.last_watered = Some(event.timestamp);
            }
        }
        inner.pump_events.push(event.clone());
        Ok(())
    }

    async fn load_zones(&self) -> Result<Vec<ZoneConfig>, StoreError> {
        Ok(self.zones())
    }

    async fn load_plants(&self, zone_id: &str) -> Result<Vec<Plant>, StoreError> {
        Ok(self
            .lock()
            .plants
            .iter()
            .filter(|p| p.zone_id == zone_id)
            .cloned()
            .collect())
    }

    async fn cleanup_older_than(&self, days: u32, now: OffsetDateTime) -> Result<u64, StoreError> {
        let cutoff = now - Duration::days(i64::from(days));
        let mut inner = self.writable()?;

        let before = inner.readings.len() + inner.pump_events.len();
        inner.readings.retain(|r| r.timestamp >= cutoff);
        inner.pump_events.retain(|e| e.timestamp >= cutoff);
        let after = inner.readings.len() + inner.pump_events.len();

        Ok((before - after) as u64)
    }
}

// ===========================================================================
// Tests
// ===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::seed::seed_zones;
    use time::macros::datetime;

    const NOW: OffsetDateTime = datetime!(2024-06-01 12:00 UTC);

    fn reading(age: Duration) -> SensorReading {
        SensorReading {
            zone_id: "A".into(),
            moisture: 50.0,
            ph: 6.5,
            timestamp: NOW - age,
        }
    }

    fn event(status: PumpStatus, age: Duration) -> PumpEvent {
        PumpEvent {
            zone_id: "A".into(),
            status,
            timestamp: NOW - age,
        }
    }

    #[tokio::test]
    async fn cleanup_removes_old_readings_and_events() {
        let store = MemoryStore::new();
        store.record_reading(&reading(Duration::days(30))).await.unwrap();
        store.record_reading(&reading(Duration::days(70))).await.unwrap();
        store.record_pump_event(&event(PumpStatus::On, Duration::days(30))).await.unwrap();
        store.record_pump_event(&event(PumpStatus::Off, Duration::days(70))).await.unwrap();

        let deleted = store.cleanup_older_than(60, NOW).await.unwrap();

        assert_eq!(deleted, 2);
        assert_eq!(store.readings().len(), 1);
        assert_eq!(store.pump_events()[0].status, PumpStatus::On);
    }

    #[tokio::test]
    async fn cleanup_cutoff_follows_supplied_time() {
        let store = MemoryStore::new();
        store.record_reading(&reading(Duration::days(59))).await.unwrap();

        // Exactly at the cutoff is kept.
        let later = NOW + Duration::days(1);
        assert_eq!(store.cleanup_older_than(60, later).await.unwrap(), 0);

        let much_later = later + Duration::seconds(1);
        assert_eq!(store.cleanup_older_than(60, much_later).await.unwrap(), 1);
        assert!(store.readings().is_empty());
    }

    #[tokio::test]
    async fn cleanup_empty_store_deletes_nothing() {
        let store = MemoryStore::new();
        assert_eq!(store.cleanup_older_than(60, NOW).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn off_event_updates_last_watered() {
        let store = MemoryStore::with_zones(seed_zones());
        let off = event(PumpStatus::Off, Duration::ZERO);
        store.record_pump_event(&event(PumpStatus::On, Duration::minutes(10))).await.unwrap();
        assert_eq!(store.zones()[0].last_watered, None);

        store.record_pump_event(&off).await.unwrap();
        assert_eq!(store.zones()[0].last_watered, Some(off.timestamp));
        assert_eq!(store.zones()[1].last_watered, None);
    }

    #[tokio::test]
    async fn failing_writes_surface_as_errors() {
        let store = MemoryStore::new();
        store.set_fail_writes(true);
        let err = store.record_reading(&reading(Duration::ZERO)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(store.readings().is_empty());

        store.set_fail_writes(false);
        store.record_reading(&reading(Duration::ZERO)).await.unwrap();
        assert_eq!(store.readings().len(), 1);
    }

    #[tokio::test]
    async fn plants_filtered_by_zone() {
        let store = MemoryStore::new();
        for (id, zone) in [(1, "A"), (2, "B"), (3, "A")] {
            store.add_plant(Plant {
                id,
                zone_id: zone.into(),
                name: format!("plant {id}"),
                plant_type: "Herb".into(),
                planting_date: None,
                notes: None,
            });
        }
        let plants = store.load_plants("A").await.unwrap();
        assert_eq!(plants.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 3]);
    }
}
