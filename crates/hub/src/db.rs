use anyhow::{Context, Result};
use async_trait::async_trait;
use garden_core::{Plant, PumpEvent, PumpStatus, SensorReading, Store, StoreError, ZoneConfig};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, Pool, Sqlite};
use std::str::FromStr;
use time::{Date, Duration, OffsetDateTime};

#[derive(Clone)]
pub struct Db {
    pool: Pool<Sqlite>,
}

/// A plant as submitted by a client, before it has an id.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPlant {
    pub name: String,
    #[serde(default)]
    pub plant_type: String,
    #[serde(default)]
    pub planting_date: Option<Date>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadingStats {
    pub total_readings: i64,
    #[serde(with = "time::serde::rfc3339::option")]
    pub oldest: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub newest: Option<OffsetDateTime>,
    /// Whole days between oldest and newest reading.
    pub date_range_days: i64,
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

#[derive(FromRow)]
struct ZoneRow {
    zone_id: String,
    name: String,
    plant_type: String,
    moisture_threshold: f64,
    ph_min: f64,
    ph_max: f64,
    max_runtime_minutes: i64,
    last_watered: Option<i64>,
}

impl From<ZoneRow> for ZoneConfig {
    fn from(r: ZoneRow) -> Self {
        ZoneConfig {
            zone_id: r.zone_id,
            name: r.name,
            plant_type: r.plant_type,
            moisture_threshold: r.moisture_threshold,
            ph_min: r.ph_min,
            ph_max: r.ph_max,
            // A negative cap is left as 0 so validation rejects the zone.
            max_runtime_minutes: u32::try_from(r.max_runtime_minutes).unwrap_or(0),
            last_watered: r.last_watered.and_then(from_unix),
        }
    }
}

#[derive(FromRow)]
struct PlantRow {
    id: i64,
    zone_id: String,
    name: String,
    plant_type: String,
    planting_day: Option<i64>,
    notes: Option<String>,
}

impl From<PlantRow> for Plant {
    fn from(r: PlantRow) -> Self {
        Plant {
            id: r.id,
            zone_id: r.zone_id,
            name: r.name,
            plant_type: r.plant_type,
            planting_date: r
                .planting_day
                .and_then(|d| i32::try_from(d).ok())
                .and_then(|d| Date::from_julian_day(d).ok()),
            notes: r.notes,
        }
    }
}

#[derive(FromRow)]
struct ReadingRow {
    ts: i64,
    zone_id: String,
    moisture: f64,
    ph: f64,
}

fn from_unix(ts: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts).ok()
}

const ZONE_COLUMNS: &str = "zone_id, name, plant_type, moisture_threshold, ph_min, ph_max, \
                            max_runtime_minutes, last_watered";

const PLANT_COLUMNS: &str = "id, zone_id, name, plant_type, planting_day, notes";

impl Db {
    /// db_url examples:
    /// - "sqlite:/var/lib/garden/garden.db"
    /// - "sqlite::memory:" (tests)
    pub async fn connect(db_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("invalid sqlite connection string: {db_url}"))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to connect to sqlite db: {db_url}"))?;

        Ok(Self { pool })
    }

    /// Runs SQLx migrations from ./migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("failed to run migrations")?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    // ----------------------------
    // Zones
    // ----------------------------

    /// Insert or update a zone. An existing `last_watered` is kept; it only
    /// moves when an OFF pump event is recorded.
    pub async fn upsert_zone(&self, z: &ZoneConfig) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO zones (
              zone_id, name, plant_type,
              moisture_threshold, ph_min, ph_max,
              max_runtime_minutes, last_watered
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(zone_id) DO UPDATE SET
              name=excluded.name,
              plant_type=excluded.plant_type,
              moisture_threshold=excluded.moisture_threshold,
              ph_min=excluded.ph_min,
              ph_max=excluded.ph_max,
              max_runtime_minutes=excluded.max_runtime_minutes
            "#,
        )
        .bind(&z.zone_id)
        .bind(&z.name)
        .bind(&z.plant_type)
        .bind(z.moisture_threshold)
        .bind(z.ph_min)
        .bind(z.ph_max)
        .bind(i64::from(z.max_runtime_minutes))
        .bind(z.last_watered.map(|t| t.unix_timestamp()))
        .execute(&self.pool)
        .await
        .context("upsert_zone failed")?;
        Ok(())
    }

    pub async fn load_zones(&self) -> Result<Vec<ZoneConfig>> {
        let rows: Vec<ZoneRow> =
            sqlx::query_as(&format!("SELECT {ZONE_COLUMNS} FROM zones ORDER BY zone_id"))
                .fetch_all(&self.pool)
                .await
                .context("load_zones failed")?;

        Ok(rows.into_iter().map(ZoneConfig::from).collect())
    }

    #[cfg(test)]
    pub async fn get_zone(&self, zone_id: &str) -> Result<Option<ZoneConfig>> {
        let row: Option<ZoneRow> =
            sqlx::query_as(&format!("SELECT {ZONE_COLUMNS} FROM zones WHERE zone_id = ?"))
                .bind(zone_id)
                .fetch_optional(&self.pool)
                .await
                .context("get_zone failed")?;

        Ok(row.map(ZoneConfig::from))
    }

    /// Delete a zone and (by cascade) its plants. Reading and pump history
    /// stays until retention removes it. Returns false if no such zone.
    pub async fn delete_zone(&self, zone_id: &str) -> Result<bool> {
        let res = sqlx::query("DELETE FROM zones WHERE zone_id = ?")
            .bind(zone_id)
            .execute(&self.pool)
            .await
            .context("delete_zone failed")?;
        Ok(res.rows_affected() > 0)
    }

    // ----------------------------
    // Plants
    // ----------------------------

    pub async fn insert_plant(&self, zone_id: &str, p: &NewPlant) -> Result<Plant> {
        let res = sqlx::query(
            r#"
            INSERT INTO plants (zone_id, name, plant_type, planting_day, notes)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(zone_id)
        .bind(&p.name)
        .bind(&p.plant_type)
        .bind(p.planting_date.map(|d| i64::from(d.to_julian_day())))
        .bind(p.notes.as_deref())
        .execute(&self.pool)
        .await
        .with_context(|| format!("insert_plant failed zone={zone_id}"))?;

        Ok(Plant {
            id: res.last_insert_rowid(),
            zone_id: zone_id.to_string(),
            name: p.name.clone(),
            plant_type: p.plant_type.clone(),
            planting_date: p.planting_date,
            notes: p.notes.clone(),
        })
    }

    pub async fn plants_for_zone(&self, zone_id: &str) -> Result<Vec<Plant>> {
        let rows: Vec<PlantRow> = sqlx::query_as(&format!(
            "SELECT {PLANT_COLUMNS} FROM plants WHERE zone_id = ? ORDER BY id"
        ))
        .bind(zone_id)
        .fetch_all(&self.pool)
        .await
        .context("plants_for_zone failed")?;

        Ok(rows.into_iter().map(Plant::from).collect())
    }

    pub async fn delete_plant(&self, plant_id: i64) -> Result<bool> {
        let res = sqlx::query("DELETE FROM plants WHERE id = ?")
            .bind(plant_id)
            .execute(&self.pool)
            .await
            .context("delete_plant failed")?;
        Ok(res.rows_affected() > 0)
    }

    // ----------------------------
    // Readings + pump events
    // ----------------------------

    pub async fn insert_reading(&self, r: &SensorReading) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO sensor_readings (ts, zone_id, moisture, ph)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(r.timestamp.unix_timestamp())
        .bind(&r.zone_id)
        .bind(r.moisture)
        .bind(r.ph)
        .execute(&self.pool)
        .await
        .context("insert_reading failed")?;
        Ok(())
    }

    /// Append a pump event. An OFF event also stamps the zone's
    /// `last_watered`, in the same transaction.
    pub async fn insert_pump_event(&self, e: &PumpEvent) -> Result<()> {
        let ts = e.timestamp.unix_timestamp();
        let mut tx = self.pool.begin().await.context("begin failed")?;

        sqlx::query("INSERT INTO pump_events (ts, zone_id, status) VALUES (?, ?, ?)")
            .bind(ts)
            .bind(&e.zone_id)
            .bind(e.status.as_str())
            .execute(&mut *tx)
            .await
            .context("insert_pump_event failed")?;

        if e.status == PumpStatus::Off {
            sqlx::query("UPDATE zones SET last_watered = ? WHERE zone_id = ?")
                .bind(ts)
                .bind(&e.zone_id)
                .execute(&mut *tx)
                .await
                .context("update last_watered failed")?;
        }

        tx.commit().await.context("commit failed")?;
        Ok(())
    }

    /// Newest first.
    pub async fn recent_readings(&self, zone_id: &str, limit: i64) -> Result<Vec<SensorReading>> {
        let rows: Vec<ReadingRow> = sqlx::query_as(
            r#"
            SELECT ts, zone_id, moisture, ph
            FROM sensor_readings
            WHERE zone_id = ?
            ORDER BY ts DESC, id DESC
            LIMIT ?
            "#,
        )
        .bind(zone_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .context("recent_readings failed")?;

        Ok(rows
            .into_iter()
            .filter_map(|r| {
                Some(SensorReading {
                    timestamp: from_unix(r.ts)?,
                    zone_id: r.zone_id,
                    moisture: r.moisture,
                    ph: r.ph,
                })
            })
            .collect())
    }

    #[cfg(test)]
    pub async fn pump_events_for_zone(&self, zone_id: &str) -> Result<Vec<PumpEvent>> {
        let rows: Vec<(i64, String, String)> = sqlx::query_as(
            "SELECT ts, zone_id, status FROM pump_events WHERE zone_id = ? ORDER BY ts, id",
        )
        .bind(zone_id)
        .fetch_all(&self.pool)
        .await
        .context("pump_events_for_zone failed")?;

        rows.into_iter()
            .map(|(ts, zone_id, status)| {
                Ok(PumpEvent {
                    timestamp: from_unix(ts).context("bad pump event timestamp")?,
                    zone_id,
                    status: status.parse()?,
                })
            })
            .collect()
    }

    pub async fn reading_stats(&self) -> Result<ReadingStats> {
        let (total, oldest, newest): (i64, Option<i64>, Option<i64>) =
            sqlx::query_as("SELECT COUNT(*), MIN(ts), MAX(ts) FROM sensor_readings")
                .fetch_one(&self.pool)
                .await
                .context("reading_stats failed")?;

        let oldest = oldest.and_then(from_unix);
        let newest = newest.and_then(from_unix);
        let date_range_days = match (oldest, newest) {
            (Some(o), Some(n)) => (n - o).whole_days(),
            _ => 0,
        };

        Ok(ReadingStats {
            total_readings: total,
            oldest,
            newest,
            date_range_days,
        })
    }

    // ----------------------------
    // Retention
    // ----------------------------

    /// Delete readings and pump events strictly older than `cutoff`.
    /// Returns the combined number of rows removed.
    pub async fn cleanup_before(&self, cutoff: OffsetDateTime) -> Result<u64> {
        let ts = cutoff.unix_timestamp();
        let mut tx = self.pool.begin().await.context("begin failed")?;

        let readings = sqlx::query("DELETE FROM sensor_readings WHERE ts < ?")
            .bind(ts)
            .execute(&mut *tx)
            .await
            .context("cleanup sensor_readings failed")?
            .rows_affected();
        let events = sqlx::query("DELETE FROM pump_events WHERE ts < ?")
            .bind(ts)
            .execute(&mut *tx)
            .await
            .context("cleanup pump_events failed")?
            .rows_affected();

        tx.commit().await.context("commit failed")?;
        Ok(readings + events)
    }
}

// ---------------------------------------------------------------------------
// Store façade
// ---------------------------------------------------------------------------

#[async_trait]
impl Store for Db {
    async fn record_reading(&self, reading: &SensorReading) -> Result<(), StoreError> {
        self.insert_reading(reading).await.map_err(StoreError::backend)
    }

    async fn record_pump_event(&self, event: &PumpEvent) -> Result<(), StoreError> {
        self.insert_pump_event(event).await.map_err(StoreError::backend)
    }

    async fn load_zones(&self) -> Result<Vec<ZoneConfig>, StoreError> {
        Db::load_zones(self).await.map_err(StoreError::backend)
    }

    async fn load_plants(&self, zone_id: &str) -> Result<Vec<Plant>, StoreError> {
        self.plants_for_zone(zone_id).await.map_err(StoreError::backend)
    }

    async fn cleanup_older_than(&self, days: u32, now: OffsetDateTime) -> Result<u64, StoreError> {
        let cutoff = now - Duration::days(i64::from(days));
        self.cleanup_before(cutoff).await.map_err(StoreError::backend)
    }
}

// ===========================================================================
// Tests
// ===========================================================================
