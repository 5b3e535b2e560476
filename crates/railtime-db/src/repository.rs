use std::sync::Arc;

use chrono::{DateTime, Utc};
use railtime_core::error::AppError;
use railtime_core::models::{ExpressAverage, LimitedExpress, MeasurementRow, Station, TravelTime};
use sqlx::{SqliteConnection, SqlitePool};
use tokio::sync::Mutex;

/// Schema statements, executed one at a time. Every statement is idempotent.
const SCHEMA: &[&str] = &[
    r#"CREATE TABLE IF NOT EXISTS Station (
        station_id INTEGER PRIMARY KEY AUTOINCREMENT,
        station_name TEXT NOT NULL UNIQUE CHECK (length(station_name) > 0),
        limited_express INTEGER CHECK (limited_express IN (0, 1))
    )"#,
    r#"CREATE TABLE IF NOT EXISTS TravelTime (
        time_id INTEGER PRIMARY KEY AUTOINCREMENT,
        station_id INTEGER NOT NULL REFERENCES Station(station_id) ON DELETE RESTRICT,
        minutes INTEGER NOT NULL CHECK (minutes > 0),
        measured_at TEXT NOT NULL
    )"#,
    r#"CREATE INDEX IF NOT EXISTS idx_traveltime_station
        ON TravelTime(station_id, measured_at DESC)"#,
];

/// Repository for stations and travel-time measurements in SQLite.
///
/// The write path runs in a transaction and is serialized by an async mutex
/// shared by every repository vended from the same [`Database`](crate::Database).
#[derive(Clone)]
pub struct StationRepository {
    pool: SqlitePool,
    write_lock: Arc<Mutex<()>>,
}

impl StationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_write_lock(pool, Arc::new(Mutex::new(())))
    }

    pub(crate) fn with_write_lock(pool: SqlitePool, write_lock: Arc<Mutex<()>>) -> Self {
        Self { pool, write_lock }
    }

    /// Create the Station and TravelTime tables if absent.
    pub async fn ensure_schema(&self) -> Result<(), AppError> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| AppError::Persistence(format!("Schema setup failed: {e}")))?;
        }
        Ok(())
    }

    /// Insert or reuse the station by name, then append one measurement.
    ///
    /// Returns `(station_id, time_id)`. Both writes commit together or not at all.
    pub async fn upsert_station_with_measurement(
        &self,
        name: &str,
        limited_express: LimitedExpress,
        minutes: u32,
    ) -> Result<(i64, i64), AppError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::Persistence("station name must not be empty".into()));
        }
        if minutes == 0 {
            return Err(AppError::Persistence(format!(
                "minutes must be positive (station '{name}')"
            )));
        }

        let _guard = self.write_lock.lock().await;
        // Take the database write lock before the lookup, not at the insert.
        let mut tx = self
            .pool
            .begin_with("BEGIN IMMEDIATE")
            .await
            .map_err(db_err)?;

        let station_id = match find_station_row(&mut tx, name).await? {
            Some(row) => {
                merge_limited_express(&mut tx, &row, limited_express).await?;
                row.station_id
            }
            None => match insert_station(&mut tx, name, limited_express).await {
                Ok(station_id) => station_id,
                Err(e) if is_unique_violation(&e) => {
                    tracing::debug!(%name, "Station inserted concurrently, looking it up again");
                    let row = find_station_row(&mut tx, name).await?.ok_or_else(|| {
                        AppError::Persistence(format!("station '{name}' missing after conflict"))
                    })?;
                    merge_limited_express(&mut tx, &row, limited_express).await?;
                    row.station_id
                }
                Err(e) => return Err(db_err(e)),
            },
        };

        let time_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO TravelTime (station_id, minutes, measured_at)
            VALUES (?, ?, ?)
            RETURNING time_id
            "#,
        )
        .bind(station_id)
        .bind(i64::from(minutes))
        .bind(Utc::now())
        .fetch_one(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;

        tracing::debug!(%name, station_id, time_id, minutes, "Stored measurement");
        Ok((station_id, time_id))
    }

    pub async fn find_station(&self, name: &str) -> Result<Option<Station>, AppError> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Ok(find_station_row(&mut conn, name.trim()).await?.map(Into::into))
    }

    /// Most recent measurement for a station.
    pub async fn latest_measurement(&self, station_id: i64) -> Result<Option<TravelTime>, AppError> {
        let row = sqlx::query_as::<_, TravelTimeRow>(
            r#"
            SELECT time_id, station_id, minutes, measured_at
            FROM TravelTime
            WHERE station_id = ?
            ORDER BY measured_at DESC, time_id DESC
            LIMIT 1
            "#,
        )
        .bind(station_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(TryInto::try_into).transpose()
    }

    /// Measurement history for a station, newest first.
    pub async fn measurement_history(
        &self,
        station_id: i64,
        limit: usize,
    ) -> Result<Vec<TravelTime>, AppError> {
        let rows = sqlx::query_as::<_, TravelTimeRow>(
            r#"
            SELECT time_id, station_id, minutes, measured_at
            FROM TravelTime
            WHERE station_id = ?
            ORDER BY measured_at DESC, time_id DESC
            LIMIT ?
            "#,
        )
        .bind(station_id)
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    pub async fn all_stations(&self) -> Result<Vec<Station>, AppError> {
        let rows = sqlx::query_as::<_, StationRow>(
            "SELECT station_id, station_name, limited_express FROM Station ORDER BY station_id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Every measurement joined with its station, by station then time.
    pub async fn measurements(&self) -> Result<Vec<MeasurementRow>, AppError> {
        let rows = sqlx::query_as::<_, (String, Option<bool>, i64, DateTime<Utc>)>(
            r#"
            SELECT s.station_name, s.limited_express, t.minutes, t.measured_at
            FROM Station s
            JOIN TravelTime t ON s.station_id = t.station_id
            ORDER BY s.station_id, t.measured_at, t.time_id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter()
            .map(|(station_name, limited_express, minutes, measured_at)| {
                Ok(MeasurementRow {
                    station_name,
                    limited_express: limited_express.into(),
                    minutes: to_minutes(minutes)?,
                    measured_at,
                })
            })
            .collect()
    }

    /// Mean travel time per limited-express flag: yes, no, then unknown.
    pub async fn average_minutes_by_express(&self) -> Result<Vec<ExpressAverage>, AppError> {
        let rows = sqlx::query_as::<_, (Option<bool>, f64, i64)>(
            r#"
            SELECT s.limited_express, AVG(t.minutes), COUNT(*)
            FROM Station s
            JOIN TravelTime t ON s.station_id = t.station_id
            GROUP BY s.limited_express
            ORDER BY s.limited_express IS NULL, s.limited_express DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(rows
            .into_iter()
            .map(|(limited_express, average_minutes, measurements)| ExpressAverage {
                limited_express: limited_express.into(),
                average_minutes,
                measurements: measurements.max(0) as u64,
            })
            .collect())
    }

    /// Check database connectivity.
    pub async fn health_check(&self) -> Result<(), AppError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

async fn find_station_row(
    conn: &mut SqliteConnection,
    name: &str,
) -> Result<Option<StationRow>, AppError> {
    sqlx::query_as::<_, StationRow>(
        "SELECT station_id, station_name, limited_express FROM Station WHERE station_name = ?",
    )
    .bind(name)
    .fetch_optional(&mut *conn)
    .await
    .map_err(db_err)
}

async fn insert_station(
    conn: &mut SqliteConnection,
    name: &str,
    limited_express: LimitedExpress,
) -> Result<i64, sqlx::Error> {
    sqlx::query_scalar(
        "INSERT INTO Station (station_name, limited_express) VALUES (?, ?) RETURNING station_id",
    )
    .bind(name)
    .bind(Option::<bool>::from(limited_express))
    .fetch_one(&mut *conn)
    .await
}

/// Overwrite the stored flag only when the observation is more specific.
async fn merge_limited_express(
    conn: &mut SqliteConnection,
    row: &StationRow,
    observed: LimitedExpress,
) -> Result<(), AppError> {
    let stored = LimitedExpress::from(row.limited_express);
    let merged = stored.merge(observed);
    if merged == stored {
        return Ok(());
    }

    sqlx::query("UPDATE Station SET limited_express = ? WHERE station_id = ?")
        .bind(Option::<bool>::from(merged))
        .bind(row.station_id)
        .execute(&mut *conn)
        .await
        .map_err(db_err)?;
    tracing::debug!(name = %row.station_name, from = %stored, to = %merged, "Updated limited express flag");
    Ok(())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .is_some_and(|db| db.is_unique_violation())
}

fn db_err(e: sqlx::Error) -> AppError {
    AppError::Persistence(e.to_string())
}

fn to_minutes(raw: i64) -> Result<u32, AppError> {
    u32::try_from(raw)
        .ok()
        .filter(|m| *m > 0)
        .ok_or_else(|| AppError::Persistence(format!("stored minutes out of range: {raw}")))
}

// -- Internal row types for sqlx deserialization --

#[derive(sqlx::FromRow)]
struct StationRow {
    station_id: i64,
    station_name: String,
    limited_express: Option<bool>,
}

impl From<StationRow> for Station {
    fn from(row: StationRow) -> Self {
        Station {
            station_id: row.station_id,
            name: row.station_name,
            limited_express: row.limited_express.into(),
        }
    }
}

#[derive(sqlx::FromRow)]
struct TravelTimeRow {
    time_id: i64,
    station_id: i64,
    minutes: i64,
    measured_at: DateTime<Utc>,
}

impl TryFrom<TravelTimeRow> for TravelTime {
    type Error = AppError;

    fn try_from(row: TravelTimeRow) -> Result<Self, Self::Error> {
        Ok(TravelTime {
            time_id: row.time_id,
            station_id: row.station_id,
            minutes: to_minutes(row.minutes)?,
            measured_at: row.measured_at,
        })
    }
}

// -- Trait implementation --

impl railtime_core::traits::StationStore for StationRepository {
    async fn ensure_schema(&self) -> Result<(), AppError> {
        StationRepository::ensure_schema(self).await
    }

    async fn upsert_station_with_measurement(
        &self,
        name: &str,
        limited_express: LimitedExpress,
        minutes: u32,
    ) -> Result<(i64, i64), AppError> {
        StationRepository::upsert_station_with_measurement(self, name, limited_express, minutes)
            .await
    }

    async fn latest_measurement(&self, station_id: i64) -> Result<Option<TravelTime>, AppError> {
        StationRepository::latest_measurement(self, station_id).await
    }

    async fn all_stations(&self) -> Result<Vec<Station>, AppError> {
        StationRepository::all_stations(self).await
    }
}
