use std::time::Duration;

use crate::schema::*;
use common::req::MeasurementRecord;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PoolError};
use diesel::sqlite::{Sqlite, SqliteConnection};
use thiserror::Error;

/// Idempotent schema setup, run once at startup.
const SCHEMA_DDL: &str = "
    CREATE TABLE IF NOT EXISTS measurements (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        device_id TEXT NOT NULL,
        value INTEGER NOT NULL,
        ts_server TEXT NOT NULL,
        ts_client TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_measurements_device_id ON measurements(device_id, id);
";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("query failed: {0}")]
    Query(#[from] diesel::result::Error),
    #[error("connection pool: {0}")]
    Pool(#[from] PoolError),
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name=measurements)]
pub struct NewMeasurement {
    pub device_id: String,
    pub value: i32,
    pub ts_server: String,
    pub ts_client: Option<String>,
}

#[derive(Debug, Clone, Queryable)]
#[allow(unused)]
pub struct Measurement {
    pub id: i64,
    pub device_id: String,
    pub value: i32,
    pub ts_server: String,
    pub ts_client: Option<String>,
}

impl From<Measurement> for MeasurementRecord {
    fn from(m: Measurement) -> Self {
        Self {
            device_id: m.device_id,
            value: m.value,
            ts_server: m.ts_server,
            ts_client: m.ts_client,
        }
    }
}

/// Applied to every pooled connection when it is opened.
#[derive(Debug)]
struct ConnectionOptions {
    busy_timeout: Duration,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionOptions {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        conn.batch_execute(&format!(
            "PRAGMA busy_timeout = {};",
            self.busy_timeout.as_millis()
        ))
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

#[derive(Clone)]
pub struct Db {
    pool: Pool<ConnectionManager<SqliteConnection>>,
}

impl Db {
    /// Open a bounded pool on `database_url`.
    ///
    /// `timeout` bounds both waiting for a pooled connection and waiting on a
    /// locked database.
    pub fn connect(
        database_url: &str,
        pool_size: u32,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(timeout)
            .connection_customizer(Box::new(ConnectionOptions {
                busy_timeout: timeout,
            }))
            .build(manager)?;

        Ok(Self { pool })
    }

    pub fn ensure_schema(&self) -> Result<(), StorageError> {
        let mut conn = self.pool.get()?;
        conn.batch_execute("PRAGMA journal_mode = WAL;")?;
        conn.batch_execute(SCHEMA_DDL)?;
        log::info!("Database schema ready");
        Ok(())
    }

    /// Insert all rows in a single transaction; either every row is stored or none.
    pub fn insert_measurements(&self, rows: &[NewMeasurement]) -> Result<usize, StorageError> {
        let mut conn = self.pool.get()?;
        let inserted = conn.transaction::<_, diesel::result::Error, _>(|conn| {
            let mut inserted = 0;
            for row in rows {
                inserted += diesel::insert_into(measurements::table)
                    .values(row)
                    .execute(conn)?;
            }
            Ok(inserted)
        })?;

        Ok(inserted)
    }

    /// Most recently inserted row for `device`.
    pub fn latest(&self, device: &str) -> Result<Option<Measurement>, StorageError> {
        use crate::schema::measurements::dsl::*;
        let mut conn = self.pool.get()?;
        let res = measurements
            .filter(device_id.eq(device))
            .order(id.desc())
            .first::<Measurement>(&mut conn)
            .optional()?;

        Ok(res)
    }

    /// Every row, or every row of `device`, newest first.
    pub fn all(&self, device: Option<&str>) -> Result<Vec<Measurement>, StorageError> {
        use crate::schema::measurements::dsl::*;
        let mut conn = self.pool.get()?;
        let mut query = measurements.order(id.desc()).into_boxed::<Sqlite>();
        if let Some(device) = device {
            query = query.filter(device_id.eq(device));
        }
        let res = query.load::<Measurement>(&mut conn)?;

        Ok(res)
    }

    pub fn ping(&self) -> Result<(), StorageError> {
        let mut conn = self.pool.get()?;
        conn.batch_execute("SELECT 1;")?;
        Ok(())
    }
}
