//! Postgres-backed ride table.
//!
//! ## Schema
//!
//! | Column      | Type | Notes |
//! |-------------|------|-------|
//! | `skier_id`  | TEXT | partition key |
//! | `lift_info` | TEXT | range key `season:lift:day:time` |
//! | `resort_id` | TEXT | |
//! | `season_id` | TEXT | copied out of the range key for index scans |
//! | `day_id`    | TEXT | copied out of the range key for index scans |
//!
//! Primary key `(skier_id, lift_info)`; secondary index `(resort_id, day_id)`.
//!
//! The trait is synchronous and called from consumer worker threads, so each
//! call drives its query to completion on the runtime handle captured at
//! construction. Do not call it from inside an async task; use
//! `spawn_blocking` there.

use std::collections::HashMap;

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;
use tracing::{instrument, warn};

use liftride_core::{LiftInfo, StorageItem};

use super::{DEFAULT_MAX_BATCH_SIZE, StorageClient, StoreError};

pub struct PostgresRideStore {
    pool: PgPool,
    table: String,
    handle: Handle,
    max_batch_size: usize,
}

impl PostgresRideStore {
    /// `table` must be a plain SQL identifier; it is interpolated into statements.
    pub fn new(pool: PgPool, table: impl Into<String>, handle: Handle) -> Result<Self, StoreError> {
        let table = table.into();
        if !is_identifier(&table) {
            return Err(StoreError::Query(format!("invalid table name `{table}`")));
        }
        Ok(Self {
            pool,
            table,
            handle,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
        })
    }

    /// Like [`new`](Self::new), driving queries on the runtime this is called from.
    pub fn on_current_runtime(pool: PgPool, table: impl Into<String>) -> Result<Self, StoreError> {
        let handle = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        Self::new(pool, table, handle)
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = max.max(1);
        self
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Create the table and its resort/day index if they do not exist.
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        let create_table = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {t} (
                skier_id  TEXT NOT NULL,
                lift_info TEXT NOT NULL,
                resort_id TEXT NOT NULL,
                season_id TEXT NOT NULL,
                day_id    TEXT NOT NULL,
                PRIMARY KEY (skier_id, lift_info)
            )
            "#,
            t = self.table
        );
        let create_index = format!(
            "CREATE INDEX IF NOT EXISTS {t}_resort_day_idx ON {t} (resort_id, day_id)",
            t = self.table
        );

        sqlx::query(&create_table)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create table", e))?;
        sqlx::query(&create_index)
            .execute(&self.pool)
            .await
            .map_err(|e| map_sqlx_error("create index", e))?;
        Ok(())
    }

    async fn upsert(&self, items: &[StorageItem]) -> Result<(), sqlx::Error> {
        let rows = dedupe(items);
        let mut skier_ids = Vec::with_capacity(rows.len());
        let mut lift_infos = Vec::with_capacity(rows.len());
        let mut resort_ids = Vec::with_capacity(rows.len());
        let mut season_ids = Vec::with_capacity(rows.len());
        let mut day_ids = Vec::with_capacity(rows.len());
        for item in rows {
            skier_ids.push(item.skier_id.clone());
            lift_infos.push(item.range_key());
            resort_ids.push(item.resort_id.clone());
            season_ids.push(item.season_id().to_string());
            day_ids.push(item.day_id().to_string());
        }

        let sql = format!(
            r#"
            INSERT INTO {t} (skier_id, lift_info, resort_id, season_id, day_id)
            SELECT * FROM UNNEST($1::text[], $2::text[], $3::text[], $4::text[], $5::text[])
            ON CONFLICT (skier_id, lift_info) DO UPDATE SET resort_id = EXCLUDED.resort_id
            "#,
            t = self.table
        );

        sqlx::query(&sql)
            .bind(&skier_ids)
            .bind(&lift_infos)
            .bind(&resort_ids)
            .bind(&season_ids)
            .bind(&day_ids)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    fn select(&self, filter: &str, binds: &[&str]) -> Result<Vec<StorageItem>, StoreError> {
        let sql = format!(
            "SELECT skier_id, lift_info, resort_id FROM {t} WHERE {filter} ORDER BY skier_id, lift_info",
            t = self.table
        );

        let rows = self.handle.block_on(async {
            let mut query = sqlx::query(&sql);
            for b in binds {
                query = query.bind(*b);
            }
            query.fetch_all(&self.pool).await
        });
        let rows = rows.map_err(|e| map_sqlx_error("select rides", e))?;

        rows.iter()
            .map(|row| {
                let lift_info: String = row
                    .try_get("lift_info")
                    .map_err(|e| StoreError::Corrupt(e.to_string()))?;
                Ok(StorageItem {
                    skier_id: row
                        .try_get("skier_id")
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    lift_info: lift_info
                        .parse::<LiftInfo>()
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                    resort_id: row
                        .try_get("resort_id")
                        .map_err(|e| StoreError::Corrupt(e.to_string()))?,
                })
            })
            .collect()
    }
}

impl StorageClient for PostgresRideStore {
    #[instrument(skip(self, items), fields(table = %self.table, items = items.len()), err)]
    fn batch_write(&self, items: &[StorageItem]) -> Result<Vec<StorageItem>, StoreError> {
        if items.is_empty() {
            return Ok(Vec::new());
        }

        match self.handle.block_on(self.upsert(items)) {
            Ok(()) => Ok(Vec::new()),
            Err(err) if is_transient(&err) => {
                warn!(error = %err, "batch write throttled, returning items as unprocessed");
                Ok(items.to_vec())
            }
            Err(err) => Err(map_sqlx_error("batch write", err)),
        }
    }

    fn put(&self, item: &StorageItem) -> Result<(), StoreError> {
        self.handle
            .block_on(self.upsert(std::slice::from_ref(item)))
            .map_err(|e| map_sqlx_error("put", e))
    }

    #[instrument(skip(self), fields(table = %self.table), err)]
    fn query_skier(&self, skier_id: &str) -> Result<Vec<StorageItem>, StoreError> {
        self.select("skier_id = $1", &[skier_id])
    }

    #[instrument(skip(self), fields(table = %self.table), err)]
    fn scan_resort(
        &self,
        resort_id: &str,
        season_id: &str,
        day_id: &str,
    ) -> Result<Vec<StorageItem>, StoreError> {
        self.select(
            "resort_id = $1 AND day_id = $2 AND season_id = $3",
            &[resort_id, day_id, season_id],
        )
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

/// `ON CONFLICT DO UPDATE` rejects a statement that touches the same row twice.
fn dedupe(items: &[StorageItem]) -> Vec<&StorageItem> {
    let mut last: HashMap<(&str, String), usize> = HashMap::new();
    for (i, item) in items.iter().enumerate() {
        last.insert((item.skier_id.as_str(), item.range_key()), i);
    }
    let mut keep: Vec<usize> = last.into_values().collect();
    keep.sort_unstable();
    keep.into_iter().map(|i| &items[i]).collect()
}

pub(crate) fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        && name.len() <= 63
}

/// Failures worth retrying: the database is busy rather than wrong.
fn is_transient(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_err) => matches!(
            db_err.code().as_deref(),
            // serialization_failure, deadlock_detected, too_many_connections, query_canceled
            Some("40001" | "40P01" | "53300" | "57014")
        ),
        _ => false,
    }
}

fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            StoreError::Query(format!("database error in {operation}: {}", db_err.message()))
        }
        e @ (sqlx::Error::PoolClosed | sqlx::Error::PoolTimedOut | sqlx::Error::Io(_)) => {
            StoreError::Unavailable(format!("{operation}: {e}"))
        }
        other => StoreError::Query(format!("{operation}: {other}")),
    }
}
