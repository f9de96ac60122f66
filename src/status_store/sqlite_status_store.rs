use super::error::{StatusResult, StatusStoreError};
use super::expiry::ExpiryReaper;
use super::models::{JobOptions, JobStatus, PageRange, StatusRecord, StatusUpdate};
use super::schema::STATUS_VERSIONED_SCHEMAS;
use super::{KillRegistry, StatusStore};
use crate::sqlite_persistence::{read_schema_version, BASE_DB_VERSION};
use anyhow::{bail, Context, Result};
use chrono::Utc;
use rusqlite::{params, types::Type, Connection, OptionalExtension, TransactionBehavior};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

const RECORD_COLUMNS: &str =
    "uuid, status, name, message, time, options, num, total, kill_requested";

/// Settings owned by a [`SqliteStatusStore`] instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusStoreConfig {
    /// TTL in seconds for the sweep that runs on `create`. `None` disables it.
    pub expire_in: Option<u64>,
    /// How long a statement waits for another process's write lock before
    /// failing with [`StatusStoreError::Unavailable`].
    pub busy_timeout: Duration,
}

impl Default for StatusStoreConfig {
    fn default() -> Self {
        Self {
            expire_in: None,
            busy_timeout: Duration::from_secs(5),
        }
    }
}

/// SQLite-backed status store.
///
/// Each handle owns one connection. Handles in different threads or
/// processes may point at the same file; all cross-handle guarantees come
/// from single-statement writes, the `UNIQUE(uuid)` constraint and SQLite's
/// write lock.
pub struct SqliteStatusStore {
    conn: Mutex<Connection>,
    reaper: RwLock<ExpiryReaper>,
}

impl SqliteStatusStore {
    pub fn new<P: AsRef<Path>>(db_path: P, config: StatusStoreConfig) -> Result<Self> {
        let path = db_path.as_ref();
        let mut conn = Connection::open(path).context("Failed to open status database")?;
        conn.busy_timeout(config.busy_timeout)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;

        // IMMEDIATE so that two processes initializing the same file serialize here
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let raw_version: i64 = tx.query_row("PRAGMA user_version;", [], |row| row.get(0))?;
        if raw_version == 0 {
            info!("Creating new status database at {:?}", path);
            STATUS_VERSIONED_SCHEMAS
                .last()
                .context("No status schemas defined")?
                .create(&tx)?;
        } else {
            let db_version = read_schema_version(&tx)?;
            if db_version < 1 {
                bail!(
                    "Status database version {} is invalid (expected >= 1)",
                    db_version
                );
            }

            let version_index = STATUS_VERSIONED_SCHEMAS
                .iter()
                .position(|s| s.version as i64 == db_version)
                .with_context(|| format!("Unknown status database version {}", db_version))?;
            STATUS_VERSIONED_SCHEMAS[version_index]
                .validate(&tx)
                .with_context(|| {
                    format!(
                        "Status database schema validation failed for version {}",
                        db_version
                    )
                })?;

            Self::migrate_if_needed(&tx, db_version as usize)?;
        }
        tx.commit()?;

        Ok(Self::from_connection(conn, &config))
    }

    /// A private in-memory store, handy for tests and single-process embedding.
    pub fn in_memory(config: StatusStoreConfig) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.busy_timeout(config.busy_timeout)?;
        STATUS_VERSIONED_SCHEMAS
            .last()
            .context("No status schemas defined")?
            .create(&conn)?;
        Ok(Self::from_connection(conn, &config))
    }

    fn from_connection(conn: Connection, config: &StatusStoreConfig) -> Self {
        Self {
            conn: Mutex::new(conn),
            reaper: RwLock::new(ExpiryReaper::new(config.expire_in)),
        }
    }

    fn migrate_if_needed(conn: &Connection, from_version: usize) -> Result<()> {
        let mut latest_from = from_version;
        for schema in STATUS_VERSIONED_SCHEMAS
            .iter()
            .filter(|s| s.version > from_version)
        {
            info!(
                "Migrating status database from version {} to {}",
                latest_from, schema.version
            );
            if let Some(migration_fn) = schema.migration {
                migration_fn(conn).with_context(|| {
                    format!("Failed to run migration to version {}", schema.version)
                })?;
            }
            latest_from = schema.version;
        }
        if latest_from != from_version {
            conn.execute(
                &format!("PRAGMA user_version = {}", BASE_DB_VERSION + latest_from),
                [],
            )?;
        }
        Ok(())
    }

    fn lock(&self) -> StatusResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| StatusStoreError::lock_poisoned())
    }

    fn reaper(&self) -> ExpiryReaper {
        *self.reaper.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn row_to_record(row: &rusqlite::Row) -> rusqlite::Result<StatusRecord> {
        let status_str: String = row.get("status")?;
        let status = JobStatus::parse(&status_str).ok_or_else(|| {
            rusqlite::Error::FromSqlConversionFailure(
                1,
                Type::Text,
                format!("Unknown job status '{}'", status_str).into(),
            )
        })?;

        let options_str: Option<String> = row.get("options")?;
        let options = options_str
            .map(|s| serde_json::from_str::<JobOptions>(&s))
            .transpose()
            .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?;

        Ok(StatusRecord {
            uuid: row.get("uuid")?,
            status,
            name: row.get("name")?,
            message: row.get("message")?,
            time: row.get("time")?,
            options,
            num: row.get("num")?,
            total: row.get("total")?,
            kill_requested: row.get("kill_requested")?,
        })
    }

    /// Merge `record` into an existing row, or insert it.
    ///
    /// `status` and `time` are always written. The other fields only
    /// overwrite the stored value when present in `record`. The kill flag is
    /// left untouched.
    fn write_record(conn: &Connection, record: &StatusRecord) -> StatusResult<StatusRecord> {
        let options = record
            .options
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let updated = conn
            .query_row(
                &format!(
                    "UPDATE statuses SET
                        status = ?2,
                        time = ?3,
                        name = COALESCE(?4, name),
                        message = COALESCE(?5, message),
                        options = COALESCE(?6, options),
                        num = COALESCE(?7, num),
                        total = COALESCE(?8, total)
                     WHERE uuid = ?1
                     RETURNING {}",
                    RECORD_COLUMNS
                ),
                params![
                    record.uuid,
                    record.status.as_str(),
                    record.time,
                    record.name,
                    record.message,
                    options,
                    record.num,
                    record.total,
                ],
                Self::row_to_record,
            )
            .optional()?;

        match updated {
            Some(stored) => Ok(stored),
            None => Self::insert_record(conn, record, options.as_deref()),
        }
    }

    /// Plain insert; a concurrent insert of the same uuid makes this fail
    /// with [`StatusStoreError::Conflict`].
    fn insert_record(
        conn: &Connection,
        record: &StatusRecord,
        options: Option<&str>,
    ) -> StatusResult<StatusRecord> {
        conn.query_row(
            &format!(
                "INSERT INTO statuses (uuid, status, name, message, time, options, num, total)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 RETURNING {}",
                RECORD_COLUMNS
            ),
            params![
                record.uuid,
                record.status.as_str(),
                record.name,
                record.message,
                record.time,
                options,
                record.num,
                record.total,
            ],
            Self::row_to_record,
        )
        .map_err(|e| StatusStoreError::from_insert(&record.uuid, e))
    }

    fn set_kill_flag(&self, uuid: &str, flag: bool) -> StatusResult<bool> {
        let conn = self.lock()?;
        let changed = conn.execute(
            "UPDATE statuses SET kill_requested = ?2 WHERE uuid = ?1",
            params![uuid, flag],
        )?;
        Ok(changed > 0)
    }
}

impl StatusStore for SqliteStatusStore {
    fn create(&self, uuid: &str, updates: &[StatusUpdate]) -> StatusResult<String> {
        let record = StatusRecord::new(uuid, updates);
        let conn = self.lock()?;
        Self::write_record(&conn, &record)?;
        debug!("Created status {} ({})", uuid, record.status);

        // The record is already committed, a failed sweep is retried on the next create
        if let Err(e) = self.reaper().sweep(&conn, Utc::now().timestamp()) {
            warn!("Expiry sweep after creating {} failed: {}", uuid, e);
        }
        Ok(uuid.to_string())
    }

    fn get(&self, uuid: &str) -> StatusResult<Option<StatusRecord>> {
        let conn = self.lock()?;
        let record = conn
            .query_row(
                &format!("SELECT {} FROM statuses WHERE uuid = ?1", RECORD_COLUMNS),
                params![uuid],
                Self::row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    fn set(&self, uuid: &str, updates: &[StatusUpdate]) -> StatusResult<StatusRecord> {
        let record = StatusRecord::new(uuid, updates);
        let conn = self.lock()?;
        Self::write_record(&conn, &record)
    }

    fn remove(&self, uuid: &str) -> StatusResult<Option<StatusRecord>> {
        let conn = self.lock()?;
        let removed = conn
            .query_row(
                &format!(
                    "DELETE FROM statuses WHERE seq = (
                        SELECT seq FROM statuses WHERE uuid = ?1 ORDER BY uuid ASC LIMIT 1
                     )
                     RETURNING {}",
                    RECORD_COLUMNS
                ),
                params![uuid],
                Self::row_to_record,
            )
            .optional()?;
        if removed.is_some() {
            debug!("Removed status {}", uuid);
        }
        Ok(removed)
    }

    fn count(&self) -> StatusResult<usize> {
        let conn = self.lock()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM statuses", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn status_ids(&self, range: PageRange) -> StatusResult<Vec<String>> {
        // SQLite treats a negative LIMIT as "no limit"
        let limit = range
            .limit()
            .map(|l| i64::try_from(l).unwrap_or(i64::MAX))
            .unwrap_or(-1);
        let offset = i64::try_from(range.skip()).unwrap_or(i64::MAX);

        let conn = self.lock()?;
        let mut stmt =
            conn.prepare("SELECT uuid FROM statuses ORDER BY seq DESC LIMIT ?1 OFFSET ?2")?;
        let ids = stmt
            .query_map(params![limit, offset], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn expire_in(&self) -> Option<u64> {
        self.reaper().expire_in()
    }

    fn set_expire_in(&self, seconds: Option<u64>) {
        let mut reaper = self.reaper.write().unwrap_or_else(PoisonError::into_inner);
        *reaper = ExpiryReaper::new(seconds);
        info!("Status expiry set to {:?} seconds", seconds);
    }
}

impl KillRegistry for SqliteStatusStore {
    fn kill(&self, uuid: &str) -> StatusResult<bool> {
        let flagged = self.set_kill_flag(uuid, true)?;
        if flagged {
            debug!("Kill requested for {}", uuid);
        } else {
            warn!("Kill requested for unknown status {}", uuid);
        }
        Ok(flagged)
    }

    fn killed(&self, uuid: &str) -> StatusResult<bool> {
        self.set_kill_flag(uuid, false)
    }

    fn kill_ids(&self) -> StatusResult<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare("SELECT uuid FROM statuses WHERE kill_requested = 1 ORDER BY seq DESC")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    fn should_kill(&self, uuid: &str) -> StatusResult<bool> {
        let conn = self.lock()?;
        let flagged: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM statuses WHERE uuid = ?1 AND kill_requested = 1)",
            params![uuid],
            |row| row.get(0),
        )?;
        Ok(flagged)
    }
}
