mod error;
mod expiry;
mod models;
mod schema;
mod sqlite_status_store;

pub use error::{StatusResult, StatusStoreError};
pub use expiry::ExpiryReaper;
pub use models::*;
pub use schema::STATUS_VERSIONED_SCHEMAS;
pub use sqlite_status_store::{SqliteStatusStore, StatusStoreConfig};

use tracing::debug;

/// Persistence of job status records.
///
/// Implementations must get their atomicity from the backing store, since
/// several worker processes may operate on the same data without any
/// in-process coordination. Every call blocks on the store.
pub trait StatusStore: Send + Sync {
    /// Build a record from `updates`, persist it, then sweep expired records
    /// when an expiry window is configured. Returns `uuid` even when an
    /// existing record was overwritten.
    fn create(&self, uuid: &str, updates: &[StatusUpdate]) -> StatusResult<String>;

    fn get(&self, uuid: &str) -> StatusResult<Option<StatusRecord>>;

    /// Build a record from `updates` and merge its fields into the stored one,
    /// inserting it if absent. Last writer wins. Returns the stored record.
    fn set(&self, uuid: &str, updates: &[StatusUpdate]) -> StatusResult<StatusRecord>;

    /// Atomically delete the record, returning it. Of several concurrent
    /// removals of the same uuid exactly one gets `Some`.
    fn remove(&self, uuid: &str) -> StatusResult<Option<StatusRecord>>;

    fn count(&self) -> StatusResult<usize>;

    /// Uuids ordered most recently inserted first, windowed by `range`.
    fn status_ids(&self, range: PageRange) -> StatusResult<Vec<String>>;

    fn expire_in(&self) -> Option<u64>;

    /// `None` disables expiry.
    fn set_expire_in(&self, seconds: Option<u64>);

    /// Look up several records, keeping input order; missing ids yield `None`.
    fn mget(&self, uuids: &[&str]) -> StatusResult<Vec<Option<StatusRecord>>> {
        uuids.iter().map(|uuid| self.get(uuid)).collect()
    }

    /// Records for `status_ids(range)`. Ids removed in the meantime are skipped.
    fn statuses(&self, range: PageRange) -> StatusResult<Vec<StatusRecord>> {
        let mut records = Vec::new();
        for uuid in self.status_ids(range)? {
            if let Some(record) = self.get(&uuid)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Remove every record in the page selected by `range`.
    ///
    /// With a bounded range only that page is cleared, not the whole store.
    fn clear(&self, range: PageRange) -> StatusResult<usize> {
        self.clear_matching(range, &|_| true)
    }

    /// Like [`clear`](Self::clear), restricted to completed records.
    fn clear_completed(&self, range: PageRange) -> StatusResult<usize> {
        self.clear_matching(range, &StatusRecord::is_completed)
    }

    /// Like [`clear`](Self::clear), restricted to failed records.
    fn clear_failed(&self, range: PageRange) -> StatusResult<usize> {
        self.clear_matching(range, &StatusRecord::is_failed)
    }

    fn clear_matching(
        &self,
        range: PageRange,
        predicate: &dyn Fn(&StatusRecord) -> bool,
    ) -> StatusResult<usize> {
        let mut removed = 0;
        for uuid in self.status_ids(range)? {
            let matches = match self.get(&uuid)? {
                Some(record) => predicate(&record),
                None => false,
            };
            if matches && self.remove(&uuid)?.is_some() {
                removed += 1;
            }
        }
        debug!("Cleared {} status records", removed);
        Ok(removed)
    }
}

/// Cooperative cancellation flags stored alongside the status records.
///
/// Setting a flag never interrupts anything: the job has to poll
/// [`should_kill`](Self::should_kill) at its own checkpoints and stop itself.
pub trait KillRegistry: StatusStore {
    /// Flag a job for termination. Returns false if no record exists for `uuid`.
    fn kill(&self, uuid: &str) -> StatusResult<bool>;

    /// Clear the kill flag. Returns false if no record exists for `uuid`.
    fn killed(&self, uuid: &str) -> StatusResult<bool>;

    /// All flagged uuids, most recent first.
    fn kill_ids(&self) -> StatusResult<Vec<String>>;

    fn should_kill(&self, uuid: &str) -> StatusResult<bool>;

    /// Flag every job in `status_ids(range)`. Returns how many were flagged.
    fn killall(&self, range: PageRange) -> StatusResult<usize> {
        let mut flagged = 0;
        for uuid in self.status_ids(range)? {
            if self.kill(&uuid)? {
                flagged += 1;
            }
        }
        Ok(flagged)
    }
}
