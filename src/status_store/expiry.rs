//! Best-effort TTL sweep, run opportunistically on record creation.

use rusqlite::{params, Connection};
use tracing::{debug, info};

/// Removes status records older than the configured TTL.
///
/// There is no timer: the sweep only happens when a caller invokes it, so a
/// store that stops receiving new jobs keeps its expired records.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExpiryReaper {
    expire_in: Option<u64>,
}

impl ExpiryReaper {
    pub fn new(expire_in: Option<u64>) -> Self {
        Self { expire_in }
    }

    pub fn expire_in(&self) -> Option<u64> {
        self.expire_in
    }

    /// Oldest `time` that survives a sweep run at `now`, or `None` when disabled.
    pub fn cutoff(&self, now: i64) -> Option<i64> {
        self.expire_in
            .map(|secs| now.saturating_sub(i64::try_from(secs).unwrap_or(i64::MAX)))
    }

    /// Delete every record with `time <= now - expire_in`, returning the removed uuids.
    pub fn sweep(&self, conn: &Connection, now: i64) -> rusqlite::Result<Vec<String>> {
        let Some(cutoff) = self.cutoff(now) else {
            return Ok(Vec::new());
        };

        let mut stmt = conn.prepare("DELETE FROM statuses WHERE time <= ?1 RETURNING uuid")?;
        let removed = stmt
            .query_map(params![cutoff], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        if removed.is_empty() {
            debug!("Expiry sweep found nothing older than {}", cutoff);
        } else {
            info!(
                "Expiry sweep removed {} status records older than {}",
                removed.len(),
                cutoff
            );
        }
        Ok(removed)
    }
}
