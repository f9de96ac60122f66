//! SQLite schema definitions for the job status database.

use crate::sqlite_column;
use crate::sqlite_persistence::{Column, SqlType, Table, VersionedSchema};

// =============================================================================
// Version 1 - Status records with kill flag
// =============================================================================

/// One row per job execution.
///
/// `seq` is the insertion sequence used for most-recent-first listings; it is
/// AUTOINCREMENT so a removed row's sequence number is never handed out again.
const STATUSES_TABLE_V1: Table = Table {
    name: "statuses",
    columns: &[
        sqlite_column!(
            "seq",
            &SqlType::Integer,
            is_primary_key = true,
            is_autoincrement = true
        ),
        sqlite_column!("uuid", &SqlType::Text, non_null = true),
        sqlite_column!("status", &SqlType::Text, non_null = true),
        sqlite_column!("name", &SqlType::Text),
        sqlite_column!("message", &SqlType::Text),
        sqlite_column!("time", &SqlType::Integer, non_null = true),
        sqlite_column!("options", &SqlType::Text), // JSON object
        sqlite_column!("num", &SqlType::Integer),
        sqlite_column!("total", &SqlType::Integer),
        sqlite_column!(
            "kill_requested",
            &SqlType::Integer,
            non_null = true,
            default_value = Some("0")
        ),
    ],
    indices: &[
        ("idx_statuses_time", "time"),
        ("idx_statuses_kill_requested", "kill_requested"),
    ],
    unique_constraints: &[&["uuid"]],
};

pub const STATUS_VERSIONED_SCHEMAS: &[VersionedSchema] = &[VersionedSchema {
    version: 1,
    tables: &[STATUSES_TABLE_V1],
    migration: None,
}];

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn test_latest_schema_creates_and_validates() {
        let conn = Connection::open_in_memory().unwrap();
        let schema = STATUS_VERSIONED_SCHEMAS.last().unwrap();
        schema.create(&conn).unwrap();
        schema.validate(&conn).unwrap();
    }

    #[test]
    fn test_uuid_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        STATUS_VERSIONED_SCHEMAS.last().unwrap().create(&conn).unwrap();

        conn.execute(
            "INSERT INTO statuses (uuid, status, time) VALUES ('a', 'queued', 0)",
            [],
        )
        .unwrap();
        let duplicate = conn.execute(
            "INSERT INTO statuses (uuid, status, time) VALUES ('a', 'queued', 0)",
            [],
        );
        assert!(duplicate.is_err());
    }

    #[test]
    fn test_kill_flag_defaults_to_false() {
        let conn = Connection::open_in_memory().unwrap();
        STATUS_VERSIONED_SCHEMAS.last().unwrap().create(&conn).unwrap();

        conn.execute(
            "INSERT INTO statuses (uuid, status, time) VALUES ('a', 'queued', 0)",
            [],
        )
        .unwrap();
        let flag: i64 = conn
            .query_row(
                "SELECT kill_requested FROM statuses WHERE uuid = 'a'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(flag, 0);
    }
}
