//! Job Status Store
//!
//! Tracks the lifecycle of asynchronous job executions (progress, completion,
//! failure and cooperative cancellation) in a SQLite database shared by
//! every worker process.
//!
//! ```text
//! job runtime ── create / set ──►┌─────────────────────┐◄── get / mget / statuses ── observers
//!                                │  SqliteStatusStore  │
//! supervisor ──── kill ─────────►│  (StatusStore +     │
//! job checkpoint ─ should_kill ─►│   KillRegistry)     │──► ExpiryReaper (on create)
//!                                └─────────────────────┘
//! ```

pub mod config;
pub mod sqlite_persistence;
pub mod status_store;
pub mod tracker;

pub use status_store::{
    generate_uuid, JobStatus, KillRegistry, PageRange, SqliteStatusStore, StatusFields,
    StatusRecord, StatusStore, StatusStoreConfig, StatusStoreError, StatusUpdate,
};
pub use tracker::{StatusTracker, TrackerError};
