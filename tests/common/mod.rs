//! Common test infrastructure
//!
//! Each test gets its own database file in a temporary directory. Opening
//! several handles on the same file stands in for several worker processes
//! sharing one store.
//!
//! # Example
//!
//! ```no_run
//! mod common;
//! use common::TestDb;
//!
//! #[test]
//! fn test_something() {
//!     let db = TestDb::new();
//!     let store = db.open();
//!     store.create("abc", &[]).unwrap();
//! }
//! ```

use job_status::{SqliteStatusStore, StatusStoreConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub struct TestDb {
    pub path: PathBuf,
    _temp_dir: TempDir, // Keep temp dir alive
}

impl TestDb {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("status.db");
        // Create the schema up front so concurrent handles only ever open an existing file
        drop(SqliteStatusStore::new(&path, test_config()).unwrap());
        Self {
            path,
            _temp_dir: temp_dir,
        }
    }

    /// A fresh handle with its own connection, like a separate worker process.
    pub fn open(&self) -> Arc<SqliteStatusStore> {
        Arc::new(SqliteStatusStore::new(&self.path, test_config()).unwrap())
    }

    #[allow(dead_code)]
    pub fn open_with(&self, config: StatusStoreConfig) -> Arc<SqliteStatusStore> {
        Arc::new(SqliteStatusStore::new(&self.path, config).unwrap())
    }
}

pub fn test_config() -> StatusStoreConfig {
    StatusStoreConfig {
        expire_in: None,
        busy_timeout: Duration::from_secs(30),
    }
}
