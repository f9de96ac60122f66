use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default, PartialEq, Eq)]
#[serde(default)]
pub struct FileConfig {
    pub db_path: Option<String>,
    /// Status TTL in seconds. Leave unset to keep statuses forever.
    pub expire_in_secs: Option<u64>,
    pub busy_timeout_ms: Option<u64>,
    pub logging_level: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
