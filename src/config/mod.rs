mod file_config;

pub use file_config::FileConfig;

use crate::status_store::StatusStoreConfig;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;

pub const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5000;

/// CLI arguments that can be overridden by the TOML config.
#[derive(Debug, Clone)]
pub struct CliConfig {
    pub db_path: Option<PathBuf>,
    pub expire_in_secs: Option<u64>,
    pub busy_timeout_ms: u64,
    pub logging_level: LevelFilter,
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            db_path: None,
            expire_in_secs: None,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            logging_level: LevelFilter::INFO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub db_path: PathBuf,
    pub logging_level: LevelFilter,
    pub store: StatusStoreConfig,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_path = file
            .db_path
            .map(PathBuf::from)
            .or_else(|| cli.db_path.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_path must be specified via --db or in config file")
            })?;

        if db_path.is_dir() {
            bail!("db_path is a directory: {:?}", db_path);
        }
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                bail!("Database directory does not exist: {:?}", parent);
            }
        }

        let logging_level = match file.logging_level {
            Some(level) => parse_logging_level(&level)?,
            None => cli.logging_level,
        };

        let expire_in = file.expire_in_secs.or(cli.expire_in_secs);
        let busy_timeout_ms = file.busy_timeout_ms.unwrap_or(cli.busy_timeout_ms);

        Ok(Self {
            db_path,
            logging_level,
            store: StatusStoreConfig {
                expire_in,
                busy_timeout: Duration::from_millis(busy_timeout_ms),
            },
        })
    }
}

pub fn parse_logging_level(s: &str) -> Result<LevelFilter> {
    match s.parse::<LevelFilter>() {
        Ok(level) => Ok(level),
        Err(_) => bail!(
            "Invalid logging level '{}', expected one of: off, error, warn, info, debug, trace",
            s
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::{tempdir, NamedTempFile};

    fn cli_with_db(path: PathBuf) -> CliConfig {
        CliConfig {
            db_path: Some(path),
            ..Default::default()
        }
    }

    #[test]
    fn test_resolve_uses_cli_values() {
        let dir = tempdir().unwrap();
        let cli = CliConfig {
            expire_in_secs: Some(60),
            ..cli_with_db(dir.path().join("status.db"))
        };

        let config = AppConfig::resolve(&cli, None).unwrap();
        assert_eq!(config.db_path, dir.path().join("status.db"));
        assert_eq!(config.store.expire_in, Some(60));
        assert_eq!(
            config.store.busy_timeout,
            Duration::from_millis(DEFAULT_BUSY_TIMEOUT_MS)
        );
        assert_eq!(config.logging_level, LevelFilter::INFO);
    }

    #[test]
    fn test_file_overrides_cli() {
        let dir = tempdir().unwrap();
        let cli = CliConfig {
            expire_in_secs: Some(60),
            ..cli_with_db(dir.path().join("cli.db"))
        };
        let file = FileConfig {
            db_path: Some(dir.path().join("file.db").to_string_lossy().into_owned()),
            expire_in_secs: Some(3600),
            busy_timeout_ms: Some(250),
            logging_level: Some("debug".to_string()),
        };

        let config = AppConfig::resolve(&cli, Some(file)).unwrap();
        assert_eq!(config.db_path, dir.path().join("file.db"));
        assert_eq!(config.store.expire_in, Some(3600));
        assert_eq!(config.store.busy_timeout, Duration::from_millis(250));
        assert_eq!(config.logging_level, LevelFilter::DEBUG);
    }

    #[test]
    fn test_missing_db_path_is_error() {
        let err = AppConfig::resolve(&CliConfig::default(), None).unwrap_err();
        assert!(err.to_string().contains("db_path"));
    }

    #[test]
    fn test_missing_parent_directory_is_error() {
        let dir = tempdir().unwrap();
        let cli = cli_with_db(dir.path().join("nope").join("status.db"));
        let err = AppConfig::resolve(&cli, None).unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }

    #[test]
    fn test_invalid_logging_level_is_error() {
        let dir = tempdir().unwrap();
        let file = FileConfig {
            logging_level: Some("loud".to_string()),
            ..Default::default()
        };
        let result = AppConfig::resolve(&cli_with_db(dir.path().join("s.db")), Some(file));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_toml_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
db_path = "/var/lib/jobs/status.db"
expire_in_secs = 86400
logging_level = "warn"
"#
        )
        .unwrap();

        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.db_path.as_deref(), Some("/var/lib/jobs/status.db"));
        assert_eq!(config.expire_in_secs, Some(86400));
        assert_eq!(config.busy_timeout_ms, None);
        assert_eq!(config.logging_level.as_deref(), Some("warn"));
    }

    #[test]
    fn test_load_rejects_bad_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "expire_in_secs = \"soon\"").unwrap();
        assert!(FileConfig::load(file.path()).is_err());
    }
}
