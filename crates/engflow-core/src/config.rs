//! Tooling configuration: an optional TOML file overlaid with `ENGFLOW_*`
//! environment variables (a `.env` file is honoured via `dotenvy`).

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::backup::{BackupOptions, FALLBACK_BACKUP_KEY};
use crate::error::ConfigError;
use crate::migration::MigrationOptions;
use crate::rollback::RollbackOptions;

pub const DEFAULT_CLEANUP_DELAY_MS: u64 = 100;
pub const DEFAULT_INSERT_BATCH_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MigrationConfig {
    pub database_url: Option<String>,
    pub local_store_path: PathBuf,
    pub backup_dir: PathBuf,
    pub fallback_key: String,
    pub user_agent: String,
    pub cleanup_delay_ms: u64,
    pub insert_batch_size: usize,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            local_store_path: PathBuf::from("local-store.json"),
            backup_dir: PathBuf::from("."),
            fallback_key: FALLBACK_BACKUP_KEY.to_string(),
            user_agent: default_user_agent(),
            cleanup_delay_ms: DEFAULT_CLEANUP_DELAY_MS,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }
}

pub fn default_user_agent() -> String {
    format!("engflow-migration/{}", env!("CARGO_PKG_VERSION"))
}

impl MigrationConfig {
    /// Reads `path` when given (a missing file is an error), then applies
    /// process environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let base = match path {
            Some(path) => Self::from_toml_str(&std::fs::read_to_string(path)?)?,
            None => Self::default(),
        };

        base.with_overrides(|key| std::env::var(key).ok())
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Applies `ENGFLOW_*` overrides looked up through `lookup`.
    /// `DATABASE_URL` is accepted as a fallback for the database URL.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("ENGFLOW_DATABASE_URL").or_else(|| lookup("DATABASE_URL")) {
            self.database_url = Some(url);
        }
        if let Some(path) = lookup("ENGFLOW_LOCAL_STORE") {
            self.local_store_path = PathBuf::from(path);
        }
        if let Some(dir) = lookup("ENGFLOW_BACKUP_DIR") {
            self.backup_dir = PathBuf::from(dir);
        }
        if let Some(key) = lookup("ENGFLOW_FALLBACK_KEY") {
            self.fallback_key = key;
        }
        if let Some(agent) = lookup("ENGFLOW_USER_AGENT") {
            self.user_agent = agent;
        }
        if let Some(value) = lookup("ENGFLOW_CLEANUP_DELAY_MS") {
            self.cleanup_delay_ms = value.parse().map_err(|_| ConfigError::InvalidValue {
                key: "ENGFLOW_CLEANUP_DELAY_MS",
                value,
            })?;
        }
        if let Some(value) = lookup("ENGFLOW_INSERT_BATCH_SIZE") {
            self.insert_batch_size = match value.parse::<usize>() {
                Ok(size) if size > 0 => size,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        key: "ENGFLOW_INSERT_BATCH_SIZE",
                        value,
                    })
                }
            };
        }
        Ok(self)
    }

    pub fn backup_options(&self) -> BackupOptions {
        BackupOptions {
            fallback_key: self.fallback_key.clone(),
            user_agent: self.user_agent.clone(),
        }
    }

    pub fn rollback_options(&self) -> RollbackOptions {
        RollbackOptions {
            table_delay: Duration::from_millis(self.cleanup_delay_ms),
            backup: self.backup_options(),
        }
    }

    pub fn migration_options(&self) -> MigrationOptions {
        MigrationOptions {
            batch_size: self.insert_batch_size.max(1),
        }
    }
}
