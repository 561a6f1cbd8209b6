//! Snapshot and restore of the local store.
//!
//! A [`BackupArtifact`] is the only durable, portable output of the toolkit
//! and the sole input to a rollback. Its JSON shape (`metadata`, `data`,
//! `checksums`, camelCase metadata fields, the eight entity names) is a
//! compatibility contract with artifacts already on disk.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::checksum::checksum_json;
use crate::config::default_user_agent;
use crate::entities::Entity;
use crate::error::BackupError;
use crate::store::local::{load_entity, save_entity, KeyValueStore};

pub const BACKUP_VERSION: &str = "1.0.0";

/// Local-store key holding a mirror of the most recent backup.
pub const FALLBACK_BACKUP_KEY: &str = "engflow_backup_latest";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupMetadata {
    pub timestamp: String,
    pub version: String,
    pub user_agent: String,
    pub total_records: u64,
    pub storage_size: u64,
    pub data_integrity: BTreeMap<Entity, u64>,
}

/// All three sections are optional so that a structurally broken artifact
/// can still be loaded, inspected and rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BackupArtifact {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<BackupMetadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<BTreeMap<Entity, Vec<Value>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksums: Option<BTreeMap<Entity, String>>,
}

impl BackupArtifact {
    /// Presence of `metadata`, `data` and `checksums`; no checksum work.
    pub fn has_required_sections(&self) -> bool {
        self.metadata.is_some() && self.data.is_some() && self.checksums.is_some()
    }

    /// Records captured for `entity`, empty when absent.
    pub fn records(&self, entity: Entity) -> &[Value] {
        self.data
            .as_ref()
            .and_then(|data| data.get(&entity))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn total_records(&self) -> u64 {
        self.data
            .as_ref()
            .map(|data| data.values().map(|records| records.len() as u64).sum())
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone)]
pub struct BackupOptions {
    pub fallback_key: String,
    pub user_agent: String,
}

impl Default for BackupOptions {
    fn default() -> Self {
        Self {
            fallback_key: FALLBACK_BACKUP_KEY.to_string(),
            user_agent: default_user_agent(),
        }
    }
}

pub struct BackupEngine<'a, S: KeyValueStore + ?Sized> {
    store: &'a S,
    options: BackupOptions,
}

impl<'a, S: KeyValueStore + ?Sized> BackupEngine<'a, S> {
    pub fn new(store: &'a S) -> Self {
        Self::with_options(store, BackupOptions::default())
    }

    pub fn with_options(store: &'a S, options: BackupOptions) -> Self {
        Self { store, options }
    }

    /// Snapshots every entity of the local store. Missing or unparseable
    /// entries are captured as empty sequences.
    pub fn create_backup(&self) -> Result<BackupArtifact, BackupError> {
        let mut data = BTreeMap::new();
        let mut checksums = BTreeMap::new();
        let mut data_integrity = BTreeMap::new();

        for entity in Entity::ALL {
            let records = load_entity(self.store, entity)?;
            checksums.insert(entity, checksum_json(&records)?);
            data_integrity.insert(entity, records.len() as u64);
            data.insert(entity, records);
        }

        let total_records: u64 = data_integrity.values().sum();
        let storage_size = self.storage_size()?;

        info!(total_records, storage_size, "backup created");

        Ok(BackupArtifact {
            metadata: Some(BackupMetadata {
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
                version: BACKUP_VERSION.to_string(),
                user_agent: self.options.user_agent.clone(),
                total_records,
                storage_size,
                data_integrity,
            }),
            data: Some(data),
            checksums: Some(checksums),
        })
    }

    /// Approximate byte size of the whole local store: key plus value length
    /// of every entry, entity or not.
    fn storage_size(&self) -> Result<u64, BackupError> {
        let mut size = 0u64;
        for key in self.store.keys()? {
            let value_len = self.store.get(&key)?.map_or(0, |value| value.len());
            size += (key.len() + value_len) as u64;
        }
        Ok(size)
    }

    /// Writes every entity of a valid artifact back into the local store,
    /// overwriting what is there. An invalid artifact is refused without
    /// touching the store. A failed write aborts the restore; entities
    /// written before it are not reverted.
    pub fn restore_from_backup(&self, artifact: &BackupArtifact) -> Result<(), BackupError> {
        if !validate_backup(artifact) {
            error!("refusing to restore from an invalid backup");
            return Err(BackupError::InvalidArtifact);
        }

        let Some(data) = artifact.data.as_ref() else {
            return Err(BackupError::InvalidArtifact);
        };

        for (entity, records) in data {
            save_entity(self.store, *entity, records).map_err(|source| {
                error!(entity = %entity, error = %source, "restore write failed");
                BackupError::Restore {
                    entity: *entity,
                    source,
                }
            })?;
            info!(entity = %entity, records = records.len(), "entity restored");
        }

        Ok(())
    }

    /// Create, validate, write to `dir`, then mirror into the fallback key.
    /// The mirror is best effort: its failure is logged and ignored.
    pub fn execute_backup(&self, dir: &Path) -> Result<(BackupArtifact, PathBuf), BackupError> {
        let artifact = self.create_backup()?;
        if !validate_backup(&artifact) {
            return Err(BackupError::InvalidArtifact);
        }

        let path = download_backup(&artifact, dir)?;

        match serde_json::to_string(&artifact) {
            Ok(serialized) => {
                if let Err(err) = self.store.set(&self.options.fallback_key, &serialized) {
                    warn!(error = %err, key = %self.options.fallback_key, "could not mirror backup into local store");
                }
            }
            Err(err) => warn!(error = %err, "could not serialize backup for the local mirror"),
        }

        info!(path = %path.display(), "backup completed");
        Ok((artifact, path))
    }

    /// The backup mirrored by the last [`execute_backup`](Self::execute_backup), if any.
    pub fn latest_mirrored_backup(&self) -> Result<Option<BackupArtifact>, BackupError> {
        match self.store.get(&self.options.fallback_key)? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

/// Full check of an artifact: required sections, per-entity checksums and
/// the total record count. Every mismatch is logged with expected and actual
/// values; the function never fails, it answers `false`.
pub fn validate_backup(artifact: &BackupArtifact) -> bool {
    let (Some(metadata), Some(data), Some(checksums)) = (
        artifact.metadata.as_ref(),
        artifact.data.as_ref(),
        artifact.checksums.as_ref(),
    ) else {
        warn!(
            has_metadata = artifact.metadata.is_some(),
            has_data = artifact.data.is_some(),
            has_checksums = artifact.checksums.is_some(),
            "backup is missing a required section"
        );
        return false;
    };

    let mut valid = true;

    for (entity, records) in data {
        let Some(expected) = checksums.get(entity) else {
            warn!(entity = %entity, "backup has no checksum for entity");
            valid = false;
            continue;
        };
        match checksum_json(records) {
            Ok(actual) if &actual == expected => {}
            Ok(actual) => {
                warn!(entity = %entity, expected = %expected, actual = %actual, "backup checksum mismatch");
                valid = false;
            }
            Err(err) => {
                warn!(entity = %entity, error = %err, "could not checksum backup records");
                valid = false;
            }
        }
    }

    let actual_total = artifact.total_records();
    if actual_total != metadata.total_records {
        warn!(
            expected = metadata.total_records,
            actual = actual_total,
            "backup total record count mismatch"
        );
        valid = false;
    }

    valid
}

/// `engflow-backup-<timestamp>.json` with `:` and `.` replaced by `-`.
pub fn backup_file_name(timestamp: &str) -> String {
    let sanitized: String = timestamp
        .chars()
        .map(|c| if c == ':' || c == '.' { '-' } else { c })
        .collect();
    format!("engflow-backup-{sanitized}.json")
}

/// Writes the artifact as pretty-printed JSON into `dir` and returns the path.
pub fn download_backup(artifact: &BackupArtifact, dir: &Path) -> Result<PathBuf, BackupError> {
    let timestamp = artifact
        .metadata
        .as_ref()
        .map(|metadata| metadata.timestamp.clone())
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true));

    fs::create_dir_all(dir)?;
    let path = dir.join(backup_file_name(&timestamp));
    let serialized = serde_json::to_string_pretty(artifact)?;
    fs::write(&path, serialized)?;
    Ok(path)
}

/// Reads an artifact previously written by [`download_backup`].
pub fn load_backup(path: &Path) -> Result<BackupArtifact, BackupError> {
    let contents = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}
