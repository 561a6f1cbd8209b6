//! Copies the local store into the remote store, parents before children.

use std::time::Instant;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::config::DEFAULT_INSERT_BATCH_SIZE;
use crate::entities::Entity;
use crate::records::{objects_only, record_id, Record};
use crate::store::local::{load_entity, KeyValueStore};
use crate::store::remote::TabularStore;

#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Records per insert call. Zero is treated as one.
    pub batch_size: usize,
}

impl Default for MigrationOptions {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MigrationStatus {
    Migrated,
    Empty,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityMigration {
    pub entity: Entity,
    pub local_records: usize,
    pub inserted_records: usize,
    pub skipped_records: usize,
    pub status: MigrationStatus,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationReport {
    pub success: bool,
    pub entities: Vec<EntityMigration>,
    pub total_inserted: usize,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
    /// Milliseconds.
    pub duration: u64,
}

pub struct MigrationRunner<'a, K: ?Sized, T: ?Sized> {
    local: &'a K,
    remote: &'a T,
    options: MigrationOptions,
}

impl<'a, K, T> MigrationRunner<'a, K, T>
where
    K: KeyValueStore + ?Sized,
    T: TabularStore + ?Sized,
{
    pub fn new(local: &'a K, remote: &'a T) -> Self {
        Self::with_options(local, remote, MigrationOptions::default())
    }

    pub fn with_options(local: &'a K, remote: &'a T, options: MigrationOptions) -> Self {
        Self {
            local,
            remote,
            options,
        }
    }

    /// Inserts every entity in dependency order. A failed batch stops that
    /// entity only; later entities are still attempted.
    pub async fn execute_migration(&self) -> MigrationReport {
        let started = Instant::now();
        let mut entities = Vec::with_capacity(Entity::ALL.len());
        let mut errors = Vec::new();
        let mut warnings = Vec::new();

        for entity in Entity::ALL {
            let outcome = self.migrate_entity(entity, &mut warnings).await;
            if let Some(message) = &outcome.error {
                errors.push(message.clone());
            }
            entities.push(outcome);
        }

        let total_inserted = entities.iter().map(|e| e.inserted_records).sum();
        let report = MigrationReport {
            success: errors.is_empty(),
            entities,
            total_inserted,
            errors,
            warnings,
            duration: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        info!(
            success = report.success,
            total_inserted = report.total_inserted,
            duration_ms = report.duration,
            "migration finished"
        );
        report
    }

    async fn migrate_entity(&self, entity: Entity, warnings: &mut Vec<String>) -> EntityMigration {
        let values = match load_entity(self.local, entity) {
            Ok(values) => values,
            Err(err) => {
                error!(entity = %entity, error = %err, "could not read local records");
                return EntityMigration {
                    entity,
                    local_records: 0,
                    inserted_records: 0,
                    skipped_records: 0,
                    status: MigrationStatus::Failed,
                    error: Some(format!("{entity}: could not read local records: {err}")),
                };
            }
        };

        let local_records = values.len();
        let (objects, dropped) = objects_only(values);
        let (records, without_id): (Vec<Record>, Vec<Record>) = objects
            .into_iter()
            .partition(|record| record_id(record).is_some());
        let skipped_records = dropped + without_id.len();
        if skipped_records > 0 {
            warn!(entity = %entity, skipped = skipped_records, "skipping records without an id");
            warnings.push(format!(
                "{entity}: {skipped_records} records without an id were skipped"
            ));
        }

        let mut migration = EntityMigration {
            entity,
            local_records,
            inserted_records: 0,
            skipped_records,
            status: MigrationStatus::Empty,
            error: None,
        };
        if records.is_empty() {
            return migration;
        }

        let batch_size = self.options.batch_size.max(1);
        for (index, batch) in records.chunks(batch_size).enumerate() {
            if let Err(err) = self.remote.insert(entity, batch).await {
                error!(entity = %entity, batch = index + 1, error = %err, "insert batch failed");
                migration.status = MigrationStatus::Failed;
                migration.error = Some(format!(
                    "{entity}: batch {} of {} records failed: {err}",
                    index + 1,
                    batch.len()
                ));
                return migration;
            }
            migration.inserted_records += batch.len();
        }

        info!(entity = %entity, inserted = migration.inserted_records, "entity migrated");
        migration.status = MigrationStatus::Migrated;
        migration
    }
}
