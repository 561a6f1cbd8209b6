//! In-process [`TabularStore`] that behaves like the hosted database in the
//! ways the toolkit depends on: rows ordered by id (numerically for integer
//! ids), storage timestamps stamped on write, and foreign keys enforced on
//! insert and delete.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde_json::Value;

use crate::entities::Entity;
use crate::error::{Result, StoreError};
use crate::records::{record_id, value_as_id, Record};
use crate::store::remote::TabularStore;

type Tables = HashMap<Entity, BTreeMap<RowKey, Record>>;

/// Integer ids sort numerically and ahead of text ids.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum RowKey {
    Numeric(i64),
    Text(String),
}

impl From<&str> for RowKey {
    fn from(id: &str) -> Self {
        match id.parse::<i64>() {
            Ok(number) if number.to_string() == id => RowKey::Numeric(number),
            _ => RowKey::Text(id.to_string()),
        }
    }
}

#[derive(Debug, Default)]
pub struct MemoryTabularStore {
    tables: Mutex<Tables>,
}

impl MemoryTabularStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads rows verbatim, bypassing foreign-key checks and timestamps.
    /// Useful for reproducing a remote store that is already inconsistent.
    pub fn seed_unchecked(&self, entity: Entity, records: Vec<Record>) -> Result<()> {
        let mut tables = self.lock();
        let table = tables.entry(entity).or_default();
        for record in records {
            let id = record_id(&record).ok_or(StoreError::MissingId { entity })?;
            table.insert(RowKey::from(id.as_str()), record);
        }
        Ok(())
    }

    /// Copy of a table's rows, ordered by id.
    pub fn rows(&self, entity: Entity) -> Vec<Record> {
        self.lock()
            .get(&entity)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn now() -> Value {
    Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true))
}

fn check_references(tables: &Tables, entity: Entity, record: &Record) -> Result<()> {
    for key in entity.foreign_keys() {
        let Some(reference) = record.get(key.column).and_then(value_as_id) else {
            continue;
        };
        let parent_exists = tables
            .get(&key.parent)
            .is_some_and(|parent| parent.contains_key(&RowKey::from(reference.as_str())));
        if !parent_exists {
            return Err(StoreError::ForeignKeyViolation {
                child: key.child,
                column: key.column,
                parent: key.parent,
            });
        }
    }
    Ok(())
}

#[async_trait]
impl TabularStore for MemoryTabularStore {
    async fn select_all(&self, entity: Entity) -> Result<Vec<Record>> {
        Ok(self.rows(entity))
    }

    async fn count(&self, entity: Entity) -> Result<u64> {
        Ok(self.lock().get(&entity).map_or(0, |table| table.len() as u64))
    }

    async fn delete_all(&self, entity: Entity) -> Result<u64> {
        let mut tables = self.lock();

        if let Some(table) = tables.get(&entity) {
            for key in entity.referenced_by() {
                let still_referenced = tables.get(&key.child).is_some_and(|children| {
                    children.values().any(|child| {
                        child
                            .get(key.column)
                            .and_then(value_as_id)
                            .is_some_and(|reference| table.contains_key(&RowKey::from(reference.as_str())))
                    })
                });
                if still_referenced {
                    return Err(StoreError::ForeignKeyViolation {
                        child: key.child,
                        column: key.column,
                        parent: entity,
                    });
                }
            }
        }

        let removed = tables.remove(&entity).map_or(0, |table| table.len() as u64);
        Ok(removed)
    }

    async fn insert(&self, entity: Entity, records: &[Record]) -> Result<()> {
        let mut tables = self.lock();

        let mut staged = Vec::with_capacity(records.len());
        for record in records {
            let id = record_id(record).ok_or(StoreError::MissingId { entity })?;
            let duplicate = tables
                .get(&entity)
                .is_some_and(|table| table.contains_key(&RowKey::from(id.as_str())))
                || staged.iter().any(|(staged_id, _)| staged_id == &id);
            if duplicate {
                return Err(StoreError::DuplicateId { entity, id });
            }
            check_references(&tables, entity, record)?;

            let mut row = record.clone();
            let stamp = now();
            row.entry("created_at").or_insert_with(|| stamp.clone());
            row.entry("updated_at").or_insert(stamp);
            staged.push((id, row));
        }

        tables
            .entry(entity)
            .or_default()
            .extend(staged.into_iter().map(|(id, row)| (RowKey::from(id.as_str()), row)));
        Ok(())
    }

    async fn update(&self, entity: Entity, record: &Record) -> Result<()> {
        let mut tables = self.lock();
        let id = record_id(record).ok_or(StoreError::MissingId { entity })?;
        check_references(&tables, entity, record)?;

        let existing = tables
            .get_mut(&entity)
            .and_then(|table| table.get_mut(&RowKey::from(id.as_str())))
            .ok_or_else(|| StoreError::NotFound {
                entity,
                id: id.clone(),
            })?;

        let created_at = existing.get("created_at").cloned();
        let mut row = record.clone();
        if let Some(created_at) = created_at {
            row.insert("created_at".to_string(), created_at);
        }
        row.insert("updated_at".to_string(), now());
        *existing = row;
        Ok(())
    }

    async fn select_not_null(&self, entity: Entity, column: &str) -> Result<Vec<Record>> {
        Ok(self
            .rows(entity)
            .into_iter()
            .filter(|row| row.get(column).is_some_and(|value| !value.is_null()))
            .collect())
    }

    async fn exists(&self, entity: Entity, id: &str) -> Result<bool> {
        Ok(self
            .lock()
            .get(&entity)
            .is_some_and(|table| table.contains_key(&RowKey::from(id))))
    }
}
