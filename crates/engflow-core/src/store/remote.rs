//! The remote relational store records are migrated into.

use async_trait::async_trait;

use crate::entities::Entity;
use crate::error::Result;
use crate::records::Record;

/// Per-table CRUD over the remote store.
///
/// Implementations are expected to enforce foreign keys on delete, which is
/// why callers must delete children before parents. Nothing is assumed to be
/// transactional across tables.
#[async_trait]
pub trait TabularStore: Send + Sync {
    /// Every row of the table, ordered by `id`.
    async fn select_all(&self, entity: Entity) -> Result<Vec<Record>>;

    /// Exact row count.
    async fn count(&self, entity: Entity) -> Result<u64>;

    /// Deletes every row of the table and reports how many went away.
    async fn delete_all(&self, entity: Entity) -> Result<u64>;

    async fn insert(&self, entity: Entity, records: &[Record]) -> Result<()>;

    async fn update(&self, entity: Entity, record: &Record) -> Result<()>;

    /// Rows whose `column` is not null, ordered by `id`.
    async fn select_not_null(&self, entity: Entity, column: &str) -> Result<Vec<Record>>;

    /// Whether a row with this id exists.
    async fn exists(&self, entity: Entity, id: &str) -> Result<bool>;
}
