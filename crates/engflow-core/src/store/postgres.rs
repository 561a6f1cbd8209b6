//! [`TabularStore`] over the hosted Postgres database.
//!
//! Rows are read as `to_jsonb(t)` so the toolkit stays schema-on-read, and
//! written through `jsonb_populate_record` restricted to the columns present
//! in each record, which lets column defaults apply to everything else.
//! Table names only ever come from [`Entity`]; column names are quoted.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::Postgres;

use crate::db::DbPool;
use crate::entities::Entity;
use crate::error::{Result, StoreError};
use crate::records::{objects_only, record_id, Record};
use crate::store::remote::TabularStore;

#[derive(Clone)]
pub struct PostgresTabularStore {
    pool: DbPool,
}

impl PostgresTabularStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list(record: &Record) -> String {
    record
        .keys()
        .map(|column| quote_ident(column))
        .collect::<Vec<_>>()
        .join(", ")
}

fn into_records(rows: Vec<Value>) -> Vec<Record> {
    let (records, dropped) = objects_only(rows);
    if dropped > 0 {
        tracing::warn!(dropped, "remote rows that are not JSON objects were ignored");
    }
    records
}

#[async_trait]
impl TabularStore for PostgresTabularStore {
    async fn select_all(&self, entity: Entity) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t ORDER BY t.id",
            quote_ident(entity.table_name())
        );
        let rows = sqlx::query_scalar::<Postgres, Value>(&sql).fetch_all(&self.pool).await?;
        Ok(into_records(rows))
    }

    async fn count(&self, entity: Entity) -> Result<u64> {
        let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(entity.table_name()));
        let count = sqlx::query_scalar::<Postgres, i64>(&sql).fetch_one(&self.pool).await?;
        Ok(u64::try_from(count).unwrap_or(0))
    }

    async fn delete_all(&self, entity: Entity) -> Result<u64> {
        let sql = format!(
            "DELETE FROM {} WHERE id IS NOT NULL",
            quote_ident(entity.table_name())
        );
        let result = sqlx::query::<Postgres>(&sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, entity: Entity, records: &[Record]) -> Result<()> {
        let table = quote_ident(entity.table_name());
        let mut tx = self.pool.begin().await?;

        for record in records {
            if record_id(record).is_none() {
                return Err(StoreError::MissingId { entity });
            }
            let columns = column_list(record);
            let sql = format!(
                "INSERT INTO {table} ({columns}) \
                 SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1)"
            );
            sqlx::query::<Postgres>(&sql)
                .bind(Value::Object(record.clone()))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn update(&self, entity: Entity, record: &Record) -> Result<()> {
        let id = record_id(record).ok_or(StoreError::MissingId { entity })?;
        let table = quote_ident(entity.table_name());
        let columns = column_list(record);
        let sql = format!(
            "UPDATE {table} SET ({columns}) = \
             (SELECT {columns} FROM jsonb_populate_record(NULL::{table}, $1)) \
             WHERE id::text = $2"
        );
        let result = sqlx::query::<Postgres>(&sql)
            .bind(Value::Object(record.clone()))
            .bind(id.as_str())
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound { entity, id });
        }
        Ok(())
    }

    async fn select_not_null(&self, entity: Entity, column: &str) -> Result<Vec<Record>> {
        let sql = format!(
            "SELECT to_jsonb(t) FROM {} t WHERE t.{} IS NOT NULL ORDER BY t.id",
            quote_ident(entity.table_name()),
            quote_ident(column)
        );
        let rows = sqlx::query_scalar::<Postgres, Value>(&sql).fetch_all(&self.pool).await?;
        Ok(into_records(rows))
    }

    async fn exists(&self, entity: Entity, id: &str) -> Result<bool> {
        let sql = format!(
            "SELECT EXISTS (SELECT 1 FROM {} WHERE id::text = $1)",
            quote_ident(entity.table_name())
        );
        let found = sqlx::query_scalar::<Postgres, bool>(&sql)
            .bind(id)
            .fetch_one(&self.pool)
            .await?;
        Ok(found)
    }
}
