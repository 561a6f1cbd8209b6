#![allow(dead_code)]

use std::collections::HashSet;
use std::sync::Mutex;

use anyhow::Result;
use async_trait::async_trait;
use engflow_core::{
    entities::Entity,
    error::{Result as StoreResult, StoreError},
    migration::MigrationRunner,
    records::Record,
    store::{KeyValueStore, MemoryKeyValueStore, MemoryTabularStore, TabularStore},
};
use serde_json::{json, Value};

/// A small construction company: two clients, one project and one record in
/// every dependent entity. Nine records in total.
pub fn fixture_entities() -> Vec<(Entity, Value)> {
    vec![
        (
            Entity::Clientes,
            json!([
                {"id": "cli-1", "nome": "Construtora Alfa", "email": "contato@alfa.com.br"},
                {"id": "cli-2", "nome": "Beta Engenharia", "email": null}
            ]),
        ),
        (Entity::Setores, json!([{"id": "set-1", "nome": "Campo"}])),
        (
            Entity::Funcoes,
            json!([{"id": "fun-1", "nome": "Mestre de obras", "setor_id": "set-1"}]),
        ),
        (
            Entity::Funcionarios,
            json!([{"id": "func-1", "nome": "Ana Souza", "funcao_id": "fun-1"}]),
        ),
        (
            Entity::Obras,
            json!([{"id": "obr-1", "nome": "Edifício Central", "cliente_id": "cli-1"}]),
        ),
        (
            Entity::Despesas,
            json!([{
                "id": "desp-1",
                "descricao": "Cimento",
                "valor": 1500.5,
                "data": "2024-03-15",
                "obra_id": "obr-1",
                "cliente_id": "cli-1"
            }]),
        ),
        (
            Entity::Videos,
            json!([{"id": "vid-1", "titulo": "Fundação", "obra_id": "obr-1"}]),
        ),
        (
            Entity::Requisicoes,
            json!([{
                "id": "req-1",
                "descricao": "Areia média",
                "obra_id": "obr-1",
                "funcionario_id": "func-1"
            }]),
        ),
    ]
}

pub const FIXTURE_RECORDS: u64 = 9;

pub fn record(value: Value) -> Record {
    match value {
        Value::Object(record) => record,
        other => panic!("expected a JSON object, got {other}"),
    }
}

pub fn records(value: Value) -> Vec<Record> {
    match value {
        Value::Array(values) => values.into_iter().map(record).collect(),
        other => panic!("expected a JSON array, got {other}"),
    }
}

pub fn local_with(entries: &[(Entity, Value)]) -> MemoryKeyValueStore {
    MemoryKeyValueStore::from_entries(
        entries
            .iter()
            .map(|(entity, value)| (entity.storage_key(), value.to_string())),
    )
}

pub fn seeded_local() -> MemoryKeyValueStore {
    local_with(&fixture_entities())
}

/// Remote store populated from `local` through the migration runner.
pub async fn migrated_remote<K: KeyValueStore + ?Sized>(local: &K) -> Result<MemoryTabularStore> {
    let remote = MemoryTabularStore::new();
    let report = MigrationRunner::new(local, &remote).execute_migration().await;
    anyhow::ensure!(report.success, "fixture migration failed: {:?}", report.errors);
    Ok(remote)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    SelectAll,
    Count,
    DeleteAll,
    Insert,
    Update,
    SelectNotNull,
    Exists,
}

/// Wraps a [`TabularStore`], logging every call and failing the ones it is
/// told to.
pub struct RecordingStore<S> {
    inner: S,
    failures: HashSet<(Op, Entity)>,
    calls: Mutex<Vec<(Op, Entity)>>,
}

impl<S: TabularStore> RecordingStore<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            failures: HashSet::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(mut self, op: Op, entity: Entity) -> Self {
        self.failures.insert((op, entity));
        self
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn calls(&self) -> Vec<(Op, Entity)> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_of(&self, op: Op) -> Vec<Entity> {
        self.calls()
            .into_iter()
            .filter(|(call, _)| *call == op)
            .map(|(_, entity)| entity)
            .collect()
    }

    fn enter(&self, op: Op, entity: Entity) -> StoreResult<()> {
        self.calls.lock().expect("calls lock").push((op, entity));
        if self.failures.contains(&(op, entity)) {
            return Err(StoreError::Unavailable(format!(
                "injected {op:?} failure on {entity}"
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl<S: TabularStore> TabularStore for RecordingStore<S> {
    async fn select_all(&self, entity: Entity) -> StoreResult<Vec<Record>> {
        self.enter(Op::SelectAll, entity)?;
        self.inner.select_all(entity).await
    }

    async fn count(&self, entity: Entity) -> StoreResult<u64> {
        self.enter(Op::Count, entity)?;
        self.inner.count(entity).await
    }

    async fn delete_all(&self, entity: Entity) -> StoreResult<u64> {
        self.enter(Op::DeleteAll, entity)?;
        self.inner.delete_all(entity).await
    }

    async fn insert(&self, entity: Entity, records: &[Record]) -> StoreResult<()> {
        self.enter(Op::Insert, entity)?;
        self.inner.insert(entity, records).await
    }

    async fn update(&self, entity: Entity, record: &Record) -> StoreResult<()> {
        self.enter(Op::Update, entity)?;
        self.inner.update(entity, record).await
    }

    async fn select_not_null(&self, entity: Entity, column: &str) -> StoreResult<Vec<Record>> {
        self.enter(Op::SelectNotNull, entity)?;
        self.inner.select_not_null(entity, column).await
    }

    async fn exists(&self, entity: Entity, id: &str) -> StoreResult<bool> {
        self.enter(Op::Exists, entity)?;
        self.inner.exists(entity, id).await
    }
}

/// Local store whose reads or selected writes fail, or whose selected writes
/// are accepted but stored as an empty sequence.
#[derive(Default)]
pub struct FailingKeyValueStore {
    pub inner: MemoryKeyValueStore,
    fail_reads: bool,
    fail_writes: HashSet<String>,
    emptied_writes: HashSet<String>,
}

impl FailingKeyValueStore {
    pub fn new(inner: MemoryKeyValueStore) -> Self {
        Self {
            inner,
            ..Self::default()
        }
    }

    pub fn failing_reads(mut self) -> Self {
        self.fail_reads = true;
        self
    }

    pub fn failing_writes_to(mut self, key: &str) -> Self {
        self.fail_writes.insert(key.to_string());
        self
    }

    pub fn emptying_writes_to(mut self, key: &str) -> Self {
        self.emptied_writes.insert(key.to_string());
        self
    }
}

impl KeyValueStore for FailingKeyValueStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        if self.fail_reads {
            return Err(StoreError::Unavailable(format!("injected read failure on {key}")));
        }
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        if self.fail_writes.contains(key) {
            return Err(StoreError::Unavailable(format!("injected write failure on {key}")));
        }
        if self.emptied_writes.contains(key) {
            return self.inner.set(key, "[]");
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.inner.remove(key)
    }

    fn keys(&self) -> StoreResult<Vec<String>> {
        self.inner.keys()
    }

    fn clear(&self) -> StoreResult<()> {
        self.inner.clear()
    }
}
