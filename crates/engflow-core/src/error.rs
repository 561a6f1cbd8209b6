// crates/engflow-core/src/error.rs

use thiserror::Error;

use crate::entities::Entity;

/// Failures raised by the local and remote store adapters.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database query failed: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("foreign key violation on {child}.{column} → {parent}")]
    ForeignKeyViolation {
        child: Entity,
        column: &'static str,
        parent: Entity,
    },

    #[error("record in {entity} is missing an id")]
    MissingId { entity: Entity },

    #[error("duplicate id {id} in {entity}")]
    DuplicateId { entity: Entity, id: String },

    #[error("record {id} not found in {entity}")]
    NotFound { entity: Entity, id: String },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Failures raised by the backup engine.
#[derive(Error, Debug)]
pub enum BackupError {
    #[error("backup artifact failed validation")]
    InvalidArtifact,

    #[error("failed to write {entity} to the local store: {source}")]
    Restore {
        entity: Entity,
        #[source]
        source: StoreError,
    },

    #[error("local store error: {0}")]
    Store(#[from] StoreError),

    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Configuration loading failures.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

pub type Result<T> = std::result::Result<T, StoreError>;
