pub mod local;
pub mod memory;
pub mod postgres;
pub mod remote;

pub use local::{JsonFileKeyValueStore, KeyValueStore, MemoryKeyValueStore};
pub use memory::MemoryTabularStore;
pub use postgres::PostgresTabularStore;
pub use remote::TabularStore;
