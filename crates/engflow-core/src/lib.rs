pub mod backup;
pub mod checksum;
pub mod config;
pub mod db;
pub mod detailed_validation;
pub mod entities;
pub mod error;
pub mod integrity;
pub mod migration;
pub mod records;
pub mod rollback;
pub mod store;
