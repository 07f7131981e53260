//! Relational persistence for agents, series, points, logs, and commands.
//!
//! One embedded SQLite file is the sole shared mutable state of the server
//! process. All subsystems go through [`SqliteStore`]; the schema lives in
//! `migrations/` and is applied at startup.

pub mod error;
pub mod schema;
pub mod sqlite;

pub use error::{StorageError, StorageResult};
pub use schema::{
    AgentRow, CommandRow, LogRow, NewPoint, PointRow, PointValue, SeriesRow, StoreStats, ValueKind,
};
pub use sqlite::SqliteStore;
