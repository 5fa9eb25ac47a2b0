//! Persistence layer
//!
//! A minimal document-store contract (`Db`/`TransactionDb`) plus two
//! implementations: an in-memory store for tests and a SQLite-backed store
//! for durable, crash-consistent persistence.

pub mod memory;
pub mod sqlite;
pub mod traits;

pub use memory::InMemoryDb;
pub use sqlite::SqliteDb;
pub use traits::{
    DbError, DbResult, Document, DocFilter, FindManyOptions, StagedOp, Transaction, TransactionDb,
    UpsertSpec,
};
pub use traits::Db;
