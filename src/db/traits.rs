//! The document-store contract the Grove persists through.
//!
//! This is the only external dependency of the tree engine: a minimal
//! key/value document store with `find_one`/`find_many`/`create`/`upsert`,
//! plus a staged transaction that commits a batch of writes atomically.
//! [`crate::db::memory::InMemoryDb`] and [`crate::db::sqlite::SqliteDb`] are
//! the two implementations shipped with the crate.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// A stored row: a flat JSON object.
pub type Document = serde_json::Map<String, Value>;

/// Equality filter over a document's top-level fields.
pub type DocFilter = HashMap<String, Value>;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("no document in {table} matches the given filter")]
    NotFound { table: String },

    #[error("connection error: {0}")]
    Connection(String),

    #[error("migration error: {0}")]
    Migration(String),

    #[error("query error: {0}")]
    Query(String),

    #[error("transaction error: {0}")]
    Transaction(String),
}

pub type DbResult<T> = Result<T, DbError>;

/// Optional shaping for `find_many`.
#[derive(Debug, Clone, Default)]
pub struct FindManyOptions {
    pub limit: Option<usize>,
    pub order_by: Option<String>,
}

impl FindManyOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_order_by(mut self, field: impl Into<String>) -> Self {
        self.order_by = Some(field.into());
        self
    }
}

/// An upsert: match `where_`, apply `update` if found, else insert `create`.
/// `constraint_key` names the field the backend should treat as the unique
/// constraint for conflict resolution (SQL backends use it as the basis for
/// `ON CONFLICT`; document stores without native uniqueness fall back to
/// `where_`).
#[derive(Debug, Clone)]
pub struct UpsertSpec {
    pub where_: DocFilter,
    pub update: Document,
    pub create: Document,
    pub constraint_key: String,
}

/// Read/write operations against a single logical table.
#[async_trait]
pub trait Db: Send + Sync {
    async fn find_one(&self, table: &str, where_: &DocFilter) -> DbResult<Option<Document>>;

    async fn find_many(
        &self,
        table: &str,
        where_: &DocFilter,
        opts: FindManyOptions,
    ) -> DbResult<Vec<Document>>;

    async fn create(&self, table: &str, doc: Document) -> DbResult<Document>;

    async fn upsert(&self, table: &str, spec: UpsertSpec) -> DbResult<Document>;
}

/// A write staged into a transaction, replayed at commit time.
#[derive(Debug, Clone)]
pub enum StagedOp {
    Create { table: String, doc: Document },
    Upsert { table: String, spec: UpsertSpec },
    Update { table: String, where_: DocFilter, update: Document },
    Delete { table: String, where_: DocFilter },
}

/// A batch of writes that commits atomically.
///
/// Staging (`stage_*`) is synchronous and infallible; only `commit` touches
/// the backend. This lets tree code build up a transaction inside the grove
/// write lock without awaiting between each staged write.
#[derive(Debug, Clone, Default)]
pub struct Transaction {
    ops: Vec<StagedOp>,
}

impl Transaction {
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    pub fn stage_create(&mut self, table: impl Into<String>, doc: Document) {
        self.ops.push(StagedOp::Create { table: table.into(), doc });
    }

    pub fn stage_upsert(&mut self, table: impl Into<String>, spec: UpsertSpec) {
        self.ops.push(StagedOp::Upsert { table: table.into(), spec });
    }

    pub fn stage_update(&mut self, table: impl Into<String>, where_: DocFilter, update: Document) {
        self.ops.push(StagedOp::Update { table: table.into(), where_, update });
    }

    pub fn stage_delete(&mut self, table: impl Into<String>, where_: DocFilter) {
        self.ops.push(StagedOp::Delete { table: table.into(), where_ });
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn ops(&self) -> &[StagedOp] {
        &self.ops
    }
}

/// A `Db` that can stage a batch of writes and commit them atomically.
#[async_trait]
pub trait TransactionDb: Db {
    async fn begin(&self) -> DbResult<Transaction> {
        Ok(Transaction::new())
    }

    async fn commit(&self, tx: Transaction) -> DbResult<()>;
}

pub(crate) fn matches(doc: &Document, where_: &DocFilter) -> bool {
    where_.iter().all(|(k, v)| doc.get(k) == Some(v))
}
