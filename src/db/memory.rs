//! In-memory `Db` implementation
//!
//! Backed by a `HashMap` behind a `tokio::sync::RwLock`. Used by the unit
//! test suite and as the reference implementation of the `Db`/`TransactionDb`
//! contract. Data is lost when the process exits.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::traits::{
    matches, DbError, DbResult, Document, DocFilter, FindManyOptions, StagedOp, Transaction,
    TransactionDb, UpsertSpec,
};
use super::Db;

type Table = Vec<Document>;
type Tables = HashMap<String, Table>;

/// In-memory document store.
#[derive(Clone, Default)]
pub struct InMemoryDb {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryDb {
    pub fn new() -> Self {
        Self::default()
    }

    fn apply(tables: &mut Tables, op: &StagedOp) -> DbResult<()> {
        match op {
            StagedOp::Create { table, doc } => {
                tables.entry(table.clone()).or_default().push(doc.clone());
            }
            StagedOp::Upsert { table, spec } => {
                upsert_in(tables.entry(table.clone()).or_default(), spec);
            }
            StagedOp::Update { table, where_, update } => {
                let rows = tables.entry(table.clone()).or_default();
                let mut found = false;
                for row in rows.iter_mut() {
                    if matches(row, where_) {
                        for (k, v) in update.iter() {
                            row.insert(k.clone(), v.clone());
                        }
                        found = true;
                    }
                }
                if !found {
                    return Err(DbError::NotFound { table: table.clone() });
                }
            }
            StagedOp::Delete { table, where_ } => {
                let rows = tables.entry(table.clone()).or_default();
                rows.retain(|row| !matches(row, where_));
            }
        }
        Ok(())
    }
}

fn upsert_in(rows: &mut Table, spec: &UpsertSpec) -> Document {
    if let Some(row) = rows.iter_mut().find(|row| matches(row, &spec.where_)) {
        for (k, v) in spec.update.iter() {
            row.insert(k.clone(), v.clone());
        }
        row.clone()
    } else {
        rows.push(spec.create.clone());
        spec.create.clone()
    }
}

#[async_trait]
impl Db for InMemoryDb {
    async fn find_one(&self, table: &str, where_: &DocFilter) -> DbResult<Option<Document>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(table)
            .and_then(|rows| rows.iter().find(|row| matches(row, where_)).cloned()))
    }

    async fn find_many(
        &self,
        table: &str,
        where_: &DocFilter,
        opts: FindManyOptions,
    ) -> DbResult<Vec<Document>> {
        let tables = self.tables.read().await;
        let mut rows: Vec<Document> = tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| matches(row, where_)).cloned().collect())
            .unwrap_or_default();

        if let Some(field) = &opts.order_by {
            rows.sort_by(|a, b| {
                a.get(field)
                    .map(|v| v.to_string())
                    .cmp(&b.get(field).map(|v| v.to_string()))
            });
        }
        if let Some(limit) = opts.limit {
            rows.truncate(limit);
        }

        Ok(rows)
    }

    async fn create(&self, table: &str, doc: Document) -> DbResult<Document> {
        let mut tables = self.tables.write().await;
        tables.entry(table.to_string()).or_default().push(doc.clone());
        Ok(doc)
    }

    async fn upsert(&self, table: &str, spec: UpsertSpec) -> DbResult<Document> {
        let mut tables = self.tables.write().await;
        Ok(upsert_in(tables.entry(table.to_string()).or_default(), &spec))
    }
}

#[async_trait]
impl TransactionDb for InMemoryDb {
    async fn commit(&self, tx: Transaction) -> DbResult<()> {
        let mut tables = self.tables.write().await;
        let mut scratch = tables.clone();
        for op in tx.ops() {
            Self::apply(&mut scratch, op)?;
        }
        *tables = scratch;
        Ok(())
    }
}
