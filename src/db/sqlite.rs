//! SQLite-backed `Db` implementation
//!
//! Connection-pooled via `r2d2`, durable across restarts. Transactions are
//! real SQLite transactions (`BEGIN IMMEDIATE` / `COMMIT`) so that a crash
//! mid-commit leaves the tree at its previous committed state, satisfying
//! the crash-consistency property the frontier engine depends on.
//!
//! Each logical table (`light_tree`, `tree_node`, `utxo`, `withdrawal`,
//! `bootstrap`, `block`) is stored as a generic `(id, doc)` table, `doc`
//! holding the row serialized as JSON. This keeps the backend honest to the
//! minimal document-store contract in `db::traits` while giving real
//! on-disk persistence and transactions.

use std::path::Path;

use async_trait::async_trait;
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, TransactionBehavior};

use super::traits::{
    matches, DbError, DbResult, Document, DocFilter, FindManyOptions, StagedOp, Transaction,
    TransactionDb, UpsertSpec,
};
use super::Db;

/// Tables the Grove's schema recognizes; migrations create exactly these.
pub const TABLES: &[&str] = &["light_tree", "tree_node", "utxo", "withdrawal", "bootstrap", "block"];

#[derive(Clone)]
pub struct SqliteDb {
    pool: Pool<SqliteConnectionManager>,
}

impl SqliteDb {
    pub fn new<P: AsRef<Path>>(db_path: P) -> DbResult<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }

        let manager = SqliteConnectionManager::file(db_path);
        let pool = Pool::builder()
            .max_size(10)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations()?;
        Ok(db)
    }

    pub fn in_memory() -> DbResult<Self> {
        let manager = SqliteConnectionManager::memory();
        let pool = Pool::builder()
            .max_size(1)
            .build(manager)
            .map_err(|e| DbError::Connection(e.to_string()))?;

        let db = Self { pool };
        db.run_migrations()?;
        Ok(db)
    }

    fn conn(&self) -> DbResult<PooledConnection<SqliteConnectionManager>> {
        self.pool.get().map_err(|e| DbError::Connection(e.to_string()))
    }

    fn run_migrations(&self) -> DbResult<()> {
        let conn = self.conn()?;
        for table in TABLES {
            conn.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {table} (id INTEGER PRIMARY KEY AUTOINCREMENT, doc TEXT NOT NULL)"
                ),
                [],
            )
            .map_err(|e| DbError::Migration(e.to_string()))?;
        }
        Ok(())
    }

    fn load_all(conn: &Connection, table: &str) -> DbResult<Vec<(i64, Document)>> {
        let mut stmt = conn
            .prepare(&format!("SELECT id, doc FROM {table}"))
            .map_err(|e| DbError::Query(e.to_string()))?;

        let rows = stmt
            .query_map([], |row| {
                let id: i64 = row.get(0)?;
                let raw: String = row.get(1)?;
                Ok((id, raw))
            })
            .map_err(|e| DbError::Query(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows {
            let (id, raw) = row.map_err(|e| DbError::Query(e.to_string()))?;
            let doc: Document = serde_json::from_str(&raw).map_err(|e| DbError::Query(e.to_string()))?;
            out.push((id, doc));
        }
        Ok(out)
    }

    fn find_matching(conn: &Connection, table: &str, where_: &DocFilter) -> DbResult<Vec<(i64, Document)>> {
        Ok(Self::load_all(conn, table)?
            .into_iter()
            .filter(|(_, doc)| matches(doc, where_))
            .collect())
    }

    fn insert_doc(conn: &Connection, table: &str, doc: &Document) -> DbResult<()> {
        let raw = serde_json::to_string(doc).map_err(|e| DbError::Query(e.to_string()))?;
        conn.execute(&format!("INSERT INTO {table} (doc) VALUES (?1)"), params![raw])
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(())
    }

    fn update_doc(conn: &Connection, table: &str, id: i64, doc: &Document) -> DbResult<()> {
        let raw = serde_json::to_string(doc).map_err(|e| DbError::Query(e.to_string()))?;
        conn.execute(&format!("UPDATE {table} SET doc = ?1 WHERE id = ?2"), params![raw, id])
            .map_err(|e| DbError::Query(e.to_string()))?;
        Ok(())
    }

    fn apply_op(conn: &Connection, op: &StagedOp) -> DbResult<()> {
        match op {
            StagedOp::Create { table, doc } => Self::insert_doc(conn, table, doc),
            StagedOp::Upsert { table, spec } => {
                let existing = Self::find_matching(conn, table, &spec.where_)?;
                if let Some((id, mut doc)) = existing.into_iter().next() {
                    for (k, v) in spec.update.iter() {
                        doc.insert(k.clone(), v.clone());
                    }
                    Self::update_doc(conn, table, id, &doc)
                } else {
                    Self::insert_doc(conn, table, &spec.create)
                }
            }
            StagedOp::Update { table, where_, update } => {
                let existing = Self::find_matching(conn, table, where_)?;
                if existing.is_empty() {
                    return Err(DbError::NotFound { table: table.clone() });
                }
                for (id, mut doc) in existing {
                    for (k, v) in update.iter() {
                        doc.insert(k.clone(), v.clone());
                    }
                    Self::update_doc(conn, table, id, &doc)?;
                }
                Ok(())
            }
            StagedOp::Delete { table, where_ } => {
                for (id, _) in Self::find_matching(conn, table, where_)? {
                    conn.execute(&format!("DELETE FROM {table} WHERE id = ?1"), params![id])
                        .map_err(|e| DbError::Query(e.to_string()))?;
                }
                Ok(())
            }
        }
    }
}

#[async_trait]
impl Db for SqliteDb {
    async fn find_one(&self, table: &str, where_: &DocFilter) -> DbResult<Option<Document>> {
        let conn = self.conn()?;
        Ok(Self::find_matching(&conn, table, where_)?.into_iter().next().map(|(_, d)| d))
    }

    async fn find_many(&self, table: &str, where_: &DocFilter, opts: FindManyOptions) -> DbResult<Vec<Document>> {
        let conn = self.conn()?;
        let mut rows: Vec<Document> = Self::find_matching(&conn, table, where_)?
            .into_iter()
            .map(|(_, d)| d)
            .collect();

        if let Some(field) = &opts.order_by {
            rows.sort_by(|a, b| {
                a.get(field).map(|v| v.to_string()).cmp(&b.get(field).map(|v| v.to_string()))
            });
        }
        if let Some(limit) = opts.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn create(&self, table: &str, doc: Document) -> DbResult<Document> {
        let conn = self.conn()?;
        Self::insert_doc(&conn, table, &doc)?;
        Ok(doc)
    }

    async fn upsert(&self, table: &str, spec: UpsertSpec) -> DbResult<Document> {
        let conn = self.conn()?;
        let existing = Self::find_matching(&conn, table, &spec.where_)?;
        if let Some((id, mut doc)) = existing.into_iter().next() {
            for (k, v) in spec.update.iter() {
                doc.insert(k.clone(), v.clone());
            }
            Self::update_doc(&conn, table, id, &doc)?;
            Ok(doc)
        } else {
            Self::insert_doc(&conn, table, &spec.create)?;
            Ok(spec.create)
        }
    }
}

#[async_trait]
impl TransactionDb for SqliteDb {
    async fn commit(&self, tx: Transaction) -> DbResult<()> {
        if tx.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn()?;
        let sql_tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| DbError::Transaction(e.to_string()))?;

        for op in tx.ops() {
            Self::apply_op(&sql_tx, op)?;
        }

        sql_tx.commit().map_err(|e| DbError::Transaction(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(pairs: &[(&str, serde_json::Value)]) -> Document {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[tokio::test]
    async fn create_and_find_one() {
        let db = SqliteDb::in_memory().unwrap();
        db.create("utxo", doc(&[("hash", json!("1")), ("index", json!(0))]))
            .await
            .unwrap();

        let mut where_ = DocFilter::new();
        where_.insert("hash".to_string(), json!("1"));
        let found = db.find_one("utxo", &where_).await.unwrap().unwrap();
        assert_eq!(found.get("index"), Some(&json!(0)));
    }

    #[tokio::test]
    async fn transaction_is_durable_across_reopen() {
        let dir = std::env::temp_dir().join(format!("grove-sqlite-test-{:p}", &db_marker()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("grove.sqlite3");

        {
            let db = SqliteDb::new(&path).unwrap();
            let mut tx = db.begin().await.unwrap();
            tx.stage_create("block", doc(&[("hash", json!("0xabc"))]));
            db.commit(tx).await.unwrap();
        }

        let db = SqliteDb::new(&path).unwrap();
        let rows = db
            .find_many("block", &DocFilter::new(), FindManyOptions::default())
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);

        std::fs::remove_dir_all(&dir).ok();
    }

    fn db_marker() -> u8 {
        0
    }

    #[tokio::test]
    async fn failed_transaction_does_not_commit_partial_writes() {
        let db = SqliteDb::in_memory().unwrap();
        let mut tx = db.begin().await.unwrap();
        tx.stage_create("block", doc(&[("hash", json!("0x1"))]));
        tx.stage_update("light_tree", DocFilter::new(), doc(&[("root", json!("x"))]));
        assert!(db.commit(tx).await.is_err());

        let rows = db
            .find_many("block", &DocFilter::new(), FindManyOptions::default())
            .await
            .unwrap();
        assert!(rows.is_empty(), "create staged before the failing op must not be committed");
    }
}
