//! In-memory cache of retained internal nodes
//!
//! Shared among the three trees so that proof reconstruction for a retained
//! leaf does not require a database round trip for every ancestor. Values
//! are stored in their already-canonically-encoded form (`Fr` as decimal,
//! `U256` as hex) since the cache is shared across trees with different
//! value types; callers decode with their own codec.

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::json;

use crate::db::{Db, DbResult, DocFilter};
use crate::node::{leaf_node_index, parent_index, sibling_index};

/// `(tree_id, node_index) -> encoded value`.
#[derive(Default)]
pub struct TreeCache {
    nodes: RwLock<HashMap<(String, u64), String>>,
    /// `(tree_id, leaf_index) -> ancestor node_index`es retained for that leaf.
    leaf_ancestors: RwLock<HashMap<(String, u64), Vec<u64>>>,
}

impl TreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_node(&self, tree_id: &str, node_index: u64, value_encoded: String) {
        self.nodes
            .write()
            .expect("tree cache lock poisoned")
            .insert((tree_id.to_string(), node_index), value_encoded);
    }

    pub fn record_ancestors(&self, tree_id: &str, leaf_index: u64, ancestors: Vec<u64>) {
        self.leaf_ancestors
            .write()
            .expect("tree cache lock poisoned")
            .insert((tree_id.to_string(), leaf_index), ancestors);
    }

    pub fn get(&self, tree_id: &str, node_index: u64) -> Option<String> {
        self.nodes
            .read()
            .expect("tree cache lock poisoned")
            .get(&(tree_id.to_string(), node_index))
            .cloned()
    }

    /// For each of the `depth` levels on `leaf_index`'s path, return the
    /// sibling's encoded value, drawing from the cache first and falling
    /// back to `Db::find_one("tree_node", ...)`. `None` at a given level
    /// means the sibling was never retained.
    pub async fn get_cached_siblings(
        &self,
        db: &dyn Db,
        depth: u32,
        tree_id: &str,
        leaf_index: u64,
    ) -> DbResult<Vec<Option<String>>> {
        let mut out = Vec::with_capacity(depth as usize);
        let mut node_index = leaf_node_index(leaf_index, depth);

        for _ in 0..depth {
            let sib = sibling_index(node_index);
            let value = match self.get(tree_id, sib) {
                Some(v) => Some(v),
                None => {
                    let mut where_ = DocFilter::new();
                    where_.insert("tree_id".to_string(), json!(tree_id));
                    where_.insert("node_index".to_string(), json!(sib));
                    db.find_one("tree_node", &where_)
                        .await?
                        .and_then(|doc| doc.get("value").and_then(|v| v.as_str().map(String::from)))
                }
            };
            out.push(value);
            node_index = parent_index(node_index);
        }

        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryDb;

    #[tokio::test]
    async fn falls_back_to_db_when_not_cached() {
        let cache = TreeCache::new();
        let db = InMemoryDb::new();

        let mut doc = crate::db::Document::new();
        doc.insert("tree_id".to_string(), json!("utxo"));
        doc.insert("node_index".to_string(), json!(sibling_index(leaf_node_index(0, 3))));
        doc.insert("value".to_string(), json!("123"));
        db.create("tree_node", doc).await.unwrap();

        let siblings = cache.get_cached_siblings(&db, 3, "utxo", 0).await.unwrap();
        assert_eq!(siblings[0], Some("123".to_string()));
        assert_eq!(siblings[1], None);
    }

    #[tokio::test]
    async fn prefers_cache_over_db() {
        let cache = TreeCache::new();
        let db = InMemoryDb::new();
        let sib = sibling_index(leaf_node_index(0, 2));
        cache.insert_node("withdrawal", sib, "0xff".to_string());

        let siblings = cache.get_cached_siblings(&db, 2, "withdrawal", 0).await.unwrap();
        assert_eq!(siblings[0], Some("0xff".to_string()));
    }
}
