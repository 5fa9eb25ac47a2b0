//! The nullifier tree: a sparse bitmap of spent nullifiers
//!
//! Unlike the frontier trees, a leaf is identified directly by its `U256`
//! key rather than a sequential index. The tree is sparse, almost every
//! leaf is empty, so a node's ancestor at level `k` is simply `key >> k`;
//! keys are assumed to fit within `2^depth`, so every key's path converges
//! on the same node at level `depth`, the root.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use crate::db::{Db, Document, DocFilter, Transaction, UpsertSpec};
use crate::error::Result;
use crate::hasher::Hasher;
use crate::value::{ValueCodec, U256};

const TREE_ID: &str = "nullifier";

pub struct NullifierTree<H: Hasher<U256> + ?Sized> {
    depth: u32,
    hasher: Arc<H>,
    db: Arc<dyn Db>,
    root: U256,
}

impl<H: Hasher<U256> + ?Sized> NullifierTree<H> {
    pub fn genesis(depth: u32, hasher: Arc<H>, db: Arc<dyn Db>) -> Self {
        let root = hasher.pre_hash(depth as usize);
        Self { depth, hasher, db, root }
    }

    pub fn from_row(depth: u32, root: U256, hasher: Arc<H>, db: Arc<dyn Db>) -> Self {
        Self { depth, hasher, db, root }
    }

    pub fn root(&self) -> U256 {
        self.root
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    async fn lookup(&self, overlay: &HashMap<(u32, U256), U256>, level: u32, node_key: U256) -> Result<U256> {
        if let Some(v) = overlay.get(&(level, node_key)) {
            return Ok(*v);
        }

        let mut where_ = DocFilter::new();
        where_.insert("tree_id".to_string(), json!(TREE_ID));
        where_.insert("level".to_string(), json!(level));
        where_.insert("node_index".to_string(), json!(node_key.encode()));

        if let Some(doc) = self.db.find_one("tree_node", &where_).await? {
            if let Some(v) = doc.get("value").and_then(|v| v.as_str()) {
                return Ok(U256::decode(v));
            }
        }

        Ok(self.hasher.pre_hash(level as usize))
    }

    /// One bottom-up fold of `key`'s path against `overlay`, marking the
    /// leaf nullified. Returns `None` if `key` was already set (no-op).
    async fn fold(&self, key: U256, overlay: &mut HashMap<(u32, U256), U256>) -> Result<Option<U256>> {
        let one = U256::from(1u64);
        if self.lookup(overlay, 0, key).await? == one {
            return Ok(None);
        }

        let mut current = one;
        let mut node_key = key;
        overlay.insert((0, node_key), current);

        for level in 0..self.depth {
            let sibling_key = node_key ^ one;
            let sibling = self.lookup(overlay, level, sibling_key).await?;
            let is_right_child = (node_key & one) == one;

            current = if is_right_child {
                self.hasher.parent_of(sibling, current)
            } else {
                self.hasher.parent_of(current, sibling)
            };
            node_key >>= 1;
            overlay.insert((level + 1, node_key), current);
        }

        Ok(Some(current))
    }

    /// Sort, dedup, and fold `keys` into the tree, staging every visited
    /// node into `tx`. Keys already nullified are skipped; the call never
    /// fails on a repeat.
    pub async fn nullify(&mut self, keys: &[U256], tx: &mut Transaction) -> Result<()> {
        let mut sorted: Vec<U256> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut overlay: HashMap<(u32, U256), U256> = HashMap::new();
        for key in sorted {
            if let Some(new_root) = self.fold(key, &mut overlay).await? {
                self.root = new_root;
            }
        }

        for ((level, node_key), value) in overlay {
            stage_nullifier_node(tx, level, node_key, value.encode());
        }

        Ok(())
    }

    /// Compute the prospective root for `keys` without mutating state or
    /// touching `tx`.
    pub async fn dry_run_nullify(&self, keys: &[U256]) -> Result<U256> {
        let mut sorted: Vec<U256> = keys.to_vec();
        sorted.sort();
        sorted.dedup();

        let mut overlay: HashMap<(u32, U256), U256> = HashMap::new();
        let mut root = self.root;
        for key in sorted {
            if let Some(new_root) = self.fold(key, &mut overlay).await? {
                root = new_root;
            }
        }
        Ok(root)
    }
}

fn stage_nullifier_node(tx: &mut Transaction, level: u32, node_key: U256, value_encoded: String) {
    let mut where_ = DocFilter::new();
    where_.insert("tree_id".to_string(), json!(TREE_ID));
    where_.insert("level".to_string(), json!(level));
    where_.insert("node_index".to_string(), json!(node_key.encode()));

    let mut doc = Document::new();
    doc.insert("tree_id".to_string(), json!(TREE_ID));
    doc.insert("level".to_string(), json!(level));
    doc.insert("node_index".to_string(), json!(node_key.encode()));
    doc.insert("value".to_string(), json!(value_encoded));

    tx.stage_upsert(
        "tree_node",
        UpsertSpec {
            where_,
            update: { let mut d = Document::new(); d.insert("value".to_string(), json!(value_encoded)); d },
            create: doc,
            constraint_key: "tree_id_level_node_index".to_string(),
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryDb, TransactionDb};
    use crate::hasher::DigestHasher;

    fn new_tree(depth: u32) -> (NullifierTree<DigestHasher<U256>>, InMemoryDb) {
        let hasher = Arc::new(DigestHasher::<U256>::new(depth));
        let db_impl = InMemoryDb::new();
        let db: Arc<dyn Db> = Arc::new(db_impl.clone());
        (NullifierTree::genesis(depth, hasher, db), db_impl)
    }

    #[tokio::test]
    async fn genesis_root_matches_pre_hash() {
        let (tree, _db) = new_tree(8);
        assert_eq!(tree.root(), DigestHasher::<U256>::new(8).pre_hash(8));
    }

    #[tokio::test]
    async fn dry_run_does_not_mutate_state() {
        let (tree, _db) = new_tree(8);
        let root_before = tree.root();
        let key = U256::from(5u64);
        let dry_root = tree.dry_run_nullify(&[key]).await.unwrap();
        assert_ne!(dry_root, root_before);
        assert_eq!(tree.root(), root_before);
    }

    #[tokio::test]
    async fn nullify_is_idempotent() {
        let (mut tree, db_impl) = new_tree(8);
        let k1 = U256::from(5u64);
        let k2 = U256::from(9u64);

        let mut tx = Transaction::new();
        tree.nullify(&[k1, k2], &mut tx).await.unwrap();
        db_impl.commit(tx).await.unwrap();
        let root_after_first = tree.root();

        let mut tx2 = Transaction::new();
        tree.nullify(&[k1], &mut tx2).await.unwrap();
        db_impl.commit(tx2).await.unwrap();
        assert_eq!(tree.root(), root_after_first);

        let mut tx3 = Transaction::new();
        let k3 = U256::from(42u64);
        tree.nullify(&[k3], &mut tx3).await.unwrap();
        db_impl.commit(tx3).await.unwrap();
        assert_ne!(tree.root(), root_after_first);
    }
}
