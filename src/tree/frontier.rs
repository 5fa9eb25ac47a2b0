//! `LightRollupTree`: the append-only frontier engine
//!
//! Holds only `O(depth)` state: root, next free index, and one frontier
//! sibling per level, so it never materializes the full `2^depth`-leaf
//! tree. [`crate::tree::utxo::UtxoTree`] and
//! [`crate::tree::withdrawal::WithdrawalTree`] bind it to a concrete value
//! type and observation policy.

use std::sync::Arc;

use serde_json::json;

use crate::cache::TreeCache;
use crate::db::{Db, Document, DocFilter, Transaction, UpsertSpec};
use crate::error::{GroveError, Result, Species};
use crate::hasher::Hasher;
use crate::node::ancestor_index;
use crate::value::ValueCodec;

/// Persisted `light_tree` row: `{ species, root, index, siblings, start, end }`.
pub struct TreeMetadata<T> {
    pub root: T,
    pub index: u64,
    pub siblings: Vec<T>,
    pub start: u64,
    pub end: u64,
}

pub struct LightRollupTree<T, H: Hasher<T> + ?Sized> {
    species: Species,
    depth: u32,
    hasher: Arc<H>,
    cache: Arc<TreeCache>,
    db: Arc<dyn Db>,
    pub force_update: bool,
    pub full_sync: bool,
    root: T,
    index: u64,
    siblings: Vec<T>,
}

impl<T, H> LightRollupTree<T, H>
where
    T: Copy + PartialEq + ValueCodec,
    H: Hasher<T> + ?Sized,
{
    /// A fresh genesis tree: root is the hasher's empty-tree root, frontier
    /// siblings are all pre-hashes, index is zero.
    pub fn genesis(
        species: Species,
        depth: u32,
        hasher: Arc<H>,
        cache: Arc<TreeCache>,
        db: Arc<dyn Db>,
        force_update: bool,
        full_sync: bool,
    ) -> Self {
        let siblings = (0..depth).map(|k| hasher.pre_hash(k as usize)).collect();
        let root = hasher.pre_hash(depth as usize);
        Self { species, depth, hasher, cache, db, force_update, full_sync, root, index: 0, siblings }
    }

    /// Rehydrate from a persisted `light_tree` row.
    pub fn from_metadata(
        species: Species,
        depth: u32,
        metadata: TreeMetadata<T>,
        hasher: Arc<H>,
        cache: Arc<TreeCache>,
        db: Arc<dyn Db>,
        force_update: bool,
        full_sync: bool,
    ) -> Self {
        Self {
            species,
            depth,
            hasher,
            cache,
            db,
            force_update,
            full_sync,
            root: metadata.root,
            index: metadata.index,
            siblings: metadata.siblings,
        }
    }

    pub fn species(&self) -> Species {
        self.species
    }

    pub fn root(&self) -> T {
        self.root
    }

    pub fn latest_leaf_index(&self) -> u64 {
        self.index
    }

    pub fn max_size(&self) -> u64 {
        1u64 << self.depth
    }

    pub fn depth(&self) -> u32 {
        self.depth
    }

    fn tree_id(&self) -> String {
        self.species.to_string()
    }

    /// Append `leaves` (already paired with their `track` decision) to the
    /// tree, staging every retained node into `tx`. Fails with `TreeFull` if
    /// the batch would overflow `2^depth`.
    pub fn append(&mut self, leaves: &[(T, bool)], tx: &mut Transaction) -> Result<()> {
        let capacity = self.max_size();
        if self.index + leaves.len() as u64 > capacity {
            return Err(GroveError::TreeFull {
                species: self.species,
                index: self.index,
                padded_len: leaves.len() as u64,
                capacity,
            });
        }

        let tree_id = self.tree_id();

        for &(hash, track) in leaves {
            let start_idx = self.index;
            let mut current = hash;
            let mut retained = Vec::new();

            for k in 0..self.depth as usize {
                let bit = (start_idx >> k) & 1;
                let node_idx = ancestor_index(start_idx, self.depth, k as u32);
                let sib_idx = node_idx ^ 1;

                let (parent, sibling_value) = if bit == 1 {
                    let sibling_value = self.siblings[k];
                    let parent = self.hasher.parent_of(sibling_value, current);
                    self.siblings[k] = self.hasher.pre_hash(k);
                    (parent, sibling_value)
                } else {
                    let sibling_value = self.hasher.pre_hash(k);
                    let parent = self.hasher.parent_of(current, sibling_value);
                    self.siblings[k] = current;
                    (parent, sibling_value)
                };

                if track {
                    self.cache.insert_node(&tree_id, node_idx, current.encode());
                    self.cache.insert_node(&tree_id, sib_idx, sibling_value.encode());
                    stage_node(tx, &tree_id, node_idx, current.encode());
                    stage_node(tx, &tree_id, sib_idx, sibling_value.encode());
                    retained.push(node_idx);
                }

                current = parent;
            }

            if track {
                self.cache.record_ancestors(&tree_id, start_idx, retained);
            }

            self.root = current;
            self.index += 1;
        }

        tx.stage_upsert(
            "light_tree",
            UpsertSpec {
                where_: { let mut w = DocFilter::new(); w.insert("species".into(), json!(tree_id)); w },
                update: metadata_doc(&tree_id, self.root, self.index, &self.siblings),
                create: metadata_doc(&tree_id, self.root, self.index, &self.siblings),
                constraint_key: "species".to_string(),
            },
        );

        Ok(())
    }

    /// Compute the prospective `{root, index}` for `leaves` without mutating
    /// state or touching `tx`/cache.
    pub fn dry_append(&self, leaves: &[(T, bool)]) -> Result<(T, u64)> {
        let capacity = self.max_size();
        if self.index + leaves.len() as u64 > capacity {
            return Err(GroveError::TreeFull {
                species: self.species,
                index: self.index,
                padded_len: leaves.len() as u64,
                capacity,
            });
        }

        let mut siblings = self.siblings.clone();
        let mut index = self.index;
        let mut root = self.root;

        for &(hash, _) in leaves {
            let start_idx = index;
            let mut current = hash;
            for k in 0..self.depth as usize {
                let bit = (start_idx >> k) & 1;
                current = if bit == 1 {
                    let parent = self.hasher.parent_of(siblings[k], current);
                    siblings[k] = self.hasher.pre_hash(k);
                    parent
                } else {
                    let parent = self.hasher.parent_of(current, self.hasher.pre_hash(k));
                    siblings[k] = current;
                    parent
                };
            }
            root = current;
            index += 1;
        }

        Ok((root, index))
    }

    /// Reconstruct and verify a proof for a leaf at `committed_index`, given
    /// its value. Draws ancestor siblings from cache/db; fails with
    /// `ProofUnavailable` if the path was not retained.
    pub async fn merkle_proof(
        &self,
        leaf: T,
        committed_index: u64,
    ) -> Result<crate::proof::MerkleProof<T>> {
        let tree_id = self.tree_id();
        let cached = self.cache.get_cached_siblings(self.db.as_ref(), self.depth, &tree_id, committed_index).await?;

        let mut siblings = Vec::with_capacity(self.depth as usize);
        for (k, value) in cached.into_iter().enumerate() {
            siblings.push(match value {
                Some(s) => T::decode(&s),
                None => self.hasher.pre_hash(k),
            });
        }

        let proof = crate::proof::MerkleProof { root: self.root, index: committed_index, leaf, siblings };

        if !crate::proof::verify_proof(self.hasher.as_ref(), &proof) {
            return Err(GroveError::ProofUnavailable(self.species));
        }

        Ok(proof)
    }

    pub fn db(&self) -> &Arc<dyn Db> {
        &self.db
    }

    pub fn hasher(&self) -> &H {
        &self.hasher
    }

    pub fn siblings(&self) -> &[T] {
        &self.siblings
    }
}

fn stage_node(tx: &mut Transaction, tree_id: &str, node_index: u64, value_encoded: String) {
    let mut where_ = DocFilter::new();
    where_.insert("tree_id".to_string(), json!(tree_id));
    where_.insert("node_index".to_string(), json!(node_index));

    let mut doc = Document::new();
    doc.insert("tree_id".to_string(), json!(tree_id));
    doc.insert("node_index".to_string(), json!(node_index));
    doc.insert("value".to_string(), json!(value_encoded));

    tx.stage_upsert(
        "tree_node",
        UpsertSpec {
            where_,
            update: { let mut d = Document::new(); d.insert("value".to_string(), json!(value_encoded)); d },
            create: doc,
            constraint_key: "tree_id_node_index".to_string(),
        },
    );
}

fn metadata_doc<T: ValueCodec>(species: &str, root: T, index: u64, siblings: &[T]) -> Document {
    let mut doc = Document::new();
    doc.insert("species".to_string(), json!(species));
    doc.insert("root".to_string(), json!(root.encode()));
    doc.insert("index".to_string(), json!(index));
    doc.insert(
        "siblings".to_string(),
        json!(siblings.iter().map(|s| s.encode()).collect::<Vec<_>>()),
    );
    doc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemoryDb, TransactionDb};
    use crate::hasher::DigestHasher;
    use crate::value::U256;

    fn new_tree(depth: u32) -> LightRollupTree<U256, DigestHasher<U256>> {
        let hasher = Arc::new(DigestHasher::<U256>::new(depth));
        let cache = Arc::new(TreeCache::new());
        let db: Arc<dyn Db> = Arc::new(InMemoryDb::new());
        LightRollupTree::genesis(Species::Withdrawal, depth, hasher, cache, db, false, false)
    }

    fn new_tree_with_db(depth: u32) -> (LightRollupTree<U256, DigestHasher<U256>>, InMemoryDb) {
        let hasher = Arc::new(DigestHasher::<U256>::new(depth));
        let cache = Arc::new(TreeCache::new());
        let db_impl = InMemoryDb::new();
        let db: Arc<dyn Db> = Arc::new(db_impl.clone());
        (
            LightRollupTree::genesis(Species::Withdrawal, depth, hasher, cache, db, false, false),
            db_impl,
        )
    }

    #[test]
    fn genesis_root_matches_pre_hash() {
        let tree = new_tree(4);
        assert_eq!(tree.root(), tree.hasher.pre_hash(4));
        assert_eq!(tree.latest_leaf_index(), 0);
    }

    #[test]
    fn dry_append_matches_real_append() {
        let mut tree = new_tree(4);
        let leaves = vec![(U256::from(1u64), false), (U256::from(2u64), false)];
        let (dry_root, dry_index) = tree.dry_append(&leaves).unwrap();

        let mut tx = Transaction::new();
        tree.append(&leaves, &mut tx).unwrap();

        assert_eq!(tree.root(), dry_root);
        assert_eq!(tree.latest_leaf_index(), dry_index);
    }

    #[test]
    fn overflow_is_rejected_and_state_is_unchanged() {
        let mut tree = new_tree(2); // capacity 4
        let leaves: Vec<_> = (0..4).map(|i| (U256::from(i as u64), false)).collect();
        let mut tx = Transaction::new();
        tree.append(&leaves, &mut tx).unwrap();

        let root_before = tree.root();
        let one_more = vec![(U256::from(99u64), false)];
        let err = tree.append(&one_more, &mut tx).unwrap_err();
        assert!(matches!(err, GroveError::TreeFull { .. }));
        assert_eq!(tree.root(), root_before);
    }

    #[tokio::test]
    async fn retained_leaf_proof_verifies() {
        let (mut tree, db_impl) = new_tree_with_db(4);
        let leaves = vec![(U256::from(7u64), true), (U256::from(8u64), false)];
        let mut tx = Transaction::new();
        tree.append(&leaves, &mut tx).unwrap();
        db_impl.commit(tx).await.unwrap();

        let proof = tree.merkle_proof(U256::from(7u64), 0).await.unwrap();
        assert!(crate::proof::verify_proof(tree.hasher.as_ref(), &proof));
    }

    #[tokio::test]
    async fn untracked_leaf_proof_is_unavailable() {
        let mut tree = new_tree(4);
        let leaves = vec![(U256::from(7u64), false)];
        let mut tx = Transaction::new();
        tree.append(&leaves, &mut tx).unwrap();

        let err = tree.merkle_proof(U256::from(7u64), 0).await.unwrap_err();
        assert!(matches!(err, GroveError::ProofUnavailable(_)));
    }
}
