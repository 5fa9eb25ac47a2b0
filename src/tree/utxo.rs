//! The UTXO tree: note commitments over the BabyJubJub scalar field
//!
//! A thin specialization of [`LightRollupTree`] over `Fr`. Observation is
//! keyed by zk-address: a leaf is retained when its `note.owner` (the
//! spending key's decimal encoding) is in the currently-observed set, or
//! when the caller marks it `should_track`.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;

use crate::db::{Db, Document, DocFilter, Transaction, UpsertSpec};
use crate::error::{GroveError, Result, Species};
use crate::hasher::Hasher;
use crate::value::{Fr, ValueCodec};

use super::frontier::{LightRollupTree, TreeMetadata};
use super::Leaf;

pub struct UtxoTree<H: Hasher<Fr> + ?Sized> {
    inner: LightRollupTree<Fr, H>,
    observed: RwLock<HashSet<String>>,
}

impl<H: Hasher<Fr> + ?Sized> UtxoTree<H> {
    pub fn genesis(
        depth: u32,
        hasher: Arc<H>,
        cache: Arc<crate::cache::TreeCache>,
        db: Arc<dyn Db>,
        force_update: bool,
        full_sync: bool,
        zk_addresses_to_observe: &[Fr],
    ) -> Self {
        let inner = LightRollupTree::genesis(Species::Utxo, depth, hasher, cache, db, force_update, full_sync);
        Self { inner, observed: RwLock::new(to_owner_set(zk_addresses_to_observe)) }
    }

    /// Rehydrate from a persisted `light_tree` row.
    pub fn from_row(
        depth: u32,
        metadata: TreeMetadata<Fr>,
        hasher: Arc<H>,
        cache: Arc<crate::cache::TreeCache>,
        db: Arc<dyn Db>,
        force_update: bool,
        full_sync: bool,
        zk_addresses_to_observe: &[Fr],
    ) -> Self {
        let inner = LightRollupTree::from_metadata(
            Species::Utxo, depth, metadata, hasher, cache, db, force_update, full_sync,
        );
        Self { inner, observed: RwLock::new(to_owner_set(zk_addresses_to_observe)) }
    }

    pub fn root(&self) -> Fr {
        self.inner.root()
    }

    pub fn latest_leaf_index(&self) -> u64 {
        self.inner.latest_leaf_index()
    }

    pub fn max_size(&self) -> u64 {
        self.inner.max_size()
    }

    pub fn siblings(&self) -> &[Fr] {
        self.inner.siblings()
    }

    /// Replace the observation predicate. Future appends use the new set;
    /// previously retained nodes are never discarded.
    pub async fn update_pub_keys(&self, zk_addresses: &[Fr]) {
        *self.observed.write().await = to_owner_set(zk_addresses);
    }

    async fn is_observed(&self, leaf: &Leaf<Fr>) -> bool {
        if leaf.should_track {
            return true;
        }
        let observed = self.observed.read().await;
        leaf.note
            .as_ref()
            .and_then(|n| n.owner.as_ref())
            .map(|owner| observed.contains(owner))
            .unwrap_or(false)
    }

    /// `raw_len` is the number of leaves in `leaves` that came from the
    /// caller's patch, not from zero-padding to a sub-tree boundary; only
    /// those get a row in the `utxo` table, keyed by `hash`.
    pub async fn append(&mut self, leaves: &[Leaf<Fr>], raw_len: usize, tx: &mut Transaction) -> Result<()> {
        let mut decided = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            decided.push((leaf.hash, self.is_observed(leaf).await));
        }
        let start_index = self.inner.latest_leaf_index();
        self.inner.append(&decided, tx)?;

        for (i, leaf) in leaves.iter().take(raw_len).enumerate() {
            stage_utxo_row(tx, leaf.hash, start_index + i as u64, self.inner.force_update);
        }
        Ok(())
    }

    pub async fn dry_append(&self, leaves: &[Leaf<Fr>]) -> Result<(Fr, u64)> {
        let mut decided = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            decided.push((leaf.hash, self.is_observed(leaf).await));
        }
        self.inner.dry_append(&decided)
    }

    /// Look up the committed index of `hash` and reconstruct/verify its proof.
    pub async fn merkle_proof(&self, hash: Fr) -> Result<crate::proof::MerkleProof<Fr>> {
        let mut where_ = DocFilter::new();
        where_.insert("hash".to_string(), json!(hash.encode()));
        let doc = self
            .inner
            .db()
            .find_one("utxo", &where_)
            .await?
            .ok_or(GroveError::LeafNotFound(Species::Utxo))?;

        let index = doc
            .get("index")
            .and_then(|v| v.as_u64())
            .ok_or(GroveError::LeafNotCommitted(Species::Utxo))?;

        self.inner.merkle_proof(hash, index).await
    }
}

fn to_owner_set(addresses: &[Fr]) -> HashSet<String> {
    addresses.iter().map(|a| a.encode()).collect()
}

fn stage_utxo_row(tx: &mut Transaction, hash: Fr, index: u64, force_update: bool) {
    let mut where_ = DocFilter::new();
    where_.insert("hash".to_string(), json!(hash.encode()));

    let mut doc = Document::new();
    doc.insert("hash".to_string(), json!(hash.encode()));
    doc.insert("index".to_string(), json!(index));

    if force_update {
        tx.stage_upsert(
            "utxo",
            UpsertSpec { where_, update: doc.clone(), create: doc, constraint_key: "hash".to_string() },
        );
    } else {
        tx.stage_create("utxo", doc);
    }
}
