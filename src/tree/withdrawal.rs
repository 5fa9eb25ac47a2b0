//! The withdrawal tree: withdrawal hashes over 256-bit integers
//!
//! A thin specialization of [`LightRollupTree`] over `U256`. Observation is
//! keyed by Ethereum-style address: a leaf is retained when its
//! `note.owner` (the recipient address, hex-encoded) is in the
//! currently-observed set, or when the caller marks it `should_track`.

use std::collections::HashSet;
use std::sync::Arc;

use serde_json::json;
use tokio::sync::RwLock;

use crate::db::{Db, Document, DocFilter, Transaction, UpsertSpec};
use crate::error::{GroveError, Result, Species};
use crate::hasher::Hasher;
use crate::value::{ValueCodec, U256};

use super::frontier::{LightRollupTree, TreeMetadata};
use super::Leaf;

pub struct WithdrawalTree<H: Hasher<U256> + ?Sized> {
    inner: LightRollupTree<U256, H>,
    observed: RwLock<HashSet<String>>,
}

impl<H: Hasher<U256> + ?Sized> WithdrawalTree<H> {
    pub fn genesis(
        depth: u32,
        hasher: Arc<H>,
        cache: Arc<crate::cache::TreeCache>,
        db: Arc<dyn Db>,
        force_update: bool,
        full_sync: bool,
        addresses_to_observe: &[U256],
    ) -> Self {
        let inner =
            LightRollupTree::genesis(Species::Withdrawal, depth, hasher, cache, db, force_update, full_sync);
        Self { inner, observed: RwLock::new(to_owner_set(addresses_to_observe)) }
    }

    pub fn from_row(
        depth: u32,
        metadata: TreeMetadata<U256>,
        hasher: Arc<H>,
        cache: Arc<crate::cache::TreeCache>,
        db: Arc<dyn Db>,
        force_update: bool,
        full_sync: bool,
        addresses_to_observe: &[U256],
    ) -> Self {
        let inner = LightRollupTree::from_metadata(
            Species::Withdrawal, depth, metadata, hasher, cache, db, force_update, full_sync,
        );
        Self { inner, observed: RwLock::new(to_owner_set(addresses_to_observe)) }
    }

    pub fn root(&self) -> U256 {
        self.inner.root()
    }

    pub fn latest_leaf_index(&self) -> u64 {
        self.inner.latest_leaf_index()
    }

    pub fn max_size(&self) -> u64 {
        self.inner.max_size()
    }

    pub fn siblings(&self) -> &[U256] {
        self.inner.siblings()
    }

    /// Replace the observation predicate. Future appends use the new set;
    /// previously retained nodes are never discarded.
    pub async fn update_addresses(&self, addresses: &[U256]) {
        *self.observed.write().await = to_owner_set(addresses);
    }

    async fn is_observed(&self, leaf: &Leaf<U256>) -> bool {
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
    /// those get a row in the `withdrawal` table, keyed by `withdrawal_hash`.
    pub async fn append(&mut self, leaves: &[Leaf<U256>], raw_len: usize, tx: &mut Transaction) -> Result<()> {
        let mut decided = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            decided.push((leaf.hash, self.is_observed(leaf).await));
        }
        let start_index = self.inner.latest_leaf_index();
        self.inner.append(&decided, tx)?;

        for (i, leaf) in leaves.iter().take(raw_len).enumerate() {
            stage_withdrawal_row(tx, leaf.hash, start_index + i as u64, self.inner.force_update);
        }
        Ok(())
    }

    pub async fn dry_append(&self, leaves: &[Leaf<U256>]) -> Result<(U256, u64)> {
        let mut decided = Vec::with_capacity(leaves.len());
        for leaf in leaves {
            decided.push((leaf.hash, self.is_observed(leaf).await));
        }
        self.inner.dry_append(&decided)
    }

    /// Look up the committed index of `hash`, or use `index` if already
    /// known, and reconstruct/verify its proof.
    pub async fn merkle_proof(&self, hash: U256, index: Option<u64>) -> Result<crate::proof::MerkleProof<U256>> {
        let committed_index = match index {
            Some(i) => i,
            None => {
                let mut where_ = DocFilter::new();
                where_.insert("withdrawal_hash".to_string(), json!(hash.encode()));
                let doc = self
                    .inner
                    .db()
                    .find_one("withdrawal", &where_)
                    .await?
                    .ok_or(GroveError::LeafNotFound(Species::Withdrawal))?;

                doc.get("index")
                    .and_then(|v| v.as_u64())
                    .ok_or(GroveError::LeafNotCommitted(Species::Withdrawal))?
            }
        };

        self.inner.merkle_proof(hash, committed_index).await
    }
}

fn to_owner_set(addresses: &[U256]) -> HashSet<String> {
    addresses.iter().map(|a| a.encode()).collect()
}

fn stage_withdrawal_row(tx: &mut Transaction, hash: U256, index: u64, force_update: bool) {
    let mut where_ = DocFilter::new();
    where_.insert("withdrawal_hash".to_string(), json!(hash.encode()));

    let mut doc = Document::new();
    doc.insert("withdrawal_hash".to_string(), json!(hash.encode()));
    doc.insert("index".to_string(), json!(index));

    if force_update {
        tx.stage_upsert(
            "withdrawal",
            UpsertSpec { where_, update: doc.clone(), create: doc, constraint_key: "withdrawal_hash".to_string() },
        );
    } else {
        tx.stage_create("withdrawal", doc);
    }
}
