//! The Grove: top-level coordinator over the three trees
//!
//! Owns the write lock, the shared node cache, and the persistence handle;
//! routes block-ingestion patches to the trees and serves proof queries.
//! See `lock` for why proof queries also take the write lock rather than a
//! separate lock-free read path.

use std::sync::Arc;

use serde_json::json;

use crate::bootstrap;
use crate::cache::TreeCache;
use crate::config::GroveConfig;
use crate::db::{Db, Document, DocFilter, Transaction, UpsertSpec};
use crate::error::{GroveError, Result, Species};
use crate::hasher::Hasher;
use crate::lock::WriteLock;
use crate::nullifier::NullifierTree;
use crate::proof::{starting_leaf_proof, MerkleProof};
use crate::tree::frontier::TreeMetadata;
use crate::tree::{Leaf, UtxoTree, WithdrawalTree};
use crate::value::{Fr, ValueCodec, U256};

/// A block-ingestion patch: the new leaves and nullifiers observed since the
/// last applied patch.
#[derive(Debug, Clone, Default)]
pub struct GrovePatch {
    pub header: Option<String>,
    pub utxos: Vec<Leaf<Fr>>,
    pub withdrawals: Vec<Leaf<U256>>,
    pub nullifiers: Vec<U256>,
}

/// A starting-leaf proof pair sufficient to resume a Grove at a non-zero
/// index without replaying its entire history.
pub struct BootstrapRequest {
    pub utxo_proof: MerkleProof<Fr>,
    pub withdrawal_proof: MerkleProof<U256>,
}

/// Prospective or current state of all three trees.
#[derive(Debug, Clone)]
pub struct GroveSnapshot {
    pub utxo_tree_index: u64,
    pub utxo_tree_root: Fr,
    pub withdrawal_tree_index: u64,
    pub withdrawal_tree_root: U256,
    pub nullifier_tree_root: Option<U256>,
}

struct GroveState {
    utxo: UtxoTree<dyn Hasher<Fr>>,
    withdrawal: WithdrawalTree<dyn Hasher<U256>>,
    nullifier: Option<NullifierTree<dyn Hasher<U256>>>,
}

pub struct Grove {
    config: GroveConfig,
    db: Arc<dyn Db>,
    cache: Arc<TreeCache>,
    state: WriteLock<Option<GroveState>>,
}

impl Grove {
    pub fn new(config: GroveConfig, db: Arc<dyn Db>) -> Self {
        Self { config, db, cache: Arc::new(TreeCache::new()), state: WriteLock::new(None) }
    }

    /// Load persisted metadata, or bootstrap a genesis row when absent.
    /// Idempotent: a second call on an already-initialized Grove is a no-op.
    pub async fn init(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        if guard.is_some() {
            return Ok(());
        }

        let utxo = match load_metadata::<Fr>(self.db.as_ref(), "utxo").await? {
            Some(meta) => UtxoTree::from_row(
                self.config.utxo_tree_depth,
                meta,
                self.config.utxo_hasher.clone(),
                self.cache.clone(),
                self.db.clone(),
                self.config.force_update,
                self.config.full_sync,
                &self.config.zk_addresses_to_observe,
            ),
            None => UtxoTree::genesis(
                self.config.utxo_tree_depth,
                self.config.utxo_hasher.clone(),
                self.cache.clone(),
                self.db.clone(),
                self.config.force_update,
                self.config.full_sync,
                &self.config.zk_addresses_to_observe,
            ),
        };

        let withdrawal = match load_metadata::<U256>(self.db.as_ref(), "withdrawal").await? {
            Some(meta) => WithdrawalTree::from_row(
                self.config.withdrawal_tree_depth,
                meta,
                self.config.withdrawal_hasher.clone(),
                self.cache.clone(),
                self.db.clone(),
                self.config.force_update,
                self.config.full_sync,
                &self.config.addresses_to_observe,
            ),
            None => WithdrawalTree::genesis(
                self.config.withdrawal_tree_depth,
                self.config.withdrawal_hasher.clone(),
                self.cache.clone(),
                self.db.clone(),
                self.config.force_update,
                self.config.full_sync,
                &self.config.addresses_to_observe,
            ),
        };

        let nullifier_root = load_nullifier_root(
            self.db.as_ref(),
            self.config.nullifier_tree_depth,
            self.config.nullifier_hasher.as_ref(),
        )
        .await?;
        let nullifier = NullifierTree::from_row(
            self.config.nullifier_tree_depth,
            nullifier_root,
            self.config.nullifier_hasher.clone(),
            self.db.clone(),
        );

        tracing::info!(
            target: "grove.init",
            utxo_root = %utxo.root(),
            utxo_index = utxo.latest_leaf_index(),
            withdrawal_root = %withdrawal.root(),
            withdrawal_index = withdrawal.latest_leaf_index(),
            "grove initialized"
        );

        *guard = Some(GroveState { utxo, withdrawal, nullifier: Some(nullifier) });
        Ok(())
    }

    /// Resume from a starting-leaf proof pair rather than replaying history.
    /// Both proofs must pass `starting_leaf_proof` or the call fails without
    /// mutating state.
    pub async fn apply_bootstrap(&self, request: BootstrapRequest, tx: &mut Transaction) -> Result<()> {
        let mut guard = self.state.lock().await;

        if !starting_leaf_proof(self.config.utxo_hasher.as_ref(), &request.utxo_proof) {
            return Err(GroveError::InvalidBootstrapProof(Species::Utxo));
        }
        if !starting_leaf_proof(self.config.withdrawal_hasher.as_ref(), &request.withdrawal_proof) {
            return Err(GroveError::InvalidBootstrapProof(Species::Withdrawal));
        }

        let utxo_meta = TreeMetadata {
            root: request.utxo_proof.root,
            index: request.utxo_proof.index,
            siblings: request.utxo_proof.siblings.clone(),
            start: request.utxo_proof.index,
            end: request.utxo_proof.index,
        };
        let withdrawal_meta = TreeMetadata {
            root: request.withdrawal_proof.root,
            index: request.withdrawal_proof.index,
            siblings: request.withdrawal_proof.siblings.clone(),
            start: request.withdrawal_proof.index,
            end: request.withdrawal_proof.index,
        };

        stage_metadata_row(tx, "utxo", &utxo_meta);
        stage_metadata_row(tx, "withdrawal", &withdrawal_meta);

        let utxo = UtxoTree::from_row(
            self.config.utxo_tree_depth,
            utxo_meta,
            self.config.utxo_hasher.clone(),
            self.cache.clone(),
            self.db.clone(),
            self.config.force_update,
            self.config.full_sync,
            &self.config.zk_addresses_to_observe,
        );
        let withdrawal = WithdrawalTree::from_row(
            self.config.withdrawal_tree_depth,
            withdrawal_meta,
            self.config.withdrawal_hasher.clone(),
            self.cache.clone(),
            self.db.clone(),
            self.config.force_update,
            self.config.full_sync,
            &self.config.addresses_to_observe,
        );

        let nullifier = guard
            .take()
            .and_then(|s| s.nullifier)
            .unwrap_or_else(|| {
                NullifierTree::genesis(
                    self.config.nullifier_tree_depth,
                    self.config.nullifier_hasher.clone(),
                    self.db.clone(),
                )
            });

        tracing::info!(
            target: "grove.bootstrap",
            utxo_index = utxo.latest_leaf_index(),
            withdrawal_index = withdrawal.latest_leaf_index(),
            "grove bootstrapped from starting-leaf proofs"
        );

        *guard = Some(GroveState { utxo, withdrawal, nullifier: Some(nullifier) });
        Ok(())
    }

    /// Pad, append, nullify, and (in full-sync mode) record a bootstrap row
    /// for `patch`. All writes are staged into `tx`; the caller commits.
    pub async fn apply_grove_patch(&self, patch: GrovePatch, tx: &mut Transaction) -> Result<()> {
        let mut guard = self.state.lock().await;
        let state = guard.as_mut().ok_or(GroveError::NotInitialized)?;

        let utxo_raw_len = patch.utxos.len();
        let withdrawal_raw_len = patch.withdrawals.len();
        let padded_utxos = pad_leaves(patch.utxos, self.config.utxo_sub_tree_size, Fr::ZERO);
        let padded_withdrawals = pad_leaves(patch.withdrawals, self.config.withdrawal_sub_tree_size, U256::ZERO);

        state.utxo.append(&padded_utxos, utxo_raw_len, tx).await?;
        state.withdrawal.append(&padded_withdrawals, withdrawal_raw_len, tx).await?;

        if let Some(nullifier) = state.nullifier.as_mut() {
            if !patch.nullifiers.is_empty() {
                nullifier.nullify(&patch.nullifiers, tx).await?;
            }
        }

        if self.config.full_sync {
            bootstrap::record_bootstrap(
                tx,
                patch.header.as_deref(),
                state.utxo.siblings(),
                state.withdrawal.siblings(),
            );
        }

        tracing::info!(
            target: "grove.apply_patch",
            utxo_index = state.utxo.latest_leaf_index(),
            utxo_root = %state.utxo.root(),
            withdrawal_index = state.withdrawal.latest_leaf_index(),
            withdrawal_root = %state.withdrawal.root(),
            "applied grove patch"
        );

        Ok(())
    }

    /// Prospective `{root, index}` for `patch` without mutating state.
    pub async fn dry_patch(&self, patch: &GrovePatch) -> Result<GroveSnapshot> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(GroveError::NotInitialized)?;

        let padded_utxos = pad_leaves(patch.utxos.clone(), self.config.utxo_sub_tree_size, Fr::ZERO);
        let padded_withdrawals =
            pad_leaves(patch.withdrawals.clone(), self.config.withdrawal_sub_tree_size, U256::ZERO);

        let utxo_prior_index = state.utxo.latest_leaf_index();
        let utxo_padded_len = padded_utxos.len() as u64;
        let utxo_raw_len = patch.utxos.len() as u64;
        let (utxo_tree_root, _) = state.utxo.dry_append(&padded_utxos).await?;
        let utxo_tree_index = utxo_prior_index + (utxo_padded_len - utxo_raw_len);

        let withdrawal_prior_index = state.withdrawal.latest_leaf_index();
        let withdrawal_padded_len = padded_withdrawals.len() as u64;
        let withdrawal_raw_len = patch.withdrawals.len() as u64;
        let (withdrawal_tree_root, _) = state.withdrawal.dry_append(&padded_withdrawals).await?;
        let withdrawal_tree_index = withdrawal_prior_index + (withdrawal_padded_len - withdrawal_raw_len);

        let nullifier_tree_root = match state.nullifier.as_ref() {
            Some(n) if !patch.nullifiers.is_empty() => Some(n.dry_run_nullify(&patch.nullifiers).await?),
            Some(n) => Some(n.root()),
            None => None,
        };

        Ok(GroveSnapshot {
            utxo_tree_index,
            utxo_tree_root,
            withdrawal_tree_index,
            withdrawal_tree_root,
            nullifier_tree_root,
        })
    }

    /// The current state, expressed as the dry-run result of an empty patch.
    pub async fn get_snapshot(&self) -> Result<GroveSnapshot> {
        self.dry_patch(&GrovePatch::default()).await
    }

    pub async fn utxo_merkle_proof(&self, hash: Fr) -> Result<MerkleProof<Fr>> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(GroveError::NotInitialized)?;
        let proof = state.utxo.merkle_proof(hash).await?;
        tracing::info!(target: "grove.utxo_merkle_proof", index = proof.index, root = %proof.root, "served utxo proof");
        Ok(proof)
    }

    pub async fn withdrawal_merkle_proof(&self, hash: U256, index: Option<u64>) -> Result<MerkleProof<U256>> {
        let guard = self.state.lock().await;
        let state = guard.as_ref().ok_or(GroveError::NotInitialized)?;
        let proof = state.withdrawal.merkle_proof(hash, index).await?;
        tracing::info!(target: "grove.withdrawal_merkle_proof", index = proof.index, root = %proof.root, "served withdrawal proof");
        Ok(proof)
    }
}

fn pad_leaves<T: Copy>(mut leaves: Vec<Leaf<T>>, sub_tree_size: u64, zero: T) -> Vec<Leaf<T>> {
    let remainder = leaves.len() as u64 % sub_tree_size;
    if remainder != 0 {
        for _ in 0..(sub_tree_size - remainder) {
            leaves.push(Leaf::new(zero));
        }
    }
    leaves
}

async fn load_metadata<T: ValueCodec>(db: &dyn Db, species: &str) -> Result<Option<TreeMetadata<T>>> {
    let mut where_ = DocFilter::new();
    where_.insert("species".to_string(), json!(species));

    let Some(doc) = db.find_one("light_tree", &where_).await? else {
        return Ok(None);
    };

    let root = doc
        .get("root")
        .and_then(|v| v.as_str())
        .map(T::decode)
        .ok_or_else(|| GroveError::SchemaMismatch("light_tree.root".to_string()))?;
    let index = doc
        .get("index")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| GroveError::SchemaMismatch("light_tree.index".to_string()))?;
    let siblings = doc
        .get("siblings")
        .and_then(|v| v.as_array())
        .ok_or_else(|| GroveError::SchemaMismatch("light_tree.siblings".to_string()))?
        .iter()
        .map(|v| {
            v.as_str().map(T::decode).ok_or_else(|| GroveError::SchemaMismatch("light_tree.siblings[]".to_string()))
        })
        .collect::<Result<Vec<T>>>()?;

    Ok(Some(TreeMetadata { root, index, siblings, start: 0, end: index }))
}

async fn load_nullifier_root(db: &dyn Db, depth: u32, hasher: &dyn Hasher<U256>) -> Result<U256> {
    let mut where_ = DocFilter::new();
    where_.insert("tree_id".to_string(), json!("nullifier"));
    where_.insert("level".to_string(), json!(depth));
    where_.insert("node_index".to_string(), json!(U256::ZERO.encode()));

    match db.find_one("tree_node", &where_).await? {
        Some(doc) => match doc.get("value").and_then(|v| v.as_str()) {
            Some(v) => Ok(U256::decode(v)),
            None => Ok(hasher.pre_hash(depth as usize)),
        },
        None => Ok(hasher.pre_hash(depth as usize)),
    }
}

fn stage_metadata_row<T: ValueCodec>(tx: &mut Transaction, species: &str, meta: &TreeMetadata<T>) {
    let mut doc = Document::new();
    doc.insert("species".to_string(), json!(species));
    doc.insert("root".to_string(), json!(meta.root.encode()));
    doc.insert("index".to_string(), json!(meta.index));
    doc.insert(
        "siblings".to_string(),
        json!(meta.siblings.iter().map(|s| s.encode()).collect::<Vec<_>>()),
    );

    let mut where_ = DocFilter::new();
    where_.insert("species".to_string(), json!(species));

    tx.stage_upsert(
        "light_tree",
        UpsertSpec { where_, update: doc.clone(), create: doc, constraint_key: "species".to_string() },
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryDb;
    use crate::hasher::DigestHasher;

    fn new_config(utxo_depth: u32, withdrawal_depth: u32, utxo_sub: u64, withdrawal_sub: u64) -> GroveConfig {
        GroveConfig::new(
            utxo_depth,
            withdrawal_depth,
            8,
            utxo_sub,
            withdrawal_sub,
            Arc::new(DigestHasher::<Fr>::new(utxo_depth)),
            Arc::new(DigestHasher::<U256>::new(withdrawal_depth)),
            Arc::new(DigestHasher::<U256>::new(8)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn genesis_snapshot_matches_pre_hash() {
        let config = new_config(4, 4, 1, 1);
        let db: Arc<dyn Db> = Arc::new(InMemoryDb::new());
        let grove = Grove::new(config, db);
        grove.init().await.unwrap();

        let snapshot = grove.get_snapshot().await.unwrap();
        assert_eq!(snapshot.utxo_tree_index, 0);
        assert_eq!(snapshot.utxo_tree_root, Fr::new(DigestHasher::<U256>::new(4).pre_hash(4)));
    }

    #[tokio::test]
    async fn single_leaf_append_pads_to_sub_tree_size() {
        use crate::db::TransactionDb;

        let config = new_config(5, 5, 32, 32);
        let db_impl = InMemoryDb::new();
        let db: Arc<dyn Db> = Arc::new(db_impl.clone());
        let grove = Grove::new(config, db);
        grove.init().await.unwrap();

        let patch = GrovePatch {
            utxos: vec![Leaf::new(Fr::from(1u64)).tracked()],
            ..Default::default()
        };
        let mut tx = Transaction::new();
        grove.apply_grove_patch(patch, &mut tx).await.unwrap();
        db_impl.commit(tx).await.unwrap();

        let snapshot = grove.get_snapshot().await.unwrap();
        assert_eq!(snapshot.utxo_tree_index, 32);

        let proof = grove.utxo_merkle_proof(Fr::from(1u64)).await.unwrap();
        assert_eq!(proof.index, 0);
    }

    #[tokio::test]
    async fn dry_patch_matches_post_commit_snapshot() {
        use crate::db::TransactionDb;

        let config = new_config(5, 5, 4, 4);
        let db_impl = InMemoryDb::new();
        let db: Arc<dyn Db> = Arc::new(db_impl.clone());
        let grove = Grove::new(config, db);
        grove.init().await.unwrap();

        let patch = GrovePatch { utxos: vec![Leaf::new(Fr::from(7u64))], ..Default::default() };
        let dry = grove.dry_patch(&patch).await.unwrap();

        let mut tx = Transaction::new();
        grove.apply_grove_patch(patch, &mut tx).await.unwrap();
        db_impl.commit(tx).await.unwrap();

        let real = grove.get_snapshot().await.unwrap();
        assert_eq!(dry.utxo_tree_root, real.utxo_tree_root);
    }

    #[tokio::test]
    async fn overflow_rejects_without_mutating_state() {
        let config = new_config(2, 2, 1, 1); // capacity 4
        let db: Arc<dyn Db> = Arc::new(InMemoryDb::new());
        let grove = Grove::new(config, db);
        grove.init().await.unwrap();

        let mut tx = Transaction::new();
        for i in 0..4u64 {
            let patch = GrovePatch { utxos: vec![Leaf::new(Fr::from(i))], ..Default::default() };
            grove.apply_grove_patch(patch, &mut tx).await.unwrap();
        }

        let overflow_patch = GrovePatch { utxos: vec![Leaf::new(Fr::from(99u64))], ..Default::default() };
        let err = grove.apply_grove_patch(overflow_patch, &mut tx).await.unwrap_err();
        assert!(matches!(err, GroveError::TreeFull { .. }));
    }

    #[tokio::test]
    async fn proof_query_before_init_is_not_initialized() {
        let config = new_config(4, 4, 1, 1);
        let db: Arc<dyn Db> = Arc::new(InMemoryDb::new());
        let grove = Grove::new(config, db);

        let err = grove.utxo_merkle_proof(Fr::from(1u64)).await.unwrap_err();
        assert!(matches!(err, GroveError::NotInitialized));
    }
}
