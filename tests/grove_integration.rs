//! End-to-end scenarios against the public `Grove` API.

use std::sync::Arc;

use grove::db::{Db, InMemoryDb, SqliteDb, Transaction, TransactionDb};
use grove::{
    starting_leaf_proof, BootstrapRequest, DigestHasher, Fr, Grove, GroveConfig, GroveError,
    GrovePatch, Hasher, Leaf, MerkleProof, U256,
};

fn config(utxo_depth: u32, withdrawal_depth: u32, utxo_sub: u64, withdrawal_sub: u64) -> GroveConfig {
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
async fn s1_genesis() {
    let db: Arc<dyn Db> = Arc::new(InMemoryDb::new());
    let grove = Grove::new(config(31, 31, 32, 32), db);
    grove.init().await.unwrap();

    let snapshot = grove.get_snapshot().await.unwrap();
    let expected_root = Fr::new(DigestHasher::<U256>::new(31).pre_hash(31));
    assert_eq!(snapshot.utxo_tree_root, expected_root);
    assert_eq!(snapshot.utxo_tree_index, 0);
}

#[tokio::test]
async fn s2_single_leaf_append() {
    let db_impl = InMemoryDb::new();
    let db: Arc<dyn Db> = Arc::new(db_impl.clone());
    let grove = Grove::new(config(10, 10, 32, 32), db);
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
async fn s3_dry_vs_real() {
    let db_impl = InMemoryDb::new();
    let db: Arc<dyn Db> = Arc::new(db_impl.clone());
    let grove = Grove::new(config(10, 10, 8, 8), db);
    grove.init().await.unwrap();

    let patch = GrovePatch { utxos: vec![Leaf::new(Fr::from(3u64))], ..Default::default() };
    let snapshot_a = grove.dry_patch(&patch).await.unwrap();

    let mut tx = Transaction::new();
    grove.apply_grove_patch(patch, &mut tx).await.unwrap();
    db_impl.commit(tx).await.unwrap();

    let snapshot_b = grove.get_snapshot().await.unwrap();
    assert_eq!(snapshot_a.utxo_tree_root, snapshot_b.utxo_tree_root);
}

#[tokio::test]
async fn s4_overflow() {
    let db_impl = InMemoryDb::new();
    let db: Arc<dyn Db> = Arc::new(db_impl.clone());
    let grove = Grove::new(config(2, 2, 1, 1), db); // capacity 4
    grove.init().await.unwrap();

    let mut tx = Transaction::new();
    for i in 0..4u64 {
        let patch = GrovePatch { utxos: vec![Leaf::new(Fr::from(i))], ..Default::default() };
        grove.apply_grove_patch(patch, &mut tx).await.unwrap();
    }
    db_impl.commit(tx).await.unwrap();
    let before = grove.get_snapshot().await.unwrap();

    let mut tx2 = Transaction::new();
    let overflow = GrovePatch { utxos: vec![Leaf::new(Fr::from(99u64))], ..Default::default() };
    let err = grove.apply_grove_patch(overflow, &mut tx2).await.unwrap_err();
    assert!(matches!(err, GroveError::TreeFull { .. }));

    let after = grove.get_snapshot().await.unwrap();
    assert_eq!(before.utxo_tree_root, after.utxo_tree_root);
}

#[tokio::test]
async fn s5_nullifier() {
    let db_impl = InMemoryDb::new();
    let db: Arc<dyn Db> = Arc::new(db_impl.clone());
    let grove = Grove::new(config(10, 10, 8, 8), db);
    grove.init().await.unwrap();

    let k1 = U256::from(1u64);
    let k2 = U256::from(2u64);
    let k3 = U256::from(3u64);

    let mut tx = Transaction::new();
    grove
        .apply_grove_patch(GrovePatch { nullifiers: vec![k1, k2], ..Default::default() }, &mut tx)
        .await
        .unwrap();
    db_impl.commit(tx).await.unwrap();
    let after_batch = grove.get_snapshot().await.unwrap().nullifier_tree_root;

    let dry = grove.dry_patch(&GrovePatch { nullifiers: vec![k1], ..Default::default() }).await.unwrap();
    assert_eq!(dry.nullifier_tree_root, after_batch);

    let mut tx2 = Transaction::new();
    grove
        .apply_grove_patch(GrovePatch { nullifiers: vec![k1], ..Default::default() }, &mut tx2)
        .await
        .unwrap();
    db_impl.commit(tx2).await.unwrap();
    assert_eq!(grove.get_snapshot().await.unwrap().nullifier_tree_root, after_batch);

    let mut tx3 = Transaction::new();
    grove
        .apply_grove_patch(GrovePatch { nullifiers: vec![k3], ..Default::default() }, &mut tx3)
        .await
        .unwrap();
    db_impl.commit(tx3).await.unwrap();
    assert_ne!(grove.get_snapshot().await.unwrap().nullifier_tree_root, after_batch);
}

#[tokio::test]
async fn s6_bootstrap_resume() {
    let hasher = DigestHasher::<U256>::new(4);
    let siblings: Vec<U256> = (0..4).map(|k| hasher.pre_hash(k)).collect();
    let utxo_proof = MerkleProof {
        root: Fr::new(hasher.pre_hash(4)),
        index: 0,
        leaf: Fr::new(hasher.pre_hash(0)),
        siblings: siblings.iter().map(|s| Fr::new(*s)).collect(),
    };
    let withdrawal_proof =
        MerkleProof { root: hasher.pre_hash(4), index: 0, leaf: hasher.pre_hash(0), siblings: siblings.clone() };

    assert!(starting_leaf_proof(&DigestHasher::<Fr>::new(4), &utxo_proof));
    assert!(starting_leaf_proof(&hasher, &withdrawal_proof));

    let db: Arc<dyn Db> = Arc::new(InMemoryDb::new());
    let grove = Grove::new(config(4, 4, 4, 4), db);
    let mut tx = Transaction::new();
    grove.apply_bootstrap(BootstrapRequest { utxo_proof, withdrawal_proof }, &mut tx).await.unwrap();

    let snapshot = grove.get_snapshot().await.unwrap();
    assert_eq!(snapshot.utxo_tree_index, 0);
    assert_eq!(snapshot.utxo_tree_root, Fr::new(hasher.pre_hash(4)));
}

#[tokio::test]
async fn s7_crash_consistency_with_sqlite() {
    let dir = std::env::temp_dir().join("grove-integration-s7");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("grove.sqlite3");
    std::fs::remove_file(&path).ok();

    let root_before = {
        let sqlite = SqliteDb::new(&path).unwrap();
        let db: Arc<dyn Db> = Arc::new(sqlite.clone());
        let grove = Grove::new(config(8, 8, 8, 8), db);
        grove.init().await.unwrap();

        let patch = GrovePatch { utxos: vec![Leaf::new(Fr::from(11u64)).tracked()], ..Default::default() };
        let mut tx = Transaction::new();
        grove.apply_grove_patch(patch, &mut tx).await.unwrap();
        sqlite.commit(tx).await.unwrap();

        grove.get_snapshot().await.unwrap().utxo_tree_root
    };

    let reopened = SqliteDb::new(&path).unwrap();
    let db: Arc<dyn Db> = Arc::new(reopened);
    let grove = Grove::new(config(8, 8, 8, 8), db);
    grove.init().await.unwrap();
    let root_after = grove.get_snapshot().await.unwrap().utxo_tree_root;

    assert_eq!(root_before, root_after);
    std::fs::remove_dir_all(&dir).ok();
}

#[tokio::test]
async fn s8_error_taxonomy() {
    let db: Arc<dyn Db> = Arc::new(InMemoryDb::new());
    let grove = Grove::new(config(8, 8, 8, 8), db);

    let err = grove.utxo_merkle_proof(Fr::from(1u64)).await.unwrap_err();
    assert!(matches!(err, GroveError::NotInitialized));

    grove.init().await.unwrap();
    let err = grove.utxo_merkle_proof(Fr::from(999u64)).await.unwrap_err();
    assert!(matches!(err, GroveError::LeafNotFound(_)));

    let hasher = DigestHasher::<Fr>::new(8);
    let bad_proof = MerkleProof {
        root: Fr::from(1u64),
        index: 0,
        leaf: hasher.pre_hash(0),
        siblings: (0..8).map(|k| hasher.pre_hash(k)).collect(),
    };
    let wh = DigestHasher::<U256>::new(8);
    let bad_withdrawal_proof = MerkleProof {
        root: U256::from(1u64),
        index: 0,
        leaf: wh.pre_hash(0),
        siblings: (0..8).map(|k| wh.pre_hash(k)).collect(),
    };
    let mut tx = Transaction::new();
    let err = grove
        .apply_bootstrap(BootstrapRequest { utxo_proof: bad_proof, withdrawal_proof: bad_withdrawal_proof }, &mut tx)
        .await
        .unwrap_err();
    assert!(matches!(err, GroveError::InvalidBootstrapProof(_)));
}
