//! Merkle inclusion proofs
//!
//! A `MerkleProof<T>` is a plain value object; verification is a pure
//! function of the proof and a [`crate::hasher::Hasher`], independent of any
//! tree or storage state.

use serde::{Deserialize, Serialize};

use crate::hasher::Hasher;

/// `{root, index, leaf, siblings[D]}`, sufficient to reconstruct and verify
/// a single leaf's path to the root.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MerkleProof<T> {
    pub root: T,
    pub index: u64,
    pub leaf: T,
    pub siblings: Vec<T>,
}

/// Fold `proof.leaf` up through `proof.siblings.len()` levels, selecting
/// left/right at level `k` by bit `k` of `proof.index`, and compare the
/// result against `proof.root`.
pub fn verify_proof<T: Copy + PartialEq, H: Hasher<T> + ?Sized>(hasher: &H, proof: &MerkleProof<T>) -> bool {
    let mut node = proof.leaf;
    for (k, &sibling) in proof.siblings.iter().enumerate() {
        let bit = (proof.index >> k) & 1;
        node = if bit == 0 {
            hasher.parent_of(node, sibling)
        } else {
            hasher.parent_of(sibling, node)
        };
    }
    node == proof.root
}

/// A "starting leaf proof": in addition to `verify_proof` holding, every
/// sibling at a level `k` where bit `k` of `index` is 0 must equal
/// `hasher.pre_hash(k)`, i.e. every subtree to the right of `index` is
/// still empty. Used to bootstrap a Grove from a snapshot at a non-zero
/// index without replaying every prior leaf.
pub fn starting_leaf_proof<T: Copy + PartialEq, H: Hasher<T> + ?Sized>(hasher: &H, proof: &MerkleProof<T>) -> bool {
    if !verify_proof(hasher, proof) {
        return false;
    }
    for (k, &sibling) in proof.siblings.iter().enumerate() {
        let bit = (proof.index >> k) & 1;
        if bit == 0 && sibling != hasher.pre_hash(k) {
            return false;
        }
    }
    true
}
