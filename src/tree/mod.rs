//! The append-only tree forest
//!
//! [`frontier::LightRollupTree`] is the abstract frontier engine; [`utxo`]
//! and [`withdrawal`] are thin specializations binding it to `Fr` and
//! `U256` respectively, each with their own observation policy.

pub mod frontier;
pub mod utxo;
pub mod withdrawal;

pub use frontier::LightRollupTree;
pub use utxo::UtxoTree;
pub use withdrawal::WithdrawalTree;

/// A leaf submitted for append. `note` carries enough plaintext to decide
/// observation; `should_track` forces retention regardless of policy (used
/// by the owning wallet for its own self-minted leaves).
#[derive(Debug, Clone, Default)]
pub struct Leaf<T> {
    pub hash: T,
    pub note: Option<Note>,
    pub should_track: bool,
}

impl<T> Leaf<T> {
    pub fn new(hash: T) -> Self {
        Self { hash, note: None, should_track: false }
    }

    pub fn with_note(mut self, note: Note) -> Self {
        self.note = Some(note);
        self
    }

    pub fn tracked(mut self) -> Self {
        self.should_track = true;
        self
    }
}

/// Plaintext owner hint used by a tree's observation predicate: a zk-address
/// (decimal `Fr`) for the UTXO tree, or an Ethereum-style address (hex
/// `U256`) for the withdrawal tree.
#[derive(Debug, Clone, Default)]
pub struct Note {
    pub owner: Option<String>,
}

impl Note {
    pub fn with_owner(owner: impl Into<String>) -> Self {
        Self { owner: Some(owner.into()) }
    }
}
