//! Root Error Type for the Grove
//!
//! Unifies the tree-invariant errors with the wrapped errors of the
//! collaborators the Grove depends on (storage, configuration).

use thiserror::Error;

use crate::config::ConfigError;
use crate::db::DbError;

/// Which of the three species a tree-shaped error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Species {
    Utxo,
    Withdrawal,
    Nullifier,
}

impl std::fmt::Display for Species {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Species::Utxo => write!(f, "utxo"),
            Species::Withdrawal => write!(f, "withdrawal"),
            Species::Nullifier => write!(f, "nullifier"),
        }
    }
}

/// Root error type for the Grove.
#[derive(Debug, Error)]
pub enum GroveError {
    /// A mutation or proof query was attempted before `init`/`apply_bootstrap`.
    #[error("grove is not initialized")]
    NotInitialized,

    /// `starting_leaf_proof` was rejected by the hasher during bootstrap.
    #[error("bootstrap proof for {0} tree is invalid")]
    InvalidBootstrapProof(Species),

    /// Appending would push `index` past `2^depth`.
    #[error("{species} tree is full: index {index} + {padded_len} leaves exceeds capacity {capacity}")]
    TreeFull {
        species: Species,
        index: u64,
        padded_len: u64,
        capacity: u64,
    },

    /// Proof query for a leaf that was never observed.
    #[error("leaf not found in {0} tree")]
    LeafNotFound(Species),

    /// Leaf is known but has not yet been assigned a committed index.
    #[error("leaf in {0} tree is known but not yet committed")]
    LeafNotCommitted(Species),

    /// The reconstructed proof failed `verify_proof`; ancestor nodes were
    /// most likely never retained by the observation policy.
    #[error("proof for {0} tree leaf is unavailable: ancestor nodes were not retained")]
    ProofUnavailable(Species),

    /// The backing store is missing a required table or column.
    #[error("database schema mismatch: {0}")]
    SchemaMismatch(String),

    /// A storage-layer failure.
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// Invalid runtime configuration.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

pub type Result<T> = std::result::Result<T, GroveError>;
