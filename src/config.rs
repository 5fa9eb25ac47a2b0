//! Configuration for the Grove
//!
//! Tree depths, sub-tree quanta, and hashers are consensus-critical: they
//! are supplied programmatically through [`GroveConfig`] and must never
//! vary silently between processes. Purely operational knobs (log
//! verbosity/format, the sqlite path backing the bundled [`crate::db::SqliteDb`])
//! load from the environment via [`GroveRuntimeConfig::from_env`], the same
//! way the rest of the ambient stack does.
//!
//! ## Recognized environment variables
//!
//! - `GROVE_LOG_LEVEL` - "trace"/"debug"/"info"/"warn"/"error" (default: "info")
//! - `GROVE_LOG_FORMAT` - "json" or "pretty" (default: "pretty")
//! - `GROVE_SQLITE_PATH` - path to the sqlite file, or ":memory:" (default: ":memory:")
//! - `GROVE_FULL_SYNC` - "0" or "1", overrides [`GroveConfig::full_sync`]'s default

use std::env;
use std::sync::Arc;

use thiserror::Error;

use crate::hasher::Hasher;
use crate::value::{Fr, U256};

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("{0} must be a positive power of two")]
    NotPowerOfTwo(&'static str),

    #[error("{0} must be positive")]
    NotPositive(&'static str),
}

/// Consensus-critical parameters for a Grove instance.
///
/// Constructed with [`GroveConfig::new`]; never loaded from the environment.
pub struct GroveConfig {
    /// Depth of the UTXO tree (max 2^depth leaves).
    pub utxo_tree_depth: u32,
    /// Depth of the withdrawal tree.
    pub withdrawal_tree_depth: u32,
    /// Depth of the nullifier sparse tree (typically 254).
    pub nullifier_tree_depth: u32,
    /// Batching quantum for UTXO appends; every patch is padded to a multiple of this.
    pub utxo_sub_tree_size: u64,
    /// Batching quantum for withdrawal appends.
    pub withdrawal_sub_tree_size: u64,
    /// Hash function over UTXO commitments.
    pub utxo_hasher: Arc<dyn Hasher<Fr>>,
    /// Hash function over withdrawal hashes.
    pub withdrawal_hasher: Arc<dyn Hasher<U256>>,
    /// Hash function over nullifier tree nodes.
    pub nullifier_hasher: Arc<dyn Hasher<U256>>,
    /// When true, `record_bootstrap` persists a bootstrap row and full node
    /// paths on every applied patch.
    pub full_sync: bool,
    /// When true, re-applying an already-seen patch does not diverge state
    /// (idempotence guards are bypassed rather than rejecting the patch).
    pub force_update: bool,
    /// zk-addresses whose UTXOs should have their Merkle paths retained.
    pub zk_addresses_to_observe: Vec<Fr>,
    /// Ethereum-style addresses whose withdrawals should have their Merkle
    /// paths retained.
    pub addresses_to_observe: Vec<U256>,
}

impl std::fmt::Debug for GroveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroveConfig")
            .field("utxo_tree_depth", &self.utxo_tree_depth)
            .field("withdrawal_tree_depth", &self.withdrawal_tree_depth)
            .field("nullifier_tree_depth", &self.nullifier_tree_depth)
            .field("utxo_sub_tree_size", &self.utxo_sub_tree_size)
            .field("withdrawal_sub_tree_size", &self.withdrawal_sub_tree_size)
            .field("full_sync", &self.full_sync)
            .field("force_update", &self.force_update)
            .field("zk_addresses_to_observe", &self.zk_addresses_to_observe)
            .field("addresses_to_observe", &self.addresses_to_observe)
            .finish_non_exhaustive()
    }
}

impl GroveConfig {
    /// Build a config, validating that depths and sub-tree sizes are sane.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        utxo_tree_depth: u32,
        withdrawal_tree_depth: u32,
        nullifier_tree_depth: u32,
        utxo_sub_tree_size: u64,
        withdrawal_sub_tree_size: u64,
        utxo_hasher: Arc<dyn Hasher<Fr>>,
        withdrawal_hasher: Arc<dyn Hasher<U256>>,
        nullifier_hasher: Arc<dyn Hasher<U256>>,
    ) -> Result<Self, ConfigError> {
        if utxo_tree_depth == 0 {
            return Err(ConfigError::NotPositive("utxo_tree_depth"));
        }
        if withdrawal_tree_depth == 0 {
            return Err(ConfigError::NotPositive("withdrawal_tree_depth"));
        }
        if nullifier_tree_depth == 0 {
            return Err(ConfigError::NotPositive("nullifier_tree_depth"));
        }
        if utxo_sub_tree_size == 0 || !utxo_sub_tree_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo("utxo_sub_tree_size"));
        }
        if withdrawal_sub_tree_size == 0 || !withdrawal_sub_tree_size.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo("withdrawal_sub_tree_size"));
        }

        Ok(Self {
            utxo_tree_depth,
            withdrawal_tree_depth,
            nullifier_tree_depth,
            utxo_sub_tree_size,
            withdrawal_sub_tree_size,
            utxo_hasher,
            withdrawal_hasher,
            nullifier_hasher,
            full_sync: false,
            force_update: false,
            zk_addresses_to_observe: Vec::new(),
            addresses_to_observe: Vec::new(),
        })
    }

    pub fn with_full_sync(mut self, full_sync: bool) -> Self {
        self.full_sync = full_sync;
        self
    }

    pub fn with_force_update(mut self, force_update: bool) -> Self {
        self.force_update = force_update;
        self
    }

    pub fn with_zk_addresses_to_observe(mut self, addrs: Vec<Fr>) -> Self {
        self.zk_addresses_to_observe = addrs;
        self
    }

    pub fn with_addresses_to_observe(mut self, addrs: Vec<U256>) -> Self {
        self.addresses_to_observe = addrs;
        self
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(ConfigError::InvalidValue(
                "GROVE_LOG_FORMAT".to_string(),
                other.to_string(),
            )),
        }
    }
}

/// Operational knobs that are safe to vary per-process via the environment.
#[derive(Debug, Clone)]
pub struct GroveRuntimeConfig {
    /// Minimum log level to emit.
    pub log_level: crate::logging::LogLevel,
    /// Log output format.
    pub log_format: LogFormat,
    /// Path to the sqlite file backing [`crate::db::SqliteDb`], or `:memory:`.
    pub sqlite_path: String,
    /// Default for `GroveConfig::full_sync` when not explicitly overridden by
    /// the caller's programmatic config.
    pub full_sync_default: bool,
}

impl GroveRuntimeConfig {
    /// Load operational configuration from `GROVE_*` environment variables,
    /// falling back to development-friendly defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let log_level = env::var("GROVE_LOG_LEVEL")
            .map(|v| crate::logging::LogLevel::from(v.as_str()))
            .unwrap_or(crate::logging::LogLevel::Info);

        let log_format = match env::var("GROVE_LOG_FORMAT") {
            Ok(v) => v.parse()?,
            Err(_) => LogFormat::Pretty,
        };

        let sqlite_path =
            env::var("GROVE_SQLITE_PATH").unwrap_or_else(|_| ":memory:".to_string());

        let full_sync_default = env::var("GROVE_FULL_SYNC")
            .map(|v| v == "1")
            .unwrap_or(false);

        Ok(Self {
            log_level,
            log_format,
            sqlite_path,
            full_sync_default,
        })
    }
}
