//! Database configuration
//!
//! Controls MVCC mode, WAL sizing and sync discipline, validation
//! strictness and the auto-vacuum policy.

use serde::{Deserialize, Serialize};

/// How statement validation failures are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationMode {
    /// Validation errors abort the statement (default).
    Strict,
    /// Validation findings are logged and execution continues; the
    /// executor may still fail at runtime with the same kind.
    Warnings,
    /// Validation is skipped entirely.
    Disabled,
}

impl Default for ValidationMode {
    fn default() -> Self {
        ValidationMode::Strict
    }
}

/// WAL configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalConfig {
    /// Active segment size bound in bytes; an append that would exceed it
    /// rotates to a new segment first.
    pub max_file_size: u64,
    /// Fsync the log on every transaction commit.
    pub sync_on_commit: bool,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            max_file_size: 16 * 1024 * 1024,
            sync_on_commit: true,
        }
    }
}

/// Auto-vacuum policy, checked after every transaction commit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoVacuumConfig {
    pub enabled: bool,
    /// Trigger when any chain grows past this many versions.
    pub max_chain_length: usize,
    /// Trigger after this many commits since the last vacuum.
    pub txn_interval: usize,
}

impl Default for AutoVacuumConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_chain_length: 64,
            txn_interval: 1000,
        }
    }
}

/// Top-level database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    /// When false, tables keep a single version per row and readers see
    /// every chain head unfiltered.
    pub mvcc_enabled: bool,
    pub validation_mode: ValidationMode,
    pub wal: WalConfig,
    pub auto_vacuum: AutoVacuumConfig,
    /// Run a full checkpoint when the database handle is closed.
    pub checkpoint_on_close: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            mvcc_enabled: true,
            validation_mode: ValidationMode::default(),
            wal: WalConfig::default(),
            auto_vacuum: AutoVacuumConfig::default(),
            checkpoint_on_close: true,
        }
    }
}
