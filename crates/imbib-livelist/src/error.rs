//! Error types for imbib-livelist

use imbib_items::StoreError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for live list operations
pub type Result<T> = std::result::Result<T, LiveListError>;

/// Main error type for the live item list
#[derive(Error, Debug)]
pub enum LiveListError {
    /// Store query or subscription failed
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// A change-set could not be applied
    #[error("Reconcile error: {0}")]
    Reconcile(#[from] ReconcileError),

    /// Preferences could not be read or written
    #[error("Preferences error: {0}")]
    Preferences(#[from] PreferencesError),

    /// Invalid engine configuration
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// The update queue worker is gone
    #[error("Engine stopped")]
    EngineStopped,
}

/// Internal-consistency errors raised while applying a change-set
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReconcileError {
    /// A change-set index does not fit the list it refers to
    #[error("{kind} index {index} out of bounds for length {len}")]
    IndexOutOfBounds {
        kind: &'static str,
        index: usize,
        len: usize,
    },

    /// The list built from a change-set does not hold the snapshot's keys
    #[error("list of length {list_len} differs from snapshot of length {snapshot_len} at index {index}")]
    SnapshotMismatch {
        index: usize,
        list_len: usize,
        snapshot_len: usize,
    },
}

/// Errors shown to the user through the observer
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemsError {
    #[error("Could not load items: {0}")]
    DataLoading(String),
}

/// Preferences persistence errors
#[derive(Error, Debug)]
pub enum PreferencesError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("No preferences directory available")]
    NoDirectory,
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Value out of valid range
    #[error("Value out of range: {0}")]
    OutOfRange(String),
}
