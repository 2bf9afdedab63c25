//! Error types for BlockVault
//!
//! Provides a unified error type for all operations.

use thiserror::Error;

/// Result type alias using VaultError
pub type Result<T> = std::result::Result<T, VaultError>;

/// Unified error type for BlockVault operations
#[derive(Debug, Error)]
pub enum VaultError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Blob Errors
    // -------------------------------------------------------------------------
    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Capacity exceeded: requested {requested} blocks, {available} free")]
    CapacityExceeded { requested: u64, available: u64 },

    // -------------------------------------------------------------------------
    // On-Disk Format Errors
    // -------------------------------------------------------------------------
    #[error("Container corruption detected: {0}")]
    Corruption(String),

    #[error("Index log error: {0}")]
    IndexLog(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for VaultError {
    fn from(e: bincode::Error) -> Self {
        VaultError::Serialization(e.to_string())
    }
}
