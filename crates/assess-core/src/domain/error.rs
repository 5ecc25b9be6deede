//! Domain-level error taxonomy for assessment runs.

use crate::config::ConfigError;
use crate::dispatch::DispatchError;
use crate::store::StoreError;

/// Errors produced while registering assessee endpoints.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("endpoint id must not be empty")]
    EmptyId,

    #[error("endpoint {id} has an invalid address {address:?}: {reason}")]
    InvalidAddress {
        id: String,
        address: String,
        reason: String,
    },

    #[error("duplicate endpoint id: {0}")]
    DuplicateId(String),

    #[error("duplicate endpoint address {address} (ids {first} and {second})")]
    DuplicateAddress {
        address: String,
        first: String,
        second: String,
    },
}

/// Top-level assessment errors.
#[derive(Debug, thiserror::Error)]
pub enum AssessError {
    /// Fatal: the run cannot start (no endpoints, no usable tasks).
    #[error("run configuration error: {0}")]
    RunConfiguration(String),

    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid run transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for assessment operations.
pub type Result<T> = std::result::Result<T, AssessError>;
