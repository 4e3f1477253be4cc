//! Presence Registry Error Hierarchy
//!
//! Store failures are classified at the point of the store call and folded
//! into `Lookup` results or logged; only construction and configuration APIs
//! surface these errors to callers.

use config::ConfigError;

#[doc(hidden)]
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Failures reported by the backing store client
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Node payload could not be encoded or decoded
    #[error(transparent)]
    Serialization(#[from] SerializationError),

    /// Configuration loading or validation failures
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Path or path token rejected by the path scheme
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// hide/show called for an identity that was never announced
    #[error("No announcement found: path={path}")]
    AnnouncementNotFound { path: String },

    /// Unrecoverable failures
    #[error("Fatal error: {0}")]
    Fatal(String),
}

/// Error codes returned by a [`crate::StoreClient`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Node (or a parent of the node being created) does not exist
    #[error("Node does not exist: {path}")]
    NoNode { path: String },

    #[error("Node already exists: {path}")]
    NodeExists { path: String },

    /// Delete refused because the node still has children
    #[error("Node has children: {path}")]
    NotEmpty { path: String },

    /// Conditional write lost a race
    #[error("Version conflict: path={path}, expected={expected}, actual={actual}")]
    BadVersion {
        path: String,
        expected: u64,
        actual: u64,
    },

    #[error("Connection to store lost")]
    ConnectionLoss,

    #[error("Store session expired")]
    SessionExpired,

    #[error("Store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_no_node(&self) -> bool {
        matches!(self, StoreError::NoNode { .. })
    }

    pub fn is_node_exists(&self) -> bool {
        matches!(self, StoreError::NodeExists { .. })
    }

    /// Connection loss or session expiry: transient, retried on the next tick
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::ConnectionLoss | StoreError::SessionExpired)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error(transparent)]
    Bincode(#[from] bincode::Error),

    #[error("Malformed payload: {0}")]
    Malformed(String),
}
