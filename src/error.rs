//! Error types for the SDS controller
//!
//! Provides structured error types for the orchestration layer: lookups,
//! placement, policy workflows, dock dispatch and the metadata store.
//! [`ErrorKind`] is the serializable projection carried in RPC responses.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Unified error type for the controller
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Lookup Errors
    // =========================================================================
    #[error("Profile not found: {name}")]
    ProfileNotFound { name: String },

    #[error("Profile already exists: {name}")]
    ProfileExists { name: String },

    #[error("Pool not found: {pool_id}")]
    PoolNotFound { pool_id: String },

    #[error("Dock not found: {dock}")]
    DockNotFound { dock: String },

    #[error("Volume not found: {volume_id}")]
    VolumeNotFound { volume_id: String },

    #[error("Volume attachment not found: {attachment_id}")]
    AttachmentNotFound { attachment_id: String },

    #[error("Volume snapshot not found: {snapshot_id}")]
    SnapshotNotFound { snapshot_id: String },

    #[error("Share not found: {share_id}")]
    ShareNotFound { share_id: String },

    #[error("Not found: {0}")]
    NotFound(String),

    // =========================================================================
    // Placement & Policy Errors
    // =========================================================================
    #[error("No suitable pool for {size_gib} GiB with tags [{tags}]")]
    NoSuitablePool { size_gib: u64, tags: String },

    #[error("Unsupported profile tag: {tag}")]
    UnsupportedTag { tag: String },

    #[error("Workflow executor {executor} failed: {reason}")]
    WorkflowFailed { executor: String, reason: String },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    // =========================================================================
    // Dock Errors
    // =========================================================================
    #[error("Dock unavailable: {dock} - {reason}")]
    DockUnavailable { dock: String, reason: String },

    #[error("Backend error: {message}")]
    BackendError { message: String },

    // =========================================================================
    // Resource State Errors
    // =========================================================================
    #[error("Invalid state for {resource} {id}: {reason}")]
    InvalidState {
        resource: String,
        id: String,
        reason: String,
    },

    // =========================================================================
    // Metadata Store Errors
    // =========================================================================
    #[error("Metadata store error: {0}")]
    Store(String),

    #[error("Metadata store conflict on key {key}")]
    StoreConflict { key: String },

    // =========================================================================
    // Request & Configuration Errors
    // =========================================================================
    #[error("Request validation failed: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Duration parse error: {0}")]
    DurationParse(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Wire Error Kind
// =============================================================================

/// Serializable error classification carried in the response envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    ProfileNotFound,
    PoolNotFound,
    DockNotFound,
    NotFound,
    AlreadyExists,
    NoSuitablePool,
    UnsupportedTag,
    DockUnavailable,
    BackendError,
    WorkflowFailed,
    Cancelled,
    InvalidState,
    Conflict,
    InvalidArgument,
    Internal,
}

impl ErrorKind {
    /// Whether a caller may reissue an idempotent request after this error
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorKind::DockUnavailable | ErrorKind::Conflict | ErrorKind::Cancelled
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ProfileNotFound => "profile_not_found",
            ErrorKind::PoolNotFound => "pool_not_found",
            ErrorKind::DockNotFound => "dock_not_found",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::NoSuitablePool => "no_suitable_pool",
            ErrorKind::UnsupportedTag => "unsupported_tag",
            ErrorKind::DockUnavailable => "dock_unavailable",
            ErrorKind::BackendError => "backend_error",
            ErrorKind::WorkflowFailed => "workflow_failed",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::Conflict => "conflict",
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::Internal => "internal",
        };
        f.write_str(name)
    }
}

impl Error {
    /// Project this error onto its wire classification
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::ProfileNotFound { .. } => ErrorKind::ProfileNotFound,
            Error::PoolNotFound { .. } => ErrorKind::PoolNotFound,
            Error::DockNotFound { .. } => ErrorKind::DockNotFound,
            Error::VolumeNotFound { .. }
            | Error::AttachmentNotFound { .. }
            | Error::SnapshotNotFound { .. }
            | Error::ShareNotFound { .. }
            | Error::NotFound(_) => ErrorKind::NotFound,
            Error::ProfileExists { .. } => ErrorKind::AlreadyExists,
            Error::NoSuitablePool { .. } => ErrorKind::NoSuitablePool,
            Error::UnsupportedTag { .. } => ErrorKind::UnsupportedTag,
            Error::WorkflowFailed { .. } => ErrorKind::WorkflowFailed,
            Error::Cancelled { .. } => ErrorKind::Cancelled,
            Error::DockUnavailable { .. } => ErrorKind::DockUnavailable,
            Error::BackendError { .. } => ErrorKind::BackendError,
            Error::InvalidState { .. } => ErrorKind::InvalidState,
            Error::StoreConflict { .. } => ErrorKind::Conflict,
            Error::Validation(_) | Error::DurationParse(_) | Error::JsonParse(_) => {
                ErrorKind::InvalidArgument
            }
            Error::Store(_) | Error::Configuration(_) | Error::Internal(_) | Error::Io(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Rebuild an error from a wire classification and message
    ///
    /// Kinds without a structured counterpart keep the message verbatim.
    pub fn from_wire(kind: ErrorKind, message: String) -> Self {
        match kind {
            ErrorKind::ProfileNotFound => Error::ProfileNotFound { name: message },
            ErrorKind::PoolNotFound => Error::PoolNotFound { pool_id: message },
            ErrorKind::DockNotFound => Error::DockNotFound { dock: message },
            ErrorKind::NoSuitablePool => Error::NoSuitablePool {
                size_gib: 0,
                tags: message,
            },
            ErrorKind::UnsupportedTag => Error::UnsupportedTag { tag: message },
            ErrorKind::DockUnavailable => Error::DockUnavailable {
                dock: "remote".into(),
                reason: message,
            },
            ErrorKind::BackendError => Error::BackendError { message },
            ErrorKind::WorkflowFailed => Error::WorkflowFailed {
                executor: "remote".into(),
                reason: message,
            },
            ErrorKind::Cancelled => Error::Cancelled { operation: message },
            ErrorKind::InvalidState => Error::InvalidState {
                resource: "resource".into(),
                id: String::new(),
                reason: message,
            },
            ErrorKind::Conflict => Error::StoreConflict { key: message },
            ErrorKind::AlreadyExists => Error::ProfileExists { name: message },
            ErrorKind::InvalidArgument => Error::Validation(message),
            ErrorKind::NotFound => Error::NotFound(message),
            ErrorKind::Internal => Error::Internal(message),
        }
    }

    /// Check if this error is a transport-level failure worth one retry
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::DockUnavailable { .. })
    }

    /// Check if this error is a lookup miss
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::NotFound
                | ErrorKind::ProfileNotFound
                | ErrorKind::PoolNotFound
                | ErrorKind::DockNotFound
        )
    }

    /// Build a cancellation error for an operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Error::Cancelled {
            operation: operation.into(),
        }
    }
}

/// Result type alias for the controller
pub type Result<T> = std::result::Result<T, Error>;
