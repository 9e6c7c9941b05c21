//! Error types for the static site reconciliation engine
//!
//! The variants follow the failure taxonomy of a reconciliation:
//! configuration problems are fatal and surfaced immediately, local I/O
//! failures abort the current run, backend failures are retried while they
//! are transient, and partial sync failures carry the state that was
//! actually applied so the host can persist it.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::ResourceStatus;
use crate::state::SiteState;

/// Result type alias for sitesync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the reconciliation engine
#[derive(Error, Debug)]
pub enum Error {
    /// Invalid desired site (missing directory, path traversal, bad glob, ...)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Local filesystem read failure
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        /// Path that could not be read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Storage or content-delivery backend failure
    #[error("Backend unavailable ({backend}, {kind}): {message}")]
    BackendUnavailable {
        /// Backend name (e.g. "s3", "cloudfront", "memory")
        backend: String,
        /// Failure classification, decides whether a retry is attempted
        kind: BackendErrorKind,
        /// Error message
        message: String,
    },

    /// Some object operations failed during sync
    #[error("Sync partially failed: {0}")]
    SyncPartialFailure(Box<PartialFailure>),

    /// A create stopped after its container existed
    ///
    /// `state` records the container and whatever reached it, so the host
    /// can persist it and converge with `update` instead of orphaning it.
    #[error("Create of {} left incomplete: {source}", state.bucket_id)]
    Incomplete {
        /// Everything applied before the failure
        state: Box<SiteState>,
        /// The failure that stopped the create
        #[source]
        source: Box<Error>,
    },

    /// State store-related errors
    #[error("State store error: {0}")]
    StateStore(String),

    /// Lifecycle call made from a status that does not allow it
    #[error("Invalid state transition: {from} -> {to}")]
    InvalidTransition {
        /// Current status
        from: ResourceStatus,
        /// Requested status
        to: ResourceStatus,
    },

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error with context
    #[error("{0}")]
    Other(String),
}

/// Classification of a backend failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Timeouts, throttling, 5xx responses, dropped connections
    Transient,
    /// Missing or rejected credentials
    Auth,
    /// Target does not exist
    NotFound,
    /// Request rejected for any other reason
    Rejected,
}

impl fmt::Display for BackendErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendErrorKind::Transient => write!(f, "transient"),
            BackendErrorKind::Auth => write!(f, "auth"),
            BackendErrorKind::NotFound => write!(f, "not found"),
            BackendErrorKind::Rejected => write!(f, "rejected"),
        }
    }
}

/// Outcome of a sync that did not fully succeed
#[derive(Debug, Clone)]
pub struct PartialFailure {
    /// Keys whose upload or delete succeeded
    pub succeeded: Vec<String>,
    /// Keys whose operation failed, with the error message
    pub failed: BTreeMap<String, String>,
    /// State reflecting exactly the successfully applied subset
    pub state: Option<SiteState>,
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<&str> = self.failed.keys().map(String::as_str).collect();
        write!(
            f,
            "{} succeeded, {} failed [{}]",
            self.succeeded.len(),
            self.failed.len(),
            keys.join(", ")
        )
    }
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    /// Create an I/O error bound to a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Create a backend error
    pub fn backend(
        backend: impl Into<String>,
        kind: BackendErrorKind,
        message: impl Into<String>,
    ) -> Self {
        Self::BackendUnavailable {
            backend: backend.into(),
            kind,
            message: message.into(),
        }
    }

    /// Create a transient backend error
    pub fn transient(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::backend(backend, BackendErrorKind::Transient, message)
    }

    /// Create a "not found" backend error
    pub fn not_found(backend: impl Into<String>, message: impl Into<String>) -> Self {
        Self::backend(backend, BackendErrorKind::NotFound, message)
    }

    /// Attach the state applied so far to a failure
    pub fn incomplete(state: SiteState, source: Error) -> Self {
        Self::Incomplete {
            state: Box::new(state),
            source: Box::new(source),
        }
    }

    /// Create a state store error
    pub fn state_store(msg: impl Into<String>) -> Self {
        Self::StateStore(msg.into())
    }

    /// Whether a retry has a chance of succeeding
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Incomplete { source, .. } => source.is_retryable(),
            _ => matches!(
                self,
                Error::BackendUnavailable {
                    kind: BackendErrorKind::Transient,
                    ..
                }
            ),
        }
    }

    /// Whether the error reports an already absent target
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::BackendUnavailable {
                kind: BackendErrorKind::NotFound,
                ..
            }
        )
    }

    /// Partially applied state carried by the failure, if any
    pub fn partial_state(&self) -> Option<&SiteState> {
        match self {
            Error::SyncPartialFailure(failure) => failure.state.as_ref(),
            Error::Incomplete { state, .. } => Some(state),
            _ => None,
        }
    }
}

/// Helper for converting anyhow::Error to our Error type
impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Self::Other(err.to_string())
    }
}
