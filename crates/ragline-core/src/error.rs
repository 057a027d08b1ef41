//! Error taxonomy for the retrieval engine.
//!
//! Every fallible core operation returns [`RagError`]. Capability adapters
//! (embedders, generators) report failures as [`CapabilityError`], which
//! carries the transient/permanent distinction the retry policy needs. A
//! transient error never escapes the core directly: it is retried and, once
//! the retry budget is spent, surfaced as [`RagError::CapabilityUnavailable`].

use std::fmt;

use thiserror::Error;

/// Convenience alias used throughout the core crate.
pub type Result<T> = std::result::Result<T, RagError>;

/// Which external capability produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Embedding,
    Generation,
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Capability::Embedding => write!(f, "embedding"),
            Capability::Generation => write!(f, "generation"),
        }
    }
}

/// Whether a capability failure is worth retrying.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CapabilityErrorKind {
    /// Network hiccup, rate limit, server error, or timeout.
    Transient,
    /// Malformed request, auth failure, unusable response.
    Permanent,
}

/// A failure reported by an embedding or generation capability.
#[derive(Debug, Clone, Error)]
#[error("{kind:?} {capability} error: {message}")]
pub struct CapabilityError {
    pub capability: Capability,
    pub kind: CapabilityErrorKind,
    pub message: String,
}

impl CapabilityError {
    pub fn transient(capability: Capability, message: impl Into<String>) -> Self {
        Self {
            capability,
            kind: CapabilityErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(capability: Capability, message: impl Into<String>) -> Self {
        Self {
            capability,
            kind: CapabilityErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == CapabilityErrorKind::Transient
    }
}

/// Errors raised by the retrieval engine.
#[derive(Debug, Error)]
pub enum RagError {
    /// Invalid chunking, budget, or retrieval parameters.
    #[error("configuration error: {0}")]
    Config(String),

    /// A vector's dimension disagrees with the index's established dimension.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// A vector was produced by a different embedding model than the index holds.
    #[error("model mismatch: index holds '{expected}', got '{got}'")]
    ModelMismatch { expected: String, got: String },

    /// A persisted index failed its integrity check.
    #[error("index corrupt: {0}")]
    IndexCorrupt(String),

    /// Empty or malformed query.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A document could not be ingested (empty text, bad identifier).
    #[error("invalid document '{id}': {reason}")]
    InvalidDocument { id: String, reason: String },

    /// A capability rejected the request; retrying will not help.
    #[error("{capability} capability failed permanently: {message}")]
    PermanentCapability {
        capability: Capability,
        message: String,
    },

    /// A capability kept failing transiently until the retry budget ran out.
    #[error("{capability} capability unavailable after {attempts} attempts: {last_error}")]
    CapabilityUnavailable {
        capability: Capability,
        attempts: u32,
        last_error: String,
    },

    /// Index persistence I/O.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl RagError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        RagError::Config(msg.into())
    }

    pub(crate) fn corrupt(msg: impl Into<String>) -> Self {
        RagError::IndexCorrupt(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capability_error_display() {
        let err = CapabilityError::transient(Capability::Embedding, "HTTP 503");
        assert!(err.is_transient());
        assert_eq!(err.to_string(), "Transient embedding error: HTTP 503");
    }

    #[test]
    fn test_rag_error_display() {
        let err = RagError::DimensionMismatch {
            expected: 768,
            got: 384,
        };
        assert_eq!(err.to_string(), "dimension mismatch: expected 768, got 384");

        let err = RagError::CapabilityUnavailable {
            capability: Capability::Generation,
            attempts: 4,
            last_error: "timeout".to_string(),
        };
        assert!(err.to_string().contains("after 4 attempts"));
    }
}
