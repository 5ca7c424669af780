//! Domain error model.

use thiserror::Error;

/// Domain-level error.
///
/// Deterministic failures only (bad identifiers, unknown names). Storage and
/// transport failures are reported by the layers that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A storage domain name is not registered.
    #[error("unknown storage domain: {0}")]
    UnknownDomain(String),

    /// A persisted status string does not map to a known status.
    #[error("unknown status: {0}")]
    UnknownStatus(String),
}

impl DomainError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unknown_domain(name: impl Into<String>) -> Self {
        Self::UnknownDomain(name.into())
    }

    pub fn unknown_status(status: impl Into<String>) -> Self {
        Self::UnknownStatus(status.into())
    }
}
