//! Error types and result aliases for Boletera.
//!
//! This module defines the shared error types used across all Boletera
//! components. Errors are structured for programmatic handling: the HTTP
//! layer maps them onto status codes, and the emission pipeline decides per
//! variant whether to surface, absorb, or fall back to a fictitious record.

use std::fmt;

/// The result type used throughout Boletera.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in Boletera operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The CAF directory itself could not be listed.
    ///
    /// Distinct from an empty directory, which is a valid empty state.
    #[error("CAF store unavailable: {message}")]
    StoreUnavailable {
        /// Description of the failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// No CAF range covers the next candidate folio.
    ///
    /// Recovered locally by falling back to a fictitious emission; never
    /// surfaced to HTTP clients as an error.
    #[error("no folios available for candidate {candidate}")]
    NoFoliosAvailable {
        /// The folio number that could not be backed by any range.
        candidate: u64,
    },

    /// A CAF file was read but its contents could not be interpreted.
    #[error("malformed CAF file {file}: {message}")]
    CafParse {
        /// The offending file name.
        file: String,
        /// Description of what was missing or malformed.
        message: String,
    },

    /// A receipt store operation failed.
    #[error("persistence error: {message}")]
    Persistence {
        /// Description of the persistence failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A call to the tax document gateway failed at the transport level.
    ///
    /// Covers timeouts, connection resets, and non-success HTTP statuses.
    #[error("gateway error during {step}: {message}")]
    Gateway {
        /// The pipeline step that was executing (`generate`, `envelope`,
        /// `submit`, `query`, `request_folios`).
        step: &'static str,
        /// Description of the failure.
        message: String,
    },

    /// The authority returned a terminal non-accepted status.
    #[error("authority rejected document: status {status}")]
    AuthorityRejected {
        /// The status code reported by the authority.
        status: String,
    },

    /// Invalid input was provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// An internal error occurred that should not happen in normal operation.
    #[error("internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl Error {
    /// Creates a new store-unavailable error with the given message.
    #[must_use]
    pub fn store_unavailable(message: impl Into<String>) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new store-unavailable error with a source cause.
    #[must_use]
    pub fn store_unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::StoreUnavailable {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new persistence error with the given message.
    #[must_use]
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new persistence error with a source cause.
    #[must_use]
    pub fn persistence_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Persistence {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a new gateway error for the named pipeline step.
    #[must_use]
    pub fn gateway(step: &'static str, message: impl fmt::Display) -> Self {
        Self::Gateway {
            step,
            message: message.to_string(),
        }
    }

    /// Creates a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns true when the error is recoverable by a fictitious-error
    /// fallback record instead of being propagated.
    #[must_use]
    pub fn is_fallback_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Gateway { .. } | Self::AuthorityRejected { .. } | Self::CafParse { .. }
        )
    }
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        Self::persistence_with_source("sqlite operation failed", value)
    }
}
