//! Error types for the bundling pipeline
//!
//! Every failure aborts the whole top-level bundle call; there is no partial
//! output and no retry.

use thiserror::Error;

/// Errors raised while classifying, loading or bundling modules
#[derive(Debug, Error)]
pub enum BundleError {
    /// A combine pattern is not a valid glob
    #[error("invalid combine pattern '{pattern}'")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: globset::Error,
    },

    /// No source has been registered for the module id
    #[error("no source registered for module '{id}'")]
    ModuleNotFound { id: String },

    /// The module source could not be parsed into definitions
    #[error("failed to parse module '{id}': {reason}")]
    Parse { id: String, reason: String },

    /// The module source holds more than one anonymous definition, so the
    /// definitions cannot be given ids
    #[error("module '{id}' contains {count} anonymous definitions; give them explicit ids")]
    AmbiguousDefinitions { id: String, count: usize },
}

impl BundleError {
    /// Whether this error comes from configuration rather than module sources
    pub fn is_config_error(&self) -> bool {
        matches!(self, Self::InvalidPattern { .. })
    }
}

pub type Result<T, E = BundleError> = std::result::Result<T, E>;
