//! Engine error types.

use thiserror::Error;
use weread_domain::DomainError;

/// Errors raised by engine decisions.
///
/// All of these are programming or configuration errors: the caller should
/// fail fast instead of retrying.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    /// Seed template is missing a field the payload contract requires
    #[error("Missing required payload field: {0}")]
    MissingField(&'static str),

    /// A field is present but unusable
    #[error("Invalid payload field {field}: {reason}")]
    InvalidField {
        /// Field name
        field: &'static str,
        /// What is wrong with it
        reason: String,
    },

    /// Position selection needs at least one chapter
    #[error("Catalog is empty")]
    EmptyCatalog,

    /// Domain validation error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
