//! Execution layer error types.

use thiserror::Error;

/// Errors that can occur while running a reading session.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Session cookie could not be renewed
    #[error("Credential refresh failed: {0}")]
    CredentialRefresh(String),

    /// Notification delivery failed
    #[error("Notification error: {0}")]
    Notification(String),

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] weread_domain::DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] weread_engine::EngineError),
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
