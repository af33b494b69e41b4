//! Daemon error types.

use thiserror::Error;
use weread_connectors::{CurlError, NotifyError};
use weread_domain::DomainError;
use weread_exec::ExecError;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Request template could not be parsed
    #[error("Template error: {0}")]
    Curl(#[from] CurlError),

    /// Notification channel setup error
    #[error("Notification error: {0}")]
    Notify(#[from] NotifyError),

    /// Account has no usable request template
    #[error("Account {account}: {reason}")]
    Template {
        /// Account name
        account: String,
        /// What went wrong
        reason: String,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Daily pass limit reached
    #[error("Daily session limit reached: {completed}/{limit}")]
    DailyCapReached {
        /// Passes completed today
        completed: u32,
        /// Configured maximum
        limit: u32,
    },
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
