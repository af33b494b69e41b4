//! WeRead Execution Layer
//!
//! Runs reading sessions against the ports the runtime wires in.
//!
//! # Architecture
//!
//! ```text
//! Selector → Signer → ReadingTransport → outcome → Pacing → next iteration
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the reading endpoint, cookie renewal and notifications
//! - **Session Runner**: One account, one timed session, retry and circuit breaker
//! - **Summary**: Session statistics and multi-account reports
//! - **Stub**: Test implementations for development
//!
//! # Example
//!
//! ```rust,ignore
//! use weread_exec::{ScriptedTransport, SessionConfig, SessionRunner, StubRefresher};
//! use std::sync::Arc;
//!
//! let runner = SessionRunner::new(
//!     "alice",
//!     SessionConfig::default(),
//!     catalog,
//!     seed,
//!     Arc::new(ScriptedTransport::always(accepted())),
//!     Arc::new(StubRefresher::succeeding()),
//!     CancellationToken::new(),
//! )?;
//! let summary = runner.run().await?;
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod ports;
pub mod session;
pub mod stub;
pub mod summary;

// Re-exports for convenience
pub use error::{ExecError, ExecResult};
pub use ports::{CredentialRefresher, Notification, NotificationSink, ReadingTransport, SendOutcome};
pub use session::{SessionConfig, SessionRunner, SessionState, INITIAL_READ_SECS};
pub use stub::{RecordingSink, ScriptedTransport, StubRefresher};
pub use summary::{
    format_duration, AbortReason, AccountOutcome, AccountReport, CombinedReport, SessionStatus,
    SessionSummary,
};
