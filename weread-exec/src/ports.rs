//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (reading endpoint,
//! cookie renewal, push notifications). Adapters implement these ports for
//! specific services (WeRead web API, push channels, stubs).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use weread_domain::SeedRecord;
use weread_engine::SignedPayload;

use crate::error::ExecError;
use crate::summary::{CombinedReport, SessionSummary};

// =============================================================================
// Reading Transport Port
// =============================================================================

/// What happened to one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SendOutcome {
    /// Remote accepted the reading progress
    Accepted {
        /// Round-trip latency
        response_time: Duration,
    },
    /// Network error, timeout or unusable response; worth retrying
    NetworkFailure {
        /// Failure detail
        reason: String,
    },
    /// Remote no longer recognises the session cookie
    AuthExpired {
        /// Failure detail
        reason: String,
    },
}

/// Port for sending signed reading requests.
///
/// Implementations:
/// - `ScriptedTransport` - For testing (replays a list of outcomes)
/// - `WereadClient` - Real WeRead web endpoint
#[async_trait]
pub trait ReadingTransport: Send + Sync {
    /// Send one payload using the seed's headers and cookies.
    ///
    /// Never returns an error: every failure is classified into a
    /// [`SendOutcome`] so the session loop stays linear.
    async fn send(&self, seed: &SeedRecord, payload: &SignedPayload) -> SendOutcome;
}

// =============================================================================
// Credential Refresh Port
// =============================================================================

/// Port for renewing the session cookie.
#[async_trait]
pub trait CredentialRefresher: Send + Sync {
    /// Obtain a fresh session cookie value for the seed's account.
    async fn refresh(&self, seed: &SeedRecord) -> Result<String, ExecError>;
}

// =============================================================================
// Notification Port
// =============================================================================

/// Structured message handed to a notification sink.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    /// One account finished a session
    Session {
        /// Session statistics
        summary: SessionSummary,
    },
    /// A multi-account pass finished
    Combined {
        /// Aggregated results
        report: CombinedReport,
    },
    /// An account aborted or could not run
    AccountFailed {
        /// Account name
        account: String,
        /// Why it failed
        reason: String,
    },
}

impl Notification {
    /// Title shown by push channels
    pub fn title(&self) -> String {
        match self {
            Notification::Session { .. } | Notification::Combined { .. } => {
                "WeRead reading report".to_string()
            }
            Notification::AccountFailed { account, .. } => {
                format!("WeRead account {} failed", account)
            }
        }
    }

    /// Plain-text body
    pub fn render(&self) -> String {
        match self {
            Notification::Session { summary } => summary.render(),
            Notification::Combined { report } => report.render(),
            Notification::AccountFailed { account, reason } => {
                format!("Account {} did not finish its session: {}", account, reason)
            }
        }
    }
}

/// Port for delivering reports.
///
/// Delivery failures are reported to the caller, who logs them; they never
/// affect a reading session.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    /// Deliver one notification
    async fn notify(&self, notification: &Notification) -> Result<(), ExecError>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_outcome_serialization() {
        let outcome = SendOutcome::AuthExpired {
            reason: "no succ".to_string(),
        };

        let json = serde_json::to_string(&outcome).unwrap();
        assert!(json.contains("\"outcome\":\"auth_expired\""));

        let parsed: SendOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, outcome);
    }

    #[test]
    fn test_failure_notification_text() {
        let notification = Notification::AccountFailed {
            account: "bob".to_string(),
            reason: "cancelled".to_string(),
        };

        assert_eq!(notification.title(), "WeRead account bob failed");
        assert!(notification.render().contains("bob"));
    }
}
