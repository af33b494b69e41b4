//! Session and pass reports.
//!
//! Every session ends with a [`SessionSummary`], whether it completed or was
//! aborted. A pass over several accounts aggregates them into a
//! [`CombinedReport`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

// =============================================================================
// Session Status
// =============================================================================

/// Why a session stopped before reaching its target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    /// Too many failed iterations in a row
    CircuitBreaker {
        /// Consecutive failures when the breaker tripped
        consecutive_failures: u32,
    },
    /// Session cookie expired and could not be renewed
    AuthExpired {
        /// Last failure detail
        detail: String,
    },
    /// Stop signal received
    Cancelled,
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::CircuitBreaker { consecutive_failures } => {
                write!(f, "circuit breaker tripped after {} consecutive failures", consecutive_failures)
            }
            AbortReason::AuthExpired { detail } => write!(f, "authentication expired: {}", detail),
            AbortReason::Cancelled => f.write_str("cancelled"),
        }
    }
}

/// Terminal state of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SessionStatus {
    /// Reached the target duration
    Completed,
    /// Stopped early
    Aborted {
        /// Cause
        reason: AbortReason,
    },
}

impl SessionStatus {
    /// True for [`SessionStatus::Completed`]
    pub fn is_completed(&self) -> bool {
        matches!(self, SessionStatus::Completed)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionStatus::Completed => f.write_str("completed"),
            SessionStatus::Aborted { reason } => write!(f, "aborted ({})", reason),
        }
    }
}

// =============================================================================
// Session Summary
// =============================================================================

/// Statistics for one account session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Time-ordered session id
    pub session_id: Uuid,
    /// Account name
    pub account: String,
    /// Terminal state
    pub status: SessionStatus,
    /// Reading time the session aimed for
    pub target: Duration,
    /// Simulated reading time credited by accepted requests
    pub elapsed: Duration,
    /// Accepted requests
    pub success_count: u32,
    /// Failed iterations, after retries
    pub failure_count: u32,
    /// Retries across all iterations
    pub retry_count: u32,
    /// Successful cookie renewals
    pub refresh_count: u32,
    /// Breaks taken
    pub break_count: u32,
    /// Total break time
    pub break_total: Duration,
    /// Distinct book ids read, in first-visit order
    pub books_visited: Vec<String>,
    /// Names of the books read
    pub book_names: Vec<String>,
    /// Distinct chapter ids read, in first-visit order
    pub chapters_visited: Vec<String>,
    /// Mean latency of accepted requests
    pub avg_response_time: Option<Duration>,
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end
    pub finished_at: DateTime<Utc>,
}

impl SessionSummary {
    /// True when the session reached its target
    pub fn is_completed(&self) -> bool {
        self.status.is_completed()
    }

    /// Accepted share of all iterations, 0.0 when nothing was sent
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 0.0;
        }
        f64::from(self.success_count) / f64::from(total)
    }

    /// Human-readable report for notifications.
    pub fn render(&self) -> String {
        let mut lines = vec![
            format!("Account: {}", self.account),
            format!("Status: {}", self.status),
            format!(
                "Read time: {} / target {}",
                format_duration(self.elapsed),
                format_duration(self.target)
            ),
            format!(
                "Requests: {} ok, {} failed ({:.1}% success), {} retries",
                self.success_count,
                self.failure_count,
                self.success_rate() * 100.0,
                self.retry_count
            ),
            format!(
                "Breaks: {} ({})",
                self.break_count,
                format_duration(self.break_total)
            ),
            format!(
                "Books: {} | Chapters: {}",
                self.books_visited.len(),
                self.chapters_visited.len()
            ),
        ];
        if !self.book_names.is_empty() {
            lines.push(format!("Titles: {}", self.book_names.join(", ")));
        }
        if let Some(avg) = self.avg_response_time {
            lines.push(format!("Avg response: {} ms", avg.as_millis()));
        }
        if self.refresh_count > 0 {
            lines.push(format!("Cookie renewals: {}", self.refresh_count));
        }
        lines.push(format!(
            "Window: {} - {}",
            self.started_at.format("%Y-%m-%d %H:%M:%S"),
            self.finished_at.format("%H:%M:%S")
        ));
        lines.join("\n")
    }
}

/// Render a duration as `1h 02m 03s`, `2m 03s` or `3s`.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h {:02}m {:02}s", h, m, s)
    } else if m > 0 {
        format!("{}m {:02}s", m, s)
    } else {
        format!("{}s", s)
    }
}

// =============================================================================
// Combined Report
// =============================================================================

/// How one account fared in a pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AccountOutcome {
    /// Session ran (completed or aborted)
    Session {
        /// Session statistics
        summary: SessionSummary,
    },
    /// Session could not start or raised an error
    Failed {
        /// Error description
        error: String,
    },
}

/// One line of a [`CombinedReport`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountReport {
    /// Account name
    pub account: String,
    /// Result
    #[serde(flatten)]
    pub outcome: AccountOutcome,
}

impl AccountReport {
    /// Completed sessions count as successful; aborts and errors do not.
    pub fn is_success(&self) -> bool {
        match &self.outcome {
            AccountOutcome::Session { summary } => summary.is_completed(),
            AccountOutcome::Failed { .. } => false,
        }
    }

    /// Session summary, when a session ran
    pub fn summary(&self) -> Option<&SessionSummary> {
        match &self.outcome {
            AccountOutcome::Session { summary } => Some(summary),
            AccountOutcome::Failed { .. } => None,
        }
    }
}

/// Aggregate of one pass over all accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombinedReport {
    /// Per-account results in execution order
    pub accounts: Vec<AccountReport>,
    /// Pass start
    pub started_at: DateTime<Utc>,
    /// Pass end
    pub finished_at: DateTime<Utc>,
}

impl CombinedReport {
    /// Names of accounts whose session completed
    pub fn successful_accounts(&self) -> Vec<&str> {
        self.accounts
            .iter()
            .filter(|a| a.is_success())
            .map(|a| a.account.as_str())
            .collect()
    }

    /// Names of accounts that aborted or errored
    pub fn failed_accounts(&self) -> Vec<&str> {
        self.accounts
            .iter()
            .filter(|a| !a.is_success())
            .map(|a| a.account.as_str())
            .collect()
    }

    /// Sum of credited reading time
    pub fn total_elapsed(&self) -> Duration {
        self.accounts
            .iter()
            .filter_map(AccountReport::summary)
            .map(|s| s.elapsed)
            .sum()
    }

    /// Accepted and failed requests summed over every session that ran
    pub fn total_requests(&self) -> (u32, u32) {
        self.accounts
            .iter()
            .filter_map(AccountReport::summary)
            .fold((0, 0), |(ok, failed), s| {
                (ok + s.success_count, failed + s.failure_count)
            })
    }

    /// Accepted share of all requests in the pass, 0.0 when nothing was sent
    pub fn success_rate(&self) -> f64 {
        let (ok, failed) = self.total_requests();
        let total = ok + failed;
        if total == 0 {
            return 0.0;
        }
        f64::from(ok) / f64::from(total)
    }

    /// Human-readable report for notifications.
    pub fn render(&self) -> String {
        let (ok, failed) = self.total_requests();
        let mut lines = vec![
            format!(
                "Accounts: {} ok, {} failed | Total read time: {}",
                self.successful_accounts().len(),
                self.failed_accounts().len(),
                format_duration(self.total_elapsed())
            ),
            format!(
                "Requests: {} ok, {} failed ({:.1}% success)",
                ok,
                failed,
                self.success_rate() * 100.0
            ),
        ];
        for report in &self.accounts {
            let line = match &report.outcome {
                AccountOutcome::Session { summary } => format!(
                    "- {}: {}, {} read, {} ok / {} failed",
                    report.account,
                    summary.status,
                    format_duration(summary.elapsed),
                    summary.success_count,
                    summary.failure_count
                ),
                AccountOutcome::Failed { error } => {
                    format!("- {}: failed ({})", report.account, error)
                }
            };
            lines.push(line);
        }
        lines.join("\n")
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn summary(account: &str, status: SessionStatus) -> SessionSummary {
        let now = Utc::now();
        SessionSummary {
            session_id: Uuid::now_v7(),
            account: account.to_string(),
            status,
            target: Duration::from_secs(3600),
            elapsed: Duration::from_secs(3630),
            success_count: 120,
            failure_count: 2,
            retry_count: 3,
            refresh_count: 0,
            break_count: 4,
            break_total: Duration::from_secs(400),
            books_visited: vec!["b1".to_string()],
            book_names: vec!["Dream of the Red Chamber".to_string()],
            chapters_visited: vec!["c1".to_string(), "c2".to_string()],
            avg_response_time: Some(Duration::from_millis(250)),
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(7)), "7s");
        assert_eq!(format_duration(Duration::from_secs(125)), "2m 05s");
        assert_eq!(format_duration(Duration::from_secs(3723)), "1h 02m 03s");
    }

    #[test]
    fn test_success_rate() {
        let s = summary("a", SessionStatus::Completed);
        assert!((s.success_rate() - 120.0 / 122.0).abs() < 1e-9);

        let empty = SessionSummary {
            success_count: 0,
            failure_count: 0,
            ..s
        };
        assert_eq!(empty.success_rate(), 0.0);
    }

    #[test]
    fn test_render_mentions_status_and_counts() {
        let text = summary(
            "alice",
            SessionStatus::Aborted {
                reason: AbortReason::CircuitBreaker {
                    consecutive_failures: 5,
                },
            },
        )
        .render();

        assert!(text.contains("Account: alice"));
        assert!(text.contains("aborted (circuit breaker tripped after 5 consecutive failures)"));
        assert!(text.contains("120 ok, 2 failed"));
        assert!(text.contains("Avg response: 250 ms"));
    }

    #[test]
    fn test_combined_report_splits_outcomes() {
        let report = CombinedReport {
            accounts: vec![
                AccountReport {
                    account: "a".to_string(),
                    outcome: AccountOutcome::Session {
                        summary: summary("a", SessionStatus::Completed),
                    },
                },
                AccountReport {
                    account: "b".to_string(),
                    outcome: AccountOutcome::Session {
                        summary: summary(
                            "b",
                            SessionStatus::Aborted {
                                reason: AbortReason::Cancelled,
                            },
                        ),
                    },
                },
                AccountReport {
                    account: "c".to_string(),
                    outcome: AccountOutcome::Failed {
                        error: "bad seed".to_string(),
                    },
                },
            ],
            started_at: Utc::now(),
            finished_at: Utc::now(),
        };

        assert_eq!(report.successful_accounts(), vec!["a"]);
        assert_eq!(report.failed_accounts(), vec!["b", "c"]);
        assert_eq!(report.total_elapsed(), Duration::from_secs(7260));
        assert_eq!(report.total_requests(), (240, 4));
        assert!((report.success_rate() - 240.0 / 244.0).abs() < 1e-9);

        let text = report.render();
        assert!(text.contains("Requests: 240 ok, 4 failed (98.4% success)"));
        assert!(text.contains("- c: failed (bad seed)"));
    }

    #[test]
    fn test_summary_serialization() {
        let s = summary("a", SessionStatus::Completed);
        let json = serde_json::to_string(&s).unwrap();
        let parsed: SessionSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, s);
    }
}
