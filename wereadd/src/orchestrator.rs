//! Orchestrator: runs every configured account, one after another.
//!
//! A pass runs each account's session to its end, isolates failures and
//! aggregates the results into a [`CombinedReport`].
//!
//! # Flow
//!
//! ```text
//! for each account:
//!   template → parse_curl → SessionRunner::run → AccountReport
//!   (failed or aborted) → AccountFailed notification
//!   (several accounts) → randomized inter-account delay
//! one account → Session notification
//! several     → Combined notification
//! ```

use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use weread_connectors::parse_curl;
use weread_domain::ValueRange;
use weread_exec::{
    AbortReason, AccountOutcome, AccountReport, CombinedReport, CredentialRefresher, Notification,
    NotificationSink, ReadingTransport, SessionRunner, SessionStatus, SessionSummary,
};

use crate::config::{AccountProfile, Config};
use crate::error::DaemonResult;

/// Default wait between two accounts, in seconds
const ACCOUNT_DELAY_SECS: (f64, f64) = (30.0, 60.0);

// =============================================================================
// Orchestrator
// =============================================================================

/// Runs reading passes over the configured accounts.
pub struct Orchestrator {
    config: Config,
    transport: Arc<dyn ReadingTransport>,
    refresher: Arc<dyn CredentialRefresher>,
    notifier: Arc<dyn NotificationSink>,
    cancel: CancellationToken,
    rng: StdRng,
    account_delay: ValueRange,
}

impl Orchestrator {
    /// Create an orchestrator over validated configuration.
    pub fn new(
        config: Config,
        transport: Arc<dyn ReadingTransport>,
        refresher: Arc<dyn CredentialRefresher>,
        notifier: Arc<dyn NotificationSink>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            transport,
            refresher,
            notifier,
            cancel,
            rng: StdRng::from_entropy(),
            account_delay: ValueRange::saturating(ACCOUNT_DELAY_SECS.0, ACCOUNT_DELAY_SECS.1),
        }
    }

    /// Seed every random draw of the pass.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Override the wait between accounts.
    pub fn with_account_delay(mut self, delay: ValueRange) -> Self {
        self.account_delay = delay;
        self
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every account once, in order.
    ///
    /// Per-account failures end up in the report. Cancellation stops the
    /// pass between accounts and returns what ran so far.
    pub async fn run_pass(&mut self) -> DaemonResult<CombinedReport> {
        let accounts = self.config.accounts();
        let started_at = Utc::now();
        let mut reports = Vec::with_capacity(accounts.len());

        info!(accounts = accounts.len(), "Starting reading pass");

        for profile in &accounts {
            if self.cancel.is_cancelled() {
                warn!(account = %profile.name, "Pass cancelled before account started");
                break;
            }

            let report = self.run_account(profile).await;
            if let Some(reason) = failure_reason(&report) {
                self.send(Notification::AccountFailed {
                    account: report.account.clone(),
                    reason,
                })
                .await;
            }
            reports.push(report);

            // Every account is followed by the delay, the last one included
            if accounts.len() > 1 && !self.wait_after_account().await {
                break;
            }
        }

        let report = CombinedReport {
            accounts: reports,
            started_at,
            finished_at: Utc::now(),
        };

        info!(
            attempted = report.accounts.len(),
            succeeded = report.successful_accounts().len(),
            failed = report.failed_accounts().len(),
            "Reading pass finished"
        );

        let summary = if accounts.len() == 1 {
            report
                .accounts
                .first()
                .and_then(AccountReport::summary)
                .map(|summary| Notification::Session {
                    summary: summary.clone(),
                })
        } else if report.accounts.is_empty() {
            None
        } else {
            Some(Notification::Combined {
                report: report.clone(),
            })
        };
        if let Some(notification) = summary {
            self.send(notification).await;
        }

        Ok(report)
    }

    async fn run_account(&mut self, profile: &AccountProfile) -> AccountReport {
        info!(account = %profile.name, "Starting account");

        let outcome = match self.start_session(profile).await {
            Ok(summary) => {
                info!(
                    account = %profile.name,
                    status = %summary.status,
                    successes = summary.success_count,
                    failures = summary.failure_count,
                    "Account finished"
                );
                AccountOutcome::Session { summary }
            }
            Err(e) => {
                error!(account = %profile.name, error = %e, "Account could not run");
                AccountOutcome::Failed {
                    error: e.to_string(),
                }
            }
        };

        AccountReport {
            account: profile.name.clone(),
            outcome,
        }
    }

    async fn start_session(&mut self, profile: &AccountProfile) -> DaemonResult<SessionSummary> {
        let template = self.config.template_for(profile).await?;
        let seed = parse_curl(&template)?;
        let catalog = self.config.catalog()?;
        let session = self
            .config
            .session_config(&profile.reading_overrides, &mut self.rng);
        let session_rng = StdRng::seed_from_u64(self.rng.gen());

        let runner = SessionRunner::new(
            profile.name.as_str(),
            session,
            catalog,
            seed,
            self.transport.clone(),
            self.refresher.clone(),
            self.cancel.clone(),
        )?
        .with_rng(session_rng);

        Ok(runner.run().await?)
    }

    /// Sleep the inter-account delay. Returns false on cancellation.
    async fn wait_after_account(&mut self) -> bool {
        let delay = self.account_delay.sample_secs(&mut self.rng);
        info!(delay_secs = delay.as_secs(), "Inter-account delay");
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(delay) => true,
        }
    }

    async fn send(&self, notification: Notification) {
        if let Err(e) = self.notifier.notify(&notification).await {
            warn!(error = %e, title = %notification.title(), "Notification not delivered");
        }
    }
}

/// Why an account needs a failure notification. Cancelled sessions do not.
fn failure_reason(report: &AccountReport) -> Option<String> {
    match &report.outcome {
        AccountOutcome::Failed { error } => Some(error.clone()),
        AccountOutcome::Session { summary } => match &summary.status {
            SessionStatus::Completed => None,
            SessionStatus::Aborted {
                reason: AbortReason::Cancelled,
            } => None,
            SessionStatus::Aborted { reason } => Some(reason.to_string()),
        },
    }
}

// =============================================================================
// Tests
// =============================================================================
