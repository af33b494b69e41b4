//! Stub implementations for testing.
//!
//! These implementations simulate the reading endpoint, cookie renewal and
//! notification delivery without making real network calls.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use weread_domain::SeedRecord;
use weread_engine::SignedPayload;

use crate::error::ExecError;
use crate::ports::{CredentialRefresher, Notification, NotificationSink, ReadingTransport, SendOutcome};

/// Accepted outcome with a fixed latency, handy for scripts.
pub fn accepted() -> SendOutcome {
    SendOutcome::Accepted {
        response_time: Duration::from_millis(120),
    }
}

/// Network failure outcome.
pub fn network_failure() -> SendOutcome {
    SendOutcome::NetworkFailure {
        reason: "connection reset".to_string(),
    }
}

/// Authentication-expired outcome.
pub fn auth_expired() -> SendOutcome {
    SendOutcome::AuthExpired {
        reason: "no succ in response".to_string(),
    }
}

// =============================================================================
// Scripted Transport
// =============================================================================

/// Stub transport for testing.
///
/// Replays scripted outcomes in order, then repeats a fallback outcome.
pub struct ScriptedTransport {
    /// Outcomes still to hand out
    script: Mutex<VecDeque<SendOutcome>>,
    /// Outcome once the script is exhausted
    fallback: SendOutcome,
    /// Simulated latency per request
    latency: Duration,
    /// Every payload received
    sent: Mutex<Vec<SignedPayload>>,
    /// Seed (headers and cookies) attached to each request
    seeds: Mutex<Vec<SeedRecord>>,
}

impl ScriptedTransport {
    /// Transport that always answers with `outcome`.
    pub fn always(outcome: SendOutcome) -> Self {
        Self::scripted(Vec::new(), outcome)
    }

    /// Transport that plays `script` and then repeats `fallback`.
    pub fn scripted(script: Vec<SendOutcome>, fallback: SendOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            latency: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
            seeds: Mutex::new(Vec::new()),
        }
    }

    /// Sleep this long inside every `send`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Number of requests received.
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Payloads received, in order.
    pub fn sent(&self) -> Vec<SignedPayload> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Session cookie attached to each request, in order.
    pub fn cookies_seen(&self) -> Vec<Option<String>> {
        self.seeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|seed| seed.cookie(weread_domain::SESSION_COOKIE).map(str::to_string))
            .collect()
    }

    /// User-Agent header attached to each request, in order.
    pub fn user_agents_seen(&self) -> Vec<Option<String>> {
        self.seeds
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|seed| seed.header("user-agent").map(str::to_string))
            .collect()
    }
}

#[async_trait]
impl ReadingTransport for ScriptedTransport {
    async fn send(&self, seed: &SeedRecord, payload: &SignedPayload) -> SendOutcome {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        self.sent.lock().unwrap_or_else(|e| e.into_inner()).push(payload.clone());
        self.seeds.lock().unwrap_or_else(|e| e.into_inner()).push(seed.clone());

        let next = self.script.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        let outcome = next.unwrap_or_else(|| self.fallback.clone());
        tracing::debug!(?outcome, "Stub: request handled");
        outcome
    }
}

// =============================================================================
// Stub Refresher
// =============================================================================

/// Stub cookie renewal.
///
/// Hands out `fresh-0001`, `fresh-0002`, ... or always fails.
pub struct StubRefresher {
    succeed: bool,
    calls: Mutex<u32>,
}

impl StubRefresher {
    /// Refresher whose renewals succeed.
    pub fn succeeding() -> Self {
        Self {
            succeed: true,
            calls: Mutex::new(0),
        }
    }

    /// Refresher whose renewals always fail.
    pub fn failing() -> Self {
        Self {
            succeed: false,
            calls: Mutex::new(0),
        }
    }

    /// Number of renewal attempts.
    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl CredentialRefresher for StubRefresher {
    async fn refresh(&self, _seed: &SeedRecord) -> Result<String, ExecError> {
        let mut calls = self.calls.lock().unwrap_or_else(|e| e.into_inner());
        *calls += 1;
        if self.succeed {
            Ok(format!("fresh-{:04}", *calls))
        } else {
            Err(ExecError::CredentialRefresh("Simulated renewal failure".to_string()))
        }
    }
}

// =============================================================================
// Recording Sink
// =============================================================================

/// Notification sink that keeps everything it receives.
#[derive(Default)]
pub struct RecordingSink {
    received: Mutex<Vec<Notification>>,
    fail: bool,
}

impl RecordingSink {
    /// Sink that accepts every notification.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sink that records, then reports a delivery failure.
    pub fn failing() -> Self {
        Self {
            received: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    /// Notifications received, in order.
    pub fn received(&self) -> Vec<Notification> {
        self.received.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl NotificationSink for RecordingSink {
    async fn notify(&self, notification: &Notification) -> Result<(), ExecError> {
        self.received
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notification.clone());
        if self.fail {
            return Err(ExecError::Notification("Simulated delivery failure".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_refresher_counts_calls() {
        let refresher = StubRefresher::succeeding();
        let seed = weread_domain::SeedRecord::new(
            vec![],
            Default::default(),
            Default::default(),
            weread_domain::SecretMaterial::new("k"),
        );

        assert_eq!(refresher.refresh(&seed).await.unwrap(), "fresh-0001");
        assert_eq!(refresher.refresh(&seed).await.unwrap(), "fresh-0002");
        assert_eq!(refresher.calls(), 2);

        assert!(StubRefresher::failing().refresh(&seed).await.is_err());
    }

    #[tokio::test]
    async fn test_recording_sink_keeps_order() {
        let sink = RecordingSink::failing();
        let note = Notification::AccountFailed {
            account: "a".to_string(),
            reason: "x".to_string(),
        };

        assert!(sink.notify(&note).await.is_err());
        assert_eq!(sink.received(), vec![note]);
    }
}
