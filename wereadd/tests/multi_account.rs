//! Multi-account passes against stub ports.
//!
//! Accounts share one scripted transport, so the script is consumed in
//! account order. Time is paused; pacing sleeps advance instantly.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use weread_domain::ValueRange;
use weread_exec::stub::{accepted, network_failure};
use weread_exec::{
    AbortReason, Notification, RecordingSink, ScriptedTransport, SessionStatus, StubRefresher,
};
use wereadd::{AccountProfile, Config, Orchestrator, ReadingOverrides, TEST_TEMPLATE};

fn three_accounts() -> Config {
    let mut config = Config::test();
    config.curl_config.users = vec![
        AccountProfile::inline("alice", TEST_TEMPLATE),
        AccountProfile::inline("bob", TEST_TEMPLATE),
        AccountProfile::inline("carol", TEST_TEMPLATE),
    ];
    config
}

fn orchestrator(
    config: Config,
    transport: &Arc<ScriptedTransport>,
    refresher: &Arc<StubRefresher>,
    sink: &Arc<RecordingSink>,
) -> Orchestrator {
    Orchestrator::new(
        config,
        transport.clone(),
        refresher.clone(),
        sink.clone(),
        CancellationToken::new(),
    )
    .with_seed(42)
    .with_account_delay(ValueRange::point(45.0).unwrap())
}

// =============================================================================
// Test: failure isolation
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_aborted_account_does_not_stop_the_pass() {
    // alice: two successes reach the one-minute target
    // bob: two failures trip the breaker (threshold 2, no retries)
    // carol: falls through to the accepted fallback
    let transport = Arc::new(ScriptedTransport::scripted(
        vec![accepted(), accepted(), network_failure(), network_failure()],
        accepted(),
    ));
    let refresher = Arc::new(StubRefresher::succeeding());
    let sink = Arc::new(RecordingSink::new());
    let mut orchestrator = orchestrator(three_accounts(), &transport, &refresher, &sink);

    let report = orchestrator.run_pass().await.unwrap();

    assert_eq!(report.accounts.len(), 3);
    assert_eq!(report.successful_accounts(), vec!["alice", "carol"]);
    assert_eq!(report.failed_accounts(), vec!["bob"]);

    let bob = report.accounts[1].summary().unwrap();
    assert_eq!(
        bob.status,
        SessionStatus::Aborted {
            reason: AbortReason::CircuitBreaker {
                consecutive_failures: 2
            }
        }
    );
    assert_eq!(bob.failure_count, 2);
    assert_eq!(bob.success_count, 0);

    assert_eq!(transport.sent_count(), 6);
    // One start-of-session renewal per account
    assert_eq!(refresher.calls(), 3);

    let received = sink.received();
    assert_eq!(received.len(), 2);
    assert!(matches!(
        &received[0],
        Notification::AccountFailed { account, .. } if account == "bob"
    ));
    match &received[1] {
        Notification::Combined { report: sent } => assert_eq!(sent.accounts.len(), 3),
        other => panic!("expected combined report, got {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn test_accounts_run_strictly_in_order() {
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());
    let sink = Arc::new(RecordingSink::new());
    let mut orchestrator = orchestrator(three_accounts(), &transport, &refresher, &sink);

    let report = orchestrator.run_pass().await.unwrap();

    let names: Vec<&str> = report.accounts.iter().map(|a| a.account.as_str()).collect();
    assert_eq!(names, vec!["alice", "bob", "carol"]);

    // Each session starts after the previous one finished plus the delay
    for pair in report.accounts.windows(2) {
        let previous = pair[0].summary().unwrap();
        let next = pair[1].summary().unwrap();
        assert!(next.started_at >= previous.finished_at);
    }
}

// =============================================================================
// Test: per-account overrides
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_account_overrides_merge_over_global() {
    let mut config = three_accounts();
    config.curl_config.users[1].reading_overrides = ReadingOverrides {
        target_duration: Some(ValueRange::point(2.0).unwrap()),
        ..ReadingOverrides::default()
    };
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());
    let sink = Arc::new(RecordingSink::new());
    let mut orchestrator = orchestrator(config, &transport, &refresher, &sink);

    let report = orchestrator.run_pass().await.unwrap();

    let targets: Vec<u64> = report
        .accounts
        .iter()
        .map(|a| a.summary().unwrap().target.as_secs())
        .collect();
    assert_eq!(targets, vec![60, 120, 60]);
    // 2 + 4 + 2 requests at 30 s each
    assert_eq!(transport.sent_count(), 8);
}

#[tokio::test(start_paused = true)]
async fn test_missing_template_file_falls_back_to_global() {
    let mut config = three_accounts();
    config.curl_config.users[2] = AccountProfile {
        name: "dave".to_string(),
        file_path: Some("/nonexistent/dave.sh".into()),
        content: None,
        reading_overrides: ReadingOverrides::default(),
    };
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());
    let sink = Arc::new(RecordingSink::new());
    let mut orchestrator = orchestrator(config, &transport, &refresher, &sink);

    let report = orchestrator.run_pass().await.unwrap();

    assert_eq!(report.successful_accounts(), vec!["alice", "bob", "dave"]);
}

#[tokio::test(start_paused = true)]
async fn test_notification_failure_does_not_affect_pass() {
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());
    let sink = Arc::new(RecordingSink::failing());
    let mut orchestrator = orchestrator(three_accounts(), &transport, &refresher, &sink);

    let report = orchestrator.run_pass().await.unwrap();

    assert_eq!(report.successful_accounts().len(), 3);
    assert_eq!(sink.received().len(), 1);
}
