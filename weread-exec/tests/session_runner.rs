//! Session runner behaviour against stub ports.
//!
//! Time is paused so pacing, backoff and timeouts advance instantly.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use weread_domain::{
    Book, Catalog, Chapter, Probability, ReadingMode, SecretMaterial, SeedRecord, ValueRange,
    SESSION_COOKIE,
};
use weread_engine::{PacingConfig, SelectorConfig, USER_AGENTS, WEB_SIGNING_KEY};
use weread_exec::stub::{accepted, auth_expired, network_failure};
use weread_exec::{
    AbortReason, ScriptedTransport, SessionConfig, SessionRunner, SessionStatus, StubRefresher,
};

fn seed() -> SeedRecord {
    let mut cookies = BTreeMap::new();
    cookies.insert(SESSION_COOKIE.to_string(), "original".to_string());
    let fields = json!({
        "appId": "wb182564874603h",
        "b": "book-a",
        "c": "a-1",
        "ci": 12,
        "co": 389,
        "sm": "summary",
        "pr": 74,
        "ps": "a2c325a07a5e1f29g0117fd",
        "pc": "1d432c107a5e1f29g011937",
    });
    SeedRecord::new(
        vec![("User-Agent".to_string(), "Captured/1.0".to_string())],
        cookies,
        fields.as_object().unwrap().clone(),
        SecretMaterial::new(WEB_SIGNING_KEY),
    )
}

fn catalog() -> Catalog {
    Catalog::new(vec![
        Book::new(
            "book-a",
            "Book A",
            vec![Chapter::new("a-0"), Chapter::new("a-1"), Chapter::new("a-2")],
        )
        .unwrap(),
        Book::new("book-b", "Book B", vec![Chapter::with_index("b-0", 40)]).unwrap(),
    ])
}

/// Sequential mode, exact 30 s gaps, no breaks, 2 retries, breaker at 4.
fn config(target_secs: u64) -> SessionConfig {
    SessionConfig {
        mode: ReadingMode::Sequential,
        pacing: PacingConfig {
            enabled: false,
            speed_variation: false,
            reading_interval: ValueRange::point(30.0).unwrap(),
            rate_limit: 0,
            break_probability: Probability::NEVER,
            ..PacingConfig::default()
        },
        target_duration: Duration::from_secs(target_secs),
        request_timeout: Duration::from_secs(10),
        retry_times: 2,
        retry_delay: ValueRange::point(5.0).unwrap(),
        circuit_breaker_threshold: 4,
        ..SessionConfig::default()
    }
}

fn runner(
    config: SessionConfig,
    transport: &Arc<ScriptedTransport>,
    refresher: &Arc<StubRefresher>,
    cancel: CancellationToken,
) -> SessionRunner {
    SessionRunner::new(
        "alice",
        config,
        catalog(),
        seed(),
        transport.clone(),
        refresher.clone(),
        cancel,
    )
    .unwrap()
    .with_rng(StdRng::seed_from_u64(2024))
}

#[tokio::test(start_paused = true)]
async fn test_zero_target_completes_without_requests() {
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());

    let summary = runner(config(0), &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert_eq!(summary.status, SessionStatus::Completed);
    assert_eq!(transport.sent_count(), 0);
    assert_eq!(refresher.calls(), 0);
    assert_eq!(summary.success_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_session_completes_at_target() {
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());

    let summary = runner(config(300), &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert!(summary.is_completed());
    assert_eq!(summary.success_count, 10);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(summary.elapsed, Duration::from_secs(300));
    assert_eq!(summary.refresh_count, 1);
    assert_eq!(summary.avg_response_time, Some(Duration::from_millis(120)));
    assert_eq!(transport.sent_count(), 10);
    assert_eq!(summary.books_visited, vec!["book-a", "book-b"]);
    assert_eq!(summary.book_names, vec!["Book A", "Book B"]);
}

#[tokio::test(start_paused = true)]
async fn test_first_request_reads_position_after_seed() {
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());

    runner(config(150), &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    let sent = transport.sent();
    let chapters: Vec<_> = sent.iter().map(|p| p.get("c").unwrap().clone()).collect();
    // The seed chapter a-1 is only the starting point
    assert_eq!(chapters, vec![json!("a-2"), json!("b-0"), json!("a-0"), json!("a-1"), json!("a-2")]);

    // Configured ordinal, then explicit index
    assert_eq!(sent[0].get("ci"), Some(&json!(2)));
    assert_eq!(sent[1].get("ci"), Some(&json!(40)));
    assert_eq!(sent[2].get("ci"), Some(&json!(0)));
    assert_eq!(sent[0].get("co"), Some(&json!(389)));
    assert!(sent.iter().all(|p| p.get("rt") == Some(&json!(30))));

    // Renewed cookie used from the first request on
    assert!(transport.cookies_seen().iter().all(|c| c.as_deref() == Some("fresh-0001")));
}

#[tokio::test(start_paused = true)]
async fn test_smart_random_first_request_leaves_seed_chapter() {
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());
    let config = SessionConfig {
        mode: ReadingMode::SmartRandom,
        selector: SelectorConfig {
            book_continuity: Probability::ALWAYS,
            chapter_continuity: Probability::NEVER,
            book_switch_cooldown: Duration::ZERO,
        },
        ..config(30)
    };

    runner(config, &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].get("b"), Some(&json!("book-a")));
    assert_ne!(sent[0].get("c"), Some(&json!("a-1")));
}

#[tokio::test(start_paused = true)]
async fn test_state_records_session_start() {
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());
    let session = runner(config(60), &transport, &refresher, CancellationToken::new());

    let created_at = session.state().started_at;
    assert_eq!(session.state().session_time(), Duration::ZERO);

    let summary = session.run().await.unwrap();

    assert!(summary.started_at >= created_at);
    assert!(summary.finished_at >= summary.started_at);
}

#[tokio::test(start_paused = true)]
async fn test_persistent_failure_trips_circuit_breaker() {
    let transport = Arc::new(ScriptedTransport::always(network_failure()));
    let refresher = Arc::new(StubRefresher::succeeding());

    let summary = runner(config(3600), &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert_eq!(
        summary.status,
        SessionStatus::Aborted {
            reason: AbortReason::CircuitBreaker {
                consecutive_failures: 4
            }
        }
    );
    assert_eq!(summary.failure_count, 4);
    assert_eq!(summary.success_count, 0);
    assert_eq!(summary.retry_count, 8);
    assert_eq!(transport.sent_count(), 12);
    assert_eq!(summary.elapsed, Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn test_retries_recover_transient_failures() {
    let transport = Arc::new(ScriptedTransport::scripted(
        vec![network_failure(), network_failure()],
        accepted(),
    ));
    let refresher = Arc::new(StubRefresher::succeeding());

    let summary = runner(config(60), &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert!(summary.is_completed());
    assert_eq!(summary.retry_count, 2);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(summary.success_count, 2);
    assert_eq!(transport.sent_count(), 4);

    // Retries re-sign the same position with fresh nonces
    let sent = transport.sent();
    assert_eq!(sent[0].get("c"), sent[2].get("c"));
}

#[tokio::test(start_paused = true)]
async fn test_isolated_failure_does_not_abort() {
    let transport = Arc::new(ScriptedTransport::scripted(
        vec![accepted(), network_failure()],
        accepted(),
    ));
    let refresher = Arc::new(StubRefresher::succeeding());
    let config = SessionConfig {
        retry_times: 0,
        ..config(120)
    };

    let summary = runner(config, &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert!(summary.is_completed());
    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.failure_count, 1);
    assert_eq!(summary.elapsed, Duration::from_secs(120));

    // Read time since the last accepted request carries over the failure
    assert_eq!(transport.sent()[2].get("rt"), Some(&json!(60)));
}

#[tokio::test(start_paused = true)]
async fn test_auth_expiry_refreshes_once_and_retries() {
    let transport = Arc::new(ScriptedTransport::scripted(vec![auth_expired()], accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());

    let summary = runner(config(30), &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert!(summary.is_completed());
    assert_eq!(summary.refresh_count, 2);
    assert_eq!(summary.failure_count, 0);
    assert_eq!(
        transport.cookies_seen(),
        vec![Some("fresh-0001".to_string()), Some("fresh-0002".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_auth_expiry_after_refresh_aborts() {
    let transport = Arc::new(ScriptedTransport::always(auth_expired()));
    let refresher = Arc::new(StubRefresher::succeeding());

    let summary = runner(config(3600), &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert!(matches!(
        summary.status,
        SessionStatus::Aborted {
            reason: AbortReason::AuthExpired { .. }
        }
    ));
    assert_eq!(refresher.calls(), 2);
    assert_eq!(transport.sent_count(), 2);
    assert_eq!(summary.failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_failed_start_refresh_aborts_before_sending() {
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::failing());

    let summary = runner(config(600), &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert!(!summary.is_completed());
    assert_eq!(transport.sent_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_transport_counts_as_failure() {
    let transport =
        Arc::new(ScriptedTransport::always(accepted()).with_latency(Duration::from_secs(60)));
    let refresher = Arc::new(StubRefresher::succeeding());
    let config = SessionConfig {
        retry_times: 0,
        circuit_breaker_threshold: 2,
        refresh_on_start: false,
        ..config(600)
    };

    let summary = runner(config, &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    assert_eq!(
        summary.status,
        SessionStatus::Aborted {
            reason: AbortReason::CircuitBreaker {
                consecutive_failures: 2
            }
        }
    );
    assert_eq!(summary.failure_count, 2);
    assert_eq!(summary.success_count, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_stops_between_iterations() {
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(95)).await;
        trigger.cancel();
    });

    let summary = runner(config(3600), &transport, &refresher, cancel)
        .run()
        .await
        .unwrap();

    assert_eq!(
        summary.status,
        SessionStatus::Aborted {
            reason: AbortReason::Cancelled
        }
    );
    assert_eq!(summary.success_count, 4);
    assert_eq!(transport.sent_count(), 4);
}

#[tokio::test(start_paused = true)]
async fn test_rotated_user_agent_is_stable_for_session() {
    let transport = Arc::new(ScriptedTransport::always(accepted()));
    let refresher = Arc::new(StubRefresher::succeeding());
    let config = SessionConfig {
        rotate_user_agent: true,
        ..config(120)
    };

    runner(config, &transport, &refresher, CancellationToken::new())
        .run()
        .await
        .unwrap();

    let agents = transport.user_agents_seen();
    let first = agents[0].clone().unwrap();
    assert!(USER_AGENTS.contains(&first.as_str()));
    assert!(agents.iter().all(|a| a.as_deref() == Some(first.as_str())));
}

#[test]
fn test_invalid_seed_is_rejected_up_front() {
    let mut fields = seed().fields().clone();
    fields.remove("pc");
    let broken = SeedRecord::new(
        seed().headers().to_vec(),
        seed().cookies().clone(),
        fields,
        SecretMaterial::new(WEB_SIGNING_KEY),
    );

    let result = SessionRunner::new(
        "bob",
        config(60),
        catalog(),
        broken,
        Arc::new(ScriptedTransport::always(accepted())),
        Arc::new(StubRefresher::succeeding()),
        CancellationToken::new(),
    );

    assert!(result.is_err());
}
