//! Session Runner
//!
//! Drives one account through one timed reading session.
//!
//! # Flow
//!
//! ```text
//! select position → sign → send (timeout) → classify outcome → pace → loop
//! ```
//!
//! # Termination
//!
//! - `Completed` once the credited reading time reaches the target
//! - `Aborted` when the circuit breaker trips, the cookie cannot be renewed,
//!   or the cancellation token fires
//!
//! Both states yield a [`SessionSummary`]. Only configuration and signing
//! errors surface as `Err`.

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use weread_domain::{
    AnchorPolicy, Catalog, Cursor, Position, ReadingMode, SeedRecord, ValueRange, SESSION_COOKIE,
};
use weread_engine::{
    pick_user_agent, sign, Clock, PacingConfig, PacingController, PayloadContract,
    PositionSelector, RandomNonce, SelectorConfig, SystemClock,
};

use crate::error::{ExecError, ExecResult};
use crate::ports::{CredentialRefresher, ReadingTransport, SendOutcome};
use crate::summary::{AbortReason, SessionStatus, SessionSummary};

/// Simulated read seconds credited to the first request.
pub const INITIAL_READ_SECS: u64 = 30;

// =============================================================================
// Configuration
// =============================================================================

/// Everything one session needs to know.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Position selection policy
    pub mode: ReadingMode,
    /// `smart_random` tuning
    pub selector: SelectorConfig,
    /// Delay shaping
    pub pacing: PacingConfig,
    /// How the start position is chosen
    pub anchor: AnchorPolicy,
    /// Reading time to accumulate; zero completes immediately
    pub target_duration: Duration,
    /// Bound on a single request
    pub request_timeout: Duration,
    /// Retries of the same position after a network failure
    pub retry_times: u32,
    /// Backoff before each retry, in seconds
    pub retry_delay: ValueRange,
    /// Failed iterations in a row that abort the session
    pub circuit_breaker_threshold: u32,
    /// Random wait before the first request, in seconds
    pub startup_delay: Option<ValueRange>,
    /// Renew the cookie before the first request
    pub refresh_on_start: bool,
    /// Present one random browser User-Agent for the whole session
    pub rotate_user_agent: bool,
    /// Payload layout
    pub contract: PayloadContract,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            mode: ReadingMode::default(),
            selector: SelectorConfig::default(),
            pacing: PacingConfig::default(),
            anchor: AnchorPolicy::default(),
            target_duration: Duration::from_secs(60 * 60),
            request_timeout: Duration::from_secs(30),
            retry_times: 3,
            retry_delay: ValueRange::saturating(5.0, 15.0),
            circuit_breaker_threshold: 5,
            startup_delay: None,
            refresh_on_start: true,
            rotate_user_agent: false,
            contract: PayloadContract::V1,
        }
    }
}

// =============================================================================
// Session State
// =============================================================================

/// Mutable state owned by one runner.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    /// Cursor of the position being read
    pub cursor: Cursor,
    /// Last position sent
    pub current_position: Option<Position>,
    /// Credited reading time, never decreases
    pub elapsed: Duration,
    /// Reading time to reach
    pub target: Duration,
    /// Accepted requests
    pub success_count: u32,
    /// Failed iterations
    pub failure_count: u32,
    /// Failed iterations since the last success
    pub consecutive_failures: u32,
    /// Retries performed
    pub retry_count: u32,
    /// Cookie renewals performed
    pub refresh_count: u32,
    /// Session time of the last book switch
    pub last_book_switch_at: Option<Duration>,
    /// Wall-clock start of the session
    pub started_at: DateTime<Utc>,
    /// Monotonic start, the origin of session time
    pub started: Instant,
}

impl SessionState {
    fn new(cursor: Cursor, target: Duration) -> Self {
        Self {
            cursor,
            current_position: None,
            elapsed: Duration::ZERO,
            target,
            success_count: 0,
            failure_count: 0,
            consecutive_failures: 0,
            retry_count: 0,
            refresh_count: 0,
            last_book_switch_at: None,
            started_at: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Session time since the start
    pub fn session_time(&self) -> Duration {
        self.started.elapsed()
    }

    fn restart(&mut self) {
        self.started_at = Utc::now();
        self.started = Instant::now();
    }

    fn record_success(&mut self, position: Position, read: Duration) {
        self.success_count += 1;
        self.consecutive_failures = 0;
        self.elapsed += read;
        self.current_position = Some(position);
    }

    fn record_failure(&mut self) {
        self.failure_count += 1;
        self.consecutive_failures += 1;
    }
}

/// Result of one iteration after retries.
#[derive(Debug)]
enum Iteration {
    Accepted(Duration),
    Failed(String),
    AuthLost(String),
    Cancelled,
}

// =============================================================================
// Session Runner
// =============================================================================

/// Runs one account session to a terminal state.
pub struct SessionRunner {
    account: String,
    config: SessionConfig,
    catalog: Catalog,
    seed: SeedRecord,
    state: SessionState,
    selector: PositionSelector,
    pacing: PacingController,
    transport: Arc<dyn ReadingTransport>,
    refresher: Arc<dyn CredentialRefresher>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    cancel: CancellationToken,
    response_times: Vec<Duration>,
    books_visited: Vec<String>,
    chapters_visited: Vec<String>,
}

impl SessionRunner {
    /// Validate the seed, anchor the catalog and prepare a session.
    ///
    /// # Errors
    /// Returns `ExecError::Domain` for an invalid seed or when no start
    /// position can be derived.
    pub fn new(
        account: impl Into<String>,
        config: SessionConfig,
        catalog: Catalog,
        seed: SeedRecord,
        transport: Arc<dyn ReadingTransport>,
        refresher: Arc<dyn CredentialRefresher>,
        cancel: CancellationToken,
    ) -> ExecResult<Self> {
        seed.validate()?;
        let seed_book = seed.book_id();
        let seed_chapter = seed.chapter_id();
        let (catalog, cursor) =
            catalog.anchor(seed_book.as_deref(), seed_chapter.as_deref(), config.anchor)?;

        Ok(Self {
            account: account.into(),
            state: SessionState::new(cursor, config.target_duration),
            selector: PositionSelector::new(config.mode, config.selector),
            pacing: PacingController::new(config.pacing),
            config,
            catalog,
            seed,
            transport,
            refresher,
            clock: Arc::new(SystemClock),
            rng: StdRng::from_entropy(),
            cancel,
            response_times: Vec::new(),
            books_visited: Vec::new(),
            chapters_visited: Vec::new(),
        })
    }

    /// Use a fixed random source.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Use a different clock for payload timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Catalog after anchoring
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Current state
    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Run until completed or aborted.
    ///
    /// # Errors
    /// Only signing or catalog errors, which indicate bad configuration.
    pub async fn run(mut self) -> ExecResult<SessionSummary> {
        let session_id = Uuid::now_v7();
        self.state.restart();

        info!(
            %session_id,
            account = %self.account,
            mode = %self.config.mode,
            target_secs = self.state.target.as_secs(),
            "Reading session started"
        );

        let status = self.drive().await?;

        match &status {
            SessionStatus::Completed => info!(
                %session_id,
                account = %self.account,
                elapsed_secs = self.state.elapsed.as_secs(),
                successes = self.state.success_count,
                failures = self.state.failure_count,
                "Reading session completed"
            ),
            SessionStatus::Aborted { reason } => warn!(
                %session_id,
                account = %self.account,
                %reason,
                successes = self.state.success_count,
                failures = self.state.failure_count,
                "Reading session aborted"
            ),
        }

        Ok(self.summary(session_id, status))
    }

    async fn drive(&mut self) -> ExecResult<SessionStatus> {
        if self.state.target.is_zero() {
            return Ok(SessionStatus::Completed);
        }

        if let Some(range) = self.config.startup_delay {
            let wait = range.sample_secs(&mut self.rng);
            debug!(account = %self.account, wait_secs = wait.as_secs(), "Startup delay");
            if !self.pause(wait).await {
                return Ok(cancelled());
            }
        }

        if self.config.rotate_user_agent {
            let agent = pick_user_agent(&mut self.rng);
            debug!(account = %self.account, user_agent = agent, "Session User-Agent selected");
            self.seed.set_header("User-Agent", agent);
        }

        if self.config.refresh_on_start {
            if let Err(e) = self.refresh_cookie().await {
                return Ok(SessionStatus::Aborted {
                    reason: AbortReason::AuthExpired {
                        detail: e.to_string(),
                    },
                });
            }
        }

        let threshold = self.config.circuit_breaker_threshold.max(1);
        let mut nonces = RandomNonce::new(StdRng::seed_from_u64(self.rng.gen()));
        let mut read_secs = INITIAL_READ_SECS;

        loop {
            if self.state.elapsed >= self.state.target {
                return Ok(SessionStatus::Completed);
            }
            if self.cancel.is_cancelled() {
                return Ok(cancelled());
            }

            // The anchored cursor only feeds the selector
            let now = self.state.session_time();
            let selection = self.selector.next(
                &self.catalog,
                self.state.cursor,
                self.state.last_book_switch_at,
                now,
                &mut self.rng,
            )?;
            if selection.switched_book {
                self.state.last_book_switch_at = Some(now);
            }
            self.state.cursor = selection.cursor;

            let position = self.catalog.position_at(
                self.state.cursor,
                self.seed.chapter_index(),
                self.seed.content_offset(),
            )?;

            match self.attempt(&position, read_secs, &mut nonces).await? {
                Iteration::Accepted(response_time) => {
                    debug!(
                        account = %self.account,
                        position = %position,
                        read_secs,
                        response_ms = response_time.as_millis() as u64,
                        "Reading progress accepted"
                    );
                    self.record_visit(&position);
                    self.response_times.push(response_time);
                    self.state.record_success(position, Duration::from_secs(read_secs));
                    read_secs = 0;
                }
                Iteration::Failed(reason) => {
                    self.state.record_failure();
                    warn!(
                        account = %self.account,
                        position = %position,
                        consecutive = self.state.consecutive_failures,
                        %reason,
                        "Iteration failed after retries"
                    );
                    if self.state.consecutive_failures >= threshold {
                        error!(
                            account = %self.account,
                            consecutive = self.state.consecutive_failures,
                            "Circuit breaker tripped"
                        );
                        return Ok(SessionStatus::Aborted {
                            reason: AbortReason::CircuitBreaker {
                                consecutive_failures: self.state.consecutive_failures,
                            },
                        });
                    }
                }
                Iteration::AuthLost(detail) => {
                    self.state.record_failure();
                    error!(account = %self.account, %detail, "Session cookie could not be renewed");
                    return Ok(SessionStatus::Aborted {
                        reason: AbortReason::AuthExpired { detail },
                    });
                }
                Iteration::Cancelled => return Ok(cancelled()),
            }

            if self.state.elapsed >= self.state.target {
                return Ok(SessionStatus::Completed);
            }

            let delay = self.pacing.next_delay(self.state.session_time(), &mut self.rng);
            read_secs += delay.nominal.as_secs_f64().round() as u64;
            if !self.pause(delay.total()).await {
                return Ok(cancelled());
            }
        }
    }

    /// Send one position, retrying network failures and renewing the cookie
    /// once on authentication expiry.
    async fn attempt(
        &mut self,
        position: &Position,
        read_secs: u64,
        nonces: &mut RandomNonce<StdRng>,
    ) -> ExecResult<Iteration> {
        let mut retries_left = self.config.retry_times;
        let mut refreshed = false;

        loop {
            let payload = sign(
                &self.config.contract,
                &self.seed,
                position,
                read_secs,
                self.clock.as_ref(),
                nonces,
            )?;

            let outcome = match tokio::time::timeout(
                self.config.request_timeout,
                self.transport.send(&self.seed, &payload),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => SendOutcome::NetworkFailure {
                    reason: format!("timed out after {}s", self.config.request_timeout.as_secs()),
                },
            };

            match outcome {
                SendOutcome::Accepted { response_time } => {
                    return Ok(Iteration::Accepted(response_time));
                }
                SendOutcome::AuthExpired { reason } => {
                    if refreshed {
                        return Ok(Iteration::AuthLost(reason));
                    }
                    refreshed = true;
                    warn!(account = %self.account, %reason, "Session cookie expired, renewing");
                    if let Err(e) = self.refresh_cookie().await {
                        return Ok(Iteration::AuthLost(e.to_string()));
                    }
                }
                SendOutcome::NetworkFailure { reason } => {
                    if retries_left == 0 {
                        return Ok(Iteration::Failed(reason));
                    }
                    retries_left -= 1;
                    self.state.retry_count += 1;

                    let backoff = self.config.retry_delay.sample_secs(&mut self.rng);
                    debug!(
                        account = %self.account,
                        %reason,
                        backoff_secs = backoff.as_secs(),
                        retries_left,
                        "Retrying request"
                    );
                    if !self.pause(backoff).await {
                        return Ok(Iteration::Cancelled);
                    }
                }
            }
        }
    }

    async fn refresh_cookie(&mut self) -> ExecResult<()> {
        let value = self.refresher.refresh(&self.seed).await?;
        if value.is_empty() {
            return Err(ExecError::CredentialRefresh("renewal returned an empty cookie".to_string()));
        }
        self.seed.set_cookie(SESSION_COOKIE, value);
        self.state.refresh_count += 1;
        info!(account = %self.account, refreshes = self.state.refresh_count, "Session cookie renewed");
        Ok(())
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }

    fn record_visit(&mut self, position: &Position) {
        if !self.books_visited.contains(&position.book_id) {
            self.books_visited.push(position.book_id.clone());
        }
        if !self.chapters_visited.contains(&position.chapter_id) {
            self.chapters_visited.push(position.chapter_id.clone());
        }
    }

    fn summary(&self, session_id: Uuid, status: SessionStatus) -> SessionSummary {
        let book_names = self
            .books_visited
            .iter()
            .filter_map(|id| self.catalog.find_book(id))
            .filter_map(|idx| self.catalog.book(idx))
            .map(|book| book.name.clone())
            .collect();
        let avg_response_time = if self.response_times.is_empty() {
            None
        } else {
            let total: Duration = self.response_times.iter().sum();
            Some(total / self.response_times.len() as u32)
        };

        SessionSummary {
            session_id,
            account: self.account.clone(),
            status,
            target: self.state.target,
            elapsed: self.state.elapsed,
            success_count: self.state.success_count,
            failure_count: self.state.failure_count,
            retry_count: self.state.retry_count,
            refresh_count: self.state.refresh_count,
            break_count: self.pacing.break_count(),
            break_total: self.pacing.break_total(),
            books_visited: self.books_visited.clone(),
            book_names,
            chapters_visited: self.chapters_visited.clone(),
            avg_response_time,
            started_at: self.state.started_at,
            finished_at: Utc::now(),
        }
    }
}

fn cancelled() -> SessionStatus {
    SessionStatus::Aborted {
        reason: AbortReason::Cancelled,
    }
}
