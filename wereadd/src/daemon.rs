//! Daemon: repeated reading passes under a daily cap.
//!
//! # Lifecycle
//!
//! 1. Check the daily cap against the local calendar date
//! 2. Run one pass over all accounts
//! 3. Wait a randomized session interval (or until midnight when capped)
//! 4. Repeat until the cancellation token fires

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{Local, NaiveDate, NaiveDateTime};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use weread_exec::CombinedReport;

use crate::config::DaemonSection;
use crate::error::{DaemonError, DaemonResult};
use crate::orchestrator::Orchestrator;

/// Wait after a pass that failed outright
const ERROR_BACKOFF: Duration = Duration::from_secs(5 * 60);

/// Slack added to the wait for the next calendar day
const MIDNIGHT_MARGIN: Duration = Duration::from_secs(1);

// =============================================================================
// Calendar
// =============================================================================

/// Source of the local date and time.
pub trait Calendar: Send + Sync {
    /// Current local date and time
    fn now(&self) -> NaiveDateTime;

    /// Current local date
    fn today(&self) -> NaiveDate {
        self.now().date()
    }
}

/// Local wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemCalendar;

impl Calendar for SystemCalendar {
    fn now(&self) -> NaiveDateTime {
        Local::now().naive_local()
    }
}

/// Calendar that only moves when told to.
#[derive(Debug)]
pub struct FixedCalendar {
    now: Mutex<NaiveDateTime>,
}

impl FixedCalendar {
    /// Start at a given local date and time
    pub fn new(now: NaiveDateTime) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Jump to a new local date and time
    pub fn set(&self, now: NaiveDateTime) {
        *self.now.lock().unwrap_or_else(|e| e.into_inner()) = now;
    }
}

impl Calendar for FixedCalendar {
    fn now(&self) -> NaiveDateTime {
        *self.now.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// =============================================================================
// Daemon State
// =============================================================================

/// Passes completed on the current local day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaemonState {
    /// Passes finished since `day` began
    pub sessions_completed_today: u32,
    /// Local date the counter belongs to
    pub day: NaiveDate,
}

impl DaemonState {
    /// Fresh counter for a day
    pub fn new(day: NaiveDate) -> Self {
        Self {
            sessions_completed_today: 0,
            day,
        }
    }

    fn roll_over(&mut self, today: NaiveDate) {
        if today != self.day {
            info!(
                previous = %self.day,
                today = %today,
                completed = self.sessions_completed_today,
                "New day, resetting session counter"
            );
            self.day = today;
            self.sessions_completed_today = 0;
        }
    }

    /// Whether another pass may start today.
    pub fn can_start(&mut self, today: NaiveDate, max_daily_sessions: u32) -> bool {
        self.roll_over(today);
        self.sessions_completed_today < max_daily_sessions
    }

    /// Count a finished pass against the day it started on.
    pub fn record_pass(&mut self, day: NaiveDate) {
        self.roll_over(day);
        self.sessions_completed_today = self.sessions_completed_today.saturating_add(1);
    }
}

// =============================================================================
// Daemon
// =============================================================================

/// Runs reading passes until cancelled.
pub struct Daemon {
    orchestrator: Orchestrator,
    settings: DaemonSection,
    state: DaemonState,
    calendar: Arc<dyn Calendar>,
    cancel: CancellationToken,
    rng: StdRng,
}

impl Daemon {
    /// Create a daemon on the local wall clock.
    pub fn new(orchestrator: Orchestrator, cancel: CancellationToken) -> Self {
        let settings = orchestrator.config().daemon.clone();
        let calendar: Arc<dyn Calendar> = Arc::new(SystemCalendar);
        Self {
            orchestrator,
            settings,
            state: DaemonState::new(calendar.today()),
            calendar,
            cancel,
            rng: StdRng::from_entropy(),
        }
    }

    /// Use a different calendar, restarting the day counter on its date.
    pub fn with_calendar(mut self, calendar: Arc<dyn Calendar>) -> Self {
        self.state = DaemonState::new(calendar.today());
        self.calendar = calendar;
        self
    }

    /// Seed the session interval draws.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    /// Current day counter
    pub fn state(&self) -> DaemonState {
        self.state
    }

    /// Run one pass now, unless today's cap is reached.
    ///
    /// # Errors
    /// `DailyCapReached` when the cap refuses the pass.
    pub async fn run_once(&mut self) -> DaemonResult<CombinedReport> {
        let today = self.calendar.today();
        let limit = self.settings.max_daily_sessions;
        if !self.state.can_start(today, limit) {
            return Err(DaemonError::DailyCapReached {
                completed: self.state.sessions_completed_today,
                limit,
            });
        }

        let report = self.orchestrator.run_pass().await?;
        self.state.record_pass(today);

        info!(
            completed_today = self.state.sessions_completed_today,
            limit,
            succeeded = report.successful_accounts().len(),
            failed = report.failed_accounts().len(),
            "Daemon pass finished"
        );
        Ok(report)
    }

    /// Run passes until cancelled.
    pub async fn run(mut self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            max_daily_sessions = self.settings.max_daily_sessions,
            session_interval = %self.settings.session_interval,
            "Starting WeRead daemon"
        );

        while !self.cancel.is_cancelled() {
            let wait = match self.run_once().await {
                Ok(_) => {
                    let wait = self.settings.session_interval.sample_mins(&mut self.rng);
                    info!(wait_mins = wait.as_secs() / 60, "Next pass scheduled");
                    wait
                }
                Err(DaemonError::DailyCapReached { completed, limit }) => {
                    let wait = until_midnight(self.calendar.now());
                    warn!(
                        completed,
                        limit,
                        wait_secs = wait.as_secs(),
                        "Daily session cap reached, waiting for the next day"
                    );
                    wait
                }
                Err(e) => {
                    error!(error = %e, "Daemon pass failed");
                    ERROR_BACKOFF
                }
            };

            if !self.pause(wait).await {
                break;
            }
        }

        info!(
            completed_today = self.state.sessions_completed_today,
            "Daemon stopped"
        );
        Ok(())
    }

    /// Sleep unless cancelled first. Returns false on cancellation.
    async fn pause(&self, duration: Duration) -> bool {
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

/// Time left until the next local midnight.
pub fn until_midnight(now: NaiveDateTime) -> Duration {
    now.date()
        .succ_opt()
        .and_then(|tomorrow| tomorrow.and_hms_opt(0, 0, 0))
        .and_then(|midnight| (midnight - now).to_std().ok())
        .map(|wait| wait + MIDNIGHT_MARGIN)
        .unwrap_or(ERROR_BACKOFF)
}

// =============================================================================
// Tests
// =============================================================================
