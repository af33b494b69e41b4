//! Pacing Controller
//!
//! Shapes the time between requests so a session reads like a person:
//! a speed multiplier re-rolled once per window of session time, and
//! occasional breaks. Never fails; it only produces durations.

use rand::Rng;
use std::time::Duration;
use tracing::debug;
use weread_domain::{Probability, ValueRange};

/// Smallest speed multiplier applied, keeps delays bounded.
const MIN_SPEED: f64 = 0.1;

/// Pacing parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingConfig {
    /// Master switch for speed variation and breaks
    pub enabled: bool,
    /// Re-roll the speed multiplier; when false it stays at 1.0
    pub speed_variation: bool,
    /// Range the multiplier is drawn from
    pub speed_range: ValueRange,
    /// Session time between two multiplier rolls
    pub speed_window: Duration,
    /// Base interval between requests, in seconds
    pub reading_interval: ValueRange,
    /// Requests per minute ceiling, 0 disables the floor
    pub rate_limit: u32,
    /// Chance of a break after each request
    pub break_probability: Probability,
    /// Break length, in seconds
    pub break_duration: ValueRange,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            speed_variation: true,
            speed_range: ValueRange::saturating(0.8, 1.3),
            speed_window: Duration::from_secs(30),
            reading_interval: ValueRange::saturating(25.0, 35.0),
            rate_limit: 10,
            break_probability: Probability::saturating(0.15),
            break_duration: ValueRange::saturating(30.0, 180.0),
        }
    }
}

/// Mutable pacing state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PacingState {
    /// Current divisor applied to the base interval
    pub speed_multiplier: f64,
    /// Session time of the last roll, `None` before the first request
    pub speed_last_rolled_at: Option<Duration>,
}

impl Default for PacingState {
    fn default() -> Self {
        Self {
            speed_multiplier: 1.0,
            speed_last_rolled_at: None,
        }
    }
}

/// Wait computed for one gap between requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Delay {
    /// Reading interval after speed and rate limit
    pub nominal: Duration,
    /// Extra break, if one was drawn
    pub pause: Option<Duration>,
}

impl Delay {
    /// Nominal interval plus any break
    pub fn total(&self) -> Duration {
        self.nominal + self.pause.unwrap_or_default()
    }
}

/// Computes inter-request delays and records breaks.
#[derive(Debug, Clone)]
pub struct PacingController {
    config: PacingConfig,
    state: PacingState,
    break_count: u32,
    break_total: Duration,
}

impl PacingController {
    /// Create a controller
    pub fn new(config: PacingConfig) -> Self {
        Self {
            config,
            state: PacingState::default(),
            break_count: 0,
            break_total: Duration::ZERO,
        }
    }

    /// Current state
    pub fn state(&self) -> PacingState {
        self.state
    }

    /// Breaks taken so far
    pub fn break_count(&self) -> u32 {
        self.break_count
    }

    /// Total break time so far
    pub fn break_total(&self) -> Duration {
        self.break_total
    }

    /// Nominal delay before the next request.
    ///
    /// `elapsed` is session time; the multiplier is re-rolled when a full
    /// window has passed since the previous roll.
    pub fn delay_before_next_request<R: Rng + ?Sized>(
        &mut self,
        elapsed: Duration,
        rng: &mut R,
    ) -> Duration {
        self.maybe_reroll(elapsed, rng);

        let base = self.config.reading_interval.sample(rng);
        let mut secs = base / self.state.speed_multiplier.max(MIN_SPEED);
        if self.config.rate_limit > 0 {
            secs = secs.max(60.0 / f64::from(self.config.rate_limit));
        }
        Duration::from_secs_f64(secs)
    }

    /// Bernoulli trial for a break; records it when drawn.
    pub fn maybe_break<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Option<Duration> {
        if !self.config.enabled || !self.config.break_probability.roll(rng) {
            return None;
        }
        let pause = self.config.break_duration.sample_secs(rng);
        self.break_count += 1;
        self.break_total += pause;
        debug!(pause_secs = pause.as_secs(), breaks = self.break_count, "Taking a break");
        Some(pause)
    }

    /// Nominal delay plus optional break for one gap.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, elapsed: Duration, rng: &mut R) -> Delay {
        let nominal = self.delay_before_next_request(elapsed, rng);
        Delay {
            nominal,
            pause: self.maybe_break(rng),
        }
    }

    fn maybe_reroll<R: Rng + ?Sized>(&mut self, elapsed: Duration, rng: &mut R) {
        if !self.config.enabled || !self.config.speed_variation {
            self.state.speed_multiplier = 1.0;
            return;
        }
        let due = match self.state.speed_last_rolled_at {
            Some(at) => elapsed.saturating_sub(at) >= self.config.speed_window,
            None => true,
        };
        if due {
            self.state.speed_multiplier = self.config.speed_range.sample(rng);
            self.state.speed_last_rolled_at = Some(elapsed);
            debug!(multiplier = self.state.speed_multiplier, "Reading speed re-rolled");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
