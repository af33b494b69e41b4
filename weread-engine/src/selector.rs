//! Position Selector
//!
//! Chooses the next chapter to claim as read. Pure given its inputs plus the
//! caller's random source; the session runner owns the cursor and the time of
//! the last book switch.
//!
//! # Modes
//!
//! - `sequential`: next chapter, then the first chapter of the next book,
//!   wrapping from the last book to the first. No randomness.
//! - `smart_random`: stay on the book with probability `book_continuity`,
//!   otherwise switch to another book if the cooldown has elapsed. On the
//!   same book, advance with probability `chapter_continuity`, otherwise jump
//!   to a random other chapter.
//! - `pure_random`: uniform book, then uniform chapter.

use rand::Rng;
use std::time::Duration;
use weread_domain::{Catalog, Cursor, Probability, ReadingMode};

use crate::error::{EngineError, EngineResult};

/// Tuning for `smart_random`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SelectorConfig {
    /// Chance of staying on the current book
    pub book_continuity: Probability,
    /// Chance of moving to the structurally-next chapter when staying
    pub chapter_continuity: Probability,
    /// Minimum session time between two book switches
    pub book_switch_cooldown: Duration,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            book_continuity: Probability::saturating(0.8),
            chapter_continuity: Probability::saturating(0.7),
            book_switch_cooldown: Duration::from_secs(300),
        }
    }
}

/// Outcome of one selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// Where to read next
    pub cursor: Cursor,
    /// True when the cursor moved to a different book
    pub switched_book: bool,
}

/// Picks reading positions according to a [`ReadingMode`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionSelector {
    mode: ReadingMode,
    config: SelectorConfig,
}

impl PositionSelector {
    /// Create a selector
    pub fn new(mode: ReadingMode, config: SelectorConfig) -> Self {
        Self { mode, config }
    }

    /// Active mode
    pub fn mode(&self) -> ReadingMode {
        self.mode
    }

    /// Choose the position after `current`.
    ///
    /// `now` and `last_switch_at` are offsets into the session; `None` means
    /// no switch has happened yet, so the cooldown does not apply.
    ///
    /// # Errors
    /// - `EngineError::EmptyCatalog` when there is nothing to read
    /// - `EngineError::Domain` when `current` lies outside the catalog
    pub fn next<R: Rng + ?Sized>(
        &self,
        catalog: &Catalog,
        current: Cursor,
        last_switch_at: Option<Duration>,
        now: Duration,
        rng: &mut R,
    ) -> EngineResult<Selection> {
        if catalog.total_chapters() == 0 {
            return Err(EngineError::EmptyCatalog);
        }
        catalog.check(current)?;

        let cursor = match self.mode {
            ReadingMode::Sequential => sequential(catalog, current),
            ReadingMode::PureRandom => pure_random(catalog, rng),
            ReadingMode::SmartRandom => {
                let wants_switch = catalog.len() > 1 && !self.config.book_continuity.roll(rng);
                if wants_switch && self.cooldown_elapsed(last_switch_at, now) {
                    Cursor::new(pick_other(catalog.len(), current.book, rng), 0)
                } else {
                    self.within_book(catalog, current, rng)
                }
            }
        };

        Ok(Selection {
            cursor,
            switched_book: cursor.book != current.book,
        })
    }

    fn cooldown_elapsed(&self, last_switch_at: Option<Duration>, now: Duration) -> bool {
        match last_switch_at {
            Some(at) => now.saturating_sub(at) >= self.config.book_switch_cooldown,
            None => true,
        }
    }

    fn within_book<R: Rng + ?Sized>(&self, catalog: &Catalog, current: Cursor, rng: &mut R) -> Cursor {
        let count = catalog.chapter_count(current.book);
        if count < 2 {
            return Cursor::new(current.book, 0);
        }
        let chapter = if self.config.chapter_continuity.roll(rng) {
            (current.chapter + 1) % count
        } else {
            pick_other(count, current.chapter, rng)
        };
        Cursor::new(current.book, chapter)
    }
}

fn sequential(catalog: &Catalog, current: Cursor) -> Cursor {
    if current.chapter + 1 < catalog.chapter_count(current.book) {
        return Cursor::new(current.book, current.chapter + 1);
    }
    Cursor::new((current.book + 1) % catalog.len(), 0)
}

fn pure_random<R: Rng + ?Sized>(catalog: &Catalog, rng: &mut R) -> Cursor {
    // Books without chapters cannot be drawn.
    let candidates: Vec<usize> = (0..catalog.len()).filter(|&b| catalog.chapter_count(b) > 0).collect();
    let book = candidates[rng.gen_range(0..candidates.len())];
    Cursor::new(book, rng.gen_range(0..catalog.chapter_count(book)))
}

/// Uniform index in `0..count` other than `exclude`. Requires `count >= 2`.
fn pick_other<R: Rng + ?Sized>(count: usize, exclude: usize, rng: &mut R) -> usize {
    let pick = rng.gen_range(0..count - 1);
    if pick >= exclude {
        pick + 1
    } else {
        pick
    }
}

// =============================================================================
// Tests
// =============================================================================
