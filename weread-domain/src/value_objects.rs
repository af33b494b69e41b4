//! Value Objects for the WeRead domain
//!
//! Immutable, validated primitives.
//! All value objects enforce invariants at construction time.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Domain errors for value object and entity validation
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DomainError {
    /// Range string could not be parsed or has min > max
    #[error("Invalid range: {0}")]
    InvalidRange(String),

    /// Probability outside [0, 1]
    #[error("Invalid probability: {0}")]
    InvalidProbability(String),

    /// Unknown reading mode name
    #[error("Invalid reading mode: {0}")]
    InvalidReadingMode(String),

    /// Book definition is unusable (no id, no chapters)
    #[error("Invalid book: {0}")]
    InvalidBook(String),

    /// No start position could be derived from seed or configuration
    #[error("Invalid catalog: {0}")]
    InvalidCatalog(String),

    /// Cursor does not point into the catalog
    #[error("Position out of catalog bounds: book {book}, chapter {chapter}")]
    OutOfBounds {
        /// Book index
        book: usize,
        /// Chapter index within the book
        chapter: usize,
    },

    /// Seed record failed validation
    #[error("Invalid seed record: {}", .0.join("; "))]
    InvalidSeed(Vec<String>),
}

// =============================================================================
// ValueRange
// =============================================================================

/// Largest accepted bound. Read as minutes it still fits a `Duration`.
pub const MAX_RANGE_BOUND: f64 = 1.0e9;

/// Closed numeric range written as `"min-max"` or a single point `"value"`.
///
/// # Invariants
/// - `0 <= min <= max <= MAX_RANGE_BOUND`
/// - Both bounds are finite
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RangeRepr", into = "String")]
pub struct ValueRange {
    min: f64,
    max: f64,
}

impl ValueRange {
    /// Create a new range with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidRange` if a bound is negative, not finite,
    /// above `MAX_RANGE_BOUND`, or `min > max`
    pub fn new(min: f64, max: f64) -> Result<Self, DomainError> {
        if !min.is_finite() || !max.is_finite() {
            return Err(DomainError::InvalidRange(format!("{}-{}", min, max)));
        }
        if min < 0.0 {
            return Err(DomainError::InvalidRange(format!("negative bound: {}", min)));
        }
        if min > max {
            return Err(DomainError::InvalidRange(format!("min {} exceeds max {}", min, max)));
        }
        if max > MAX_RANGE_BOUND {
            return Err(DomainError::InvalidRange(format!(
                "bound {} exceeds {}",
                max, MAX_RANGE_BOUND
            )));
        }
        Ok(Self { min, max })
    }

    /// Build a range without failing: bounds are swapped if inverted,
    /// non-finite values become 0 and the rest are clamped into
    /// `0..=MAX_RANGE_BOUND`.
    pub fn saturating(a: f64, b: f64) -> Self {
        let clean = |v: f64| if v.is_finite() { v.clamp(0.0, MAX_RANGE_BOUND) } else { 0.0 };
        let (a, b) = (clean(a), clean(b));
        Self {
            min: a.min(b),
            max: a.max(b),
        }
    }

    /// Create a range holding a single value
    pub fn point(value: f64) -> Result<Self, DomainError> {
        Self::new(value, value)
    }

    /// Lower bound
    pub fn min(&self) -> f64 {
        self.min
    }

    /// Upper bound
    pub fn max(&self) -> f64 {
        self.max
    }

    /// True when min == max
    pub fn is_point(&self) -> bool {
        self.min == self.max
    }

    /// Draw uniformly from the range (inclusive).
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        if self.is_point() {
            return self.min;
        }
        rng.gen_range(self.min..=self.max)
    }

    /// Draw a value and interpret it as seconds.
    pub fn sample_secs<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs_f64(self.sample(rng))
    }

    /// Draw a value and interpret it as minutes.
    pub fn sample_mins<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_secs_f64(self.sample(rng) * 60.0)
    }
}

impl FromStr for ValueRange {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parse = |part: &str| {
            part.trim()
                .parse::<f64>()
                .map_err(|_| DomainError::InvalidRange(format!("cannot parse '{}'", s)))
        };

        match s.split_once('-') {
            Some((lo, hi)) => Self::new(parse(lo)?, parse(hi)?),
            None => Self::point(parse(s)?),
        }
    }
}

impl fmt::Display for ValueRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_point() {
            write!(f, "{}", self.min)
        } else {
            write!(f, "{}-{}", self.min, self.max)
        }
    }
}

impl From<ValueRange> for String {
    fn from(range: ValueRange) -> Self {
        range.to_string()
    }
}

/// Wire form: either `"25-35"` or a bare number.
#[derive(Deserialize)]
#[serde(untagged)]
enum RangeRepr {
    Text(String),
    Number(f64),
}

impl TryFrom<RangeRepr> for ValueRange {
    type Error = DomainError;

    fn try_from(repr: RangeRepr) -> Result<Self, Self::Error> {
        match repr {
            RangeRepr::Text(s) => s.parse(),
            RangeRepr::Number(n) => Self::point(n),
        }
    }
}

// =============================================================================
// Probability
// =============================================================================

/// Probability in the closed interval [0, 1]
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Probability(f64);

impl Probability {
    /// Certain event
    pub const ALWAYS: Probability = Probability(1.0);
    /// Impossible event
    pub const NEVER: Probability = Probability(0.0);

    /// Create a new Probability with validation
    ///
    /// # Errors
    /// Returns `DomainError::InvalidProbability` if value is NaN or outside [0, 1]
    pub fn new(value: f64) -> Result<Self, DomainError> {
        if !(0.0..=1.0).contains(&value) {
            return Err(DomainError::InvalidProbability(format!(
                "{} is outside [0, 1]",
                value
            )));
        }
        Ok(Self(value))
    }

    /// Clamp any value into [0, 1]; NaN becomes 0.
    pub fn saturating(value: f64) -> Self {
        if value.is_nan() {
            return Self::NEVER;
        }
        Self(value.clamp(0.0, 1.0))
    }

    /// Get the underlying value
    pub fn value(&self) -> f64 {
        self.0
    }

    /// Run one Bernoulli trial.
    pub fn roll<R: Rng + ?Sized>(&self, rng: &mut R) -> bool {
        rng.gen_bool(self.0)
    }
}

impl TryFrom<f64> for Probability {
    type Error = DomainError;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Probability> for f64 {
    fn from(p: Probability) -> Self {
        p.0
    }
}

impl fmt::Display for Probability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// ReadingMode
// =============================================================================

/// Policy used to pick the next reading position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadingMode {
    /// Stay on a book with some probability, jump chapters occasionally
    #[default]
    SmartRandom,
    /// Walk every chapter of every book in catalog order
    Sequential,
    /// Uniform book, then uniform chapter
    PureRandom,
}

impl ReadingMode {
    /// Configuration name of the mode
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingMode::SmartRandom => "smart_random",
            ReadingMode::Sequential => "sequential",
            ReadingMode::PureRandom => "pure_random",
        }
    }
}

impl FromStr for ReadingMode {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "smart_random" => Ok(ReadingMode::SmartRandom),
            "sequential" => Ok(ReadingMode::Sequential),
            "pure_random" => Ok(ReadingMode::PureRandom),
            other => Err(DomainError::InvalidReadingMode(format!(
                "{}. Expected: smart_random, sequential, pure_random",
                other
            ))),
        }
    }
}

impl fmt::Display for ReadingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_range_parse_pair() {
        let range: ValueRange = "60-70".parse().unwrap();
        assert_eq!(range.min(), 60.0);
        assert_eq!(range.max(), 70.0);
        assert_eq!(range.to_string(), "60-70");
    }

    #[test]
    fn test_range_parse_point() {
        let range: ValueRange = " 30 ".parse().unwrap();
        assert!(range.is_point());
        assert_eq!(range.to_string(), "30");
    }

    #[test]
    fn test_range_rejects_inverted_and_garbage() {
        assert!("70-60".parse::<ValueRange>().is_err());
        assert!("abc".parse::<ValueRange>().is_err());
        assert!("5-".parse::<ValueRange>().is_err());
        assert!(ValueRange::new(-1.0, 2.0).is_err());
        assert_eq!(ValueRange::saturating(9.0, -1.0), ValueRange::new(0.0, 9.0).unwrap());
    }

    #[test]
    fn test_range_rejects_bounds_too_large_for_duration() {
        assert!("1e18".parse::<ValueRange>().is_err());
        assert!("60-1e18".parse::<ValueRange>().is_err());
        assert!(serde_json::from_str::<ValueRange>("1e18").is_err());

        let widest = ValueRange::point(MAX_RANGE_BOUND).unwrap();
        let mut rng = StdRng::seed_from_u64(3);
        assert_eq!(
            widest.sample_mins(&mut rng),
            Duration::from_secs_f64(MAX_RANGE_BOUND * 60.0)
        );
        assert_eq!(ValueRange::saturating(0.0, 1e18).max(), MAX_RANGE_BOUND);
    }

    #[test]
    fn test_range_sample_stays_within_bounds() {
        let range = ValueRange::new(0.8, 1.3).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        for _ in 0..1_000 {
            let v = range.sample(&mut rng);
            assert!((0.8..=1.3).contains(&v));
        }
    }

    #[test]
    fn test_range_point_sample_is_exact() {
        let range = ValueRange::point(42.0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(range.sample(&mut rng), 42.0);
        assert_eq!(range.sample_mins(&mut rng), Duration::from_secs(42 * 60));
    }

    #[test]
    fn test_range_serde_accepts_text_and_number() {
        let from_text: ValueRange = serde_json::from_str("\"25-35\"").unwrap();
        let from_number: ValueRange = serde_json::from_str("12").unwrap();

        assert_eq!(from_text, ValueRange::new(25.0, 35.0).unwrap());
        assert_eq!(from_number, ValueRange::point(12.0).unwrap());
        assert_eq!(serde_json::to_string(&from_text).unwrap(), "\"25-35\"");
        assert!(serde_json::from_str::<ValueRange>("\"9-1\"").is_err());
    }

    #[test]
    fn test_probability_bounds() {
        assert!(Probability::new(0.0).is_ok());
        assert!(Probability::new(1.0).is_ok());
        assert!(Probability::new(1.01).is_err());
        assert!(Probability::new(-0.1).is_err());
        assert!(Probability::new(f64::NAN).is_err());
        assert_eq!(Probability::saturating(1.7), Probability::ALWAYS);
        assert_eq!(Probability::saturating(f64::NAN), Probability::NEVER);
    }

    #[test]
    fn test_probability_extremes_are_deterministic() {
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..100 {
            assert!(Probability::ALWAYS.roll(&mut rng));
            assert!(!Probability::NEVER.roll(&mut rng));
        }
    }

    #[test]
    fn test_reading_mode_parse_and_display() {
        assert_eq!("Sequential".parse::<ReadingMode>().unwrap(), ReadingMode::Sequential);
        assert_eq!("pure_random".parse::<ReadingMode>().unwrap(), ReadingMode::PureRandom);
        assert!("shuffle".parse::<ReadingMode>().is_err());
        assert_eq!(ReadingMode::SmartRandom.to_string(), "smart_random");
        assert_eq!(ReadingMode::default(), ReadingMode::SmartRandom);
    }
}
