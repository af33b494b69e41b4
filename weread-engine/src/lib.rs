//! WeRead Engine Layer
//!
//! Pure decision logic, deterministic given a random source, no I/O.
//! Decides where to read next, what the signed request looks like and how
//! long to wait before sending it.

#![warn(clippy::all)]

pub mod clock;
pub mod error;
pub mod pacing;
pub mod selector;
pub mod signer;
pub mod user_agent;

pub use clock::{Clock, FixedClock, FixedNonce, Nonce, NonceSource, RandomNonce, SystemClock};
pub use error::{EngineError, EngineResult};
pub use pacing::{Delay, PacingConfig, PacingController, PacingState};
pub use selector::{PositionSelector, Selection, SelectorConfig};
pub use signer::{
    percent_encode, sign, sign_at, FieldSource, PayloadContract, SignedPayload, WEB_SIGNING_KEY,
};
pub use user_agent::{pick_user_agent, USER_AGENTS};
