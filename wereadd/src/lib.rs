//! WeRead Daemon Library
//!
//! Runtime for the WeRead reading bot: configuration, the multi-account
//! orchestrator and daemon mode.
//!
//! # Architecture
//!
//! ```text
//! Config → Orchestrator → (per account) SessionRunner → WereadClient
//!               ↓                                ↓
//!          CombinedReport                 NotificationHub
//!               ↑
//!            Daemon (interval, daily cap)
//! ```
//!
//! # Components
//!
//! - **Config**: JSON file plus environment overrides
//! - **Orchestrator**: Runs accounts sequentially, isolates failures, reports
//! - **Daemon**: Repeats passes with a randomized interval and a daily cap
//!
//! # Example
//!
//! ```rust,ignore
//! use wereadd::{Config, Orchestrator};
//!
//! let config = Config::from_env()?;
//! let mut orchestrator = Orchestrator::new(config, client.clone(), client, hub, cancel);
//! let report = orchestrator.run_pass().await?;
//! ```

#![warn(clippy::all)]

pub mod config;
pub mod daemon;
pub mod error;
pub mod orchestrator;

// Re-exports for convenience
pub use config::{
    AccountProfile, BookEntry, ChapterEntry, Config, DaemonSection, ReadingOverrides, StartupMode,
    TEST_TEMPLATE,
};
pub use daemon::{until_midnight, Calendar, Daemon, DaemonState, FixedCalendar, SystemCalendar};
pub use error::{DaemonError, DaemonResult};
pub use orchestrator::Orchestrator;
