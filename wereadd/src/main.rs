//! WeRead reading daemon
//!
//! Replays a browser reading request to accumulate reading time for one or
//! more accounts.
//!
//! # Usage
//!
//! ```bash
//! # One pass with the curl command in an env var
//! WEREAD_CURL_STRING="$(cat curl.sh)" cargo run -p wereadd
//!
//! # Daemon mode with a config file
//! WEREAD_CONFIG=weread.json STARTUP_MODE=daemon cargo run -p wereadd
//! ```
//!
//! # Environment Variables
//!
//! - `WEREAD_CONFIG`: JSON config file (default: `weread.json` when present)
//! - `WEREAD_CURL_BASH_FILE_PATH` / `WEREAD_CURL_STRING`: request template
//! - `STARTUP_MODE`: immediate, scheduled or daemon (default: immediate)
//! - `READING_MODE`: smart_random, sequential or pure_random
//! - `TARGET_DURATION`: session length in minutes, e.g. `60-70`
//! - `RUST_LOG`: log filter (default: wereadd=info,weread_exec=info,weread_connectors=info)
//! - `WEREAD_LOG_FORMAT`: set to `json` for JSON logs

use std::sync::Arc;

use anyhow::bail;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use weread_connectors::{NotificationHub, WereadClient};
use wereadd::{Config, Daemon, Orchestrator, StartupMode};

const DEFAULT_LOG_FILTER: &str = "wereadd=info,weread_exec=info,weread_connectors=info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env before the log filter is read (ignore errors)
    let _ = dotenvy::dotenv();
    init_tracing()?;

    // Load configuration
    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        startup_mode = %config.app.startup_mode,
        reading_mode = %config.reading.mode,
        accounts = config.accounts().len(),
        "WeRead reading daemon"
    );

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let client = Arc::new(WereadClient::new(config.request_timeout())?);
    let hub = Arc::new(NotificationHub::new(config.notification.clone())?);
    let startup_mode = config.app.startup_mode;
    let mut orchestrator = Orchestrator::new(config, client.clone(), client, hub, cancel.clone());

    match startup_mode {
        StartupMode::Immediate | StartupMode::Scheduled => {
            let report = orchestrator.run_pass().await?;
            println!("{}", report.render());
            if !cancel.is_cancelled() && report.successful_accounts().is_empty() {
                bail!("no account completed its reading session");
            }
        }
        StartupMode::Daemon => {
            Daemon::new(orchestrator, cancel).run().await?;
        }
    }

    Ok(())
}

fn init_tracing() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(DEFAULT_LOG_FILTER))?;
    let json = std::env::var("WEREAD_LOG_FORMAT")
        .map(|format| format.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
    Ok(())
}

/// Cancel the shared token on Ctrl-C.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                cancel.cancel();
            }
            Err(e) => error!(error = %e, "Cannot listen for shutdown signal"),
        }
    });
}
