//! File-based logging for playflow-rs
//!
//! stdout carries the command replies, so everything else goes to a daily
//! log file. What ends up there, by target:
//!
//! - `playflow_rs::controller`: monitor decisions (autoplay extensions, AI
//!   queue refills and overrides, keep-alive failures and recoveries)
//! - `playflow_rs::provider`: backend requests through [`log_api_request!`]
//!   and [`log_api_result!`], token refreshes, device selection
//! - `playflow_rs::suggest`: model vendor calls and unparseable replies
//!
//! Monitor ticks that change nothing only log at debug, so the default filter
//! keeps a quiet idle session readable.

use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const LOG_DIR: &str = ".logs";
const LOG_FILE_PREFIX: &str = "playflow-rs";

/// Engine internals at debug, HTTP stacks only when they have something to say.
const DEFAULT_FILTER: &str = "playflow_rs=debug,rspotify=info,reqwest=warn,hyper=warn,warn";

/// Route `tracing` output to `.logs/playflow-rs.YYYY-MM-DD.log`.
///
/// `RUST_LOG` replaces [`DEFAULT_FILTER`], e.g.
/// `RUST_LOG=playflow_rs::controller=trace,warn` to follow only the monitors.
pub fn init_logging() -> anyhow::Result<()> {
    std::fs::create_dir_all(Path::new(LOG_DIR))?;

    let appender = RollingFileAppender::new(Rotation::DAILY, LOG_DIR, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    // Flushes on drop, so it lives as long as the process
    Box::leak(Box::new(guard));

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(writer).with_ansi(false).with_target(true))
        .try_init()?;

    tracing::info!(dir = LOG_DIR, "Logging initialized");
    Ok(())
}

/// Log the outcome of a backend request
#[macro_export]
macro_rules! log_api_result {
    ($operation:expr, $result:expr) => {
        match &$result {
            Ok(_) => tracing::info!(operation = $operation, "API request successful"),
            Err(e) => tracing::error!(operation = $operation, error = %e, "API request failed"),
        }
    };
}

/// Log a backend request before it is sent, with extra fields
#[macro_export]
macro_rules! log_api_request {
    ($operation:expr, $($field:tt)*) => {
        tracing::debug!(operation = $operation, $($field)*, "API request started");
    };
}
