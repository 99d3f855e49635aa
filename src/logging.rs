//! Tracing subscriber setup for the copier
//!
//! One sink is installed: a JSON log file when `file` is set, otherwise
//! stdout in JSON or compact form.

use std::fs::File;

use tracing_subscriber::fmt::{self, format::FmtSpan};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{CopierError, Result};

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` overrides the configured level. Returns an error when a global
/// subscriber is already set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = build_filter(config)?;

    let to_file = match &config.file {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                CopierError::Config(format!("cannot open log file {}: {}", path.display(), e))
            })?;
            Some(
                fmt::layer()
                    .with_writer(file)
                    .with_ansi(false)
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true)
                    .with_span_events(FmtSpan::CLOSE)
                    .json(),
            )
        }
        None => None,
    };
    let on_stdout = to_file.is_none();
    let json = (on_stdout && config.json)
        .then(|| fmt::layer().with_span_events(FmtSpan::CLOSE).json());
    let compact = (on_stdout && !config.json).then(|| fmt::layer().with_target(true).compact());

    tracing_subscriber::registry()
        .with(filter)
        .with(to_file)
        .with(json)
        .with(compact)
        .try_init()
        .map_err(|e| CopierError::Config(format!("logger already installed: {}", e)))
}

fn build_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => {
            let directive = format!("cifs_copier={}", config.level.to_tracing_level());
            EnvFilter::try_new(&directive)
                .map_err(|e| CopierError::Config(format!("bad log filter {}: {}", directive, e)))
        }
    }
}

/// Debug-level logging into the test harness output. Repeated calls are no-ops.
pub fn init_test_logging() {
    static ONCE: std::sync::Once = std::sync::Once::new();

    ONCE.call_once(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("cifs_copier=debug"));
        // another harness may have installed one first
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer().compact())
            .try_init();
    });
}
