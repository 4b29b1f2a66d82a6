//! Structured logging using tracing.
//!
//! JSON output is meant for log aggregation, the pretty format for
//! development.

use anyhow::Context;
use once_cell::sync::OnceCell;
use tracing::info;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    prelude::*,
    EnvFilter,
};

use crate::MonitoringConfig;

/// Initialize structured logging
pub fn init_logging(config: &MonitoringConfig) -> anyhow::Result<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_filter))
        .with_context(|| format!("Invalid log filter {}", config.log_filter))?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let installed = if config.json_logs {
        let json_layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        tracing::subscriber::set_global_default(registry.with(json_layer))
    } else {
        let fmt_layer = fmt::layer()
            .pretty()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        tracing::subscriber::set_global_default(registry.with(fmt_layer))
    };
    installed.context("Failed to set global default subscriber")?;

    info!(
        log_format = if config.json_logs { "json" } else { "pretty" },
        filter = %config.log_filter,
        "Logging initialized"
    );
    Ok(())
}

static TEST_TRACING: OnceCell<()> = OnceCell::new();

/// Install a test-friendly subscriber once per process.
///
/// Output goes through the test harness capture; `RUST_LOG` overrides the
/// default `info` filter.
pub fn init_test_tracing() {
    TEST_TRACING.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let subscriber = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_test_writer()
            .finish();
        let _ = tracing::subscriber::set_global_default(subscriber);
    });
}
