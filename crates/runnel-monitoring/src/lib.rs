//! Monitoring setup for the Runnel engine.
//!
//! The engine itself only emits `tracing` events and records through the
//! `metrics` facade. This crate installs the subscriber and the exporter.

use runnel_core::EngineConfig;
use std::net::SocketAddr;
use tracing::info;

pub mod logging;
pub mod metrics;

pub use crate::logging::{init_logging, init_test_tracing};
pub use crate::metrics::describe_engine_metrics;

/// Configuration for initializing the monitoring system
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoringConfig {
    /// Service name attached to the startup log
    pub service_name: String,
    /// Log level filter (e.g., "info,runnel_core=debug"), overridden by `RUST_LOG`
    pub log_filter: String,
    /// Emit logs as JSON instead of the pretty format
    pub json_logs: bool,
    /// Describe the engine metrics to the installed recorder
    pub enable_metrics: bool,
    /// Address of the Prometheus scrape endpoint, none to skip the exporter
    pub prometheus_listen: Option<SocketAddr>,
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            service_name: "runnel".to_string(),
            log_filter: "info".to_string(),
            json_logs: false,
            enable_metrics: true,
            prometheus_listen: None,
        }
    }
}

impl From<&EngineConfig> for MonitoringConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            log_filter: config.log_filter.clone(),
            json_logs: config.json_logs,
            ..Self::default()
        }
    }
}

/// Initialize logging, then metrics
pub fn init(config: &MonitoringConfig) -> anyhow::Result<()> {
    logging::init_logging(config)?;

    if config.enable_metrics {
        if let Some(addr) = config.prometheus_listen {
            metrics::install_prometheus(addr)?;
        }
        metrics::describe_engine_metrics();
    }

    info!(
        service_name = %config.service_name,
        metrics = config.enable_metrics,
        prometheus = ?config.prometheus_listen,
        "Monitoring initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults() {
        let config = MonitoringConfig::default();
        assert_eq!(config.service_name, "runnel");
        assert!(config.enable_metrics);
        assert!(config.prometheus_listen.is_none());
    }

    #[test]
    fn test_config_follows_engine_logging_settings() {
        let engine = EngineConfig {
            log_filter: "debug,runnel_core=trace".to_string(),
            json_logs: true,
            ..EngineConfig::default()
        };

        let config = MonitoringConfig::from(&engine);
        assert_eq!(config.log_filter, "debug,runnel_core=trace");
        assert!(config.json_logs);
    }
}
