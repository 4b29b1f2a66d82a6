//! Engine configuration
//!
//! Values come from serde defaults, then an optional configuration file, then
//! `RUNNEL__*` environment variables.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Number of workers pulling from the work queue
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    /// Delay before a worker retries after a queue error, in milliseconds
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,

    /// Maximum number of failures returned for a flow node
    #[serde(default = "default_failure_page_size")]
    pub failure_page_size: usize,

    /// Maximum number of causes rendered in a failure stack trace
    #[serde(default = "default_stack_trace_depth")]
    pub stack_trace_depth: usize,

    /// Run the recovery scan when the engine starts
    #[serde(default = "default_true")]
    pub recover_on_startup: bool,

    /// Attempts made to interrupt a node that keeps changing concurrently
    #[serde(default = "default_interrupt_attempts")]
    pub interrupt_attempts: u32,

    /// Name of the tenant created on first start
    #[serde(default = "default_tenant_name")]
    pub default_tenant_name: String,

    /// Log filter (e.g., "info,runnel_core=debug")
    #[serde(default = "default_log_filter")]
    pub log_filter: String,

    /// Emit logs as JSON
    #[serde(default)]
    pub json_logs: bool,
}

fn default_worker_count() -> usize {
    4
}

fn default_retry_delay_ms() -> u64 {
    200
}

fn default_failure_page_size() -> usize {
    100
}

fn default_stack_trace_depth() -> usize {
    20
}

fn default_true() -> bool {
    true
}

fn default_interrupt_attempts() -> u32 {
    5
}

fn default_tenant_name() -> String {
    "default".to_string()
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            retry_delay_ms: default_retry_delay_ms(),
            failure_page_size: default_failure_page_size(),
            stack_trace_depth: default_stack_trace_depth(),
            recover_on_startup: true,
            interrupt_attempts: default_interrupt_attempts(),
            default_tenant_name: default_tenant_name(),
            log_filter: default_log_filter(),
            json_logs: false,
        }
    }
}

impl EngineConfig {
    /// Load configuration from an optional file and `RUNNEL__*` environment variables
    pub fn load(file: Option<&Path>) -> Result<Self, CoreError> {
        let mut builder = config::Config::builder();
        if let Some(file) = file {
            info!(path = %file.display(), "Loading engine configuration file");
            builder = builder.add_source(config::File::from(file).required(false));
        }
        let config: EngineConfig = builder
            .add_source(config::Environment::with_prefix("RUNNEL").separator("__").try_parsing(true))
            .build()?
            .try_deserialize()?;
        config.validate()
    }

    /// Reject unusable values
    pub fn validate(mut self) -> Result<Self, CoreError> {
        if self.worker_count == 0 {
            return Err(CoreError::ConfigurationError(
                "worker_count must be at least 1".to_string(),
            ));
        }
        if self.stack_trace_depth == 0 {
            warn!("stack_trace_depth of 0 would drop every cause, using 1");
            self.stack_trace_depth = 1;
        }
        if self.interrupt_attempts == 0 {
            warn!("interrupt_attempts of 0 would never interrupt, using 1");
            self.interrupt_attempts = 1;
        }
        Ok(self)
    }

    /// Delay before a worker retries after a queue error
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}
