//! Engine metric descriptions and the Prometheus exporter.

use metrics::{describe_counter, describe_histogram, Unit};
use runnel_core::telemetry;

/// Register units and help texts of the engine metrics with the installed
/// recorder. Without a recorder this does nothing.
pub fn describe_engine_metrics() {
    describe_counter!(
        telemetry::WORK_EXECUTED,
        Unit::Count,
        "Units of work run, by kind and outcome"
    );
    describe_histogram!(
        telemetry::WORK_DURATION_MS,
        Unit::Milliseconds,
        "Time spent running a unit of work"
    );
    describe_counter!(
        telemetry::WORK_RETRIED,
        Unit::Count,
        "Units of work re-enqueued after a concurrent modification"
    );
    describe_counter!(
        telemetry::FLOW_NODES_FAILED,
        Unit::Count,
        "Flow nodes marked failed, by failure scope"
    );
    describe_counter!(
        telemetry::MESSAGES_MATCHED,
        Unit::Count,
        "Message couples matched by the correlation sweep"
    );
}

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must run inside a tokio runtime.
#[cfg(feature = "prometheus")]
pub fn install_prometheus(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    use anyhow::Context;
    use metrics_exporter_prometheus::PrometheusBuilder;
    use tracing::info;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .context("Failed to install the Prometheus exporter")?;
    info!(%addr, "Prometheus exporter listening");
    Ok(())
}

/// Without the `prometheus` feature there is no exporter to install
#[cfg(not(feature = "prometheus"))]
pub fn install_prometheus(addr: std::net::SocketAddr) -> anyhow::Result<()> {
    anyhow::bail!("Cannot listen on {}: built without the prometheus feature", addr)
}
