//! Telemetry setup for xds-dns.
//!
//! Tracing with a configurable filter, plus a Prometheus metrics endpoint
//! when built with the `prometheus` feature.

#[cfg(feature = "prometheus")]
use std::net::SocketAddr;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::TelemetryConfig;

/// Initialize tracing and, if configured, the metrics exporter.
///
/// `RUST_LOG` takes precedence over `log_level`.
pub fn init(config: &TelemetryConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    match config.prometheus_addr {
        #[cfg(feature = "prometheus")]
        Some(addr) => start_prometheus_exporter(addr)?,
        #[cfg(not(feature = "prometheus"))]
        Some(addr) => {
            tracing::warn!(%addr, "prometheus_addr set but built without the prometheus feature")
        }
        None => info!("Prometheus exporter disabled"),
    }

    Ok(())
}

/// Start Prometheus metrics HTTP exporter.
#[cfg(feature = "prometheus")]
fn start_prometheus_exporter(
    addr: SocketAddr,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!(%addr, "Prometheus metrics exporter started");

    Ok(())
}
