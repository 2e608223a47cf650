//! Configuration types for xds-dns.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::error::DnsError;

/// Listen address used when `dns.listen_addr` is empty.
pub const DEFAULT_LISTEN_ADDR: &str = "localhost:15053";

/// Istio ServiceEntry collection type URL.
pub const SERVICE_ENTRY_TYPE_URL: &str = "networking.istio.io/v1alpha3/ServiceEntry";

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// DNS listener configuration.
    #[serde(default)]
    pub dns: DnsConfig,

    /// Discovery feed configuration.
    pub feed: FeedConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// DNS listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DnsConfig {
    /// `host:port` to listen on (UDP and TCP). Empty means [`DEFAULT_LISTEN_ADDR`].
    #[serde(default)]
    pub listen_addr: String,

    /// TTL for answer records in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,

    /// Idle timeout for TCP clients in seconds.
    #[serde(default = "default_tcp_timeout")]
    pub tcp_timeout_secs: u64,
}

impl Default for DnsConfig {
    fn default() -> Self {
        Self {
            listen_addr: String::new(),
            ttl: default_ttl(),
            tcp_timeout_secs: default_tcp_timeout(),
        }
    }
}

impl DnsConfig {
    /// Resolve the socket address to bind.
    ///
    /// A `localhost` or empty host binds every IPv4 interface on the given port.
    pub fn socket_addr(&self) -> Result<SocketAddr, DnsError> {
        let addr = if self.listen_addr.is_empty() {
            DEFAULT_LISTEN_ADDR
        } else {
            self.listen_addr.as_str()
        };

        let (host, port) = addr
            .rsplit_once(':')
            .ok_or_else(|| DnsError::InvalidAddress(format!("{addr}: expected host:port")))?;
        let port: u16 = port
            .parse()
            .map_err(|e| DnsError::InvalidAddress(format!("{addr}: bad port: {e}")))?;

        let host = host.trim_start_matches('[').trim_end_matches(']');
        let ip = if host.is_empty() || host.eq_ignore_ascii_case("localhost") {
            IpAddr::V4(Ipv4Addr::UNSPECIFIED)
        } else {
            host.parse()
                .map_err(|e| DnsError::InvalidAddress(format!("{addr}: bad host: {e}")))?
        };

        Ok(SocketAddr::new(ip, port))
    }

    /// TCP idle timeout.
    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_timeout_secs)
    }
}

/// Discovery feed configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Control plane address (e.g., "istiod.istio-system.svc:15010").
    pub xds_address: String,

    /// Address served for ServiceEntries that carry no usable address.
    #[serde(default)]
    pub default_address: Option<IpAddr>,

    /// Name of the pod this server runs in.
    #[serde(default)]
    pub pod_name: String,

    /// Namespace of the pod this server runs in.
    #[serde(default)]
    pub pod_namespace: String,

    /// IP of the pod this server runs in.
    #[serde(default = "default_pod_ip")]
    pub pod_ip: String,

    /// Resource type to subscribe to.
    #[serde(default = "default_type_url")]
    pub type_url: String,

    /// Connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Upper bound of the reconnect backoff in seconds.
    #[serde(default = "default_max_backoff")]
    pub max_backoff_secs: u64,
}

impl FeedConfig {
    /// Create a feed configuration for the given control plane with defaults elsewhere.
    pub fn new(xds_address: impl Into<String>) -> Self {
        Self {
            xds_address: xds_address.into(),
            default_address: None,
            pod_name: String::new(),
            pod_namespace: String::new(),
            pod_ip: default_pod_ip(),
            type_url: default_type_url(),
            connect_timeout_secs: default_connect_timeout(),
            max_backoff_secs: default_max_backoff(),
        }
    }

    /// Control plane URI, with `http://` prepended when no scheme is given.
    pub fn endpoint_uri(&self) -> String {
        if self.xds_address.contains("://") {
            self.xds_address.clone()
        } else {
            format!("http://{}", self.xds_address)
        }
    }

    /// Workload name in `<pod>.<namespace>` form.
    pub fn workload(&self) -> String {
        format!("{}.{}", self.pod_name, self.pod_namespace)
    }

    /// xDS node id for this workload.
    pub fn node_id(&self) -> String {
        format!(
            "sidecar~{}~{}~{}.svc.cluster.local",
            self.pod_ip,
            self.workload(),
            self.pod_namespace
        )
    }
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "xds_dns=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_ttl() -> u32 {
    3600
}

fn default_tcp_timeout() -> u64 {
    30
}

fn default_pod_ip() -> String {
    "127.0.0.1".to_string()
}

fn default_type_url() -> String {
    SERVICE_ENTRY_TYPE_URL.to_string()
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_max_backoff() -> u64 {
    30
}
