//! DNS server setup and lifecycle management.

use hickory_server::ServerFuture;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::adapter::FeedAdapter;
use crate::ads::AdsClient;
use crate::config::Config;
use crate::error::DnsError;
use crate::handler::QueryResponder;
use crate::state::EntryStore;

/// Interval for emitting store metrics.
const METRICS_INTERVAL: Duration = Duration::from_secs(10);

/// Buffer between the feed and the adapter. One response is processed at a
/// time, so a small buffer is enough.
const FEED_BUFFER: usize = 4;

/// Periodically emit store metrics.
async fn metrics_loop(store: EntryStore, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(METRICS_INTERVAL);

    loop {
        tokio::select! {
            _ = interval.tick() => {
                store.emit_metrics();
                debug!(
                    entries = store.entries_count(),
                    generation = store.generation(),
                    version = %store.version(),
                    "emitted store metrics"
                );
            }
            _ = shutdown.cancelled() => {
                debug!("metrics loop shutting down");
                return;
            }
        }
    }
}

/// Bind the UDP socket and a TCP listener on the same port.
///
/// With port 0 the TCP listener takes the port the UDP socket was given.
async fn bind_listeners(addr: SocketAddr) -> Result<(UdpSocket, TcpListener), DnsError> {
    let udp_socket = UdpSocket::bind(addr).await?;
    let tcp_listener = TcpListener::bind(udp_socket.local_addr()?).await?;
    Ok((udp_socket, tcp_listener))
}

/// DNS server for mesh service names fed by the control plane.
pub struct DnsServer {
    config: Config,
    store: EntryStore,
}

impl DnsServer {
    /// Create a new DNS server with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            store: EntryStore::new(),
        }
    }

    /// Get a reference to the entry store.
    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    /// Run until `shutdown` is cancelled.
    ///
    /// Listener and initial control plane connection failures are returned
    /// before anything is served.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), DnsError> {
        let listen_addr = self.config.dns.socket_addr()?;
        info!(
            listen_addr = %listen_addr,
            xds_address = %self.config.feed.xds_address,
            "Starting xds-dns server"
        );

        // Bind before connecting so a taken port fails fast.
        let (udp_socket, tcp_listener) = bind_listeners(listen_addr).await?;
        let listen_addr = udp_socket.local_addr()?;

        let client = AdsClient::new(&self.config.feed)?;
        let channel = client.connect().await?;
        info!(xds_address = %self.config.feed.xds_address, "Connected to control plane");

        let (response_tx, response_rx) = mpsc::channel(FEED_BUFFER);
        let (ack_tx, ack_rx) = mpsc::channel(FEED_BUFFER);

        let adapter = FeedAdapter::new(self.store.clone(), self.config.feed.default_address);
        let adapter_handle = tokio::spawn(adapter.run(response_rx, ack_tx, shutdown.clone()));
        let feed_handle = tokio::spawn(client.run(channel, response_tx, ack_rx, shutdown.clone()));

        let responder = QueryResponder::new(self.store.clone(), self.config.dns.ttl);
        let mut server = ServerFuture::new(responder);

        server.register_socket(udp_socket);
        info!(addr = %listen_addr, "DNS UDP listening");
        server.register_listener(tcp_listener, self.config.dns.tcp_timeout());
        info!(addr = %listen_addr, "DNS TCP listening");

        let metrics_handle = tokio::spawn(metrics_loop(self.store.clone(), shutdown.clone()));
        self.store.emit_metrics();

        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("DNS server shutdown requested");
            }
            result = server.block_until_done() => {
                if let Err(e) = result {
                    error!("DNS server error: {}", e);
                }
                shutdown.cancel();
            }
        }

        let _ = metrics_handle.await;

        info!("Waiting for feed tasks to stop...");
        let _ = feed_handle.await;
        let _ = adapter_handle.await;

        info!("DNS server stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DnsConfig, FeedConfig, TelemetryConfig};

    fn config(listen_addr: &str) -> Config {
        Config {
            dns: DnsConfig {
                listen_addr: listen_addr.to_string(),
                ..Default::default()
            },
            feed: FeedConfig {
                connect_timeout_secs: 1,
                ..FeedConfig::new("127.0.0.1:1")
            },
            telemetry: TelemetryConfig::default(),
        }
    }

    #[test]
    fn test_server_creation() {
        let server = DnsServer::new(config("127.0.0.1:0"));
        assert!(!server.store().is_ready());
    }

    #[tokio::test]
    async fn test_invalid_listen_addr_fails_startup() {
        let server = DnsServer::new(config("nonsense"));
        let result = server.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(DnsError::InvalidAddress(_))));
    }

    #[tokio::test]
    async fn test_unreachable_control_plane_fails_startup() {
        let server = DnsServer::new(config("127.0.0.1:0"));
        let result = server.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(DnsError::Transport(_))));
    }

    #[tokio::test]
    async fn test_ephemeral_port_is_shared_by_udp_and_tcp() {
        let (udp, tcp) = bind_listeners("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let udp_addr = udp.local_addr().unwrap();
        assert_ne!(udp_addr.port(), 0);
        assert_eq!(udp_addr, tcp.local_addr().unwrap());
    }

    #[tokio::test]
    async fn test_port_in_use_fails_startup() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let server = DnsServer::new(config(&addr.to_string()));
        let result = server.run(CancellationToken::new()).await;
        assert!(matches!(result, Err(DnsError::Io(_))));
    }
}
