//! Aggregated Discovery Service stream to the control plane.
//!
//! The client owns the gRPC stream and nothing else: it forwards every
//! [`DiscoveryResponse`] to the adapter channel and writes every ack coming
//! back from the adapter onto the stream. Reconnects are handled here.

use prost_types::value::Kind;
use prost_types::{Struct, Value};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::codec::ProstCodec;
use tonic::codegen::http::uri::PathAndQuery;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, error, info, warn};

use crate::config::FeedConfig;
use crate::error::DnsError;
use crate::metrics::{self, ReconnectReason};
use crate::xds::{DiscoveryRequest, DiscoveryResponse, Node};

const ADS_PATH: &str =
    "/envoy.service.discovery.v3.AggregatedDiscoveryService/StreamAggregatedResources";

/// Outbound request buffer per stream.
const OUTBOUND_BUFFER: usize = 16;

/// Client for the control plane's ADS endpoint.
#[derive(Debug, Clone)]
pub struct AdsClient {
    endpoint: Endpoint,
    node: Node,
    type_url: String,
    max_backoff: Duration,
}

impl AdsClient {
    /// Create a client for the configured control plane.
    ///
    /// Fails if the control plane address is missing or not a valid URI.
    pub fn new(config: &FeedConfig) -> Result<Self, DnsError> {
        if config.xds_address.trim().is_empty() {
            return Err(DnsError::Config("feed.xds_address is required".to_string()));
        }
        let endpoint = Endpoint::from_shared(config.endpoint_uri())?
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs));

        Ok(Self {
            endpoint,
            node: build_node(config),
            type_url: config.type_url.clone(),
            max_backoff: Duration::from_secs(config.max_backoff_secs.max(1)),
        })
    }

    /// Node identity sent with the subscription request.
    pub fn node(&self) -> &Node {
        &self.node
    }

    /// Connect to the control plane.
    pub async fn connect(&self) -> Result<Channel, DnsError> {
        Ok(self.endpoint.connect().await?)
    }

    /// Subscription request opening a stream.
    ///
    /// `version` is the last acked version, empty on first connect.
    pub fn initial_request(&self, version: &str) -> DiscoveryRequest {
        DiscoveryRequest {
            version_info: version.to_string(),
            node: Some(self.node.clone()),
            type_url: self.type_url.clone(),
            ..Default::default()
        }
    }

    async fn open_stream(
        &self,
        channel: Channel,
        outbound: mpsc::Receiver<DiscoveryRequest>,
    ) -> Result<tonic::Streaming<DiscoveryResponse>, DnsError> {
        let mut grpc = tonic::client::Grpc::new(channel);
        grpc.ready()
            .await
            .map_err(|e| tonic::Status::unknown(format!("service was not ready: {e}")))?;

        let codec: ProstCodec<DiscoveryRequest, DiscoveryResponse> = ProstCodec::default();
        let path = PathAndQuery::from_static(ADS_PATH);
        let response = grpc
            .streaming(
                tonic::Request::new(ReceiverStream::new(outbound)),
                path,
                codec,
            )
            .await?;

        Ok(response.into_inner())
    }

    /// Run the stream until shutdown or until the adapter goes away.
    ///
    /// `channel` is an already-connected channel for the first stream;
    /// later streams reconnect with exponential backoff.
    pub async fn run(
        self,
        channel: Channel,
        responses: mpsc::Sender<DiscoveryResponse>,
        mut acks: mpsc::Receiver<DiscoveryRequest>,
        shutdown: CancellationToken,
    ) {
        let mut channel = Some(channel);
        let mut backoff = Duration::from_secs(1);
        let mut first_connect = true;
        let mut acked_version = String::new();
        // Responses handed to the adapter whose ack has not come back yet.
        let mut unacked: usize = 0;

        loop {
            if shutdown.is_cancelled() {
                info!("ADS stream shutting down");
                return;
            }

            let connected = match channel.take() {
                Some(c) => Ok(c),
                None => self.connect().await,
            };

            let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_BUFFER);
            let stream = match connected {
                Ok(c) => {
                    // Receiver is alive, the send cannot fail.
                    let _ = outbound_tx.send(self.initial_request(&acked_version)).await;
                    self.open_stream(c, outbound_rx).await
                }
                Err(e) => Err(e),
            };

            let mut stream = match stream {
                Ok(s) => {
                    backoff = Duration::from_secs(1);
                    if first_connect {
                        metrics::record_feed_reconnect(ReconnectReason::InitialConnect);
                        first_connect = false;
                    }
                    info!(type_url = %self.type_url, node = %self.node.id, "ADS stream established");
                    s
                }
                Err(e) => {
                    error!("Failed to open ADS stream: {}", e);
                    metrics::record_feed_reconnect(ReconnectReason::Error);
                    tokio::select! {
                        _ = shutdown.cancelled() => return,
                        _ = sleep(backoff) => {}
                    }
                    backoff = (backoff * 2).min(self.max_backoff);
                    continue;
                }
            };

            // Acks come back in delivery order, so the next `stale_acks`
            // belong to responses from a stream that is gone.
            let mut stale_acks = unacked;

            loop {
                tokio::select! {
                    biased;

                    _ = shutdown.cancelled() => {
                        info!("ADS stream received shutdown signal");
                        return;
                    }

                    ack = acks.recv() => {
                        let Some(ack) = ack else {
                            info!("Feed adapter stopped, closing ADS stream");
                            return;
                        };
                        unacked = unacked.saturating_sub(1);
                        if stale_acks > 0 {
                            stale_acks -= 1;
                            debug!(nonce = %ack.response_nonce, "dropping ACK for a previous stream");
                            continue;
                        }
                        debug!(version = %ack.version_info, nonce = %ack.response_nonce, "sending ACK");
                        acked_version = ack.version_info.clone();
                        if outbound_tx.send(ack).await.is_err() {
                            warn!("ADS request stream closed while sending ACK");
                            metrics::record_feed_reconnect(ReconnectReason::Error);
                            break;
                        }
                    }

                    message = stream.message() => {
                        match message {
                            Ok(Some(response)) => {
                                debug!(
                                    version = %response.version_info,
                                    nonce = %response.nonce,
                                    resources = response.resources.len(),
                                    "received discovery response"
                                );
                                if responses.send(response).await.is_err() {
                                    info!("Feed adapter stopped, closing ADS stream");
                                    return;
                                }
                                unacked += 1;
                            }
                            Ok(None) => {
                                info!("ADS stream ended");
                                metrics::record_feed_reconnect(ReconnectReason::StreamEnded);
                                break;
                            }
                            Err(status) => {
                                warn!("ADS stream error: {}", status);
                                metrics::record_feed_reconnect(ReconnectReason::Error);
                                break;
                            }
                        }
                    }
                }
            }

            // Brief delay before reconnecting
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = sleep(Duration::from_secs(1)) => {}
            }
        }
    }
}

/// Node identity with the metadata the control plane needs to pick the
/// config generator.
fn build_node(config: &FeedConfig) -> Node {
    let string = |s: &str| Value {
        kind: Some(Kind::StringValue(s.to_string())),
    };

    let mut fields = BTreeMap::new();
    fields.insert("GENERATOR".to_string(), string("api"));
    if !config.pod_namespace.is_empty() {
        fields.insert("NAMESPACE".to_string(), string(&config.pod_namespace));
    }

    Node {
        id: config.node_id(),
        cluster: String::new(),
        metadata: Some(Struct { fields }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SERVICE_ENTRY_TYPE_URL;

    fn feed_config() -> FeedConfig {
        FeedConfig {
            pod_name: "dns-0".to_string(),
            pod_namespace: "mesh".to_string(),
            ..FeedConfig::new("istiod.istio-system.svc:15010")
        }
    }

    #[test]
    fn test_initial_request_subscribes_to_type() {
        let client = AdsClient::new(&feed_config()).unwrap();
        let request = client.initial_request("");

        assert_eq!(request.type_url, SERVICE_ENTRY_TYPE_URL);
        assert!(request.version_info.is_empty());
        assert!(request.response_nonce.is_empty());
        assert_eq!(
            request.node.unwrap().id,
            "sidecar~127.0.0.1~dns-0.mesh~mesh.svc.cluster.local"
        );
    }

    #[test]
    fn test_initial_request_after_reconnect_carries_version() {
        let client = AdsClient::new(&feed_config()).unwrap();
        assert_eq!(client.initial_request("v7").version_info, "v7");
    }

    #[test]
    fn test_node_metadata_selects_api_generator() {
        let client = AdsClient::new(&feed_config()).unwrap();
        let metadata = client.node().metadata.as_ref().unwrap();
        assert_eq!(
            metadata.fields.get("GENERATOR").and_then(|v| v.kind.clone()),
            Some(Kind::StringValue("api".to_string()))
        );
        assert_eq!(
            metadata.fields.get("NAMESPACE").and_then(|v| v.kind.clone()),
            Some(Kind::StringValue("mesh".to_string()))
        );
    }

    #[test]
    fn test_invalid_address_is_rejected() {
        let config = FeedConfig::new("http://bad host:15010");
        assert!(matches!(AdsClient::new(&config), Err(DnsError::Transport(_))));
    }

    #[test]
    fn test_missing_address_is_a_config_error() {
        let config = FeedConfig::new("");
        assert!(matches!(AdsClient::new(&config), Err(DnsError::Config(_))));
    }

    #[tokio::test]
    async fn test_connect_failure_is_reported() {
        let config = FeedConfig {
            connect_timeout_secs: 1,
            ..FeedConfig::new("127.0.0.1:1")
        };
        let client = AdsClient::new(&config).unwrap();
        assert!(client.connect().await.is_err());
    }
}
