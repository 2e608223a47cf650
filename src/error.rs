//! Error types for xds-dns.

use thiserror::Error;

/// Errors that can occur in the DNS server.
#[derive(Debug, Error)]
pub enum DnsError {
    /// IO error (socket bind, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// gRPC transport error (endpoint parse, connect)
    #[error("xDS transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    /// gRPC status returned while opening or reading the discovery stream
    #[error("xDS stream error: {0}")]
    Status(#[from] tonic::Status),

    /// Protobuf decode failure for a discovery resource
    #[error("resource decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    /// Resource decoded but is not usable
    #[error("malformed resource: {0}")]
    MalformedResource(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Failed to parse address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),
}
