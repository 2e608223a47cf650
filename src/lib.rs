//! xds-dns - An authoritative DNS server for mesh service names.
//!
//! The server subscribes to Istio `ServiceEntry` resources over the xDS
//! Aggregated Discovery Service and answers `A`/`AAAA` queries for the hosts
//! they declare. Every discovery response carries the complete set of
//! entries, so each one rebuilds the name table from scratch and swaps it in
//! atomically; queries always see one whole table.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                              xds-dns                              │
//! │                                                                   │
//! │  ┌────────────┐ responses ┌──────────────┐ replace ┌────────────┐ │
//! │  │ AdsClient  │──────────▶│ FeedAdapter  │────────▶│ EntryStore │ │
//! │  │ (gRPC ADS) │◀──────────│              │         │ (snapshot) │ │
//! │  └────────────┘   acks    └──────────────┘         └─────┬──────┘ │
//! │        ▲                                                 │ resolve│
//! │        │ ServiceEntry                              ┌─────▼──────┐ │
//! │        │                                           │ Query      │◀── UDP/TCP
//! │   control plane                                    │ Responder  │ │
//! │                                                    └────────────┘ │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Name Resolution
//!
//! ```text
//! api.shop.example.com.
//!   → exact key    "api.shop.example.com."
//!   → wildcard key ".shop.example.com."   (from host "*.shop.example.com")
//!   → wildcard key ".example.com."        (from host "*.example.com")
//!   → NXDOMAIN
//! ```
//!
//! ## Example Usage
//!
//! ```rust,ignore
//! use tokio_util::sync::CancellationToken;
//! use xds_dns::{Config, DnsConfig, DnsServer, FeedConfig, TelemetryConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config {
//!         dns: DnsConfig::default(),
//!         feed: FeedConfig::new("istiod.istio-system.svc:15010"),
//!         telemetry: TelemetryConfig::default(),
//!     };
//!
//!     let server = DnsServer::new(config);
//!     server.run(CancellationToken::new()).await.unwrap();
//! }
//! ```

#![warn(missing_docs)]

pub mod adapter;
pub mod ads;
pub mod config;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod resolver;
pub mod server;
pub mod state;
pub mod telemetry;
#[allow(missing_docs)]
pub mod xds;

// Re-export main types
pub use adapter::FeedAdapter;
pub use config::{Config, DnsConfig, FeedConfig, TelemetryConfig};
pub use error::DnsError;
pub use handler::QueryResponder;
pub use server::DnsServer;
pub use state::{EntryStore, NameKey, Snapshot};
