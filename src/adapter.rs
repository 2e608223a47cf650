//! Turns discovery responses into committed snapshots.
//!
//! Each response is a complete list of ServiceEntries. The adapter rebuilds
//! the whole name table from it, commits it to the [`EntryStore`] and hands
//! back the acknowledgment for the feed to send.

use std::net::IpAddr;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::metrics::{self, DropReason};
use crate::state::{AddressSet, EntryStore, NameKey, Snapshot};
use crate::xds::{decode_service_entry, DiscoveryRequest, DiscoveryResponse};

/// Parse one address expression.
///
/// A plain IP is taken as-is. A CIDR is taken only when it names a single
/// host (`/32` for IPv4, `/128` for IPv6); wider ranges yield nothing.
pub fn parse_address(expr: &str) -> Option<IpAddr> {
    let expr = expr.trim();
    match expr.split_once('/') {
        Some((ip, prefix)) => {
            let ip: IpAddr = ip.parse().ok()?;
            // Decimal digits only, no sign and no leading zero.
            if prefix.is_empty()
                || !prefix.bytes().all(|b| b.is_ascii_digit())
                || (prefix.len() > 1 && prefix.starts_with('0'))
            {
                return None;
            }
            let prefix: u8 = prefix.parse().ok()?;
            let host_bits = match ip {
                IpAddr::V4(_) => 32,
                IpAddr::V6(_) => 128,
            };
            (prefix == host_bits).then_some(ip)
        }
        None => expr.parse().ok(),
    }
}

/// Consumes discovery responses and commits snapshots.
#[derive(Debug, Clone)]
pub struct FeedAdapter {
    store: EntryStore,
    default_address: Option<IpAddr>,
}

impl FeedAdapter {
    /// Create an adapter committing to `store`.
    ///
    /// `default_address` is served for entries without a usable address.
    pub fn new(store: EntryStore, default_address: Option<IpAddr>) -> Self {
        Self {
            store,
            default_address,
        }
    }

    /// Addresses to serve for an entry, falling back to the default address.
    pub fn address_set(&self, addresses: &[String]) -> Option<AddressSet> {
        let parsed: Vec<IpAddr> = addresses.iter().filter_map(|a| parse_address(a)).collect();
        if !parsed.is_empty() {
            return Some(parsed.into());
        }
        self.default_address.map(|ip| AddressSet::from([ip]))
    }

    /// Build a snapshot from a response without committing it.
    ///
    /// Returns the snapshot and the number of resources skipped.
    pub fn build_snapshot(&self, response: &DiscoveryResponse) -> (Snapshot, usize) {
        let mut snapshot = Snapshot::new(response.version_info.clone());
        let mut dropped = 0;

        for (index, any) in response.resources.iter().enumerate() {
            let (name, entry) = match decode_service_entry(any) {
                Ok(decoded) => decoded,
                Err(e) => {
                    warn!(index, type_url = %any.type_url, error = %e, "skipping undecodable resource");
                    metrics::record_resource_dropped(DropReason::Decode);
                    dropped += 1;
                    continue;
                }
            };

            if entry.caller_supplies_address() {
                debug!(index, name = %name, "skipping ServiceEntry with resolution NONE");
                metrics::record_resource_dropped(DropReason::ResolutionNone);
                dropped += 1;
                continue;
            }

            let Some(addresses) = self.address_set(&entry.addresses) else {
                debug!(
                    index,
                    name = %name,
                    addresses = ?entry.addresses,
                    "skipping ServiceEntry without usable addresses"
                );
                metrics::record_resource_dropped(DropReason::NoAddresses);
                dropped += 1;
                continue;
            };

            for host in &entry.hosts {
                match NameKey::from_host(host) {
                    Some(key) => {
                        debug!(key = %key, addresses = ?addresses, "adding DNS mapping");
                        snapshot.insert(key, addresses.clone());
                    }
                    None => warn!(index, name = %name, host = %host, "ignoring unusable host pattern"),
                }
            }
        }

        (snapshot, dropped)
    }

    /// Rebuild the table from `response`, commit it, and return the ack.
    pub fn handle_response(&self, response: &DiscoveryResponse) -> DiscoveryRequest {
        let (snapshot, dropped) = self.build_snapshot(response);
        let entries = snapshot.len();

        self.store.replace(snapshot);
        metrics::record_snapshot_commit(entries, dropped);

        info!(
            version = %response.version_info,
            nonce = %response.nonce,
            resources = response.resources.len(),
            entries,
            dropped,
            "applied discovery response"
        );

        response.ack()
    }

    /// Process responses in delivery order until the feed closes or shutdown.
    ///
    /// The store keeps serving its last snapshot after this returns.
    pub async fn run(
        self,
        mut responses: mpsc::Receiver<DiscoveryResponse>,
        acks: mpsc::Sender<DiscoveryRequest>,
        shutdown: CancellationToken,
    ) {
        loop {
            tokio::select! {
                biased;

                _ = shutdown.cancelled() => {
                    info!("Feed adapter received shutdown signal");
                    return;
                }

                response = responses.recv() => {
                    let Some(response) = response else {
                        info!(
                            version = %self.store.version(),
                            "Discovery feed closed, serving last committed snapshot"
                        );
                        return;
                    };

                    let ack = self.handle_response(&response);
                    if acks.send(ack).await.is_err() {
                        warn!("Ack channel closed, stopping feed adapter");
                        return;
                    }
                    metrics::record_ack_sent();
                }
            }
        }
    }
}
