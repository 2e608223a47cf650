//! In-memory name table fed by the discovery stream.
//!
//! The table is a [`Snapshot`] keyed by [`NameKey`]. A snapshot is built
//! off to the side and installed with [`EntryStore::replace`]; readers take
//! the committed snapshot under a brief read lock and never see a partial
//! update. Every replace is a full rebuild: nothing is merged.

use parking_lot::RwLock;
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use tracing::debug;

use crate::metrics;
use crate::resolver;

/// Addresses served for one name key, in feed order.
pub type AddressSet = Arc<[IpAddr]>;

/// Normalized lookup key.
///
/// Exact keys are the fully-qualified hostname (`"foo.bar.com."`). Wildcard
/// keys are the suffix after the `*` label with a leading dot
/// (`".bar.com."`), which keeps them apart from exact keys for the same text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NameKey(String);

impl NameKey {
    /// Key for a host pattern from a ServiceEntry.
    ///
    /// Returns `None` for a bare `*` pattern, which has no suffix to match on.
    pub fn from_host(host: &str) -> Option<Self> {
        let host = host.trim().trim_end_matches('.');
        if host.is_empty() {
            return None;
        }
        if host.contains('*') {
            let (_, suffix) = host.split_once('.')?;
            if suffix.is_empty() {
                return None;
            }
            Some(Self::wildcard(suffix))
        } else {
            Some(Self::exact(host))
        }
    }

    /// Exact key for a hostname, with or without its trailing dot.
    pub fn exact(name: &str) -> Self {
        Self(format!("{}.", name.trim_end_matches('.').to_ascii_lowercase()))
    }

    /// Wildcard key for a suffix, with or without its trailing dot.
    pub fn wildcard(suffix: &str) -> Self {
        Self(format!(
            ".{}.",
            suffix.trim_end_matches('.').to_ascii_lowercase()
        ))
    }

    /// True for keys built by [`NameKey::wildcard`].
    pub fn is_wildcard(&self) -> bool {
        self.0.starts_with('.')
    }

    /// The key text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for NameKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Complete name table at one point in time.
#[derive(Debug, Clone, Default)]
pub struct Snapshot {
    /// Feed version this snapshot was built from.
    version: String,

    entries: HashMap<NameKey, AddressSet>,
}

impl Snapshot {
    /// Create an empty snapshot for the given feed version.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            entries: HashMap::new(),
        }
    }

    /// Assign `addresses` to `key`, replacing any earlier assignment.
    pub fn insert(&mut self, key: NameKey, addresses: AddressSet) {
        self.entries.insert(key, addresses);
    }

    /// Addresses for an exact key.
    pub fn get(&self, key: &str) -> Option<&AddressSet> {
        self.entries.get(key)
    }

    /// Feed version this snapshot was built from.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Number of keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no keys are present.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterate over all keys and their addresses.
    pub fn iter(&self) -> impl Iterator<Item = (&NameKey, &AddressSet)> {
        self.entries.iter()
    }
}

/// Thread-safe holder of the committed snapshot.
#[derive(Debug, Clone)]
pub struct EntryStore {
    inner: Arc<RwLock<EntryStoreInner>>,
}

#[derive(Debug, Default)]
struct EntryStoreInner {
    snapshot: Arc<Snapshot>,

    /// Number of snapshots committed so far.
    generation: u64,
}

impl Default for EntryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl EntryStore {
    /// Create a store serving an empty snapshot.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(EntryStoreInner::default())),
        }
    }

    /// Install `snapshot` as the committed state.
    pub fn replace(&self, snapshot: Snapshot) {
        let entries = snapshot.len();
        let version = snapshot.version().to_string();
        let next = Arc::new(snapshot);

        let previous = {
            let mut inner = self.inner.write();
            inner.generation = inner.generation.wrapping_add(1);
            std::mem::replace(&mut inner.snapshot, next)
        };
        // The old table is freed outside the lock.
        drop(previous);

        debug!(entries, version = %version, "committed snapshot");
    }

    /// The committed snapshot.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.read().snapshot.clone()
    }

    /// Addresses for an exact key in the committed snapshot.
    pub fn lookup(&self, key: &str) -> Option<AddressSet> {
        self.inner.read().snapshot.get(key).cloned()
    }

    /// Resolve a query name against one committed snapshot.
    pub fn resolve(&self, name: &str) -> Option<AddressSet> {
        let snapshot = self.snapshot();
        resolver::resolve(&snapshot, name).cloned()
    }

    /// Number of snapshots committed.
    pub fn generation(&self) -> u64 {
        self.inner.read().generation
    }

    /// True once the feed has delivered at least one snapshot.
    pub fn is_ready(&self) -> bool {
        self.generation() > 0
    }

    /// Number of keys in the committed snapshot.
    pub fn entries_count(&self) -> usize {
        self.inner.read().snapshot.len()
    }

    /// Feed version of the committed snapshot.
    pub fn version(&self) -> String {
        self.inner.read().snapshot.version().to_string()
    }

    /// Emit current store metrics.
    pub fn emit_metrics(&self) {
        let inner = self.inner.read();
        let wildcards = inner.snapshot.iter().filter(|(k, _)| k.is_wildcard()).count();

        metrics::record_store_counts(inner.snapshot.len(), wildcards);
        metrics::record_generation(inner.generation);
        metrics::record_ready_state(inner.generation > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs(ips: &[&str]) -> AddressSet {
        ips.iter().map(|ip| ip.parse::<IpAddr>().unwrap()).collect()
    }

    #[test]
    fn test_exact_key_from_host() {
        let key = NameKey::from_host("svc.ns.svc.cluster.local").unwrap();
        assert_eq!(key.as_str(), "svc.ns.svc.cluster.local.");
        assert!(!key.is_wildcard());
    }

    #[test]
    fn test_wildcard_key_from_host() {
        let key = NameKey::from_host("*.bar.com").unwrap();
        assert_eq!(key.as_str(), ".bar.com.");
        assert!(key.is_wildcard());
    }

    #[test]
    fn test_keys_are_lowercased_and_fqdn_tolerant() {
        assert_eq!(NameKey::from_host("Foo.Bar.COM.").unwrap().as_str(), "foo.bar.com.");
        assert_eq!(NameKey::from_host("*.Bar.com.").unwrap().as_str(), ".bar.com.");
    }

    #[test]
    fn test_bare_wildcard_and_empty_hosts_have_no_key() {
        assert!(NameKey::from_host("*").is_none());
        assert!(NameKey::from_host("*.").is_none());
        assert!(NameKey::from_host("").is_none());
    }

    #[test]
    fn test_new_store_is_empty_and_not_ready() {
        let store = EntryStore::new();
        assert!(!store.is_ready());
        assert_eq!(store.entries_count(), 0);
        assert!(store.lookup("foo.com.").is_none());
    }

    #[test]
    fn test_replace_installs_snapshot() {
        let store = EntryStore::new();
        let mut snapshot = Snapshot::new("v1");
        snapshot.insert(NameKey::exact("foo.bar.com"), addrs(&["10.0.0.1"]));
        store.replace(snapshot);

        assert!(store.is_ready());
        assert_eq!(store.generation(), 1);
        assert_eq!(store.version(), "v1");
        assert_eq!(&*store.lookup("foo.bar.com.").unwrap(), &*addrs(&["10.0.0.1"]));
    }

    #[test]
    fn test_replace_discards_previous_entries() {
        let store = EntryStore::new();

        let mut first = Snapshot::new("v1");
        first.insert(NameKey::exact("a.example.com"), addrs(&["10.0.0.1"]));
        store.replace(first);

        let mut second = Snapshot::new("v2");
        second.insert(NameKey::exact("b.example.com"), addrs(&["10.0.0.2"]));
        store.replace(second);

        assert!(store.lookup("a.example.com.").is_none());
        assert!(store.lookup("b.example.com.").is_some());
        assert_eq!(store.generation(), 2);
    }

    #[test]
    fn test_held_snapshot_survives_replace() {
        let store = EntryStore::new();
        let mut first = Snapshot::new("v1");
        first.insert(NameKey::exact("a.example.com"), addrs(&["10.0.0.1"]));
        store.replace(first);

        let held = store.snapshot();
        store.replace(Snapshot::new("v2"));

        assert_eq!(held.version(), "v1");
        assert!(held.get("a.example.com.").is_some());
        assert!(store.lookup("a.example.com.").is_none());
    }

    #[test]
    fn test_lookup_does_not_fall_back_to_wildcard() {
        let store = EntryStore::new();
        let mut snapshot = Snapshot::new("v1");
        snapshot.insert(NameKey::wildcard("foo.com"), addrs(&["10.9.9.9"]));
        store.replace(snapshot);

        assert!(store.lookup("bar.foo.com.").is_none());
        assert!(store.resolve("bar.foo.com.").is_some());
    }
}
