//! Exact-then-wildcard name resolution over a [`Snapshot`].
//!
//! ```text
//! a.b.c.example.com.
//!   → exact    "a.b.c.example.com."
//!   → wildcard ".b.c.example.com."
//!   → wildcard ".c.example.com."
//!   → wildcard ".example.com."
//!   (".com." is never tried)
//! ```

use crate::state::{AddressSet, NameKey, Snapshot};

/// Fewest labels a wildcard suffix may have before the search stops.
pub const MIN_WILDCARD_LABELS: usize = 2;

/// Resolve `name` against `snapshot`.
///
/// An exact key wins. Otherwise leading labels are stripped one at a time
/// and the wildcard key for each remaining suffix is tried, longest suffix
/// first, stopping before a suffix with fewer than
/// [`MIN_WILDCARD_LABELS`] labels.
pub fn resolve<'a>(snapshot: &'a Snapshot, name: &str) -> Option<&'a AddressSet> {
    let exact = NameKey::exact(name);
    if let Some(addresses) = snapshot.get(exact.as_str()) {
        return Some(addresses);
    }

    let mut rest = exact.as_str();
    while let Some((_, suffix)) = rest.split_once('.') {
        if label_count(suffix) < MIN_WILDCARD_LABELS {
            break;
        }
        let key = NameKey::wildcard(suffix);
        if let Some(addresses) = snapshot.get(key.as_str()) {
            return Some(addresses);
        }
        rest = suffix;
    }

    None
}

/// Number of non-root labels in a dotted name.
fn label_count(name: &str) -> usize {
    name.split('.').filter(|label| !label.is_empty()).count()
}
