//! Decides which change notifications are worth a reconciliation.

use kube_core::Resource;

/// Admission policy evaluated before an event reaches the work queue.
///
/// Implementations must be pure: the same event may be evaluated repeatedly and concurrently.
pub trait EventFilter<K> {
    /// An object appeared, either freshly created or seen in an initial listing.
    fn admit_create(&self, _obj: &K) -> bool {
        true
    }

    fn admit_update(&self, old: &K, new: &K) -> bool;

    fn admit_delete(&self, obj: &K) -> bool;
}

/// Admits creations and spec changes; drops status-only updates and deletions.
#[derive(Debug, Clone, Copy, Default)]
pub struct SpecChanged;

impl<K: Resource> EventFilter<K> for SpecChanged {
    fn admit_update(&self, old: &K, new: &K) -> bool {
        admit_update(old, new)
    }

    fn admit_delete(&self, obj: &K) -> bool {
        admit_delete(obj)
    }
}

/// True iff `metadata.generation` differs, so status subresource writes never trigger work.
pub fn admit_update<K: Resource>(old: &K, new: &K) -> bool {
    old.meta().generation != new.meta().generation
}

/// Deleting a config object never triggers a reconciliation.
pub fn admit_delete<K>(_obj: &K) -> bool {
    false
}
