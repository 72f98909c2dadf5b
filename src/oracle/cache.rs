use crate::{
    sync::{AtomicU32, Ordering, RwLock},
    types::{Epoch, HashMap, NodeId},
};

/// Memoized reachability bounds.
///
/// An entry `(source, destination) -> bound` records that every epoch of
/// `source` up to and including `bound` happens before `destination`. Bounds
/// only ever grow: concurrent merges into the same entry keep the maximum.
#[derive(Debug, Default)]
pub struct ReachabilityCache {
    entries: RwLock<HashMap<(NodeId, NodeId), AtomicU32>>,
}

impl ReachabilityCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest proven source epoch for the pair, if any.
    #[must_use]
    pub fn bound(&self, source: NodeId, destination: NodeId) -> Option<Epoch> {
        self.entries
            .read()
            .get(&(source, destination))
            .map(|bound| bound.load(Ordering::Acquire))
    }

    /// Whether `source@epoch` is already known to happen before `destination`.
    #[must_use]
    pub fn covers(&self, source: NodeId, epoch: Epoch, destination: NodeId) -> bool {
        self.bound(source, destination).is_some_and(|bound| bound >= epoch)
    }

    /// Raises the bound of the pair to at least `epoch` and returns the bound
    /// in effect afterwards.
    pub fn merge(&self, source: NodeId, destination: NodeId, epoch: Epoch) -> Epoch {
        let key = (source, destination);
        if let Some(bound) = self.entries.read().get(&key) {
            return bound.fetch_max(epoch, Ordering::AcqRel).max(epoch);
        }
        let mut entries = self.entries.write();
        // Another writer may have inserted the key between the two locks.
        let bound = entries.entry(key).or_insert_with(|| AtomicU32::new(epoch));
        bound.fetch_max(epoch, Ordering::AcqRel).max(epoch)
    }

    /// Number of cached pairs.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether nothing has been cached yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}
