use crate::{
    error::Violation,
    shadow::BufferRegion,
    sync::Arc,
    types::{Address, NodeId},
};
use core::ops::Range;

/// A held buffer.
#[derive(Debug, Clone)]
pub struct Acquired {
    /// Shadow of the buffer.
    pub region: Arc<BufferRegion>,
    /// Whether ordering information reached the task together with the
    /// buffer, through a dependency edge or by creating it.
    pub conveyed: bool,
}

/// The part of an access that falls into one held buffer.
#[derive(Debug, Clone)]
pub struct Slice {
    /// Held buffer.
    pub acquired: Acquired,
    /// Touched bytes of that buffer.
    pub span: Range<Address>,
}

/// Held buffers sorted by base address.
///
/// Regions never overlap, so both bases and ends are sorted and lookups are
/// binary searches. Buffers destroyed while held are dropped on the next
/// lookup that touches them.
#[derive(Debug, Default)]
pub struct AcquisitionIndex {
    entries: Vec<Acquired>,
}

impl AcquisitionIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the index of a task starting with `acquired`.
    ///
    /// # Errors
    /// If two of the buffers overlap.
    pub fn build(acquired: impl IntoIterator<Item = Acquired>) -> Result<Self, Violation> {
        let mut index = Self::new();
        for acquired in acquired {
            index.insert(acquired)?;
        }
        Ok(index)
    }

    /// Adds a buffer. Adding a held buffer again only widens `conveyed`; empty
    /// buffers have no bytes to shadow and are not indexed.
    ///
    /// # Errors
    /// If the buffer overlaps a different held buffer.
    pub fn insert(&mut self, acquired: Acquired) -> Result<(), Violation> {
        self.entries.retain(|entry| !entry.region.is_retired());
        let region = &acquired.region;
        if region.is_empty() {
            return Ok(());
        }
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.region.buffer() == region.buffer())
        {
            entry.conveyed |= acquired.conveyed;
            return Ok(());
        }

        self.ensure_disjoint(region)?;
        let idx = self.entries.partition_point(|entry| entry.region.base() < region.base());
        self.entries.insert(idx, acquired);
        Ok(())
    }

    /// Checks that `region` shares no byte with a live held buffer, without
    /// adding it.
    ///
    /// # Errors
    /// If it does.
    pub fn ensure_disjoint(&self, region: &BufferRegion) -> Result<(), Violation> {
        if region.is_empty() {
            return Ok(());
        }
        let idx = self.entries.partition_point(|entry| entry.region.base() < region.base());
        let overlaps = |entry: &Acquired| {
            !entry.region.is_retired()
                && entry.region.base() < region.end()
                && region.base() < entry.region.end()
        };
        let prev = idx.checked_sub(1).map(|prev| &self.entries[prev]);
        if prev.into_iter().chain(self.entries.get(idx)).any(overlaps) {
            return Err(Violation::OverlappingRegion {
                id: region.buffer(),
                base: region.base(),
                len: region.len(),
            });
        }
        Ok(())
    }

    /// Drops a buffer, returning whether it was held.
    pub fn remove(&mut self, buffer: NodeId) -> bool {
        let len = self.entries.len();
        self.entries.retain(|entry| entry.region.buffer() != buffer);
        self.entries.len() != len
    }

    /// The held buffer containing `address`, with the offset of the address
    /// into it.
    #[must_use]
    pub fn resolve(&self, address: Address) -> Option<(&Acquired, u64)> {
        let idx = self.entries.partition_point(|entry| entry.region.end() <= address);
        let entry = self.entries.get(idx)?;
        let region = &entry.region;
        if !region.contains(address) || region.is_retired() {
            return None;
        }
        Some((entry, address - region.base()))
    }

    /// Splits `span` along held-buffer boundaries. Bytes outside every held
    /// buffer are not shadowed and are left out.
    pub fn split(&mut self, span: Range<Address>) -> Vec<Slice> {
        let first = self.entries.partition_point(|entry| entry.region.end() <= span.start);
        let mut slices = vec![];
        let mut retired = false;
        for entry in self.entries[first..]
            .iter()
            .take_while(|entry| entry.region.base() < span.end)
        {
            if entry.region.is_retired() {
                retired = true;
                continue;
            }
            let start = span.start.max(entry.region.base());
            let end = span.end.min(entry.region.end());
            if start < end {
                slices.push(Slice {
                    acquired: entry.clone(),
                    span: start..end,
                });
            }
        }
        if retired {
            self.entries.retain(|entry| !entry.region.is_retired());
        }
        slices
    }

    /// Number of held buffers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no buffer is held.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use crate::shadow::RegionTable;

    fn held(table: &RegionTable, id: u64, base: Address, len: u64, conveyed: bool) -> Acquired {
        let region = table
            .insert(BufferRegion::new(NodeId(id), base, len))
            .unwrap();
        Acquired { region, conveyed }
    }

    #[test]
    fn split_follows_buffer_boundaries() {
        let table = RegionTable::new();
        let mut index = AcquisitionIndex::build([
            held(&table, 2, 0x200, 0x10, false),
            held(&table, 1, 0x100, 0x100, true),
            held(&table, 3, 0x300, 0x10, true),
        ])
        .unwrap();
        assert_eq!(index.len(), 3);

        let slices = index.split(0x1f8..0x208);
        let parts: Vec<_> = slices
            .iter()
            .map(|slice| (slice.acquired.region.buffer(), slice.span.clone()))
            .collect();
        assert_eq!(parts, [(NodeId(1), 0x1f8..0x200), (NodeId(2), 0x200..0x208)]);
        assert!(slices[0].acquired.conveyed);
        assert!(!slices[1].acquired.conveyed);

        // Gap between buffers 2 and 3.
        assert!(index.split(0x210..0x300).is_empty());
        assert!(index.resolve(0x2ff).is_none());
        let (acquired, offset) = index.resolve(0x30f).unwrap();
        assert_eq!((acquired.region.buffer(), offset), (NodeId(3), 0xf));
        assert_eq!(index.resolve(0x200).map(|(_, offset)| offset), Some(0));
        assert!(index.resolve(0x310).is_none());
    }

    #[test]
    fn overlapping_buffers_are_rejected() {
        let table = RegionTable::new();
        let mut index = AcquisitionIndex::new();
        index.insert(held(&table, 1, 0x100, 0x10, true)).unwrap();
        assert_eq!(
            index.insert(held(&table, 2, 0x108, 0x10, true)),
            Err(Violation::OverlappingRegion {
                id: NodeId(2),
                base: 0x108,
                len: 0x10,
            })
        );
        let clash = BufferRegion::new(NodeId(5), 0x0f8, 0x10);
        assert!(index.ensure_disjoint(&clash).is_err());
        assert_eq!(index.len(), 1);
        assert_eq!(index.ensure_disjoint(&BufferRegion::new(NodeId(5), 0x0f0, 0x10)), Ok(()));
        index.insert(held(&table, 3, 0x110, 0x10, false)).unwrap();
        index.insert(held(&table, 4, 0x105, 0, false)).unwrap();
        assert_eq!(index.len(), 2);
        assert!(!index.remove(NodeId(4)));
    }

    #[test]
    fn reinsertion_widens_conveyance() {
        let table = RegionTable::new();
        let acquired = held(&table, 1, 0x100, 0x10, false);
        let mut index = AcquisitionIndex::build([acquired.clone()]).unwrap();
        index
            .insert(Acquired {
                conveyed: true,
                ..acquired
            })
            .unwrap();
        assert_eq!(index.len(), 1);
        assert!(index.resolve(0x100).unwrap().0.conveyed);
    }

    #[test]
    fn destroyed_buffers_drop_out() {
        let table = RegionTable::new();
        let mut index = AcquisitionIndex::build([
            held(&table, 1, 0x100, 0x10, true),
            held(&table, 2, 0x110, 0x10, true),
        ])
        .unwrap();
        table.remove(NodeId(1)).unwrap();
        assert!(index.resolve(0x100).is_none());
        assert_eq!(index.split(0x100..0x120).len(), 1);
        assert_eq!(index.len(), 1);

        // Memory of the destroyed buffer can be handed out again.
        index.insert(held(&table, 5, 0x100, 0x10, false)).unwrap();
        assert!(index.remove(NodeId(5)));
        assert!(!index.remove(NodeId(5)));
        assert_eq!(index.len(), 1);
    }
}
