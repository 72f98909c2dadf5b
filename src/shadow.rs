use crate::{
    error::Violation,
    report::{Access, RaceReport},
    sync::{Arc, AtomicBool, Mutex, Ordering, RwLock},
    types::{AccessKind, Address, Epoch, HashMap, InstructionPointer, NodeId, TaskEpoch},
};
use core::ops::Range;

/// One recorded touch of a byte.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct AccessRecord {
    /// Accessing task.
    pub task: NodeId,
    /// Epoch of the task at the access.
    pub epoch: Epoch,
    /// Accessing instruction.
    pub ip: InstructionPointer,
}

impl AccessRecord {
    /// The `(task, epoch)` point of the access.
    #[must_use]
    pub fn stamp(&self) -> TaskEpoch {
        TaskEpoch {
            task: self.task,
            epoch: self.epoch,
        }
    }

    fn with_kind(self, kind: AccessKind) -> Access {
        let Self { task, epoch, ip } = self;
        Access {
            task,
            epoch,
            ip,
            kind,
        }
    }
}

/// History of one byte: the last write and the reads since.
#[derive(Debug, Default)]
pub struct BytePage {
    write: Option<AccessRecord>,
    reads: HashMap<NodeId, AccessRecord>,
}

impl BytePage {
    /// Last write, if any.
    #[must_use]
    pub fn last_write(&self) -> Option<&AccessRecord> {
        self.write.as_ref()
    }

    /// Reads since the last write, at most one per task.
    pub fn reads(&self) -> impl Iterator<Item = &AccessRecord> {
        self.reads.values()
    }

    fn record(&mut self, kind: AccessKind, record: AccessRecord) {
        match kind {
            AccessKind::Read => {
                self.reads.insert(record.task, record);
            }
            AccessKind::Write => {
                // A write dominates every earlier read for later comparisons.
                self.write = Some(record);
                self.reads.clear();
            }
        }
    }
}

/// Shadow state of one buffer.
///
/// Pages are allocated on first touch. Check-then-update of an access runs
/// under the region lock, so racing accesses cannot corrupt the history they
/// are being checked against.
#[derive(Debug)]
pub struct BufferRegion {
    buffer: NodeId,
    base: Address,
    len: u64,
    retired: AtomicBool,
    pages: Mutex<Vec<Option<Box<BytePage>>>>,
}

/// A previous access that conflicts with the current one on some byte.
struct Candidate {
    address: Address,
    earlier: Access,
}

impl BufferRegion {
    /// Creates the shadow of `len` bytes starting at `base`.
    #[must_use]
    pub fn new(buffer: NodeId, base: Address, len: u64) -> Self {
        Self {
            buffer,
            base,
            len,
            retired: AtomicBool::new(false),
            pages: Mutex::new(Vec::new()),
        }
    }

    /// Buffer this region shadows.
    #[must_use]
    pub fn buffer(&self) -> NodeId {
        self.buffer
    }

    /// First shadowed address.
    #[must_use]
    pub fn base(&self) -> Address {
        self.base
    }

    /// Number of shadowed bytes.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Whether the region shadows no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last shadowed address.
    #[must_use]
    pub fn end(&self) -> Address {
        self.base.saturating_add(self.len)
    }

    /// Whether `address` falls inside the region.
    #[must_use]
    pub fn contains(&self, address: Address) -> bool {
        (self.base..self.end()).contains(&address)
    }

    /// Whether the buffer has been destroyed.
    #[must_use]
    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    /// Runs the read/write protocol for `access` over the bytes of `span`.
    ///
    /// Every earlier access by another task that conflicts with `access` on
    /// some byte is collected; their `(task, epoch)` points are passed, sorted
    /// and deduplicated, to `unordered`, which must return those that do not
    /// happen before `access` (sorted). Each conflict involving one of them
    /// becomes a report. Afterwards `access` is recorded on every byte.
    ///
    /// Accesses to a retired region are ignored.
    ///
    /// # Errors
    /// Whatever `unordered` fails with; the history is left untouched then.
    pub fn access<E>(
        &self,
        span: Range<Address>,
        access: Access,
        unordered: impl FnOnce(&[TaskEpoch]) -> Result<Vec<TaskEpoch>, E>,
    ) -> Result<Vec<RaceReport>, E> {
        assert!(
            span.start >= self.base && span.end <= self.end(),
            "BufferRegion::access: [1]"
        );
        let mut pages = self.pages.lock();
        if self.is_retired() || span.is_empty() {
            return Ok(vec![]);
        }
        if pages.is_empty() {
            let len = usize::try_from(self.len).expect("BufferRegion::access: [2]");
            pages.resize_with(len, || None);
        }
        let offsets = self.offset(span.start)..self.offset(span.end);

        let mut candidates = vec![];
        for (address, page) in (span.start..).zip(&pages[offsets.clone()]) {
            let Some(page) = page else {
                continue;
            };
            let earlier = page
                .write
                .iter()
                .map(|write| write.with_kind(AccessKind::Write));
            let readers = page
                .reads
                .values()
                .filter(|_| access.kind == AccessKind::Write)
                .map(|read| read.with_kind(AccessKind::Read));
            candidates.extend(
                earlier
                    .chain(readers)
                    .filter(|earlier| earlier.task != access.task)
                    .map(|earlier| Candidate { address, earlier }),
            );
        }

        let mut reports = vec![];
        if !candidates.is_empty() {
            let mut sources: Vec<_> = candidates.iter().map(|c| c.earlier.stamp()).collect();
            sources.sort_unstable();
            sources.dedup();
            let unordered = unordered(&sources)?;
            reports.extend(
                candidates
                    .into_iter()
                    .filter(|c| unordered.binary_search(&c.earlier.stamp()).is_ok())
                    .map(|Candidate { address, earlier }| RaceReport {
                        earlier,
                        later: access,
                        address,
                    }),
            );
        }

        let record = AccessRecord {
            task: access.task,
            epoch: access.epoch,
            ip: access.ip,
        };
        for page in &mut pages[offsets] {
            page.get_or_insert_with(Box::default).record(access.kind, record);
        }
        Ok(reports)
    }

    /// Reads the history of the byte at `address`.
    ///
    /// # Panics
    /// If `address` is outside the region.
    pub fn with_page<R>(&self, address: Address, f: impl FnOnce(Option<&BytePage>) -> R) -> R {
        assert!(self.contains(address), "BufferRegion::with_page: [1]");
        let pages = self.pages.lock();
        f(pages.get(self.offset(address)).and_then(Option::as_deref))
    }

    fn offset(&self, address: Address) -> usize {
        usize::try_from(address - self.base).expect("BufferRegion::offset: [1]")
    }

    fn retire(&self) {
        self.retired.store(true, Ordering::Release);
        // Frees the history; holders of the region see it as retired.
        *self.pages.lock() = Vec::new();
    }
}

/// Every live buffer region, keyed by buffer id.
#[derive(Debug, Default)]
pub struct RegionTable {
    regions: RwLock<HashMap<NodeId, Arc<BufferRegion>>>,
}

impl RegionTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the region of a new buffer.
    ///
    /// # Errors
    /// If a live region with the same buffer id exists.
    pub fn insert(&self, region: BufferRegion) -> Result<Arc<BufferRegion>, Violation> {
        let id = region.buffer;
        let mut regions = self.regions.write();
        if regions.contains_key(&id) {
            return Err(Violation::DuplicateNode(id));
        }
        let region = Arc::new(region);
        regions.insert(id, region.clone());
        Ok(region)
    }

    /// Looks a live region up.
    #[must_use]
    pub fn get(&self, buffer: NodeId) -> Option<Arc<BufferRegion>> {
        self.regions.read().get(&buffer).cloned()
    }

    /// Unregisters a region and frees its history.
    pub fn remove(&self, buffer: NodeId) -> Option<Arc<BufferRegion>> {
        let region = self.regions.write().remove(&buffer)?;
        region.retire();
        Some(region)
    }

    /// Number of live regions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    /// Whether no region is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.regions.read().is_empty()
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;
    use core::convert::Infallible;

    fn access(task: u64, epoch: Epoch, kind: AccessKind) -> Access {
        Access {
            task: NodeId(task),
            epoch,
            ip: 0x1000 + task,
            kind,
        }
    }

    /// Treats every source as unordered and remembers what it was asked.
    fn all_unordered(
        asked: &mut Vec<TaskEpoch>,
    ) -> impl FnOnce(&[TaskEpoch]) -> Result<Vec<TaskEpoch>, Infallible> + '_ {
        move |sources| {
            asked.extend_from_slice(sources);
            Ok(sources.to_vec())
        }
    }

    fn never_called(_: &[TaskEpoch]) -> Result<Vec<TaskEpoch>, Infallible> {
        panic!("no conflict expected")
    }

    #[test]
    fn first_touch_has_nothing_to_check() {
        let region = BufferRegion::new(NodeId(9), 0x100, 16);
        let reports = region
            .access(0x104..0x108, access(1, 0, AccessKind::Write), never_called)
            .unwrap();
        assert!(reports.is_empty());
        region.with_page(0x104, |page| {
            assert_eq!(page.unwrap().last_write().unwrap().task, NodeId(1));
        });
        region.with_page(0x100, |page| assert!(page.is_none()));
    }

    #[test]
    fn read_checks_only_the_last_write() {
        let region = BufferRegion::new(NodeId(9), 0, 4);
        region.access(0..1, access(1, 0, AccessKind::Write), never_called).unwrap();
        region.access(0..1, access(2, 0, AccessKind::Read), all_unordered(&mut vec![])).unwrap();

        let mut asked = vec![];
        let reports = region
            .access(0..1, access(3, 2, AccessKind::Read), all_unordered(&mut asked))
            .unwrap();
        assert_eq!(asked, vec![TaskEpoch::new(1, 0)]);
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kinds(), (AccessKind::Write, AccessKind::Read));
        assert_eq!(reports[0].later.epoch, 2);
    }

    #[test]
    fn write_checks_writer_and_readers_then_clears_reads() {
        let region = BufferRegion::new(NodeId(9), 0, 4);
        region.access(0..2, access(1, 0, AccessKind::Write), never_called).unwrap();
        let ordered = |_: &[TaskEpoch]| Ok::<Vec<TaskEpoch>, Infallible>(vec![]);
        region.access(0..2, access(2, 0, AccessKind::Read), ordered).unwrap();
        region.access(1..2, access(3, 1, AccessKind::Read), ordered).unwrap();

        let mut asked = vec![];
        let reports = region
            .access(0..2, access(4, 0, AccessKind::Write), all_unordered(&mut asked))
            .unwrap();
        assert_eq!(
            asked,
            vec![TaskEpoch::new(1, 0), TaskEpoch::new(2, 0), TaskEpoch::new(3, 1)]
        );
        // Byte 0: writer 1, reader 2. Byte 1: writer 1, readers 2 and 3.
        assert_eq!(reports.len(), 5);
        assert_eq!(reports.iter().filter(|r| r.address == 1).count(), 3);

        region.with_page(1, |page| {
            let page = page.unwrap();
            assert_eq!(page.last_write().unwrap().task, NodeId(4));
            assert_eq!(page.reads().count(), 0);
        });
    }

    #[test]
    fn only_unordered_sources_are_reported() {
        let region = BufferRegion::new(NodeId(9), 0, 1);
        region.access(0..1, access(1, 0, AccessKind::Read), never_called).unwrap();
        region.access(0..1, access(2, 0, AccessKind::Read), never_called).unwrap();
        let reports = region
            .access(0..1, access(3, 0, AccessKind::Write), |_| {
                Ok::<_, Infallible>(vec![TaskEpoch::new(2, 0)])
            })
            .unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].earlier.task, NodeId(2));
        assert_eq!(reports[0].kinds(), (AccessKind::Read, AccessKind::Write));
    }

    #[test]
    fn own_accesses_never_conflict() {
        let region = BufferRegion::new(NodeId(9), 0, 2);
        region.access(0..2, access(1, 0, AccessKind::Read), never_called).unwrap();
        region.access(0..2, access(1, 0, AccessKind::Write), never_called).unwrap();
        region.access(0..2, access(1, 3, AccessKind::Write), never_called).unwrap();
        region.access(0..2, access(1, 3, AccessKind::Read), never_called).unwrap();
    }

    #[test]
    fn failed_check_leaves_history_untouched() {
        let region = BufferRegion::new(NodeId(9), 0, 1);
        region.access(0..1, access(1, 0, AccessKind::Write), never_called).unwrap();
        let err = region.access(0..1, access(2, 0, AccessKind::Write), |_| Err("boom"));
        assert_eq!(err, Err("boom"));
        region.with_page(0, |page| {
            assert_eq!(page.unwrap().last_write().unwrap().task, NodeId(1));
        });
    }

    #[test]
    fn removed_regions_retire() {
        let table = RegionTable::new();
        let region = table.insert(BufferRegion::new(NodeId(9), 0, 8)).unwrap();
        assert_eq!(
            table.insert(BufferRegion::new(NodeId(9), 0, 8)).unwrap_err(),
            Violation::DuplicateNode(NodeId(9))
        );
        region.access(0..8, access(1, 0, AccessKind::Write), never_called).unwrap();

        assert!(table.remove(NodeId(9)).is_some());
        assert!(region.is_retired());
        assert!(table.get(NodeId(9)).is_none());
        assert!(table.is_empty());
        let reports = region
            .access(0..8, access(2, 0, AccessKind::Write), never_called)
            .unwrap();
        assert!(reports.is_empty());
        region.with_page(0, |page| assert!(page.is_none()));
    }
}
