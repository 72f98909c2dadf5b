mod worker;

pub use crate::detector::worker::Worker;
use crate::{
    acquisition::{Acquired, AcquisitionIndex, Slice},
    config::{Config, RacePolicy, Settings},
    detector::worker::TaskContext,
    error::{DetectorError, Violation},
    event::{EventKind, RuntimeEvent},
    graph::{Graph, GraphExport},
    oracle::Oracle,
    report::{Access, RaceSink},
    shadow::{BufferRegion, RegionTable},
    types::{AccessKind, AccessMode, Address, Epoch, InstructionPointer, NodeId},
};
use derive_more::Debug;
use tracing::{debug, trace, warn};

/// Dynamic data-race detector for one monitored run.
///
/// Consumes the runtime's event stream, maintains the computation graph and
/// shadow memory, and delivers a [`RaceReport`](crate::RaceReport) to the configured sink for
/// every pair of conflicting accesses with no happens-before relation.
///
/// The detector is shared by reference among worker threads; each thread
/// reports through its own [`Worker`]. Graph mutations are serialized by one
/// lock, shadow updates by a lock per buffer, and reachability queries share
/// the graph and a lock-light cache.
#[must_use]
#[derive(Debug)]
pub struct Detector<C: Config> {
    settings: Settings,
    graph: Graph,
    regions: RegionTable,
    oracle: Oracle,
    #[debug(skip)]
    sink: C::Sink,
}

impl<C: Config> Detector<C> {
    /// Creates a detector with default [`Settings`].
    pub fn new(sink: C::Sink) -> Self {
        Self::with_settings(sink, Settings::default())
    }

    /// Creates a detector.
    pub fn with_settings(sink: C::Sink, settings: Settings) -> Self {
        Self {
            settings,
            graph: Graph::new(),
            regions: RegionTable::new(),
            oracle: Oracle::new(),
            sink,
        }
    }

    /// Dispatches one event of the instrumentation stream.
    ///
    /// # Errors
    /// See the typed entry point of the event.
    pub fn handle(&self, worker: &mut Worker, event: RuntimeEvent) -> Result<(), DetectorError> {
        match event {
            RuntimeEvent::TaskCreated {
                task,
                parent,
                dependencies,
                output_event,
            } => self.task_created(worker, task, parent, &dependencies, output_event),
            RuntimeEvent::BufferCreated {
                buffer,
                base,
                len,
                mode,
            } => self.buffer_created(worker, buffer, base, len, mode),
            RuntimeEvent::BufferDestroyed { buffer } => self.buffer_destroyed(worker, buffer),
            RuntimeEvent::EventCreated { event } => self.event_created(event),
            RuntimeEvent::DependencyAdded { src, dst } => self.dependency_added(src, dst),
            RuntimeEvent::EventSatisfied { task, event } => self.event_satisfied(task, event),
            RuntimeEvent::TaskStarted { task, acquired } => {
                self.task_started(worker, task, &acquired)
            }
            RuntimeEvent::MemoryAccessed {
                address,
                size,
                ip,
                kind,
            } => self.memory_accessed(worker, address, size, ip, kind),
        }
    }

    /// A task was created, spawned by `parent` if given, depending on
    /// `dependencies` and satisfying `output_event` when done.
    ///
    /// A spawn by the task bound to `worker` advances the epoch its later
    /// accesses are recorded at, so spawns must be reported from the worker
    /// running the parent.
    ///
    /// # Errors
    /// On a duplicate `task` or an unknown or mistyped referenced node.
    pub fn task_created(
        &self,
        worker: &mut Worker,
        task: NodeId,
        parent: Option<NodeId>,
        dependencies: &[NodeId],
        output_event: Option<NodeId>,
    ) -> Result<(), DetectorError> {
        let spawn_epoch = self
            .graph
            .spawn_task(task, parent, dependencies, output_event)
            .map_err(DetectorError::protocol(EventKind::TaskCreated))?;
        debug!(%task, ?parent, ?spawn_epoch, dependencies = dependencies.len(), "task created");
        if let (Some(parent), Some(epoch)) = (parent, spawn_epoch)
            && let Some(ctx) = worker.context_of(parent)
        {
            ctx.epoch = epoch + 1;
        }
        Ok(())
    }

    /// A buffer of `len` bytes at `base` was allocated. The task bound to
    /// `worker`, if any, becomes its creator and holds it from now on.
    ///
    /// # Errors
    /// On a duplicate id, or if the buffer overlaps one the creator holds.
    pub fn buffer_created(
        &self,
        worker: &mut Worker,
        buffer: NodeId,
        base: Address,
        len: u64,
        mode: AccessMode,
    ) -> Result<(), DetectorError> {
        let error = DetectorError::protocol(EventKind::BufferCreated);
        let region = BufferRegion::new(buffer, base, len);
        let creator = worker.context.as_ref().map(|ctx| ctx.task);
        if let Some(ctx) = worker.context.as_ref() {
            ctx.index.ensure_disjoint(&region).map_err(error)?;
        }
        self.graph.create_buffer(buffer, mode, creator).map_err(error)?;
        let region = self.regions.insert(region).map_err(error)?;
        if let Some(ctx) = worker.context.as_mut() {
            ctx.index
                .insert(Acquired {
                    region,
                    conveyed: true,
                })
                .map_err(error)?;
        }
        debug!(%buffer, base = format_args!("{base:#x}"), len, %mode, ?creator, "buffer created");
        Ok(())
    }

    /// A buffer was freed. Its shadow memory is released and later accesses to
    /// its bytes are no longer checked.
    ///
    /// # Errors
    /// If `buffer` is not a known buffer or was already destroyed.
    pub fn buffer_destroyed(
        &self,
        worker: &mut Worker,
        buffer: NodeId,
    ) -> Result<(), DetectorError> {
        let error = DetectorError::protocol(EventKind::BufferDestroyed);
        if let Err(violation) = self.graph.read().buffer(buffer) {
            return Err(error(violation));
        }
        if self.regions.remove(buffer).is_none() {
            return Err(error(Violation::DestroyedBuffer(buffer)));
        }
        if let Some(ctx) = worker.context.as_mut() {
            ctx.index.remove(buffer);
        }
        debug!(%buffer, "buffer destroyed");
        Ok(())
    }

    /// An event was created.
    ///
    /// # Errors
    /// On a duplicate id.
    pub fn event_created(&self, event: NodeId) -> Result<(), DetectorError> {
        self.graph
            .create_event(event)
            .map_err(DetectorError::protocol(EventKind::EventCreated))?;
        debug!(%event, "event created");
        Ok(())
    }

    /// `dst` now depends on `src`.
    ///
    /// # Errors
    /// If either node is unknown, or they are the same node.
    pub fn dependency_added(&self, src: NodeId, dst: NodeId) -> Result<(), DetectorError> {
        self.graph
            .add_dependency_edge(src, dst)
            .map_err(DetectorError::protocol(EventKind::DependencyAdded))?;
        debug!(%src, %dst, "dependency added");
        Ok(())
    }

    /// `task` satisfied `event`.
    ///
    /// # Errors
    /// If `task` is not a known task or `event` not a known event.
    pub fn event_satisfied(&self, task: NodeId, event: NodeId) -> Result<(), DetectorError> {
        self.graph
            .satisfy_event(task, event)
            .map_err(DetectorError::protocol(EventKind::EventSatisfied))?;
        debug!(%task, %event, "event satisfied");
        Ok(())
    }

    /// `task` began executing on `worker`, holding the `acquired` buffers.
    /// Replaces whatever task was bound before.
    ///
    /// # Errors
    /// If `task` is not a known task, an acquired id is not a live buffer, or
    /// two acquired buffers overlap.
    pub fn task_started(
        &self,
        worker: &mut Worker,
        task: NodeId,
        acquired: &[NodeId],
    ) -> Result<(), DetectorError> {
        let error = DetectorError::protocol(EventKind::TaskStarted);
        let (epoch, held) = self.acquire(task, acquired).map_err(error)?;
        let index = AcquisitionIndex::build(held).map_err(error)?;
        debug!(%task, epoch, held = index.len(), "task started");
        worker.context = Some(TaskContext { task, epoch, index });
        Ok(())
    }

    /// The task bound to `worker` touched `size` bytes at `address`.
    ///
    /// Bytes outside the buffers the task holds are not checked. Through a
    /// buffer that was not conveyed to the task, only dependency and
    /// satisfaction edges order earlier accesses when
    /// [`Settings::require_conveyance`] is set.
    ///
    /// Every race found is logged; with [`RacePolicy::Continue`] each one is
    /// delivered to the sink, with [`RacePolicy::Abort`] only the first one.
    /// The access is recorded either way.
    ///
    /// # Errors
    /// [`DetectorError::Race`] carrying the first race under
    /// [`RacePolicy::Abort`], or a protocol violation if the graph lost track
    /// of a task.
    pub fn memory_accessed(
        &self,
        worker: &mut Worker,
        address: Address,
        size: u32,
        ip: InstructionPointer,
        kind: AccessKind,
    ) -> Result<(), DetectorError> {
        let Some(ctx) = worker.context.as_mut() else {
            trace!(address = format_args!("{address:#x}"), size, %kind, "access outside any task");
            return Ok(());
        };
        let access = Access {
            task: ctx.task,
            epoch: ctx.epoch,
            ip,
            kind,
        };
        let span = address..address.saturating_add(u64::from(size));
        let abort = self.settings.policy == RacePolicy::Abort;
        let mut first = None;
        for Slice { acquired, span } in ctx.index.split(span) {
            let reports = acquired
                .region
                .access(span, access, |sources| {
                    if self.settings.require_conveyance && !acquired.conveyed {
                        self.oracle.reachable_by_edges(&self.graph, sources, access.task)
                    } else {
                        self.oracle.reachable(&self.graph, sources, access.task)
                    }
                })
                .map_err(DetectorError::protocol(EventKind::MemoryAccessed))?;
            for report in reports {
                warn!(
                    race = %report,
                    buffer = %acquired.region.buffer(),
                    conveyed = acquired.conveyed,
                    "data race"
                );
                let is_first = first.is_none();
                if is_first {
                    first = Some(report);
                }
                if is_first || !abort {
                    self.sink.report(report);
                }
            }
        }
        match first {
            Some(report) if abort => Err(DetectorError::Race(Box::new(report))),
            _ => Ok(()),
        }
    }

    /// Runtime settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Computation graph built so far.
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Happens-before oracle.
    pub fn oracle(&self) -> &Oracle {
        &self.oracle
    }

    /// Race sink.
    pub fn sink(&self) -> &C::Sink {
        &self.sink
    }

    /// Number of buffers with live shadow memory.
    #[must_use]
    pub fn live_buffers(&self) -> usize {
        self.regions.len()
    }

    /// Snapshot of the computation graph for visualization.
    #[must_use]
    pub fn export(&self) -> GraphExport {
        self.graph.export()
    }

    /// Resolves the buffers a starting task holds, with the task's epoch.
    fn acquire(
        &self,
        task: NodeId,
        acquired: &[NodeId],
    ) -> Result<(Epoch, Vec<Acquired>), Violation> {
        let view = self.graph.read();
        let epoch = view.epoch(task)?;
        let held = acquired
            .iter()
            .map(|&buffer| -> Result<_, Violation> {
                let node = view.buffer(buffer)?;
                let region = self
                    .regions
                    .get(buffer)
                    .ok_or(Violation::DestroyedBuffer(buffer))?;
                let conveyed = view.has_dependency(buffer, task) || node.creator() == Some(task);
                Ok(Acquired { region, conveyed })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok((epoch, held))
    }
}

impl<C: Config> Detector<C>
where
    C::Sink: Default,
{
    /// Creates a detector with a default sink and default [`Settings`].
    pub fn with_default_sink() -> Self {
        Self::new(C::Sink::default())
    }
}
