use crate::types::{AccessKind, AccessMode, Address, InstructionPointer, NodeId};
use derive_more::Display;

/// One record of the instrumentation stream.
///
/// Lifecycle events mutate the computation graph; `TaskStarted` binds the
/// reporting worker to a task; `MemoryAccessed` is checked for races against
/// the shadow memory of the buffers that task holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A task was created, optionally spawned by `parent`.
    TaskCreated {
        /// New task.
        task: NodeId,
        /// Spawning task, `None` for roots.
        parent: Option<NodeId>,
        /// Producers the new task depends on.
        dependencies: Vec<NodeId>,
        /// Event satisfied when the task completes.
        output_event: Option<NodeId>,
    },
    /// A buffer was allocated.
    BufferCreated {
        /// New buffer.
        buffer: NodeId,
        /// First byte of the buffer.
        base: Address,
        /// Length in bytes.
        len: u64,
        /// Mode it was created with.
        mode: AccessMode,
    },
    /// A buffer was freed.
    BufferDestroyed {
        /// Freed buffer.
        buffer: NodeId,
    },
    /// An event was created.
    EventCreated {
        /// New event.
        event: NodeId,
    },
    /// `dst` now depends on `src`.
    DependencyAdded {
        /// Producer.
        src: NodeId,
        /// Consumer.
        dst: NodeId,
    },
    /// `task` satisfied `event`.
    EventSatisfied {
        /// Satisfying task.
        task: NodeId,
        /// Satisfied event.
        event: NodeId,
    },
    /// `task` began executing on the reporting worker.
    TaskStarted {
        /// Started task.
        task: NodeId,
        /// Buffers whose memory the task holds.
        acquired: Vec<NodeId>,
    },
    /// The reporting worker touched memory.
    MemoryAccessed {
        /// First byte touched.
        address: Address,
        /// Number of bytes touched.
        size: u32,
        /// Instruction that touched them.
        ip: InstructionPointer,
        /// Load or store.
        kind: AccessKind,
    },
}

impl RuntimeEvent {
    /// Discriminant used in diagnostics.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::TaskCreated { .. } => EventKind::TaskCreated,
            Self::BufferCreated { .. } => EventKind::BufferCreated,
            Self::BufferDestroyed { .. } => EventKind::BufferDestroyed,
            Self::EventCreated { .. } => EventKind::EventCreated,
            Self::DependencyAdded { .. } => EventKind::DependencyAdded,
            Self::EventSatisfied { .. } => EventKind::EventSatisfied,
            Self::TaskStarted { .. } => EventKind::TaskStarted,
            Self::MemoryAccessed { .. } => EventKind::MemoryAccessed,
        }
    }
}

/// Names a [`RuntimeEvent`] variant in diagnostics.
#[allow(missing_docs)]
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    #[display("TaskCreated")]
    TaskCreated,
    #[display("BufferCreated")]
    BufferCreated,
    #[display("BufferDestroyed")]
    BufferDestroyed,
    #[display("EventCreated")]
    EventCreated,
    #[display("DependencyAdded")]
    DependencyAdded,
    #[display("EventSatisfied")]
    EventSatisfied,
    #[display("TaskStarted")]
    TaskStarted,
    #[display("MemoryAccessed")]
    MemoryAccessed,
}
