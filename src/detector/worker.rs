use crate::{
    acquisition::AcquisitionIndex,
    types::{Epoch, NodeId, TaskEpoch},
};

/// Per-thread handle of the detector.
///
/// Holds the task currently executing on the thread and the buffers it has
/// acquired. Each worker thread owns one and passes it to every entry point
/// it reports through; workers are never shared.
#[derive(Debug, Default)]
pub struct Worker {
    pub(super) context: Option<TaskContext>,
}

#[derive(Debug)]
pub(super) struct TaskContext {
    pub(super) task: NodeId,
    /// Kept in step with the graph by the spawns this worker reports.
    pub(super) epoch: Epoch,
    pub(super) index: AcquisitionIndex,
}

impl Worker {
    /// Creates a worker with no bound task.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Task bound to the worker and its current epoch.
    #[must_use]
    pub fn current(&self) -> Option<TaskEpoch> {
        self.context.as_ref().map(|ctx| TaskEpoch {
            task: ctx.task,
            epoch: ctx.epoch,
        })
    }

    /// Number of buffers the bound task holds.
    #[must_use]
    pub fn held_buffers(&self) -> usize {
        self.context.as_ref().map_or(0, |ctx| ctx.index.len())
    }

    /// Unbinds the current task; later accesses are ignored until the next
    /// task starts.
    pub fn release(&mut self) -> Option<NodeId> {
        self.context.take().map(|ctx| ctx.task)
    }

    pub(super) fn context_of(&mut self, task: NodeId) -> Option<&mut TaskContext> {
        self.context.as_mut().filter(|ctx| ctx.task == task)
    }
}
