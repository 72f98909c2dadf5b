use derive_more::{Display, From};
use indexmap::IndexMap as _IndexMap;
use rustc_hash::FxBuildHasher;
use std::collections::{HashMap as _HashMap, HashSet as _HashSet};

/// Opaque identifier of a task, buffer or event, as assigned by the runtime.
///
/// Ids are unique across all three node kinds.
#[derive(Debug, Display, From, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{_0}")]
#[repr(transparent)]
pub struct NodeId(pub u64);

/// Per-task count of children spawned so far.
pub type Epoch = u32;
/// Byte address in the monitored program.
pub type Address = u64;
/// Address of the instruction that performed an access.
pub type InstructionPointer = u64;

/// A point in a task's execution: the task and the epoch it was in.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[display("{task}#{epoch}")]
pub struct TaskEpoch {
    /// Task that performed the work.
    pub task: NodeId,
    /// Epoch of `task` at that moment.
    pub epoch: Epoch,
}

impl TaskEpoch {
    /// Shorthand constructor.
    #[must_use]
    pub fn new(task: u64, epoch: Epoch) -> Self {
        Self {
            task: NodeId(task),
            epoch,
        }
    }
}

/// Kind of a monitored memory access.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AccessKind {
    /// Load.
    #[display("Read")]
    Read,
    /// Store.
    #[display("Write")]
    Write,
}

impl AccessKind {
    /// Maps the harness' `isRead` flag to a kind.
    #[must_use]
    pub fn from_is_read(is_read: bool) -> Self {
        if is_read { Self::Read } else { Self::Write }
    }
}

/// Access mode a buffer was created with.
#[derive(Debug, Display, Default, Copy, Clone, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Shared read-write.
    #[default]
    #[display("rw")]
    ReadWrite,
    /// Read-only.
    #[display("ro")]
    ReadOnly,
    /// Exclusive write.
    #[display("ew")]
    ExclusiveWrite,
    /// Never modified after creation.
    #[display("const")]
    Constant,
}

pub(crate) type HashMap<K, V> = _HashMap<K, V, FxBuildHasher>;
pub(crate) type HashSet<T> = _HashSet<T, FxBuildHasher>;
/// `IndexMap` type with fast hasher.
pub type IndexMap<K, V> = _IndexMap<K, V, FxBuildHasher>;
