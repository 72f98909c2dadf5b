use crate::{
    event::EventKind,
    graph::NodeKind,
    report::RaceReport,
    types::{Address, NodeId},
};
use thiserror::Error;

/// A broken event-stream contract.
///
/// Any of these means the stream is not a faithful record of the monitored
/// program, so no later verdict can be trusted.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Violation {
    /// An id was referenced before its creation event.
    #[error("node {0} was never created")]
    UnknownNode(NodeId),
    /// A creation event reused an existing id.
    #[error("node {0} already exists")]
    DuplicateNode(NodeId),
    /// A node was used where a node of another kind is required.
    #[error("node {id} is a {actual}, expected a {expected}")]
    KindMismatch {
        /// Offending node.
        id: NodeId,
        /// Kind the operation requires.
        expected: NodeKind,
        /// Kind the node was created with.
        actual: NodeKind,
    },
    /// A task acquired a buffer overlapping a buffer it already holds.
    #[error("buffer {id} at {base:#x}+{len} overlaps an acquired buffer")]
    OverlappingRegion {
        /// Offending buffer.
        id: NodeId,
        /// Base address of the offending buffer.
        base: Address,
        /// Length of the offending buffer.
        len: u64,
    },
    /// A destroyed buffer was referenced again.
    #[error("buffer {0} was already destroyed")]
    DestroyedBuffer(NodeId),
    /// An edge would connect a node to itself.
    #[error("node {0} cannot depend on or spawn itself")]
    SelfEdge(NodeId),
    /// A task was spawned a second time.
    #[error("task {0} already has a spawn edge")]
    AlreadySpawned(NodeId),
    /// A task spawned more children than an epoch can count.
    #[error("epoch of task {0} overflowed")]
    EpochOverflow(NodeId),
}

/// Error returned by the detector's entry points.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DetectorError {
    /// The event stream broke its contract; the run must stop.
    #[error("protocol violation in {event}: {violation}")]
    Protocol {
        /// Event being processed.
        event: EventKind,
        /// What was wrong with it.
        #[source]
        violation: Violation,
    },
    /// A race was found and the policy is to stop at the first one.
    #[error("{0}")]
    Race(Box<RaceReport>),
}

impl DetectorError {
    pub(crate) fn protocol(event: EventKind) -> impl Fn(Violation) -> Self + Copy {
        move |violation| {
            tracing::error!(%event, %violation, "protocol violation");
            Self::Protocol { event, violation }
        }
    }
}
