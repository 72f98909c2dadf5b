//! Precise dynamic data-race detection for task-parallel dataflow programs.
//!
//! A runtime for dataflow tasks reports its lifecycle (task, buffer and event
//! creation, dependency edges, event satisfaction, task start) and every
//! monitored memory access to a [`Detector`]. The detector:
//! - Builds a computation graph whose edges (spawn, continuation, dependency,
//!   satisfaction) induce a happens-before partial order over `(task, epoch)`
//!   points, where the epoch of a task counts the children it has spawned.
//! - Keeps per-byte shadow memory of the last write and the reads since, for
//!   every buffer a running task holds.
//! - Answers "does this earlier access happen before the current task?" with
//!   a batched backward search over the graph, memoized by a monotonic cache.
//! - Reports every pair of conflicting accesses with no such ordering to a
//!   pluggable [`RaceSink`].
//!
//! Key modules:
//! - `config`: binds a sink type to the detector via the `Config` trait, and
//!   the runtime `Settings`.
//! - `detector`: the event entry points and the per-thread `Worker` handle.
//! - `graph`: the append-only computation graph and its export.
//! - `oracle`: happens-before queries and the reachability cache.
//! - `shadow` and `acquisition`: per-byte history and per-task buffer lookup.
//!
//! Quick start:
//! 1. Create a `Detector<DefaultConfig>` and share it by reference among the
//!    worker threads of the monitored run.
//! 2. Give each worker thread its own `Worker` and forward every
//!    [`RuntimeEvent`] it observes through `Detector::handle`, or call the
//!    typed entry points directly.
//! 3. Read the races from the sink, or stop at the first
//!    `DetectorError::Race` under the default abort policy.
//!
//! A buffer is only compared against the graph for a task it was conveyed to,
//! by a dependency edge from the buffer or by the task creating it. Accesses
//! through unconveyed buffers race with every other task's accesses; see
//! [`Settings::require_conveyance`](config::Settings::require_conveyance).

/// Address lookup over the buffers a running task holds.
pub mod acquisition;
/// Public interface to configure the detector.
///
/// Exposes the `Config` trait which binds the race sink for a concrete
/// instantiation of the detector, and the runtime `Settings`.
pub mod config;
/// The detector's event entry points and per-thread worker handle.
pub mod detector;
/// Protocol violations and detector errors.
pub mod error;
/// Records of the instrumentation stream.
pub mod event;
/// The computation graph: tasks, buffers, events and ordering edges.
pub mod graph;
/// Happens-before queries over the computation graph.
pub mod oracle;
/// Race reports and their sinks.
pub mod report;
/// Per-byte access history.
pub mod shadow;
mod sync;
/// Identifiers, epochs, access kinds and hash-collection aliases.
pub mod types;

pub use crate::{
    config::{Config, DefaultConfig, RacePolicy, Settings},
    detector::{Detector, Worker},
    error::{DetectorError, Violation},
    event::RuntimeEvent,
    report::{RaceLog, RaceReport, RaceSink},
};
