use crate::{
    sync::Mutex,
    types::{AccessKind, Address, Epoch, InstructionPointer, NodeId, TaskEpoch},
};
use derive_more::Display;

/// One side of a race: who touched the byte, when, and how.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("{kind} by {task}#{epoch} at ip {ip:#x}")]
pub struct Access {
    /// Accessing task.
    pub task: NodeId,
    /// Epoch of the task at the access.
    pub epoch: Epoch,
    /// Accessing instruction.
    pub ip: InstructionPointer,
    /// Load or store.
    pub kind: AccessKind,
}

impl Access {
    /// The `(task, epoch)` point this access happened at.
    #[must_use]
    pub fn stamp(&self) -> TaskEpoch {
        TaskEpoch {
            task: self.task,
            epoch: self.epoch,
        }
    }
}

/// Two conflicting accesses to one byte with no happens-before relation.
///
/// Instruction pointers are reported raw; resolving them to source locations
/// is left to the host.
#[derive(Debug, Display, Copy, Clone, PartialEq, Eq, Hash)]
#[display("{}-{} race at {address:#x}: first {earlier}, second {later}", earlier.kind, later.kind)]
pub struct RaceReport {
    /// Access recorded in shadow memory.
    pub earlier: Access,
    /// Access that revealed the race.
    pub later: Access,
    /// Byte both accesses touched.
    pub address: Address,
}

impl RaceReport {
    /// `(earlier, later)` access kinds.
    #[must_use]
    pub fn kinds(&self) -> (AccessKind, AccessKind) {
        (self.earlier.kind, self.later.kind)
    }
}

/// Destination of race reports.
///
/// Called from whichever worker observed the race, possibly concurrently.
pub trait RaceSink: Send + Sync {
    /// Receives one report.
    fn report(&self, report: RaceReport);
}

impl<F> RaceSink for F
where
    F: Fn(RaceReport) + Send + Sync,
{
    fn report(&self, report: RaceReport) {
        self(report);
    }
}

/// Sink that keeps every report in arrival order.
#[derive(Debug, Default)]
pub struct RaceLog {
    reports: Mutex<Vec<RaceReport>>,
}

impl RaceLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the reports received so far.
    #[must_use]
    pub fn snapshot(&self) -> Vec<RaceReport> {
        self.reports.lock().clone()
    }

    /// Removes and returns the reports received so far.
    pub fn take(&self) -> Vec<RaceReport> {
        core::mem::take(&mut *self.reports.lock())
    }

    /// Number of reports received so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.reports.lock().len()
    }

    /// Whether no race was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.reports.lock().is_empty()
    }
}

impl RaceSink for RaceLog {
    fn report(&self, report: RaceReport) {
        self.reports.lock().push(report);
    }
}

#[cfg(all(test, not(feature = "loom")))]
mod tests {
    use super::*;

    #[test]
    fn report_renders_both_sides() {
        let report = RaceReport {
            earlier: Access {
                task: NodeId(3),
                epoch: 1,
                ip: 0x40_1000,
                kind: AccessKind::Write,
            },
            later: Access {
                task: NodeId(5),
                epoch: 0,
                ip: 0x40_2000,
                kind: AccessKind::Read,
            },
            address: 0x7f00,
        };
        assert_eq!(
            report.to_string(),
            "Write-Read race at 0x7f00: first Write by 3#1 at ip 0x401000, \
             second Read by 5#0 at ip 0x402000"
        );
        assert_eq!(report.kinds(), (AccessKind::Write, AccessKind::Read));
    }

    #[test]
    fn closures_and_logs_are_sinks() {
        let log = RaceLog::new();
        let forward = |report| log.report(report);
        let report = RaceReport {
            earlier: Access {
                task: NodeId(1),
                epoch: 0,
                ip: 0,
                kind: AccessKind::Write,
            },
            later: Access {
                task: NodeId(2),
                epoch: 0,
                ip: 0,
                kind: AccessKind::Write,
            },
            address: 8,
        };
        RaceSink::report(&forward, report);
        assert_eq!(log.len(), 1);
        assert_eq!(log.take(), vec![report]);
        assert!(log.is_empty());
    }
}
