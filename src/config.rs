use crate::report::{RaceLog, RaceSink};

/// Configuration entry-point for instantiating the detector.
///
/// A concrete `Config` binds the sink race reports are delivered to.
pub trait Config: Sized + 'static {
    /// Receiver of race reports.
    type Sink: RaceSink;
}

/// Collects reports into a [`RaceLog`].
#[derive(Debug, Copy, Clone, Default)]
pub struct DefaultConfig;

impl Config for DefaultConfig {
    type Sink = RaceLog;
}

/// What to do once a race has been reported.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub enum RacePolicy {
    /// Report the first race and fail the access that revealed it.
    #[default]
    Abort,
    /// Report every race and keep going.
    Continue,
}

/// Runtime knobs of the detector.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Settings {
    /// Reaction to a race.
    pub policy: RacePolicy,
    /// Treat accesses to a buffer that reached the task without a dependency
    /// edge as unordered with every other task's accesses to it.
    pub require_conveyance: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            policy: RacePolicy::default(),
            require_conveyance: true,
        }
    }
}

impl Settings {
    /// Sets the race policy.
    #[must_use]
    pub fn with_policy(self, policy: RacePolicy) -> Self {
        Self { policy, ..self }
    }

    /// Sets whether buffer ordering must be conveyed by a dependency edge.
    #[must_use]
    pub fn with_require_conveyance(self, require_conveyance: bool) -> Self {
        Self {
            require_conveyance,
            ..self
        }
    }
}
