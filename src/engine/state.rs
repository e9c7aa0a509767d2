use std::time::{Duration, Instant};

/// Lifecycle shared by processors, chains and graphs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Idle,
    Running { started_at: Option<Instant> },
    ShuttingDown,
    Stopped { uptime: Option<Duration> },
}

impl LifecycleState {
    /// Check if transition from current state to target state is valid
    pub fn can_transition_to(&self, target: &LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, target),
            (Idle, Running { .. })
                | (Idle, Stopped { .. })
                | (Running { .. }, ShuttingDown)
                | (ShuttingDown, Stopped { .. })
        )
    }

    /// Move to `target`, returning false and staying put if not allowed
    pub fn transition_to(&mut self, target: LifecycleState) -> bool {
        if !self.can_transition_to(&target) {
            return false;
        }
        *self = target;
        true
    }

    pub(crate) fn running() -> Self {
        Self::Running {
            started_at: Some(Instant::now()),
        }
    }

    /// Stopped state carrying the uptime of the run that preceded it
    pub(crate) fn stopped_after(started_at: Option<Instant>) -> Self {
        Self::Stopped {
            uptime: started_at.map(|t| t.elapsed()),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, Self::Stopped { .. })
    }

    pub fn started_at(&self) -> Option<Instant> {
        match self {
            Self::Running { started_at } => *started_at,
            _ => None,
        }
    }

    /// Get human-readable state name
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "Idle",
            Self::Running { .. } => "Running",
            Self::ShuttingDown => "ShuttingDown",
            Self::Stopped { .. } => "Stopped",
        }
    }
}

impl Default for LifecycleState {
    fn default() -> Self {
        Self::Idle
    }
}
