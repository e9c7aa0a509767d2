use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Where a processor's worker runs.
///
/// Defaults to `Thread`, which needs no cooperation from the binary.
/// `Process` gives each processor its own address space and requires
/// `main` to call [`bootstrap`](crate::worker::bootstrap) first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Isolation {
    /// Dedicated OS thread in the orchestrating process
    #[default]
    Thread,
    /// Child process re-executed from the current binary
    Process,
}

/// What happens to queued items when a processor shuts down.
///
/// The item currently being transformed always completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Process every queued item before exiting
    #[default]
    Drain,
    /// Drop queued items
    Discard,
}

/// Per-processor runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorConfig {
    pub isolation: Isolation,
    /// Bound of the input channel; unbounded when absent
    pub input_capacity: Option<usize>,
    pub shutdown_policy: ShutdownPolicy,
    /// How long shutdown waits for the worker; forever when absent
    pub shutdown_timeout_ms: Option<u64>,
}

impl ProcessorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_isolation(mut self, isolation: Isolation) -> Self {
        self.isolation = isolation;
        self
    }

    pub fn with_input_capacity(mut self, capacity: usize) -> Self {
        self.input_capacity = Some(capacity);
        self
    }

    pub fn with_shutdown_policy(mut self, policy: ShutdownPolicy) -> Self {
        self.shutdown_policy = policy;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn shutdown_timeout(&self) -> Option<Duration> {
        self.shutdown_timeout_ms.map(Duration::from_millis)
    }
}
