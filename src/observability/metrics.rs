use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Counters for one processor, shared between the caller side and the worker side
#[derive(Debug)]
pub struct ProcessorMetrics {
    processor: String,
    accepted: AtomicU64,
    completed: AtomicU64,
    failures: AtomicU64,
    total_latency_us: AtomicU64,
    latency_samples: AtomicU64,
}

impl ProcessorMetrics {
    pub fn new(processor: impl Into<String>) -> Self {
        Self {
            processor: processor.into(),
            accepted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failures: AtomicU64::new(0),
            total_latency_us: AtomicU64::new(0),
            latency_samples: AtomicU64::new(0),
        }
    }

    pub fn processor(&self) -> &str {
        &self.processor
    }

    /// Items enqueued on the input channel
    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::SeqCst)
    }

    /// Outcomes emitted on the output channel, failures included
    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }

    /// Items accepted but not yet emitted
    pub fn in_flight(&self) -> u64 {
        self.accepted().saturating_sub(self.completed())
    }

    // Counted before the send so a concurrent observer never sees more
    // emitted than accepted.
    pub fn record_accepted(&self) {
        self.accepted.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn unrecord_accepted(&self) {
        self.accepted.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn record_completed(&self) {
        self.completed.fetch_add(1, Ordering::SeqCst);
    }

    pub fn record_failure(&self) {
        self.failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_latency(&self, elapsed: Duration) {
        let latency_us = elapsed.as_micros() as u64;
        self.total_latency_us.fetch_add(latency_us, Ordering::Relaxed);
        self.latency_samples.fetch_add(1, Ordering::Relaxed);
    }

    pub fn avg_latency_us(&self) -> u64 {
        let samples = self.latency_samples.load(Ordering::Relaxed);
        if samples == 0 {
            return 0;
        }
        self.total_latency_us.load(Ordering::Relaxed) / samples
    }
}
