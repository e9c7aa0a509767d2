use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use tracing::debug;

use super::executor::{run_worker, Control, OutcomeSink, WorkerSpec};
use crate::core::{Envelope, Outcome, PipelineError};
use crate::observability::ProcessorMetrics;
use crate::registry::Transform;

/// Sink that feeds the processor's output channel directly
pub(crate) struct ChannelSink {
    output: Sender<Outcome>,
    metrics: Arc<ProcessorMetrics>,
}

impl OutcomeSink for ChannelSink {
    fn emit(&mut self, outcome: Outcome, elapsed: Duration) -> bool {
        if let Err(failure) = &outcome {
            // Upstream failures passing through are not ours
            if failure.processor == self.metrics.processor() {
                self.metrics.record_failure();
            }
        }
        self.metrics.record_latency(elapsed);
        self.metrics.record_completed();
        self.output.send(outcome).is_ok()
    }
}

/// Worker running on a dedicated OS thread.
///
/// The thread owns nothing but the channels and a `'static` function
/// pointer, so it shares no mutable state with the orchestrator.
pub(crate) struct ThreadWorker {
    handle: JoinHandle<()>,
    // Never sent on; disconnects when the thread ends
    done: Receiver<()>,
}

impl ThreadWorker {
    pub fn spawn(
        spec: WorkerSpec,
        transform: &'static Transform,
        inputs: Receiver<Envelope>,
        control: Receiver<Control>,
        output: Sender<Outcome>,
        metrics: Arc<ProcessorMetrics>,
    ) -> Result<Self, PipelineError> {
        let (done_tx, done_rx) = bounded::<()>(0);
        let processor = spec.processor.clone();

        let handle = thread::Builder::new()
            .name(format!("bowline-{}", processor))
            .spawn(move || {
                let _done = done_tx;
                let mut sink = ChannelSink { output, metrics };
                let exit = run_worker(&spec, transform, inputs, control, &mut sink);
                debug!(processor = %spec.processor, ?exit, "Worker thread exiting");
            })
            .map_err(|source| PipelineError::Spawn { processor, source })?;

        Ok(Self {
            handle,
            done: done_rx,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self, processor: &str, timeout: Option<Duration>) -> Result<(), PipelineError> {
        if let Some(timeout) = timeout {
            if let Err(RecvTimeoutError::Timeout) = self.done.recv_timeout(timeout) {
                // The thread cannot be killed; it is detached and keeps running
                return Err(PipelineError::Shutdown {
                    processor: processor.to_string(),
                    reason: format!("worker thread did not stop within {:?}", timeout),
                });
            }
        }

        self.handle.join().map_err(|_| PipelineError::Shutdown {
            processor: processor.to_string(),
            reason: "worker thread panicked".to_string(),
        })
    }
}
