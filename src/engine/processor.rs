use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info};

use super::config::{Isolation, ProcessorConfig, ShutdownPolicy};
use super::state::LifecycleState;
use crate::core::{Contract, Envelope, HasContract, Outcome, PipelineError, ShapeValidator};
use crate::observability::ProcessorMetrics;
use crate::registry::{self, Transform};
use crate::worker::{Control, ProcessWorker, ThreadWorker, WorkerSpec};

enum WorkerHandle {
    Thread(ThreadWorker),
    Process(ProcessWorker),
}

impl WorkerHandle {
    fn is_finished(&self) -> bool {
        match self {
            Self::Thread(w) => w.is_finished(),
            Self::Process(w) => w.is_finished(),
        }
    }

    fn join(self, processor: &str, timeout: Option<Duration>) -> Result<(), PipelineError> {
        match self {
            Self::Thread(w) => w.join(processor, timeout),
            Self::Process(w) => w.join(processor, timeout),
        }
    }
}

/// Builder for [`Processor`]
#[derive(Debug, Clone)]
pub struct ProcessorBuilder {
    name: String,
    transform: String,
    input: Contract,
    output: Contract,
    config: ProcessorConfig,
}

impl ProcessorBuilder {
    /// Input contract derived from a type
    pub fn input<T: HasContract>(mut self) -> Self {
        self.input = T::contract();
        self
    }

    pub fn input_contract(mut self, contract: Contract) -> Self {
        self.input = contract;
        self
    }

    /// Output contract derived from a type
    pub fn output<T: HasContract>(mut self) -> Self {
        self.output = T::contract();
        self
    }

    pub fn output_contract(mut self, contract: Contract) -> Self {
        self.output = contract;
        self
    }

    pub fn config(mut self, config: ProcessorConfig) -> Self {
        self.config = config;
        self
    }

    /// Resolve the transform and create the processor's channels
    pub fn build(self) -> Result<Processor, PipelineError> {
        let transform = registry::lookup(&self.transform)
            .ok_or_else(|| PipelineError::UnknownTransform(self.transform.clone()))?;

        let (input_tx, input_rx) = match self.config.input_capacity {
            Some(capacity) => bounded(capacity),
            None => unbounded(),
        };
        let (output_tx, output_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();
        let metrics = Arc::new(ProcessorMetrics::new(&self.name));

        Ok(Processor {
            name: self.name,
            transform,
            input_contract: self.input,
            output_contract: self.output,
            config: self.config,
            state: LifecycleState::Idle,
            input_tx,
            input_rx: Some(input_rx),
            output_tx: Some(output_tx),
            output_rx,
            control_tx,
            control_rx: Some(control_rx),
            worker: None,
            metrics,
        })
    }
}

/// One isolated computation stage.
///
/// Wraps a registered transform and runs it on exactly one worker while
/// running. Items are processed strictly in arrival order, so outputs
/// correspond 1:1 with pushes.
pub struct Processor {
    name: String,
    transform: &'static Transform,
    input_contract: Contract,
    output_contract: Contract,
    config: ProcessorConfig,
    state: LifecycleState,
    input_tx: Sender<Envelope>,
    input_rx: Option<Receiver<Envelope>>,
    output_tx: Option<Sender<Outcome>>,
    output_rx: Receiver<Outcome>,
    control_tx: Sender<Control>,
    control_rx: Option<Receiver<Control>>,
    worker: Option<WorkerHandle>,
    metrics: Arc<ProcessorMetrics>,
}

impl Processor {
    /// Start building a processor running the transform registered as `transform`
    pub fn builder(name: impl Into<String>, transform: impl Into<String>) -> ProcessorBuilder {
        ProcessorBuilder {
            name: name.into(),
            transform: transform.into(),
            input: Contract::any(),
            output: Contract::any(),
            config: ProcessorConfig::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transform_name(&self) -> &'static str {
        self.transform.name
    }

    pub fn input_contract(&self) -> &Contract {
        &self.input_contract
    }

    pub fn output_contract(&self) -> &Contract {
        &self.output_contract
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn metrics(&self) -> &Arc<ProcessorMetrics> {
        &self.metrics
    }

    /// Spawn the worker and start accepting input
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if !self.state.is_idle() {
            return Err(PipelineError::AlreadyStarted(self.name.clone()));
        }

        let (Some(inputs), Some(control), Some(output)) =
            (self.input_rx.take(), self.control_rx.take(), self.output_tx.take())
        else {
            return Err(PipelineError::AlreadyStarted(self.name.clone()));
        };

        let spec = WorkerSpec {
            processor: self.name.clone(),
            transform: self.transform.name.to_string(),
            input: self.input_contract.clone(),
            output: self.output_contract.clone(),
        };
        let metrics = self.metrics.clone();

        let spawned = match self.config.isolation {
            Isolation::Thread => {
                ThreadWorker::spawn(spec, self.transform, inputs, control, output, metrics)
                    .map(WorkerHandle::Thread)
            }
            Isolation::Process => {
                ProcessWorker::spawn(spec, inputs, control, output, metrics).map(WorkerHandle::Process)
            }
        };

        match spawned {
            Ok(worker) => {
                self.worker = Some(worker);
                self.state.transition_to(LifecycleState::running());
                info!(
                    processor = %self.name,
                    transform = self.transform.name,
                    isolation = ?self.config.isolation,
                    "Processor started"
                );
                Ok(())
            }
            Err(e) => {
                // Channels were handed to the failed worker; no way back to Idle
                self.state.transition_to(LifecycleState::Stopped { uptime: None });
                Err(e)
            }
        }
    }

    /// Validate `value` against the input contract and enqueue it
    pub fn push_input<T: Serialize>(&self, value: T) -> Result<(), PipelineError> {
        self.ensure_running()?;
        let value = serde_json::to_value(value)?;
        self.validate_input(&value)?;
        self.enqueue(value)
    }

    /// True when an output is ready to be taken without blocking
    pub fn has_output(&self) -> bool {
        !self.output_rx.is_empty()
    }

    /// Take the next output if one is ready
    pub fn get_output(&self) -> Option<Outcome> {
        self.output_rx.try_recv().ok()
    }

    /// Block until the next output is available
    pub fn recv_output(&self) -> Result<Outcome, PipelineError> {
        if self.state.is_idle() {
            return Err(PipelineError::NotRunning(self.name.clone()));
        }
        self.output_rx.recv().map_err(|_| self.closed_error())
    }

    pub fn recv_output_timeout(&self, timeout: Duration) -> Result<Outcome, PipelineError> {
        if self.state.is_idle() {
            return Err(PipelineError::NotRunning(self.name.clone()));
        }
        self.output_rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => PipelineError::Timeout(self.name.clone()),
            RecvTimeoutError::Disconnected => self.closed_error(),
        })
    }

    /// Stop the worker and wait for it to exit.
    ///
    /// The item being processed always completes; queued items are
    /// drained or discarded per the configured [`ShutdownPolicy`].
    /// Outputs produced before the worker exited stay readable.
    pub fn shutdown(&mut self) -> Result<(), PipelineError> {
        if self.state.is_stopped() {
            return Ok(());
        }

        if self.state.is_idle() {
            self.state.transition_to(LifecycleState::Stopped { uptime: None });
            self.input_rx = None;
            self.output_tx = None;
            self.control_rx = None;
            debug!(processor = %self.name, "Processor stopped before start");
            return Ok(());
        }

        let started_at = self.state.started_at();
        self.state.transition_to(LifecycleState::ShuttingDown);
        let policy = self.config.shutdown_policy;
        info!(processor = %self.name, ?policy, "Shutting down processor");

        // The worker may already be gone, in which case join reports it
        let _ = self.control_tx.send(Control::Shutdown(policy));
        let result = match self.worker.take() {
            Some(worker) => worker.join(&self.name, self.config.shutdown_timeout()),
            None => Ok(()),
        };

        self.state = LifecycleState::stopped_after(started_at);
        info!(processor = %self.name, ok = result.is_ok(), "Processor stopped");
        result
    }

    pub(crate) fn ensure_running(&self) -> Result<(), PipelineError> {
        if self.state.is_running() {
            Ok(())
        } else {
            Err(PipelineError::NotRunning(self.name.clone()))
        }
    }

    pub(crate) fn validate_input(&self, value: &Value) -> Result<(), PipelineError> {
        ShapeValidator::validate(&self.input_contract, value)?;
        Ok(())
    }

    /// Enqueue an already validated value
    pub(crate) fn enqueue(&self, value: Value) -> Result<(), PipelineError> {
        self.metrics.record_accepted();
        if self.input_tx.send(Envelope::Item(value)).is_err() {
            self.metrics.unrecord_accepted();
            return Err(PipelineError::Disconnected(self.name.clone()));
        }
        Ok(())
    }

    pub(crate) fn input_sender(&self) -> Sender<Envelope> {
        self.input_tx.clone()
    }

    pub(crate) fn output_receiver(&self) -> Receiver<Outcome> {
        self.output_rx.clone()
    }

    pub(crate) fn shutdown_policy(&self) -> ShutdownPolicy {
        self.config.shutdown_policy
    }

    pub(crate) fn worker_finished(&self) -> bool {
        self.worker.as_ref().map_or(true, WorkerHandle::is_finished)
    }

    fn closed_error(&self) -> PipelineError {
        if self.state.is_running() {
            PipelineError::Disconnected(self.name.clone())
        } else {
            PipelineError::NotRunning(self.name.clone())
        }
    }
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("name", &self.name)
            .field("transform", &self.transform.name)
            .field("state", &self.state.name())
            .finish()
    }
}

impl Drop for Processor {
    fn drop(&mut self) {
        if self.state.is_running() {
            let _ = self.shutdown();
        }
    }
}
