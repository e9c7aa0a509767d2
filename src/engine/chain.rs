use std::collections::BTreeMap;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use super::processor::Processor;
use super::relay::{Relay, RelaySink, Route};
use super::state::LifecycleState;
use super::teardown::teardown;
use crate::core::{Outcome, PipelineError};
use crate::observability::{MetricsCollector, MetricsSnapshot, PipelineMonitor};

const CHAIN: &str = "chain";

/// Linear pipeline of processors.
///
/// Values are pushed into the head and read from the tail; every stage
/// and every relay is FIFO, so end-to-end order matches push order.
#[derive(Debug, Default)]
pub struct ProcessorChain {
    processors: Vec<Processor>,
    // relays[i] moves processors[i] outputs into processors[i + 1]
    relays: Vec<Option<Relay>>,
    state: LifecycleState,
    collector: MetricsCollector,
}

impl ProcessorChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `processor` as the new tail
    pub fn add_processor(&mut self, processor: Processor) -> Result<(), PipelineError> {
        if !self.state.is_idle() || !processor.state().is_idle() {
            return Err(PipelineError::AlreadyStarted(processor.name().to_string()));
        }
        if self.processor(processor.name()).is_some() {
            return Err(PipelineError::DuplicateName(processor.name().to_string()));
        }
        if let Some(tail) = self.processors.last() {
            processor
                .input_contract()
                .accepts(tail.output_contract())
                .map_err(|reason| PipelineError::IncompatibleContracts {
                    from: tail.name().to_string(),
                    to: processor.name().to_string(),
                    reason,
                })?;
        }

        debug!(processor = processor.name(), position = self.processors.len(), "Added processor to chain");
        self.collector.register(processor.metrics().clone());
        self.processors.push(processor);
        Ok(())
    }

    /// Start every member head to tail, then the relays between them
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if !self.state.is_idle() {
            return Err(PipelineError::AlreadyStarted(CHAIN.to_string()));
        }
        if self.processors.is_empty() {
            return Err(PipelineError::Empty(CHAIN.to_string()));
        }

        self.relays = self.processors.iter().map(|_| None).collect();
        if let Err(e) = self.spawn_all() {
            let order = self.order();
            let _ = teardown(&mut self.processors, &mut self.relays, &order);
            self.state.transition_to(LifecycleState::Stopped { uptime: None });
            return Err(e);
        }

        self.state.transition_to(LifecycleState::running());
        info!(processors = self.processors.len(), "Chain started");
        Ok(())
    }

    fn spawn_all(&mut self) -> Result<(), PipelineError> {
        for processor in &mut self.processors {
            processor.start()?;
        }
        for (i, pair) in self.processors.windows(2).enumerate() {
            let relay = Relay::spawn(&pair[0], RelaySink::Routes(vec![Route::to(&pair[1])]))?;
            self.relays[i] = Some(relay);
        }
        Ok(())
    }

    /// Push into the head processor
    pub fn push_input<T: Serialize>(&self, value: T) -> Result<(), PipelineError> {
        if !self.state.is_running() {
            return Err(PipelineError::NotRunning(CHAIN.to_string()));
        }
        match self.processors.first() {
            Some(head) => head.push_input(value),
            None => Err(PipelineError::Empty(CHAIN.to_string())),
        }
    }

    pub fn has_output(&self) -> bool {
        self.processors.last().is_some_and(Processor::has_output)
    }

    /// Take the tail's next output if one is ready
    pub fn get_output(&self) -> Option<Outcome> {
        self.processors.last().and_then(Processor::get_output)
    }

    pub fn recv_output(&self) -> Result<Outcome, PipelineError> {
        self.tail()?.recv_output()
    }

    pub fn recv_output_timeout(&self, timeout: Duration) -> Result<Outcome, PipelineError> {
        self.tail()?.recv_output_timeout(timeout)
    }

    /// Quiesce head to tail, stop relays, then shut members down tail to head
    pub fn shutdown(&mut self) -> Result<(), PipelineError> {
        if self.state.is_stopped() {
            return Ok(());
        }
        let started_at = self.state.started_at();
        if self.state.is_running() {
            self.state.transition_to(LifecycleState::ShuttingDown);
        }
        info!(processors = self.processors.len(), "Shutting down chain");

        if self.relays.len() != self.processors.len() {
            self.relays = self.processors.iter().map(|_| None).collect();
        }
        let order = self.order();
        let result = teardown(&mut self.processors, &mut self.relays, &order);

        self.state = LifecycleState::stopped_after(started_at);
        result
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn processor(&self, name: &str) -> Option<&Processor> {
        self.processors.iter().find(|p| p.name() == name)
    }

    /// Member names head to tail
    pub fn names(&self) -> Vec<&str> {
        self.processors.iter().map(Processor::name).collect()
    }

    pub fn relays(&self) -> impl Iterator<Item = &Relay> {
        self.relays.iter().flatten()
    }

    pub fn metrics(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.collector.snapshot()
    }

    pub fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor::new(self.collector.clone())
    }

    fn tail(&self) -> Result<&Processor, PipelineError> {
        self.processors
            .last()
            .ok_or_else(|| PipelineError::Empty(CHAIN.to_string()))
    }

    fn order(&self) -> Vec<usize> {
        (0..self.processors.len()).collect()
    }
}

impl Drop for ProcessorChain {
    fn drop(&mut self) {
        if self.state.is_running() {
            let _ = self.shutdown();
        }
    }
}
