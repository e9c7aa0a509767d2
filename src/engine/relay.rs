use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{bounded, select, Receiver, Sender};
use tracing::{debug, error, warn};

use super::config::ShutdownPolicy;
use super::processor::Processor;
use crate::core::{Contract, Envelope, FailureKind, Outcome, PipelineError, ProcessorFailure, TaggedResult};
use crate::observability::ProcessorMetrics;

/// One outgoing edge of a relay
pub(crate) struct Route {
    target: String,
    contract: Contract,
    input: Sender<Envelope>,
    metrics: Arc<ProcessorMetrics>,
}

impl Route {
    pub fn to(target: &Processor) -> Self {
        Self {
            target: target.name().to_string(),
            contract: target.input_contract().clone(),
            input: target.input_sender(),
            metrics: target.metrics().clone(),
        }
    }
}

/// Where a relay delivers what its source produced
pub(crate) enum RelaySink {
    /// Destination processors, in edge registration order
    Routes(Vec<Route>),
    /// Merged output of a graph, tagged with the source's name
    Collector(Sender<TaggedResult>),
}

/// Background thread moving one processor's outputs onward.
///
/// Outcomes are forwarded strictly in the order the source produced them.
/// Successful payloads are validated against each destination's input
/// contract; a mismatch is forwarded as a failed envelope so the item is
/// still accounted for downstream.
pub struct Relay {
    source: String,
    targets: Vec<String>,
    forwarded: Arc<AtomicU64>,
    stop_tx: Sender<ShutdownPolicy>,
    handle: Option<JoinHandle<()>>,
}

impl Relay {
    pub(crate) fn spawn(source: &Processor, sink: RelaySink) -> Result<Self, PipelineError> {
        let source_name = source.name().to_string();
        let targets = match &sink {
            RelaySink::Routes(routes) => routes.iter().map(|r| r.target.clone()).collect(),
            RelaySink::Collector(_) => Vec::new(),
        };
        let forwarded = Arc::new(AtomicU64::new(0));
        let (stop_tx, stop_rx) = bounded(1);

        let worker = RelayLoop {
            source: source_name.clone(),
            outputs: source.output_receiver(),
            sink,
            stop: stop_rx,
            forwarded: forwarded.clone(),
        };
        let handle = thread::Builder::new()
            .name(format!("bowline-relay-{}", source_name))
            .spawn(move || worker.run())
            .map_err(|e| PipelineError::Spawn {
                processor: source_name.clone(),
                source: e,
            })?;

        debug!(source = %source_name, ?targets, "Relay started");
        Ok(Self {
            source: source_name,
            targets,
            forwarded,
            stop_tx,
            handle: Some(handle),
        })
    }

    /// Name of the processor this relay drains
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Destination processors; empty for a collector
    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Outcomes fully delivered so far
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::SeqCst)
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Signal the loop and wait for it to exit
    pub(crate) fn stop(&mut self, policy: ShutdownPolicy) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let _ = self.stop_tx.try_send(policy);
        if handle.join().is_err() {
            error!(source = %self.source, "Relay thread panicked");
        }
        debug!(source = %self.source, forwarded = self.forwarded(), "Relay stopped");
    }
}

impl std::fmt::Debug for Relay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Relay")
            .field("source", &self.source)
            .field("targets", &self.targets)
            .field("forwarded", &self.forwarded())
            .finish()
    }
}

impl Drop for Relay {
    fn drop(&mut self) {
        self.stop(ShutdownPolicy::Discard);
    }
}

struct RelayLoop {
    source: String,
    outputs: Receiver<Outcome>,
    sink: RelaySink,
    stop: Receiver<ShutdownPolicy>,
    forwarded: Arc<AtomicU64>,
}

impl RelayLoop {
    fn run(self) {
        loop {
            select! {
                recv(self.stop) -> msg => {
                    if msg.unwrap_or(ShutdownPolicy::Discard) == ShutdownPolicy::Drain {
                        while let Ok(outcome) = self.outputs.try_recv() {
                            if !self.forward(outcome) {
                                break;
                            }
                        }
                    }
                    return;
                },
                recv(self.outputs) -> msg => match msg {
                    Ok(outcome) => {
                        if !self.forward(outcome) {
                            return;
                        }
                    }
                    // Source worker exited and its channel is empty
                    Err(_) => return,
                },
            }
        }
    }

    /// Returns false when a stop interrupted delivery
    fn forward(&self, outcome: Outcome) -> bool {
        let delivered = match &self.sink {
            RelaySink::Routes(routes) => routes.iter().all(|route| self.deliver(route, &outcome)),
            RelaySink::Collector(merged) => {
                let tagged = TaggedResult {
                    processor: self.source.clone(),
                    outcome,
                };
                if merged.send(tagged).is_err() {
                    warn!(source = %self.source, "Graph output dropped, discarding result");
                }
                true
            }
        };
        if delivered {
            self.forwarded.fetch_add(1, Ordering::SeqCst);
        }
        delivered
    }

    fn deliver(&self, route: &Route, outcome: &Outcome) -> bool {
        let envelope = match outcome {
            Ok(payload) => match route.contract.validate(&payload.value) {
                Ok(()) => Envelope::Item(payload.value.clone()),
                Err(e) => {
                    warn!(source = %self.source, target = %route.target, error = %e, "Relay validation failed");
                    Envelope::Failed(ProcessorFailure::new(&route.target, FailureKind::Validation(e)))
                }
            },
            Err(failure) => Envelope::Failed(failure.clone()),
        };

        route.metrics.record_accepted();
        select! {
            send(route.input, envelope) -> res => {
                if res.is_err() {
                    route.metrics.unrecord_accepted();
                    warn!(source = %self.source, target = %route.target, "Destination gone, dropping item");
                }
                true
            },
            recv(self.stop) -> _ => {
                // Stopped while blocked on a full destination
                route.metrics.unrecord_accepted();
                false
            },
        }
    }
}
