use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, warn};

use super::config::ShutdownPolicy;
use super::processor::Processor;
use super::relay::Relay;
use crate::core::PipelineError;

const QUIESCE_POLL: Duration = Duration::from_millis(1);

/// Wait until a draining stage has finished everything it accepted and
/// its relay has forwarded everything it produced.
///
/// Gives up early when the worker and relay are both gone, leaving the
/// crash to be reported by the processor's own shutdown.
fn quiesce(processor: &Processor, relay: Option<&Relay>) -> Result<(), PipelineError> {
    if processor.shutdown_policy() != ShutdownPolicy::Drain {
        return Ok(());
    }

    let metrics = processor.metrics();
    let deadline = processor.config().shutdown_timeout().map(|t| Instant::now() + t);

    loop {
        let settled = metrics.in_flight() == 0
            && relay.map_or(true, |r| r.forwarded() >= metrics.completed());
        if settled {
            return Ok(());
        }
        if processor.worker_finished() && relay.map_or(true, Relay::is_finished) {
            warn!(processor = processor.name(), in_flight = metrics.in_flight(), "Worker gone before draining");
            return Ok(());
        }
        if deadline.is_some_and(|d| Instant::now() >= d) {
            return Err(PipelineError::Shutdown {
                processor: processor.name().to_string(),
                reason: format!("{} item(s) still in flight", metrics.in_flight()),
            });
        }
        thread::sleep(QUIESCE_POLL);
    }
}

/// Shut down a topology.
///
/// `relays[i]` drains `processors[i]`; `order` lists processor indices
/// parents first. Stages are quiesced in that order, then every relay is
/// stopped, then processors are shut down in reverse order. Every step is
/// attempted and the first error is returned.
pub(crate) fn teardown(
    processors: &mut [Processor],
    relays: &mut [Option<Relay>],
    order: &[usize],
) -> Result<(), PipelineError> {
    let mut first_error = None;

    for &idx in order {
        if let Err(e) = quiesce(&processors[idx], relays[idx].as_ref()) {
            error!(processor = processors[idx].name(), error = %e, "Failed to quiesce");
            first_error.get_or_insert(e);
        }
    }
    debug!(stages = order.len(), "Topology quiesced");

    for &idx in order {
        if let Some(mut relay) = relays[idx].take() {
            relay.stop(processors[idx].shutdown_policy());
        }
    }

    for &idx in order.iter().rev() {
        if let Err(e) = processors[idx].shutdown() {
            error!(processor = processors[idx].name(), error = %e, "Failed to shut down processor");
            first_error.get_or_insert(e);
        }
    }

    first_error.map_or(Ok(()), Err)
}
