use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, Receiver};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::core::{Contract, Envelope, FailureKind, Outcome, Payload, ProcessorFailure};
use crate::engine::ShutdownPolicy;
use crate::registry::Transform;

/// Messages on a processor's control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Shutdown(ShutdownPolicy),
}

/// Everything a worker needs to run a processor, independent of where it runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct WorkerSpec {
    pub processor: String,
    pub transform: String,
    pub input: Contract,
    pub output: Contract,
}

/// Destination for outcomes produced by the worker loop
pub(crate) trait OutcomeSink {
    /// Returns false when nobody is listening any more
    fn emit(&mut self, outcome: Outcome, elapsed: Duration) -> bool;
}

/// How the worker loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WorkerExit {
    Shutdown,
    /// Input or control side hung up without a shutdown signal
    Orphaned,
    /// The sink went away
    SinkClosed,
}

/// Worker loop shared by the thread and process backends.
///
/// Items are handled strictly in arrival order; the control channel is
/// checked before every item so shutdown is never starved by a backlog.
pub(crate) fn run_worker<S: OutcomeSink>(
    spec: &WorkerSpec,
    transform: &Transform,
    inputs: Receiver<Envelope>,
    control: Receiver<Control>,
    sink: &mut S,
) -> WorkerExit {
    debug!(processor = %spec.processor, transform = transform.name, "Worker loop started");

    loop {
        if let Ok(Control::Shutdown(policy)) = control.try_recv() {
            return finish(spec, transform, &inputs, policy, sink);
        }

        select! {
            recv(control) -> msg => match msg {
                Ok(Control::Shutdown(policy)) => {
                    return finish(spec, transform, &inputs, policy, sink);
                }
                Err(_) => return WorkerExit::Orphaned,
            },
            recv(inputs) -> msg => match msg {
                Ok(envelope) => {
                    if !process_one(spec, transform, envelope, sink) {
                        return WorkerExit::SinkClosed;
                    }
                }
                // The producer may hang up right after queueing a shutdown
                Err(_) => {
                    return match control.try_recv() {
                        Ok(Control::Shutdown(policy)) => finish(spec, transform, &inputs, policy, sink),
                        Err(_) => WorkerExit::Orphaned,
                    };
                }
            },
        }
    }
}

fn finish<S: OutcomeSink>(
    spec: &WorkerSpec,
    transform: &Transform,
    inputs: &Receiver<Envelope>,
    policy: ShutdownPolicy,
    sink: &mut S,
) -> WorkerExit {
    if policy == ShutdownPolicy::Drain {
        let mut drained = 0usize;
        while let Ok(envelope) = inputs.try_recv() {
            if !process_one(spec, transform, envelope, sink) {
                return WorkerExit::SinkClosed;
            }
            drained += 1;
        }
        debug!(processor = %spec.processor, drained, "Backlog drained");
    } else {
        let discarded = inputs.try_iter().count();
        if discarded > 0 {
            debug!(processor = %spec.processor, discarded, "Backlog discarded");
        }
    }
    WorkerExit::Shutdown
}

fn process_one<S: OutcomeSink>(
    spec: &WorkerSpec,
    transform: &Transform,
    envelope: Envelope,
    sink: &mut S,
) -> bool {
    let start = Instant::now();
    let outcome = handle_envelope(spec, transform, envelope);
    if let Err(failure) = &outcome {
        warn!(processor = %spec.processor, %failure, "Item failed");
    }
    sink.emit(outcome, start.elapsed())
}

/// Run one envelope through the transform and the output contract
pub(crate) fn handle_envelope(spec: &WorkerSpec, transform: &Transform, envelope: Envelope) -> Outcome {
    let value = match envelope {
        Envelope::Item(value) => value,
        Envelope::Failed(failure) => return Err(failure),
    };

    let produced: Value = match catch_unwind(AssertUnwindSafe(|| transform.call(value))) {
        Ok(Ok(produced)) => produced,
        Ok(Err(e)) => {
            return Err(ProcessorFailure::new(
                &spec.processor,
                FailureKind::Transform(format!("{:#}", e)),
            ));
        }
        Err(panic) => {
            return Err(ProcessorFailure::new(
                &spec.processor,
                FailureKind::Panicked(panic_message(panic)),
            ));
        }
    };

    match spec.output.validate(&produced) {
        Ok(()) => Ok(Payload::new(spec.output.name.clone(), produced)),
        Err(e) => Err(ProcessorFailure::new(&spec.processor, FailureKind::Validation(e))),
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        return (*msg).to_string();
    }
    if let Some(msg) = payload.downcast_ref::<String>() {
        return msg.clone();
    }
    "non-string panic payload".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::FieldKind;
    use crossbeam_channel::unbounded;
    use serde_json::json;

    fn double(value: Value) -> anyhow::Result<Value> {
        let n = value["n"].as_i64().ok_or_else(|| anyhow::anyhow!("n missing"))?;
        if n == 13 {
            panic!("unlucky");
        }
        Ok(json!({"n": n * 2}))
    }

    fn spec() -> WorkerSpec {
        let shape = Contract::new("Number").field("n", FieldKind::Integer);
        WorkerSpec {
            processor: "double".to_string(),
            transform: "double".to_string(),
            input: shape.clone(),
            output: shape,
        }
    }

    struct VecSink(Vec<Outcome>);

    impl OutcomeSink for VecSink {
        fn emit(&mut self, outcome: Outcome, _elapsed: Duration) -> bool {
            self.0.push(outcome);
            true
        }
    }

    const DOUBLE: Transform = Transform::new("double", double);

    #[test]
    fn test_handle_envelope_success() {
        let out = handle_envelope(&spec(), &DOUBLE, Envelope::Item(json!({"n": 4}))).unwrap();
        assert_eq!(out.value, json!({"n": 8}));
        assert_eq!(out.shape, "Number");
    }

    #[test]
    fn test_handle_envelope_captures_errors_and_panics() {
        let err = handle_envelope(&spec(), &DOUBLE, Envelope::Item(json!({}))).unwrap_err();
        assert!(matches!(err.kind, FailureKind::Transform(_)));

        let err = handle_envelope(&spec(), &DOUBLE, Envelope::Item(json!({"n": 13}))).unwrap_err();
        assert_eq!(err.kind, FailureKind::Panicked("unlucky".to_string()));
    }

    #[test]
    fn test_handle_envelope_passes_failures_through() {
        let upstream = ProcessorFailure::new("add", FailureKind::Transform("bad".to_string()));
        let out = handle_envelope(&spec(), &DOUBLE, Envelope::Failed(upstream.clone()));
        assert_eq!(out, Err(upstream));
    }

    #[test]
    fn test_output_contract_is_enforced() {
        let mut s = spec();
        s.output = Contract::new("Text").field("text", FieldKind::String);
        let err = handle_envelope(&s, &DOUBLE, Envelope::Item(json!({"n": 1}))).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_drain_processes_backlog_in_order() {
        let (in_tx, in_rx) = unbounded();
        let (ctl_tx, ctl_rx) = unbounded();
        for n in 1..=3 {
            in_tx.send(Envelope::Item(json!({"n": n}))).unwrap();
        }
        ctl_tx.send(Control::Shutdown(ShutdownPolicy::Drain)).unwrap();

        let mut sink = VecSink(Vec::new());
        let exit = run_worker(&spec(), &DOUBLE, in_rx, ctl_rx, &mut sink);

        assert_eq!(exit, WorkerExit::Shutdown);
        let values: Vec<_> = sink.0.into_iter().map(|o| o.unwrap().value["n"].clone()).collect();
        assert_eq!(values, vec![json!(2), json!(4), json!(6)]);
    }

    #[test]
    fn test_discard_drops_backlog() {
        let (in_tx, in_rx) = unbounded();
        let (ctl_tx, ctl_rx) = unbounded();
        in_tx.send(Envelope::Item(json!({"n": 1}))).unwrap();
        ctl_tx.send(Control::Shutdown(ShutdownPolicy::Discard)).unwrap();

        let mut sink = VecSink(Vec::new());
        let exit = run_worker(&spec(), &DOUBLE, in_rx, ctl_rx, &mut sink);

        assert_eq!(exit, WorkerExit::Shutdown);
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_orphaned_when_control_hangs_up() {
        let (_in_tx, in_rx) = unbounded::<Envelope>();
        let (ctl_tx, ctl_rx) = unbounded();
        drop(ctl_tx);

        let mut sink = VecSink(Vec::new());
        assert_eq!(run_worker(&spec(), &DOUBLE, in_rx, ctl_rx, &mut sink), WorkerExit::Orphaned);
    }
}
