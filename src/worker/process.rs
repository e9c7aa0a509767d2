use std::io::{self, BufReader, BufWriter, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use tracing::{debug, error, info, warn};

use super::executor::{run_worker, Control, OutcomeSink, WorkerSpec};
use super::wire::{read_frame, write_frame, HostMessage, WireError, WorkerMessage};
use super::{is_worker, WORKER_ENV};
use crate::core::{Envelope, Outcome, Payload, PipelineError};
use crate::engine::ShutdownPolicy;
use crate::observability::ProcessorMetrics;
use crate::registry;

/// How long a freshly spawned worker has to answer the handshake
const STARTUP_TIMEOUT: Duration = Duration::from_secs(10);

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Host-side handle of a worker running in a child process
pub(crate) struct ProcessWorker {
    child: Child,
    feeder: JoinHandle<()>,
    // Yields true when the worker acknowledged shutdown with `Exiting`
    reader: JoinHandle<bool>,
}

impl ProcessWorker {
    /// Re-execute the current binary as a worker and complete the handshake
    pub fn spawn(
        spec: WorkerSpec,
        inputs: Receiver<Envelope>,
        control: Receiver<Control>,
        output: Sender<Outcome>,
        metrics: Arc<ProcessorMetrics>,
    ) -> Result<Self, PipelineError> {
        let processor = spec.processor.clone();
        let spawn_error = |source: io::Error| PipelineError::Spawn {
            processor: processor.clone(),
            source,
        };

        if is_worker() {
            return Err(spawn_error(io::Error::new(
                io::ErrorKind::Other,
                "worker processes cannot spawn workers; call bowline::worker::bootstrap() first thing in main",
            )));
        }

        let exe = std::env::current_exe().map_err(spawn_error)?;
        let mut child = Command::new(exe)
            .env(WORKER_ENV, &processor)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(spawn_error)?;

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                kill_quietly(&mut child);
                return Err(spawn_error(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "worker pipes were not captured",
                )));
            }
        };

        let mut stdin = BufWriter::new(stdin);
        if let Err(e) = write_frame(&mut stdin, &HostMessage::Hello(spec.clone())) {
            kill_quietly(&mut child);
            return Err(spawn_error(io::Error::new(io::ErrorKind::BrokenPipe, e.to_string())));
        }

        let (ready_tx, ready_rx) = bounded(1);
        let reader_name = processor.clone();
        let reader = thread::Builder::new()
            .name(format!("bowline-{}-reader", processor))
            .spawn(move || {
                read_responses(&reader_name, BufReader::new(stdout), ready_tx, output, metrics)
            })
            .map_err(|e| {
                kill_quietly(&mut child);
                spawn_error(e)
            })?;

        let handshake = match ready_rx.recv_timeout(STARTUP_TIMEOUT) {
            Ok(result) => result,
            Err(_) => Err("worker did not answer the handshake; does main call bowline::worker::bootstrap()?".to_string()),
        };
        if let Err(reason) = handshake {
            kill_quietly(&mut child);
            let _ = reader.join();
            return Err(spawn_error(io::Error::new(io::ErrorKind::Other, reason)));
        }

        let feeder_name = processor.clone();
        let feeder = match thread::Builder::new()
            .name(format!("bowline-{}-feeder", processor))
            .spawn(move || feed(&feeder_name, stdin, inputs, control))
        {
            Ok(feeder) => feeder,
            Err(e) => {
                kill_quietly(&mut child);
                let _ = reader.join();
                return Err(spawn_error(e));
            }
        };

        info!(processor = %processor, pid = child.id(), "Worker process started");
        Ok(Self {
            child,
            feeder,
            reader,
        })
    }

    pub fn is_finished(&self) -> bool {
        self.reader.is_finished()
    }

    /// Wait for the child to exit after the shutdown frame was queued
    pub fn join(self, processor: &str, timeout: Option<Duration>) -> Result<(), PipelineError> {
        let ProcessWorker {
            mut child,
            feeder,
            reader,
        } = self;
        let failed = |reason: String| PipelineError::Shutdown {
            processor: processor.to_string(),
            reason,
        };

        let status = match timeout {
            None => child.wait().map_err(|e| failed(e.to_string()))?,
            Some(timeout) => match wait_until(&mut child, Instant::now() + timeout) {
                Ok(Some(status)) => status,
                Ok(None) => {
                    warn!(processor, ?timeout, "Worker process unresponsive, killing it");
                    kill_quietly(&mut child);
                    let _ = feeder.join();
                    let _ = reader.join();
                    return Err(failed(format!("worker process did not exit within {:?}", timeout)));
                }
                Err(e) => return Err(failed(e.to_string())),
            },
        };

        let _ = feeder.join();
        let acknowledged = reader.join().unwrap_or(false);

        if !status.success() {
            return Err(failed(format!("worker process exited with {}", status)));
        }
        if !acknowledged {
            return Err(failed("worker process exited without acknowledging shutdown".to_string()));
        }
        debug!(processor, "Worker process joined");
        Ok(())
    }
}

fn wait_until(child: &mut Child, deadline: Instant) -> io::Result<Option<ExitStatus>> {
    loop {
        if let Some(status) = child.try_wait()? {
            return Ok(Some(status));
        }
        if Instant::now() >= deadline {
            return Ok(None);
        }
        thread::sleep(EXIT_POLL_INTERVAL);
    }
}

fn kill_quietly(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

/// Host feeder: forwards the input channel into the child's stdin
fn feed(
    processor: &str,
    mut stdin: BufWriter<ChildStdin>,
    inputs: Receiver<Envelope>,
    control: Receiver<Control>,
) {
    loop {
        if let Ok(Control::Shutdown(policy)) = control.try_recv() {
            send_shutdown(processor, &mut stdin, &inputs, policy);
            return;
        }

        select! {
            recv(control) -> msg => {
                let policy = match msg {
                    Ok(Control::Shutdown(policy)) => policy,
                    Err(_) => ShutdownPolicy::Discard,
                };
                send_shutdown(processor, &mut stdin, &inputs, policy);
                return;
            },
            recv(inputs) -> msg => match msg {
                Ok(envelope) => {
                    if let Err(e) = write_frame(&mut stdin, &host_message(envelope)) {
                        error!(processor, error = %e, "Failed to write to worker process");
                        return;
                    }
                }
                Err(_) => return,
            },
        }
    }
}

fn send_shutdown(
    processor: &str,
    stdin: &mut BufWriter<ChildStdin>,
    inputs: &Receiver<Envelope>,
    policy: ShutdownPolicy,
) {
    if policy == ShutdownPolicy::Drain {
        for envelope in inputs.try_iter() {
            if write_frame(&mut *stdin, &host_message(envelope)).is_err() {
                break;
            }
        }
    }
    if let Err(e) = write_frame(&mut *stdin, &HostMessage::Shutdown(policy)) {
        warn!(processor, error = %e, "Failed to deliver shutdown to worker process");
    }
    let _ = stdin.flush();
}

fn host_message(envelope: Envelope) -> HostMessage {
    match envelope {
        Envelope::Item(value) => HostMessage::Item(value),
        Envelope::Failed(failure) => HostMessage::Failed(failure),
    }
}

/// Host reader: turns worker frames into outcomes on the output channel
fn read_responses(
    processor: &str,
    mut stdout: BufReader<ChildStdout>,
    ready: Sender<Result<(), String>>,
    output: Sender<Outcome>,
    metrics: Arc<ProcessorMetrics>,
) -> bool {
    let handshake = match read_frame::<_, WorkerMessage>(&mut stdout) {
        Ok(WorkerMessage::Ready) => Ok(()),
        Ok(WorkerMessage::Rejected { reason }) => Err(reason),
        Ok(other) => Err(format!("unexpected handshake frame {:?}", other)),
        Err(e) => Err(format!("worker closed during handshake: {}", e)),
    };
    let accepted = handshake.is_ok();
    let _ = ready.send(handshake);
    drop(ready);
    if !accepted {
        return false;
    }

    loop {
        match read_frame::<_, WorkerMessage>(&mut stdout) {
            Ok(WorkerMessage::Output {
                value,
                shape,
                elapsed_us,
            }) => {
                metrics.record_latency(Duration::from_micros(elapsed_us));
                metrics.record_completed();
                let _ = output.send(Ok(Payload::new(shape, value)));
            }
            Ok(WorkerMessage::Failure {
                failure,
                elapsed_us,
            }) => {
                if failure.processor == processor {
                    metrics.record_failure();
                }
                metrics.record_latency(Duration::from_micros(elapsed_us));
                metrics.record_completed();
                let _ = output.send(Err(failure));
            }
            Ok(WorkerMessage::Exiting) => return true,
            Ok(other) => warn!(processor, frame = ?other, "Ignoring unexpected frame from worker"),
            Err(e) if e.is_eof() => {
                error!(processor, "Worker process exited unexpectedly");
                return false;
            }
            Err(e) => {
                error!(processor, error = %e, "Failed to read from worker process");
                return false;
            }
        }
    }
}

/// Sink used inside the worker process: every outcome becomes a stdout frame
struct FrameSink<W: Write> {
    writer: W,
}

impl<W: Write> OutcomeSink for FrameSink<W> {
    fn emit(&mut self, outcome: Outcome, elapsed: Duration) -> bool {
        let elapsed_us = elapsed.as_micros() as u64;
        let msg = match outcome {
            Ok(payload) => WorkerMessage::Output {
                value: payload.value,
                shape: payload.shape,
                elapsed_us,
            },
            Err(failure) => WorkerMessage::Failure {
                failure,
                elapsed_us,
            },
        };
        write_frame(&mut self.writer, &msg).is_ok()
    }
}

/// Entry point of a worker process, reached through `bootstrap`
pub(crate) fn run_child() -> Result<(), WireError> {
    let mut reader = BufReader::new(io::stdin());
    let mut writer = BufWriter::new(io::stdout());

    let spec = match read_frame::<_, HostMessage>(&mut reader)? {
        HostMessage::Hello(spec) => spec,
        other => return Err(WireError::Unexpected(format!("{:?}", other))),
    };

    let Some(transform) = registry::lookup(&spec.transform) else {
        write_frame(
            &mut writer,
            &WorkerMessage::Rejected {
                reason: format!("transform `{}` is not registered in this binary", spec.transform),
            },
        )?;
        return Ok(());
    };
    write_frame(&mut writer, &WorkerMessage::Ready)?;

    let (input_tx, input_rx) = unbounded();
    let (control_tx, control_rx) = unbounded();
    let _pump = thread::Builder::new()
        .name("bowline-stdin".to_string())
        .spawn(move || pump_stdin(reader, input_tx, control_tx))?;

    let mut sink = FrameSink { writer };
    let exit = run_worker(&spec, transform, input_rx, control_rx, &mut sink);
    info!(processor = %spec.processor, ?exit, "Worker process exiting");
    write_frame(&mut sink.writer, &WorkerMessage::Exiting)?;
    Ok(())
}

fn pump_stdin<R: io::Read>(mut reader: R, inputs: Sender<Envelope>, control: Sender<Control>) {
    loop {
        match read_frame::<_, HostMessage>(&mut reader) {
            Ok(HostMessage::Item(value)) => {
                if inputs.send(Envelope::Item(value)).is_err() {
                    return;
                }
            }
            Ok(HostMessage::Failed(failure)) => {
                if inputs.send(Envelope::Failed(failure)).is_err() {
                    return;
                }
            }
            Ok(HostMessage::Shutdown(policy)) => {
                let _ = control.send(Control::Shutdown(policy));
                return;
            }
            Ok(HostMessage::Hello(_)) => warn!("Ignoring repeated handshake"),
            Err(e) => {
                if !e.is_eof() {
                    error!(error = %e, "Failed to read from orchestrator");
                }
                return;
            }
        }
    }
}
