//! Worker backends that host a processor's transform.
//!
//! A worker either runs on a dedicated thread or inside a child process
//! spawned from the current executable. Binaries that use
//! [`Isolation::Process`](crate::engine::Isolation::Process) must call
//! [`bootstrap`] before doing anything else in `main`.

pub(crate) mod executor;
pub(crate) mod process;
pub(crate) mod thread;
pub(crate) mod wire;

use tracing::error;

/// Environment variable that marks a process as a worker
pub const WORKER_ENV: &str = "BOWLINE_WORKER";

/// True when the current process was spawned as a worker
pub fn is_worker() -> bool {
    std::env::var_os(WORKER_ENV).is_some()
}

/// Turn the current process into a worker if it was spawned as one.
///
/// Returns immediately in the orchestrating process. In a worker
/// process it serves the processor named by the handshake and exits
/// without returning. Transforms running in a worker process must not
/// write to stdout, which carries the frame stream.
pub fn bootstrap() {
    if !is_worker() {
        return;
    }

    crate::logging::init();
    let code = match process::run_child() {
        Ok(()) => 0,
        Err(e) => {
            error!(error = %e, "Worker process failed");
            1
        }
    };
    std::process::exit(code);
}

pub(crate) use executor::{Control, WorkerSpec};
pub(crate) use process::ProcessWorker;
pub(crate) use thread::ThreadWorker;
