use std::io::{Read, Write};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::executor::WorkerSpec;
use crate::core::ProcessorFailure;
use crate::engine::ShutdownPolicy;

/// Upper bound for a single frame
const MAX_FRAME_BYTES: usize = 64 * 1024 * 1024;

/// Frames written by the orchestrating process to a worker's stdin
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum HostMessage {
    Hello(WorkerSpec),
    Item(Value),
    Failed(ProcessorFailure),
    Shutdown(ShutdownPolicy),
}

/// Frames written by a worker to its stdout
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) enum WorkerMessage {
    Ready,
    Rejected { reason: String },
    Output { value: Value, shape: String, elapsed_us: u64 },
    Failure { failure: ProcessorFailure, elapsed_us: u64 },
    Exiting,
}

#[derive(Debug, Error)]
pub(crate) enum WireError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("unexpected frame: {0}")]
    Unexpected(String),
}

impl WireError {
    /// Clean end of stream before a frame header
    pub fn is_eof(&self) -> bool {
        matches!(self, Self::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Write one length-prefixed JSON frame and flush
pub(crate) fn write_frame<W: Write, T: Serialize>(mut w: W, msg: &T) -> Result<(), WireError> {
    let payload = serde_json::to_vec(msg)?;
    if payload.len() > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(payload.len()));
    }
    let len = payload.len() as u32;
    w.write_all(&len.to_le_bytes())?;
    w.write_all(&payload)?;
    w.flush()?;
    Ok(())
}

pub(crate) fn read_frame<R: Read, T: DeserializeOwned>(mut r: R) -> Result<T, WireError> {
    let mut len_bytes = [0u8; 4];
    r.read_exact(&mut len_bytes)?;
    let len = u32::from_le_bytes(len_bytes) as usize;
    if len > MAX_FRAME_BYTES {
        return Err(WireError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    r.read_exact(&mut payload)?;
    Ok(serde_json::from_slice(&payload)?)
}
