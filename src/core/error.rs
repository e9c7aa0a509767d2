use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A value that does not satisfy a contract
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("`{contract}` rejected `{path}`: {reason}")]
pub struct ValidationError {
    pub contract: String,
    pub path: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(contract: &str, path: &str, reason: impl Into<String>) -> Self {
        Self {
            contract: contract.to_string(),
            path: path.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by processors, chains and graphs
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Duplicate processor name: {0}")]
    DuplicateName(String),

    #[error("Edge {from} -> {to} would create a cycle")]
    Cycle { from: String, to: String },

    #[error("Edge {from} -> {to} already exists")]
    DuplicateEdge { from: String, to: String },

    #[error("Unknown processor: {0}")]
    UnknownProcessor(String),

    #[error("Incompatible contracts on {from} -> {to}: {reason}")]
    IncompatibleContracts {
        from: String,
        to: String,
        reason: String,
    },

    #[error("Transform `{0}` is not registered")]
    UnknownTransform(String),

    #[error("{0} is not running")]
    NotRunning(String),

    #[error("{0} has already been started")]
    AlreadyStarted(String),

    #[error("{0} contains no processors")]
    Empty(String),

    #[error("Failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Failed to spawn worker for {processor}: {source}")]
    Spawn {
        processor: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Worker for {0} disconnected while running")]
    Disconnected(String),

    #[error("Timed out waiting for output from {0}")]
    Timeout(String),

    #[error("Shutdown of {processor} failed: {reason}")]
    Shutdown { processor: String, reason: String },
}
