use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ValidationError;

/// One unit of data leaving a processor, tagged with the contract it satisfied
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    pub shape: String,
    pub value: Value,
}

impl Payload {
    pub fn new(shape: impl Into<String>, value: Value) -> Self {
        Self {
            shape: shape.into(),
            value,
        }
    }

    /// Decode the value into a concrete type
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        T::deserialize(&self.value)
    }

    pub fn into_value(self) -> Value {
        self.value
    }
}

/// Why a single item failed inside a processor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FailureKind {
    /// Input or output did not satisfy its contract
    Validation(ValidationError),
    /// The transform returned an error
    Transform(String),
    /// The transform panicked
    Panicked(String),
}

/// Per-item failure, reported in place of the item's output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorFailure {
    pub processor: String,
    pub kind: FailureKind,
}

impl ProcessorFailure {
    pub fn new(processor: impl Into<String>, kind: FailureKind) -> Self {
        Self {
            processor: processor.into(),
            kind,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self.kind, FailureKind::Validation(_))
    }
}

impl std::fmt::Display for ProcessorFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            FailureKind::Validation(e) => write!(f, "{}: {}", self.processor, e),
            FailureKind::Transform(msg) => write!(f, "{}: transform failed: {}", self.processor, msg),
            FailureKind::Panicked(msg) => write!(f, "{}: transform panicked: {}", self.processor, msg),
        }
    }
}

impl std::error::Error for ProcessorFailure {}

/// Result of processing one pushed item
pub type Outcome = Result<Payload, ProcessorFailure>;

/// Graph output annotated with the leaf processor that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct TaggedResult {
    pub processor: String,
    pub outcome: Outcome,
}

impl TaggedResult {
    pub fn value(&self) -> Option<&Value> {
        self.outcome.as_ref().ok().map(|p| &p.value)
    }
}

/// What travels on a processor's input channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Envelope {
    Item(Value),
    /// An upstream failure passed through so per-path order is kept
    Failed(ProcessorFailure),
}
