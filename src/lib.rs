//! Data-stream pipelines of isolated processors.
//!
//! A [`Processor`] runs one registered transform on its own worker, a
//! [`ProcessorChain`] links processors linearly and a [`ProcessorGraph`]
//! arranges them as a DAG with fan-out. Payloads are validated against
//! [`Contract`]s at every boundary they cross.

extern crate self as bowline;

pub mod core;
pub mod engine;
pub mod logging;
pub mod observability;
pub mod registry;
pub mod topology;
pub mod worker;

pub use bowline_macros::{transform, Contract};
pub use serde_json::Value;

pub use crate::core::{
    Contract, FailureKind, FieldKind, FieldSpec, HasContract, Outcome, Payload, PipelineError, ProcessorFailure,
    ShapeValidator, TaggedResult, ValidationError,
};
pub use engine::{
    Isolation, LifecycleState, Processor, ProcessorBuilder, ProcessorChain, ProcessorConfig, ProcessorGraph, Relay,
    ShutdownPolicy,
};
pub use topology::{Topology, TopologyConfig};

#[doc(hidden)]
pub mod __private {
    pub use anyhow;
    pub use inventory;
    pub use serde_json;
}
