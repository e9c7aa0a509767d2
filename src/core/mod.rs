pub mod contract;
pub mod error;
pub mod payload;

pub use contract::{Contract, FieldKind, FieldSpec, HasContract, ShapeValidator};
pub use error::{PipelineError, ValidationError};
pub use payload::{Envelope, FailureKind, Outcome, Payload, ProcessorFailure, TaggedResult};
