pub mod chain;
pub mod config;
pub mod graph;
pub mod processor;
pub mod relay;
pub mod state;
mod teardown;

pub use chain::ProcessorChain;
pub use config::{Isolation, ProcessorConfig, ShutdownPolicy};
pub use graph::ProcessorGraph;
pub use processor::{Processor, ProcessorBuilder};
pub use relay::Relay;
pub use state::LifecycleState;
