//! Build chains and graphs from a JSON topology document.
//!
//! ```json
//! {"graph": {"processors": [
//!     {"name": "add", "transform": "add", "children": [
//!         {"name": "square", "transform": "square"}
//!     ]}
//! ]}}
//! ```
//!
//! Contracts are given inline as `{"name": .., "fields": [..]}` and default
//! to `any` when omitted. The builder only drives the public
//! `add_processor` API, so every topology rule applies unchanged.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::info;

use crate::core::{Contract, PipelineError};
use crate::engine::{Processor, ProcessorChain, ProcessorConfig, ProcessorGraph};

#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid topology document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Chain member {0} cannot declare children")]
    ChildrenInChain(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

/// One processor in a topology document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessorEntry {
    pub name: String,
    pub transform: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Contract>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Contract>,
    #[serde(default)]
    pub config: ProcessorConfig,
    /// Graph children fed by this processor
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ProcessorEntry>,
}

impl ProcessorEntry {
    fn build(&self) -> Result<Processor, PipelineError> {
        let mut builder = Processor::builder(&self.name, &self.transform).config(self.config.clone());
        if let Some(input) = &self.input {
            builder = builder.input_contract(input.clone());
        }
        if let Some(output) = &self.output {
            builder = builder.output_contract(output.clone());
        }
        builder.build()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ProcessorList {
    #[serde(default)]
    pub processors: Vec<ProcessorEntry>,
}

/// Parsed topology document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TopologyConfig {
    Chain(ProcessorList),
    Graph(ProcessorList),
}

impl TopologyConfig {
    pub fn from_json(json: &str) -> Result<Self, TopologyError> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, TopologyError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Construct the topology; nothing is started
    pub fn build(&self) -> Result<Topology, TopologyError> {
        match self {
            Self::Chain(list) => {
                let mut chain = ProcessorChain::new();
                for entry in &list.processors {
                    if !entry.children.is_empty() {
                        return Err(TopologyError::ChildrenInChain(entry.name.clone()));
                    }
                    chain.add_processor(entry.build()?)?;
                }
                info!(processors = chain.len(), "Built chain from topology");
                Ok(Topology::Chain(chain))
            }
            Self::Graph(list) => {
                let mut graph = ProcessorGraph::new();
                for entry in &list.processors {
                    add_subtree(&mut graph, entry, None)?;
                }
                info!(processors = graph.len(), "Built graph from topology");
                Ok(Topology::Graph(graph))
            }
        }
    }
}

fn add_subtree(graph: &mut ProcessorGraph, entry: &ProcessorEntry, parent: Option<&str>) -> Result<(), PipelineError> {
    // the graph would read a repeated name under a parent as an extra edge
    if graph.processor(&entry.name).is_some() {
        return Err(PipelineError::DuplicateName(entry.name.clone()));
    }
    graph.add_processor(entry.build()?, parent)?;
    for child in &entry.children {
        add_subtree(graph, child, Some(&entry.name))?;
    }
    Ok(())
}

/// A constructed, not yet started chain or graph
#[derive(Debug)]
pub enum Topology {
    Chain(ProcessorChain),
    Graph(ProcessorGraph),
}

impl Topology {
    pub fn start(&mut self) -> Result<(), PipelineError> {
        match self {
            Self::Chain(chain) => chain.start(),
            Self::Graph(graph) => graph.start(),
        }
    }

    pub fn shutdown(&mut self) -> Result<(), PipelineError> {
        match self {
            Self::Chain(chain) => chain.shutdown(),
            Self::Graph(graph) => graph.shutdown(),
        }
    }

    pub fn into_chain(self) -> Option<ProcessorChain> {
        match self {
            Self::Chain(chain) => Some(chain),
            Self::Graph(_) => None,
        }
    }

    pub fn into_graph(self) -> Option<ProcessorGraph> {
        match self {
            Self::Graph(graph) => Some(graph),
            Self::Chain(_) => None,
        }
    }
}
