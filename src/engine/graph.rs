use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use serde::Serialize;
use tracing::{debug, info};

use super::processor::Processor;
use super::relay::{Relay, RelaySink, Route};
use super::state::LifecycleState;
use super::teardown::teardown;
use crate::core::{PipelineError, TaggedResult};
use crate::observability::{MetricsCollector, MetricsSnapshot, PipelineMonitor};

const GRAPH: &str = "graph";

/// Directed acyclic graph of processors.
///
/// Pushed values go to every root; outputs of every leaf are collected
/// into one merged channel as [`TaggedResult`]s. Order is preserved along
/// each path but not across leaves.
#[derive(Debug)]
pub struct ProcessorGraph {
    processors: Vec<Processor>,
    // relays[i] drains processors[i]
    relays: Vec<Option<Relay>>,
    index: HashMap<String, usize>,
    children: Vec<Vec<usize>>,
    merged_tx: Option<Sender<TaggedResult>>,
    merged_rx: Receiver<TaggedResult>,
    state: LifecycleState,
    collector: MetricsCollector,
}

impl Default for ProcessorGraph {
    fn default() -> Self {
        let (merged_tx, merged_rx) = unbounded();
        Self {
            processors: Vec::new(),
            relays: Vec::new(),
            index: HashMap::new(),
            children: Vec::new(),
            merged_tx: Some(merged_tx),
            merged_rx,
            state: LifecycleState::Idle,
            collector: MetricsCollector::new(),
        }
    }
}

impl ProcessorGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor`, as a root or as a child of `parent`.
    ///
    /// Adding an already registered name under a parent adds the edge
    /// `parent -> name` instead, with the same checks as [`connect`], so
    /// an edge that closes a loop fails with `Cycle`. Without a parent a
    /// repeated name is a `DuplicateName`.
    ///
    /// [`connect`]: ProcessorGraph::connect
    pub fn add_processor(&mut self, processor: Processor, parent: Option<&str>) -> Result<(), PipelineError> {
        if !self.state.is_idle() || !processor.state().is_idle() {
            return Err(PipelineError::AlreadyStarted(processor.name().to_string()));
        }
        if self.index.contains_key(processor.name()) {
            return match parent {
                Some(parent) => self.connect(parent, processor.name()),
                None => Err(PipelineError::DuplicateName(processor.name().to_string())),
            };
        }
        let parent_idx = match parent {
            Some(name) => {
                let idx = self.lookup(name)?;
                check_compatible(&self.processors[idx], &processor)?;
                Some(idx)
            }
            None => None,
        };

        let idx = self.processors.len();
        self.index.insert(processor.name().to_string(), idx);
        self.children.push(Vec::new());
        if let Some(parent_idx) = parent_idx {
            self.children[parent_idx].push(idx);
        }
        debug!(processor = processor.name(), parent, "Added processor to graph");
        self.collector.register(processor.metrics().clone());
        self.processors.push(processor);
        Ok(())
    }

    /// Add an edge between two registered processors.
    ///
    /// Rejects edges that would close a cycle; the graph is left untouched
    /// on any error.
    pub fn connect(&mut self, parent: &str, child: &str) -> Result<(), PipelineError> {
        if !self.state.is_idle() {
            return Err(PipelineError::AlreadyStarted(GRAPH.to_string()));
        }
        let from = self.lookup(parent)?;
        let to = self.lookup(child)?;

        if self.children[from].contains(&to) {
            return Err(PipelineError::DuplicateEdge {
                from: parent.to_string(),
                to: child.to_string(),
            });
        }
        if from == to || self.reachable(to, from) {
            return Err(PipelineError::Cycle {
                from: parent.to_string(),
                to: child.to_string(),
            });
        }
        check_compatible(&self.processors[from], &self.processors[to])?;

        self.children[from].push(to);
        debug!(from = parent, to = child, "Connected processors");
        Ok(())
    }

    /// Start processors parents first, then edge relays, then leaf collectors
    pub fn start(&mut self) -> Result<(), PipelineError> {
        if !self.state.is_idle() {
            return Err(PipelineError::AlreadyStarted(GRAPH.to_string()));
        }
        if self.processors.is_empty() {
            return Err(PipelineError::Empty(GRAPH.to_string()));
        }
        let merged = self
            .merged_tx
            .take()
            .ok_or_else(|| PipelineError::AlreadyStarted(GRAPH.to_string()))?;

        let order = self.topological_indices();
        self.relays = self.processors.iter().map(|_| None).collect();
        if let Err(e) = self.spawn_all(&order, merged) {
            let _ = teardown(&mut self.processors, &mut self.relays, &order);
            self.state.transition_to(LifecycleState::Stopped { uptime: None });
            return Err(e);
        }

        self.state.transition_to(LifecycleState::running());
        info!(
            processors = self.processors.len(),
            roots = ?self.roots(),
            leaves = ?self.leaves(),
            "Graph started"
        );
        Ok(())
    }

    fn spawn_all(&mut self, order: &[usize], merged: Sender<TaggedResult>) -> Result<(), PipelineError> {
        for &idx in order {
            self.processors[idx].start()?;
        }
        let (inner, leaves): (Vec<usize>, Vec<usize>) =
            order.iter().copied().partition(|&i| !self.children[i].is_empty());

        for idx in inner {
            let routes = self.children[idx]
                .iter()
                .map(|&child| Route::to(&self.processors[child]))
                .collect();
            self.relays[idx] = Some(Relay::spawn(&self.processors[idx], RelaySink::Routes(routes))?);
        }
        for idx in leaves {
            let sink = RelaySink::Collector(merged.clone());
            self.relays[idx] = Some(Relay::spawn(&self.processors[idx], sink)?);
        }
        Ok(())
    }

    /// Deliver `value` to every root.
    ///
    /// Every root validates before anything is enqueued. If a root's
    /// worker has vanished the push fails with `Disconnected`, and roots
    /// earlier in registration order keep the copy they already received.
    pub fn push_input<T: Serialize>(&self, value: T) -> Result<(), PipelineError> {
        if !self.state.is_running() {
            return Err(PipelineError::NotRunning(GRAPH.to_string()));
        }
        let value = serde_json::to_value(value)?;
        let roots = self.root_indices();
        for &idx in &roots {
            self.processors[idx].validate_input(&value)?;
        }
        for &idx in &roots {
            self.processors[idx].enqueue(value.clone())?;
        }
        Ok(())
    }

    pub fn has_output(&self) -> bool {
        !self.merged_rx.is_empty()
    }

    /// Take the next leaf output if one is ready
    pub fn get_output(&self) -> Option<TaggedResult> {
        self.merged_rx.try_recv().ok()
    }

    pub fn recv_output(&self) -> Result<TaggedResult, PipelineError> {
        if self.state.is_idle() {
            return Err(PipelineError::NotRunning(GRAPH.to_string()));
        }
        self.merged_rx.recv().map_err(|_| self.closed_error())
    }

    pub fn recv_output_timeout(&self, timeout: Duration) -> Result<TaggedResult, PipelineError> {
        if self.state.is_idle() {
            return Err(PipelineError::NotRunning(GRAPH.to_string()));
        }
        self.merged_rx.recv_timeout(timeout).map_err(|e| match e {
            RecvTimeoutError::Timeout => PipelineError::Timeout(GRAPH.to_string()),
            RecvTimeoutError::Disconnected => self.closed_error(),
        })
    }

    /// Quiesce parents first, stop relays, then shut down leaves first
    pub fn shutdown(&mut self) -> Result<(), PipelineError> {
        if self.state.is_stopped() {
            return Ok(());
        }
        let started_at = self.state.started_at();
        if self.state.is_running() {
            self.state.transition_to(LifecycleState::ShuttingDown);
        }
        info!(processors = self.processors.len(), "Shutting down graph");

        if self.relays.len() != self.processors.len() {
            self.relays = self.processors.iter().map(|_| None).collect();
        }
        let order = self.topological_indices();
        let result = teardown(&mut self.processors, &mut self.relays, &order);

        self.merged_tx = None;
        self.state = LifecycleState::stopped_after(started_at);
        result
    }

    /// Processors without an incoming edge, in registration order
    pub fn roots(&self) -> Vec<&str> {
        self.root_indices()
            .into_iter()
            .map(|i| self.processors[i].name())
            .collect()
    }

    /// Processors without an outgoing edge, in registration order
    pub fn leaves(&self) -> Vec<&str> {
        self.processors
            .iter()
            .enumerate()
            .filter(|(i, _)| self.children[*i].is_empty())
            .map(|(_, p)| p.name())
            .collect()
    }

    /// Direct children of `name` in edge registration order
    pub fn children(&self, name: &str) -> Option<Vec<&str>> {
        let idx = *self.index.get(name)?;
        Some(
            self.children[idx]
                .iter()
                .map(|&c| self.processors[c].name())
                .collect(),
        )
    }

    /// Parents before children; ties broken by registration order
    pub fn topological_order(&self) -> Vec<&str> {
        self.topological_indices()
            .into_iter()
            .map(|i| self.processors[i].name())
            .collect()
    }

    pub fn state(&self) -> &LifecycleState {
        &self.state
    }

    pub fn len(&self) -> usize {
        self.processors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processors.is_empty()
    }

    pub fn processor(&self, name: &str) -> Option<&Processor> {
        self.index.get(name).map(|&i| &self.processors[i])
    }

    pub fn relays(&self) -> impl Iterator<Item = &Relay> {
        self.relays.iter().flatten()
    }

    pub fn metrics(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.collector.snapshot()
    }

    pub fn monitor(&self) -> PipelineMonitor {
        PipelineMonitor::new(self.collector.clone())
    }

    fn lookup(&self, name: &str) -> Result<usize, PipelineError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| PipelineError::UnknownProcessor(name.to_string()))
    }

    fn root_indices(&self) -> Vec<usize> {
        let mut has_parent = vec![false; self.processors.len()];
        for &child in self.children.iter().flatten() {
            has_parent[child] = true;
        }
        (0..self.processors.len()).filter(|&i| !has_parent[i]).collect()
    }

    /// Depth-first search from `start` looking for `target`
    fn reachable(&self, start: usize, target: usize) -> bool {
        let mut visited = vec![false; self.processors.len()];
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            if idx == target {
                return true;
            }
            if std::mem::replace(&mut visited[idx], true) {
                continue;
            }
            stack.extend(self.children[idx].iter().copied());
        }
        false
    }

    // Kahn's algorithm; the graph is acyclic by construction
    fn topological_indices(&self) -> Vec<usize> {
        let mut in_degree = vec![0usize; self.processors.len()];
        for &child in self.children.iter().flatten() {
            in_degree[child] += 1;
        }
        let mut ready: BTreeSet<usize> = (0..self.processors.len())
            .filter(|&i| in_degree[i] == 0)
            .collect();

        let mut order = Vec::with_capacity(self.processors.len());
        while let Some(idx) = ready.pop_first() {
            order.push(idx);
            for &child in &self.children[idx] {
                in_degree[child] -= 1;
                if in_degree[child] == 0 {
                    ready.insert(child);
                }
            }
        }
        order
    }

    fn closed_error(&self) -> PipelineError {
        if self.state.is_running() {
            PipelineError::Disconnected(GRAPH.to_string())
        } else {
            PipelineError::NotRunning(GRAPH.to_string())
        }
    }
}

impl Drop for ProcessorGraph {
    fn drop(&mut self) {
        if self.state.is_running() {
            let _ = self.shutdown();
        }
    }
}

fn check_compatible(parent: &Processor, child: &Processor) -> Result<(), PipelineError> {
    child
        .input_contract()
        .accepts(parent.output_contract())
        .map_err(|reason| PipelineError::IncompatibleContracts {
            from: parent.name().to_string(),
            to: child.name().to_string(),
            reason,
        })
}
