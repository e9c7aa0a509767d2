use std::collections::BTreeMap;
use std::sync::Arc;

use super::ProcessorMetrics;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub processor: String,
    pub accepted: u64,
    pub completed: u64,
    pub failures: u64,
    pub avg_latency_us: u64,
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    metrics: BTreeMap<String, Arc<ProcessorMetrics>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, metrics: Arc<ProcessorMetrics>) {
        self.metrics.insert(metrics.processor().to_string(), metrics);
    }

    pub fn snapshot(&self) -> BTreeMap<String, MetricsSnapshot> {
        self.metrics
            .iter()
            .map(|(name, m)| {
                (
                    name.clone(),
                    MetricsSnapshot {
                        processor: m.processor().to_string(),
                        accepted: m.accepted(),
                        completed: m.completed(),
                        failures: m.failures(),
                        avg_latency_us: m.avg_latency_us(),
                    },
                )
            })
            .collect()
    }

    pub fn get(&self, processor: &str) -> Option<Arc<ProcessorMetrics>> {
        self.metrics.get(processor).cloned()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
