use super::MetricsCollector;

pub struct PipelineMonitor {
    collector: MetricsCollector,
}

impl PipelineMonitor {
    pub fn new(collector: MetricsCollector) -> Self {
        Self { collector }
    }

    pub fn report(&self) -> String {
        let snapshot = self.collector.snapshot();

        if snapshot.is_empty() {
            return "No processors registered".to_string();
        }

        let mut report = String::from("=== Pipeline Metrics ===\n");

        for (name, m) in snapshot.iter() {
            report.push_str(&format!(
                "\n[{}]\n  Items: {} accepted, {} completed\n  Failures: {}\n  Avg Latency: {}μs\n",
                name,
                m.accepted,
                m.completed,
                m.failures,
                m.avg_latency_us
            ));
        }

        report
    }

    pub fn collector(&self) -> &MetricsCollector {
        &self.collector
    }
}
