use std::sync::Arc;
use std::time::Duration;

use bowline::observability::{MetricsCollector, PipelineMonitor, ProcessorMetrics};
use bowline::{transform, Processor, ProcessorGraph};
use serde_json::{json, Value};

#[transform]
fn reject_odd(value: Value) -> anyhow::Result<Value> {
    match value["n"].as_i64() {
        Some(n) if n % 2 == 0 => Ok(value),
        Some(n) => anyhow::bail!("{} is odd", n),
        None => anyhow::bail!("missing n"),
    }
}

#[transform]
fn forward(value: Value) -> Value {
    value
}

#[test]
fn test_collector_snapshot() {
    let mut collector = MetricsCollector::new();
    assert!(collector.is_empty());

    let metrics = Arc::new(ProcessorMetrics::new("square"));
    collector.register(metrics.clone());

    metrics.record_accepted();
    metrics.record_accepted();
    metrics.record_latency(Duration::from_micros(300));
    metrics.record_completed();

    let snapshot = collector.snapshot();
    let square = &snapshot["square"];
    assert_eq!(square.accepted, 2);
    assert_eq!(square.completed, 1);
    assert_eq!(square.avg_latency_us, 300);
    assert_eq!(metrics.in_flight(), 1);
    assert_eq!(collector.len(), 1);
}

#[test]
fn test_monitor_report() {
    let empty = PipelineMonitor::new(MetricsCollector::new());
    assert_eq!(empty.report(), "No processors registered");

    let mut collector = MetricsCollector::new();
    let metrics = Arc::new(ProcessorMetrics::new("add"));
    metrics.record_accepted();
    metrics.record_failure();
    metrics.record_completed();
    collector.register(metrics);

    let report = PipelineMonitor::new(collector).report();
    assert!(report.starts_with("=== Pipeline Metrics ==="));
    assert!(report.contains("[add]"));
    assert!(report.contains("Items: 1 accepted, 1 completed"));
    assert!(report.contains("Failures: 1"));
}

#[test]
fn test_failures_are_attributed_to_their_processor() {
    let mut graph = ProcessorGraph::new();
    graph
        .add_processor(Processor::builder("check", "reject_odd").build().unwrap(), None)
        .unwrap();
    graph
        .add_processor(Processor::builder("after", "forward").build().unwrap(), Some("check"))
        .unwrap();
    graph.start().unwrap();

    for n in 0..4 {
        graph.push_input(json!({"n": n})).unwrap();
    }
    for _ in 0..4 {
        graph.recv_output_timeout(Duration::from_secs(5)).unwrap();
    }
    graph.shutdown().unwrap();

    let metrics = graph.metrics();
    assert_eq!(metrics["check"].accepted, 4);
    assert_eq!(metrics["check"].failures, 2);
    assert_eq!(metrics["after"].completed, 4);
    assert_eq!(metrics["after"].failures, 0);

    let report = graph.monitor().report();
    assert!(report.contains("[after]"));
    assert!(report.contains("[check]"));
}
