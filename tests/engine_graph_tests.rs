use std::collections::BTreeMap;
use std::time::Duration;

use bowline::{transform, Contract, FieldKind, PipelineError, Processor, ProcessorGraph, TaggedResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

const WAIT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize, Deserialize, Contract)]
struct AddInput {
    x: i64,
    y: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Contract)]
struct Sum {
    result: i64,
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Contract)]
struct Root {
    result: f64,
}

#[transform]
fn add(input: AddInput) -> Sum {
    Sum {
        result: input.x + input.y,
    }
}

#[transform]
fn square(input: Sum) -> Sum {
    Sum {
        result: input.result * input.result,
    }
}

#[transform]
fn sqrt(input: Sum) -> Root {
    Root {
        result: (input.result as f64).sqrt(),
    }
}

#[transform]
fn passthrough(value: Value) -> Value {
    value
}

/// Mutates its copy so sibling branches can prove they are independent
#[transform]
fn scribble(mut value: Value) -> Value {
    value["scribbled"] = json!(true);
    value
}

fn node(name: &str, transform: &str) -> Processor {
    Processor::builder(name, transform).build().unwrap()
}

fn scenario_c_graph() -> ProcessorGraph {
    let mut graph = ProcessorGraph::new();
    graph
        .add_processor(
            Processor::builder("add", "add").input::<AddInput>().output::<Sum>().build().unwrap(),
            None,
        )
        .unwrap();
    graph
        .add_processor(
            Processor::builder("square", "square").input::<Sum>().output::<Sum>().build().unwrap(),
            Some("add"),
        )
        .unwrap();
    graph
        .add_processor(
            Processor::builder("sqrt", "sqrt").input::<Sum>().output::<Root>().build().unwrap(),
            Some("add"),
        )
        .unwrap();
    graph
}

fn collect(graph: &ProcessorGraph, count: usize) -> Vec<TaggedResult> {
    (0..count).map(|_| graph.recv_output_timeout(WAIT).unwrap()).collect()
}

fn by_tag(results: &[TaggedResult]) -> BTreeMap<String, Vec<Value>> {
    let mut grouped: BTreeMap<String, Vec<Value>> = BTreeMap::new();
    for tagged in results {
        let value = tagged.value().expect("successful outcome")["result"].clone();
        grouped.entry(tagged.processor.clone()).or_default().push(value);
    }
    grouped
}

#[test]
fn test_scenario_c_fan_out() {
    let mut graph = scenario_c_graph();
    graph.start().unwrap();

    graph.push_input(AddInput { x: 2, y: 2 }).unwrap();
    graph.push_input(AddInput { x: 3, y: 4 }).unwrap();
    graph.push_input(AddInput { x: 123, y: 456 }).unwrap();

    let results = collect(&graph, 6);
    graph.shutdown().unwrap();
    assert!(graph.get_output().is_none());

    let grouped = by_tag(&results);
    assert_eq!(grouped.len(), 2);
    assert_eq!(grouped["square"], vec![json!(16), json!(49), json!(335241)]);

    let roots: Vec<f64> = grouped["sqrt"].iter().map(|v| v.as_f64().unwrap()).collect();
    assert_eq!(roots, vec![2.0, 7f64.sqrt(), 579f64.sqrt()]);
    assert_eq!(roots[2], 24.06241883103193);
}

#[test]
fn test_cycle_rejected_and_graph_unchanged() {
    let mut graph = ProcessorGraph::new();
    graph.add_processor(node("a", "passthrough"), None).unwrap();
    graph.add_processor(node("b", "passthrough"), Some("a")).unwrap();

    let err = graph.connect("b", "a").unwrap_err();
    assert!(matches!(err, PipelineError::Cycle { from, to } if from == "b" && to == "a"));

    assert_eq!(graph.roots(), vec!["a"]);
    assert_eq!(graph.leaves(), vec!["b"]);
    assert_eq!(graph.children("a"), Some(vec!["b"]));
    assert_eq!(graph.children("b"), Some(vec![]));
}

#[test]
fn test_re_adding_ancestor_under_descendant_is_cycle() {
    let mut graph = ProcessorGraph::new();
    graph.add_processor(node("a", "passthrough"), None).unwrap();
    graph.add_processor(node("b", "passthrough"), Some("a")).unwrap();

    let err = graph.add_processor(node("a", "passthrough"), Some("b")).unwrap_err();
    assert!(matches!(err, PipelineError::Cycle { from, to } if from == "b" && to == "a"));

    assert_eq!(graph.len(), 2);
    assert_eq!(graph.roots(), vec!["a"]);
    assert_eq!(graph.children("b"), Some(vec![]));

    let err = graph.add_processor(node("b", "passthrough"), Some("b")).unwrap_err();
    assert!(matches!(err, PipelineError::Cycle { .. }));
}

#[test]
fn test_re_adding_under_new_parent_adds_edge() {
    let mut graph = ProcessorGraph::new();
    graph.add_processor(node("a", "passthrough"), None).unwrap();
    graph.add_processor(node("b", "passthrough"), Some("a")).unwrap();
    graph.add_processor(node("c", "passthrough"), Some("a")).unwrap();
    graph.add_processor(node("d", "passthrough"), Some("b")).unwrap();
    graph.add_processor(node("d", "passthrough"), Some("c")).unwrap();

    assert_eq!(graph.len(), 4);
    assert_eq!(graph.children("c"), Some(vec!["d"]));
    assert_eq!(graph.leaves(), vec!["d"]);

    let err = graph.add_processor(node("d", "passthrough"), Some("c")).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateEdge { .. }));
}

#[test]
fn test_longer_cycle_rejected() {
    let mut graph = ProcessorGraph::new();
    graph.add_processor(node("a", "passthrough"), None).unwrap();
    graph.add_processor(node("b", "passthrough"), Some("a")).unwrap();
    graph.add_processor(node("c", "passthrough"), Some("b")).unwrap();

    assert!(matches!(graph.connect("c", "a").unwrap_err(), PipelineError::Cycle { .. }));
    assert_eq!(graph.topological_order(), vec!["a", "b", "c"]);
}

#[test]
fn test_duplicate_edge_and_unknown_processor() {
    let mut graph = ProcessorGraph::new();
    graph.add_processor(node("a", "passthrough"), None).unwrap();
    graph.add_processor(node("b", "passthrough"), Some("a")).unwrap();

    assert!(matches!(graph.connect("a", "b").unwrap_err(), PipelineError::DuplicateEdge { .. }));
    assert!(matches!(graph.connect("a", "zzz").unwrap_err(), PipelineError::UnknownProcessor(name) if name == "zzz"));

    let err = graph.add_processor(node("c", "passthrough"), Some("missing")).unwrap_err();
    assert!(matches!(err, PipelineError::UnknownProcessor(name) if name == "missing"));
    assert_eq!(graph.len(), 2);
}

#[test]
fn test_duplicate_name_rejected() {
    let mut graph = ProcessorGraph::new();
    graph.add_processor(node("a", "passthrough"), None).unwrap();

    let err = graph.add_processor(node("a", "passthrough"), None).unwrap_err();
    assert!(matches!(err, PipelineError::DuplicateName(name) if name == "a"));
}

#[test]
fn test_incompatible_child_rejected() {
    let mut graph = scenario_c_graph();
    let text_consumer = Processor::builder("text", "passthrough")
        .input_contract(Contract::new("Text").field("text", FieldKind::String))
        .build()
        .unwrap();

    let err = graph.add_processor(text_consumer, Some("sqrt")).unwrap_err();
    assert!(matches!(err, PipelineError::IncompatibleContracts { .. }));
    assert_eq!(graph.leaves(), vec!["square", "sqrt"]);
}

#[test]
fn test_diamond_delivers_one_copy_per_path() {
    let mut graph = ProcessorGraph::new();
    graph.add_processor(node("a", "passthrough"), None).unwrap();
    graph.add_processor(node("b", "passthrough"), Some("a")).unwrap();
    graph.add_processor(node("c", "passthrough"), Some("a")).unwrap();
    graph.add_processor(node("d", "passthrough"), Some("b")).unwrap();
    graph.connect("c", "d").unwrap();
    graph.start().unwrap();

    graph.push_input(json!({"n": 1})).unwrap();
    let results = collect(&graph, 2);
    assert!(results.iter().all(|r| r.processor == "d"));
    assert!(graph.recv_output_timeout(Duration::from_millis(50)).is_err());

    graph.shutdown().unwrap();
    assert_eq!(graph.metrics()["d"].accepted, 2);
}

#[test]
fn test_fan_out_copies_are_independent() {
    let mut graph = ProcessorGraph::new();
    graph.add_processor(node("source", "passthrough"), None).unwrap();
    graph.add_processor(node("scribble", "scribble"), Some("source")).unwrap();
    graph.add_processor(node("clean", "passthrough"), Some("source")).unwrap();
    graph.start().unwrap();

    graph.push_input(json!({"n": 7})).unwrap();
    let results = collect(&graph, 2);
    graph.shutdown().unwrap();

    for tagged in results {
        let value = tagged.value().unwrap().clone();
        match tagged.processor.as_str() {
            "scribble" => assert_eq!(value, json!({"n": 7, "scribbled": true})),
            "clean" => assert_eq!(value, json!({"n": 7})),
            other => panic!("unexpected leaf {}", other),
        }
    }
}

#[test]
fn test_every_root_receives_push() {
    let mut graph = ProcessorGraph::new();
    graph.add_processor(node("left", "passthrough"), None).unwrap();
    graph.add_processor(node("right", "passthrough"), None).unwrap();
    graph.start().unwrap();
    assert_eq!(graph.roots(), vec!["left", "right"]);

    graph.push_input(json!({"n": 1})).unwrap();
    let grouped: Vec<String> = {
        let mut tags: Vec<String> = collect(&graph, 2).into_iter().map(|r| r.processor).collect();
        tags.sort();
        tags
    };
    assert_eq!(grouped, vec!["left", "right"]);

    graph.shutdown().unwrap();
}

#[test]
fn test_push_validates_against_all_roots_first() {
    let mut graph = ProcessorGraph::new();
    graph.add_processor(node("loose", "passthrough"), None).unwrap();
    graph
        .add_processor(
            Processor::builder("strict", "add").input::<AddInput>().output::<Sum>().build().unwrap(),
            None,
        )
        .unwrap();
    graph.start().unwrap();

    let err = graph.push_input(json!({"x": 1})).unwrap_err();
    assert!(matches!(err, PipelineError::Validation(_)));

    let metrics = graph.metrics();
    assert_eq!(metrics["loose"].accepted, 0);
    assert_eq!(metrics["strict"].accepted, 0);

    graph.shutdown().unwrap();
}

#[test]
fn test_lifecycle_errors() {
    let mut empty = ProcessorGraph::new();
    assert!(matches!(empty.start().unwrap_err(), PipelineError::Empty(_)));

    let mut graph = scenario_c_graph();
    assert!(matches!(
        graph.push_input(AddInput { x: 1, y: 1 }).unwrap_err(),
        PipelineError::NotRunning(_)
    ));

    graph.start().unwrap();
    assert!(matches!(graph.start().unwrap_err(), PipelineError::AlreadyStarted(_)));
    assert!(matches!(graph.connect("square", "sqrt").unwrap_err(), PipelineError::AlreadyStarted(_)));

    graph.shutdown().unwrap();
    graph.shutdown().unwrap();
    assert!(matches!(
        graph.push_input(AddInput { x: 1, y: 1 }).unwrap_err(),
        PipelineError::NotRunning(_)
    ));
    assert!(matches!(graph.recv_output().unwrap_err(), PipelineError::NotRunning(_)));
}

#[test]
fn test_drain_collects_everything_before_shutdown_returns() {
    let mut graph = scenario_c_graph();
    graph.start().unwrap();
    for i in 0..50 {
        graph.push_input(AddInput { x: i, y: 0 }).unwrap();
    }
    graph.shutdown().unwrap();

    let mut count = 0;
    while graph.get_output().is_some() {
        count += 1;
    }
    assert_eq!(count, 100);
}
