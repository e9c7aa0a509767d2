use std::collections::HashMap;

use bowline::registry;
use bowline::{transform, Contract, FieldKind, HasContract};
use serde::{Deserialize, Serialize};
use serde_json::json;

#[derive(Debug, Serialize, Deserialize, Contract)]
struct Reading {
    #[contract(min = 0.0, max = 100.0)]
    level: f64,
    sensor: String,
    #[serde(rename = "ok")]
    #[contract(rename = "ok")]
    healthy: bool,
    note: Option<String>,
    samples: Vec<i32>,
    labels: HashMap<String, String>,
}

#[derive(Debug, Serialize, Deserialize, Contract)]
#[contract(name = "Envelope", open)]
struct Wrapped {
    id: u64,
}

#[transform]
fn double_level(mut reading: Reading) -> Reading {
    reading.level *= 2.0;
    reading
}

#[transform(name = "registry.parse_id")]
fn parse_id(input: serde_json::Value) -> anyhow::Result<Wrapped> {
    let id = input["id"]
        .as_str()
        .ok_or_else(|| anyhow::anyhow!("id must be a string"))?
        .parse()?;
    Ok(Wrapped { id })
}

#[test]
fn test_transforms_are_registered_by_name() {
    assert!(registry::lookup("double_level").is_some());
    assert!(registry::lookup("registry.parse_id").is_some());
    assert!(registry::lookup("parse_id").is_none());

    let names = registry::names();
    assert!(names.contains(&"double_level"));
    let mut sorted = names.clone();
    sorted.sort_unstable();
    assert_eq!(names, sorted);
    assert!(registry::duplicates().is_empty());
}

#[test]
fn test_registered_transform_is_callable() {
    let transform = registry::lookup("registry.parse_id").unwrap();
    assert_eq!(transform.call(json!({"id": "42"})).unwrap(), json!({"id": 42}));

    let err = transform.call(json!({"id": 42})).unwrap_err();
    assert_eq!(err.to_string(), "id must be a string");

    // Input that does not decode into the parameter type
    let double = registry::lookup("double_level").unwrap();
    assert!(double.call(json!({"level": "high"})).is_err());
}

#[test]
fn test_derived_contract_fields() {
    let contract = Reading::contract();
    assert_eq!(contract.name, "Reading");
    assert!(!contract.open);

    let level = contract.get("level").unwrap();
    assert_eq!(level.kind, FieldKind::Float);
    assert_eq!((level.min, level.max), (Some(0.0), Some(100.0)));

    assert_eq!(contract.get("sensor").unwrap().kind, FieldKind::String);
    assert_eq!(contract.get("ok").unwrap().kind, FieldKind::Boolean);
    assert!(contract.get("healthy").is_none());

    let note = contract.get("note").unwrap();
    assert_eq!(note.kind, FieldKind::String);
    assert!(!note.required);

    assert_eq!(contract.get("samples").unwrap().kind, FieldKind::Array);
    assert_eq!(contract.get("labels").unwrap().kind, FieldKind::Object);
}

#[test]
fn test_derived_contract_validates() {
    let contract = Reading::contract();
    let valid = json!({
        "level": 12.5,
        "sensor": "north",
        "ok": true,
        "samples": [1, 2, 3],
        "labels": {}
    });
    assert!(contract.validate(&valid).is_ok());

    let mut out_of_range = valid.clone();
    out_of_range["level"] = json!(140.0);
    let err = contract.validate(&out_of_range).unwrap_err();
    assert_eq!(err.path, "level");
}

#[test]
fn test_struct_level_attributes() {
    let contract = Wrapped::contract();
    assert_eq!(contract.name, "Envelope");
    assert!(contract.open);
    assert_eq!(contract.get("id").unwrap().kind, FieldKind::Integer);
    assert!(contract.validate(&json!({"id": 1, "extra": "fine"})).is_ok());
}
