use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Signature every registered transform is erased to
pub type TransformFn = fn(Value) -> anyhow::Result<Value>;

/// A named, top-level transformation function
///
/// Registrations are collected at link time so that a worker process can
/// resolve a transform from its name alone.
#[derive(Clone, Copy)]
pub struct Transform {
    pub name: &'static str,
    pub func: TransformFn,
}

impl Transform {
    pub const fn new(name: &'static str, func: TransformFn) -> Self {
        Self { name, func }
    }

    pub fn call(&self, input: Value) -> anyhow::Result<Value> {
        (self.func)(input)
    }
}

impl std::fmt::Debug for Transform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform").field("name", &self.name).finish()
    }
}

inventory::collect!(Transform);

/// Find a registered transform by name.
///
/// A name registered more than once resolves to the first registration
/// in link order, which is the same in a worker process re-executed from
/// this binary. The collision is logged.
pub fn lookup(name: &str) -> Option<&'static Transform> {
    let mut matches = inventory::iter::<Transform>
        .into_iter()
        .filter(|t| t.name == name);
    let found = matches.next()?;
    let shadowed = matches.count();
    if shadowed > 0 {
        warn!(transform = name, shadowed, "Transform name registered more than once");
    }
    Some(found)
}

/// Names of every registered transform, sorted and deduplicated
pub fn names() -> Vec<&'static str> {
    let mut names: Vec<_> = inventory::iter::<Transform>
        .into_iter()
        .map(|t| t.name)
        .collect();
    names.sort_unstable();
    names.dedup();
    names
}

/// Names registered by more than one transform, sorted
pub fn duplicates() -> Vec<&'static str> {
    let mut names: Vec<_> = inventory::iter::<Transform>
        .into_iter()
        .map(|t| t.name)
        .collect();
    names.sort_unstable();
    let mut duplicates: Vec<_> = names.windows(2).filter(|w| w[0] == w[1]).map(|w| w[0]).collect();
    duplicates.dedup();
    duplicates
}

/// Adapt a typed function to the erased `TransformFn` signature
pub fn call_typed<I, O, E, F>(func: F, input: Value) -> anyhow::Result<Value>
where
    I: DeserializeOwned,
    O: Serialize,
    E: Into<anyhow::Error>,
    F: FnOnce(I) -> Result<O, E>,
{
    let decoded: I = serde_json::from_value(input)?;
    let output = func(decoded).map_err(Into::into)?;
    Ok(serde_json::to_value(output)?)
}

/// Same as `call_typed` for functions that cannot fail
pub fn call_infallible<I, O, F>(func: F, input: Value) -> anyhow::Result<Value>
where
    I: DeserializeOwned,
    O: Serialize,
    F: FnOnce(I) -> O,
{
    call_typed(|i: I| Ok::<O, anyhow::Error>(func(i)), input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Deserialize)]
    struct Pair {
        x: i64,
        y: i64,
    }

    #[derive(Serialize)]
    struct Sum {
        result: i64,
    }

    fn echo(value: Value) -> anyhow::Result<Value> {
        Ok(value)
    }

    inventory::submit! {
        Transform::new("registry_test_echo", echo)
    }

    #[test]
    fn test_lookup_finds_submitted_transform() {
        let t = lookup("registry_test_echo").expect("echo not registered");
        assert_eq!(t.call(json!({"a": 1})).unwrap(), json!({"a": 1}));
        assert!(names().contains(&"registry_test_echo"));
    }

    fn shout(value: Value) -> anyhow::Result<Value> {
        Ok(json!({"shouted": value}))
    }

    inventory::submit! {
        Transform::new("registry_test_twice", echo)
    }

    inventory::submit! {
        Transform::new("registry_test_twice", shout)
    }

    #[test]
    fn test_repeated_name_is_detected() {
        assert_eq!(duplicates(), vec!["registry_test_twice"]);
        assert_eq!(names().iter().filter(|n| **n == "registry_test_twice").count(), 1);

        let first = lookup("registry_test_twice").unwrap();
        let again = lookup("registry_test_twice").unwrap();
        assert_eq!(first.func as usize, again.func as usize);
    }

    #[test]
    fn test_lookup_unknown_is_none() {
        assert!(lookup("definitely_not_registered").is_none());
    }

    #[test]
    fn test_call_typed_round_trip() {
        let out = call_typed(
            |p: Pair| Ok::<_, anyhow::Error>(Sum { result: p.x + p.y }),
            json!({"x": 3, "y": 4}),
        )
        .unwrap();
        assert_eq!(out, json!({"result": 7}));
    }

    #[test]
    fn test_call_typed_reports_decode_error() {
        let err = call_infallible(|p: Pair| Sum { result: p.x + p.y }, json!({"x": "3"}));
        assert!(err.is_err());
    }
}
