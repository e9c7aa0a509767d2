use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::ValidationError;

/// Runtime type of a single contract field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Any,
    Boolean,
    Integer,
    Float,
    String,
    Array,
    Object,
}

impl FieldKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Any => "any",
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Float => "float",
            Self::String => "string",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    /// Check whether a JSON value has this kind.
    /// Floats accept any JSON number, integers only whole numbers.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            Self::Any => true,
            Self::Boolean => value.is_boolean(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Float => value.is_number(),
            Self::String => value.is_string(),
            Self::Array => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// Whether a producer of `upstream` always satisfies a consumer of `self`
    pub fn accepts(&self, upstream: &FieldKind) -> bool {
        match (self, upstream) {
            (Self::Any, _) | (_, Self::Any) => true,
            (Self::Float, Self::Integer) => true,
            (a, b) => a == b,
        }
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Self::Integer | Self::Float)
    }
}

/// One named field of a contract
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    #[serde(default = "default_required")]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

fn default_required() -> bool {
    true
}

/// Declared shape of a processor's input or output
///
/// A contract with no fields and `open` set is the `any` contract and accepts
/// every value. Otherwise values must be JSON objects whose fields satisfy the
/// declared kinds and bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Contract {
    pub name: String,
    #[serde(default)]
    pub fields: Vec<FieldSpec>,
    /// Allow fields that are not declared
    #[serde(default)]
    pub open: bool,
}

impl Contract {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            open: false,
        }
    }

    pub fn any() -> Self {
        Self {
            name: "any".to_string(),
            fields: Vec::new(),
            open: true,
        }
    }

    pub fn is_any(&self) -> bool {
        self.open && self.fields.is_empty()
    }

    pub fn field(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
            min: None,
            max: None,
        });
        self
    }

    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: false,
            min: None,
            max: None,
        });
        self
    }

    /// Add a required numeric field with inclusive bounds
    pub fn bounded(
        mut self,
        name: impl Into<String>,
        kind: FieldKind,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Self {
        self.fields.push(FieldSpec {
            name: name.into(),
            kind,
            required: true,
            min,
            max,
        });
        self
    }

    pub fn open(mut self) -> Self {
        self.open = true;
        self
    }

    pub fn with_field(mut self, spec: FieldSpec) -> Self {
        self.fields.push(spec);
        self
    }

    pub fn get(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Check a candidate value against this contract
    pub fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        if self.is_any() {
            return Ok(());
        }

        let object = value.as_object().ok_or_else(|| {
            ValidationError::new(
                &self.name,
                "$",
                format!("expected an object, got {}", json_kind(value)),
            )
        })?;

        for spec in &self.fields {
            match object.get(&spec.name) {
                None | Some(Value::Null) if spec.required => {
                    return Err(ValidationError::new(
                        &self.name,
                        &spec.name,
                        "missing required field",
                    ));
                }
                None | Some(Value::Null) => {}
                Some(field) => {
                    if !spec.kind.matches(field) {
                        return Err(ValidationError::new(
                            &self.name,
                            &spec.name,
                            format!("expected {}, got {}", spec.kind.name(), json_kind(field)),
                        ));
                    }
                    check_bounds(&self.name, spec, field)?;
                }
            }
        }

        if !self.open {
            if let Some(unknown) = object.keys().find(|k| self.get(k).is_none()) {
                return Err(ValidationError::new(
                    &self.name,
                    unknown,
                    "field is not declared by the contract",
                ));
            }
        }

        Ok(())
    }

    /// Structural compatibility of an edge whose source produces `upstream`
    /// and whose destination consumes `self`.
    pub fn accepts(&self, upstream: &Contract) -> Result<(), String> {
        if self.is_any() || upstream.is_any() {
            return Ok(());
        }

        for spec in self.fields.iter().filter(|f| f.required) {
            match upstream.get(&spec.name) {
                None if upstream.open => {}
                None => {
                    return Err(format!(
                        "`{}` requires field `{}` which `{}` does not produce",
                        self.name, spec.name, upstream.name
                    ));
                }
                Some(produced) => {
                    if !spec.kind.accepts(&produced.kind) {
                        return Err(format!(
                            "field `{}` is {} in `{}` but {} in `{}`",
                            spec.name,
                            produced.kind.name(),
                            upstream.name,
                            spec.kind.name(),
                            self.name
                        ));
                    }
                }
            }
        }

        if !self.open {
            if let Some(extra) = upstream.fields.iter().find(|f| self.get(&f.name).is_none()) {
                return Err(format!(
                    "`{}` produces field `{}` which `{}` does not declare",
                    upstream.name, extra.name, self.name
                ));
            }
        }

        Ok(())
    }
}

impl Default for Contract {
    fn default() -> Self {
        Self::any()
    }
}

fn check_bounds(contract: &str, spec: &FieldSpec, value: &Value) -> Result<(), ValidationError> {
    if !spec.kind.is_numeric() {
        return Ok(());
    }
    let Some(n) = value.as_f64() else {
        return Ok(());
    };
    if let Some(min) = spec.min {
        if n < min {
            return Err(ValidationError::new(
                contract,
                &spec.name,
                format!("{} is below the minimum {}", n, min),
            ));
        }
    }
    if let Some(max) = spec.max {
        if n > max {
            return Err(ValidationError::new(
                contract,
                &spec.name,
                format!("{} is above the maximum {}", n, max),
            ));
        }
    }
    Ok(())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Opaque pass/fail validation boundary
pub trait ShapeValidator: Send + Sync {
    fn validate(&self, value: &Value) -> Result<(), ValidationError>;
}

impl ShapeValidator for Contract {
    fn validate(&self, value: &Value) -> Result<(), ValidationError> {
        Contract::validate(self, value)
    }
}

/// Types that describe their own contract, usually via `#[derive(Contract)]`
pub trait HasContract {
    fn contract() -> Contract;
}

impl HasContract for Value {
    fn contract() -> Contract {
        Contract::any()
    }
}
