//! Output schemas: the JSON contract an agent result must satisfy.
//!
//! A deliberately small JSON-Schema subset: `type`, `properties`, `required`,
//! `enum`, `items`, `minimum` and `maximum`. Properties not listed in the
//! schema are always accepted.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{ProcflowError, Result, SchemaViolation};

/// JSON type names understood by [`OutputSchema`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    Object,
    Array,
    String,
    Number,
    Integer,
    Boolean,
    Null,
}

impl SchemaType {
    fn name(self) -> &'static str {
        match self {
            Self::Object => "object",
            Self::Array => "array",
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }

    fn accepts(self, value: &Value) -> bool {
        match self {
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Integer => {
                value.is_i64()
                    || value.is_u64()
                    || value.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            Self::Boolean => value.is_boolean(),
            Self::Null => value.is_null(),
        }
    }
}

/// Declared shape of a task result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSchema {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub schema_type: Option<SchemaType>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, OutputSchema>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub required: Vec<String>,

    #[serde(rename = "enum", default, skip_serializing_if = "Option::is_none")]
    pub allowed: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub items: Option<Box<OutputSchema>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl OutputSchema {
    /// Schema that accepts any value.
    pub fn any() -> Self {
        Self::default()
    }

    pub fn of_type(schema_type: SchemaType) -> Self {
        Self {
            schema_type: Some(schema_type),
            ..Self::default()
        }
    }

    pub fn object() -> Self {
        Self::of_type(SchemaType::Object)
    }

    pub fn string() -> Self {
        Self::of_type(SchemaType::String)
    }

    pub fn number() -> Self {
        Self::of_type(SchemaType::Number)
    }

    pub fn integer() -> Self {
        Self::of_type(SchemaType::Integer)
    }

    pub fn boolean() -> Self {
        Self::of_type(SchemaType::Boolean)
    }

    pub fn array(items: OutputSchema) -> Self {
        Self {
            schema_type: Some(SchemaType::Array),
            items: Some(Box::new(items)),
            ..Self::default()
        }
    }

    /// Add an optional property (builder pattern).
    pub fn property(mut self, name: impl Into<String>, schema: OutputSchema) -> Self {
        self.properties.insert(name.into(), schema);
        self
    }

    /// Add a property and mark it required (builder pattern).
    pub fn required_property(mut self, name: impl Into<String>, schema: OutputSchema) -> Self {
        let name = name.into();
        if !self.required.contains(&name) {
            self.required.push(name.clone());
        }
        self.properties.insert(name, schema);
        self
    }

    /// Restrict the value to a fixed set (builder pattern).
    pub fn one_of<I, V>(mut self, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.allowed = Some(values.into_iter().map(Into::into).collect());
        self
    }

    /// Inclusive numeric bounds (builder pattern).
    pub fn range(mut self, minimum: Option<f64>, maximum: Option<f64>) -> Self {
        self.minimum = minimum;
        self.maximum = maximum;
        self
    }

    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Collect every violation of this schema in `value`.
    pub fn validate(&self, value: &Value) -> Vec<SchemaViolation> {
        let mut violations = Vec::new();
        self.check_at("$", value, &mut violations);
        violations
    }

    /// Validate a result of `task`, failing with `SchemaValidation`.
    pub fn check(&self, task: &str, value: &Value) -> Result<()> {
        let violations = self.validate(value);
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ProcflowError::SchemaValidation {
                task: task.to_string(),
                violations,
            })
        }
    }

    fn check_at(&self, path: &str, value: &Value, out: &mut Vec<SchemaViolation>) {
        if let Some(ty) = self.schema_type {
            if !ty.accepts(value) {
                out.push(SchemaViolation {
                    path: path.to_string(),
                    expected: ty.name().to_string(),
                    actual: shape_of(value),
                });
                // Nested checks on a value of the wrong type only add noise.
                return;
            }
        }

        if let Some(allowed) = &self.allowed {
            if !allowed.contains(value) {
                out.push(SchemaViolation {
                    path: path.to_string(),
                    expected: format!("one of {}", Value::Array(allowed.clone())),
                    actual: value.to_string(),
                });
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.minimum.filter(|min| n < *min) {
                out.push(SchemaViolation {
                    path: path.to_string(),
                    expected: format!(">= {min}"),
                    actual: value.to_string(),
                });
            }
            if let Some(max) = self.maximum.filter(|max| n > *max) {
                out.push(SchemaViolation {
                    path: path.to_string(),
                    expected: format!("<= {max}"),
                    actual: value.to_string(),
                });
            }
        }

        if let Some(obj) = value.as_object() {
            for name in &self.required {
                let present = obj.get(name).is_some_and(|v| !v.is_null());
                if !present {
                    let expected = self
                        .properties
                        .get(name)
                        .and_then(|s| s.schema_type)
                        .map(|t| t.name())
                        .unwrap_or("a value");
                    out.push(SchemaViolation {
                        path: format!("{path}.{name}"),
                        expected: expected.to_string(),
                        actual: "missing".to_string(),
                    });
                }
            }
            for (name, schema) in &self.properties {
                match obj.get(name) {
                    // Absent or null optional fields are not checked further.
                    None | Some(Value::Null) => {}
                    Some(child) => schema.check_at(&format!("{path}.{name}"), child, out),
                }
            }
        }

        if let (Some(items), Some(arr)) = (&self.items, value.as_array()) {
            for (i, item) in arr.iter().enumerate() {
                items.check_at(&format!("{path}[{i}]"), item, out);
            }
        }
    }
}

/// Short description of a value's JSON shape for error messages.
fn shape_of(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(_) => "array".to_string(),
        Value::Object(_) => "object".to_string(),
    }
}
