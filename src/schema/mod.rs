//! Parameter schemas for tool and prompt arguments.
//!
//! A [`Schema`] is a tree of typed nodes parsed from the JSON Schema subset
//! used by tool declarations: `type`, `enum`, `pattern`, `minimum`,
//! `maximum`, `default`, `properties`, `required`, `items` and
//! `additionalProperties`. Other keywords are accepted and ignored.
//!
//! Validation is purely structural. It walks the supplied value alongside
//! the schema and returns either a normalised copy (defaults filled in,
//! integral floats coerced to integers) or the first [`ValidationError`],
//! which names the offending field path and the violated constraint.
//!
//! Objects are closed: a field that is not declared is rejected unless the
//! node sets `"additionalProperties": true`. Numeric bounds are inclusive.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Primitive type of a schema node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaType {
    /// UTF-8 string.
    String,
    /// Any JSON number.
    Number,
    /// Whole number (integral floats are coerced).
    Integer,
    /// `true` or `false`.
    Boolean,
    /// Sequence, optionally with a uniform item schema.
    Array,
    /// Map with declared properties.
    Object,
}

impl SchemaType {
    /// Returns the JSON Schema keyword for this type.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Array => "array",
            Self::Object => "object",
        }
    }

    const fn is_numeric(self) -> bool {
        matches!(self, Self::Number | Self::Integer)
    }
}

/// Errors raised while parsing a schema declaration.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// The declaration is not shaped like a schema node.
    #[error("malformed schema: {0}")]
    Malformed(#[from] serde_json::Error),

    /// A node is well-formed JSON but semantically inconsistent.
    #[error("invalid schema at {}: {message}", node_label(.path))]
    Invalid {
        /// Dotted path of the offending node.
        path: String,
        /// What is wrong with it.
        message: String,
    },
}

/// The constraint a supplied value violated.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Violation {
    /// A required field was not supplied.
    #[error("missing required field")]
    MissingRequired,

    /// The value has the wrong JSON type.
    #[error("expected {expected}, found {found}")]
    TypeMismatch {
        /// Declared type.
        expected: &'static str,
        /// Supplied type.
        found: &'static str,
    },

    /// The value is not one of the declared alternatives.
    #[error("value must be one of {allowed}")]
    NotInEnum {
        /// The allowed values, rendered as JSON.
        allowed: String,
    },

    /// The string does not match the declared pattern.
    #[error("value does not match pattern '{pattern}'")]
    PatternMismatch {
        /// The declared pattern.
        pattern: String,
    },

    /// The number is smaller than the declared minimum.
    #[error("value {value} is below minimum {minimum}")]
    BelowMinimum {
        /// Supplied value.
        value: f64,
        /// Inclusive lower bound.
        minimum: f64,
    },

    /// The number is larger than the declared maximum.
    #[error("value {value} is above maximum {maximum}")]
    AboveMaximum {
        /// Supplied value.
        value: f64,
        /// Inclusive upper bound.
        maximum: f64,
    },

    /// The field is not declared by a closed object schema.
    #[error("unknown field")]
    UnknownField,
}

impl Violation {
    /// Stable machine-readable name of the violated constraint.
    #[must_use]
    pub const fn constraint(&self) -> &'static str {
        match self {
            Self::MissingRequired => "required",
            Self::TypeMismatch { .. } => "type",
            Self::NotInEnum { .. } => "enum",
            Self::PatternMismatch { .. } => "pattern",
            Self::BelowMinimum { .. } => "minimum",
            Self::AboveMaximum { .. } => "maximum",
            Self::UnknownField => "additionalProperties",
        }
    }
}

/// A field-level validation failure.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{}: {violation}", field_label(.field))]
pub struct ValidationError {
    /// Dotted path to the field (`a.b`, `items[2]`); empty for the root.
    pub field: String,
    /// The violated constraint.
    pub violation: Violation,
}

impl ValidationError {
    fn new(field: &str, violation: Violation) -> Self {
        Self {
            field: field.to_string(),
            violation,
        }
    }
}

fn field_label(path: &str) -> String {
    if path.is_empty() {
        "arguments".to_string()
    } else {
        format!("field '{path}'")
    }
}

fn node_label(path: &str) -> String {
    if path.is_empty() {
        "root".to_string()
    } else {
        format!("'{path}'")
    }
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{parent}.{name}")
    }
}

/// One node of a parameter schema tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Schema {
    #[serde(rename = "type")]
    kind: SchemaType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,

    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    allowed: Option<Vec<Value>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    minimum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    maximum: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    default: Option<Value>,

    #[serde(default, skip_serializing_if = "IndexMap::is_empty")]
    properties: IndexMap<String, Schema>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    required: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    items: Option<Box<Schema>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    additional_properties: Option<bool>,

    #[serde(skip)]
    compiled: Option<Regex>,
}

impl Schema {
    /// Creates a bare node of the given type.
    #[must_use]
    pub fn new(kind: SchemaType) -> Self {
        Self {
            kind,
            description: None,
            allowed: None,
            pattern: None,
            minimum: None,
            maximum: None,
            default: None,
            properties: IndexMap::new(),
            required: Vec::new(),
            items: None,
            additional_properties: None,
            compiled: None,
        }
    }

    /// Creates a closed object schema with no properties.
    #[must_use]
    pub fn empty_object() -> Self {
        Self::new(SchemaType::Object)
    }

    /// Sets the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the default applied when the field is omitted.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Assembles an object node from already-built property nodes.
    ///
    /// # Errors
    ///
    /// Returns an error if a required name is not a declared property or a
    /// property node is inconsistent.
    pub fn object(
        properties: IndexMap<String, Self>,
        required: Vec<String>,
    ) -> Result<Self, SchemaError> {
        let mut schema = Self::new(SchemaType::Object);
        schema.properties = properties;
        schema.required = required;
        schema.prepare("")?;
        Ok(schema)
    }

    /// Parses and checks a schema declaration.
    ///
    /// # Errors
    ///
    /// Returns an error if the value is not a schema node, a pattern does
    /// not compile, bounds are inverted, a keyword is used on a type it
    /// does not apply to, or a default does not satisfy its own node.
    pub fn from_value(value: Value) -> Result<Self, SchemaError> {
        let mut schema: Self = serde_json::from_value(value)?;
        schema.prepare("")?;
        Ok(schema)
    }

    /// Serialises the schema back to its JSON declaration.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Declared type of this node.
    #[must_use]
    pub const fn kind(&self) -> SchemaType {
        self.kind
    }

    /// Declared properties (object nodes only), in declaration order.
    #[must_use]
    pub const fn properties(&self) -> &IndexMap<String, Self> {
        &self.properties
    }

    /// Returns `true` if `name` is listed as required.
    #[must_use]
    pub fn is_required(&self, name: &str) -> bool {
        self.required.iter().any(|r| r == name)
    }

    /// Node description, if any.
    #[must_use]
    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    fn prepare(&mut self, path: &str) -> Result<(), SchemaError> {
        let invalid = |message: String| SchemaError::Invalid {
            path: path.to_string(),
            message,
        };

        if let Some(pattern) = &self.pattern {
            if self.kind != SchemaType::String {
                return Err(invalid("pattern only applies to strings".to_string()));
            }
            let regex = Regex::new(pattern)
                .map_err(|e| invalid(format!("pattern does not compile: {e}")))?;
            self.compiled = Some(regex);
        }

        if (self.minimum.is_some() || self.maximum.is_some()) && !self.kind.is_numeric() {
            return Err(invalid("numeric bounds only apply to numbers".to_string()));
        }
        if let (Some(min), Some(max)) = (self.minimum, self.maximum) {
            if min > max {
                return Err(invalid(format!("minimum {min} exceeds maximum {max}")));
            }
        }

        if matches!(&self.allowed, Some(values) if values.is_empty()) {
            return Err(invalid("enum must list at least one value".to_string()));
        }

        if self.kind != SchemaType::Object
            && (!self.properties.is_empty() || !self.required.is_empty())
        {
            return Err(invalid("properties only apply to objects".to_string()));
        }
        if self.kind != SchemaType::Array && self.items.is_some() {
            return Err(invalid("items only applies to arrays".to_string()));
        }

        for name in &self.required {
            if !self.properties.contains_key(name) {
                return Err(invalid(format!("required field '{name}' is not declared")));
            }
        }

        for (name, property) in &mut self.properties {
            property.prepare(&child_path(path, name))?;
        }
        if let Some(items) = &mut self.items {
            items.prepare(&format!("{path}[]"))?;
        }

        if let Some(default) = &self.default {
            if let Err(e) = self.check(default, path) {
                return Err(invalid(format!("default does not satisfy schema: {e}")));
            }
        }

        Ok(())
    }

    /// Validates supplied arguments and returns the normalised value.
    ///
    /// A `null` argument set is treated as an empty object when this node
    /// is an object, so callers may omit `arguments` entirely.
    ///
    /// # Errors
    ///
    /// Returns the first field-level violation found.
    pub fn validate(&self, arguments: &Value) -> Result<Value, ValidationError> {
        if arguments.is_null() && self.kind == SchemaType::Object {
            return self.check(&Value::Object(Map::new()), "");
        }
        self.check(arguments, "")
    }

    fn check(&self, value: &Value, path: &str) -> Result<Value, ValidationError> {
        let value = self.check_type(value, path)?;

        if let Some(allowed) = &self.allowed {
            if !allowed.iter().any(|a| values_equal(a, &value)) {
                let rendered = serde_json::to_string(allowed).unwrap_or_default();
                return Err(ValidationError::new(
                    path,
                    Violation::NotInEnum { allowed: rendered },
                ));
            }
        }

        match &value {
            Value::String(s) => {
                if let (Some(regex), Some(pattern)) = (&self.compiled, &self.pattern) {
                    if !regex.is_match(s) {
                        return Err(ValidationError::new(
                            path,
                            Violation::PatternMismatch {
                                pattern: pattern.clone(),
                            },
                        ));
                    }
                }
                Ok(value)
            }
            Value::Number(n) => {
                let number = n.as_f64().unwrap_or(f64::NAN);
                if let Some(minimum) = self.minimum {
                    if number < minimum {
                        return Err(ValidationError::new(
                            path,
                            Violation::BelowMinimum {
                                value: number,
                                minimum,
                            },
                        ));
                    }
                }
                if let Some(maximum) = self.maximum {
                    if number > maximum {
                        return Err(ValidationError::new(
                            path,
                            Violation::AboveMaximum {
                                value: number,
                                maximum,
                            },
                        ));
                    }
                }
                Ok(value)
            }
            Value::Array(items) => match &self.items {
                Some(item_schema) => items
                    .iter()
                    .enumerate()
                    .map(|(i, item)| item_schema.check(item, &format!("{path}[{i}]")))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Value::Array),
                None => Ok(value),
            },
            Value::Object(fields) => self.check_object(fields, path).map(Value::Object),
            Value::Bool(_) | Value::Null => Ok(value),
        }
    }

    fn check_type(&self, value: &Value, path: &str) -> Result<Value, ValidationError> {
        let ok = match self.kind {
            SchemaType::String => value.is_string(),
            SchemaType::Number => value.is_number(),
            SchemaType::Boolean => value.is_boolean(),
            SchemaType::Array => value.is_array(),
            SchemaType::Object => value.is_object(),
            SchemaType::Integer => {
                if value.is_i64() || value.is_u64() {
                    true
                } else if let Some(coerced) = value.as_f64().and_then(integral) {
                    return Ok(Value::from(coerced));
                } else {
                    false
                }
            }
        };

        if ok {
            Ok(value.clone())
        } else {
            Err(ValidationError::new(
                path,
                Violation::TypeMismatch {
                    expected: self.kind.as_str(),
                    found: json_type_name(value),
                },
            ))
        }
    }

    fn check_object(
        &self,
        fields: &Map<String, Value>,
        path: &str,
    ) -> Result<Map<String, Value>, ValidationError> {
        for name in &self.required {
            if !fields.contains_key(name) {
                return Err(ValidationError::new(
                    &child_path(path, name),
                    Violation::MissingRequired,
                ));
            }
        }

        let open = self.additional_properties == Some(true);
        if !open {
            if let Some(unknown) = fields.keys().find(|k| !self.properties.contains_key(*k)) {
                return Err(ValidationError::new(
                    &child_path(path, unknown),
                    Violation::UnknownField,
                ));
            }
        }

        let mut normalised = Map::new();
        for (name, property) in &self.properties {
            match fields.get(name) {
                Some(value) => {
                    let checked = property.check(value, &child_path(path, name))?;
                    normalised.insert(name.clone(), checked);
                }
                None => {
                    if let Some(default) = &property.default {
                        normalised.insert(name.clone(), default.clone());
                    }
                }
            }
        }
        if open {
            for (name, value) in fields {
                if !self.properties.contains_key(name) {
                    normalised.insert(name.clone(), value.clone());
                }
            }
        }

        Ok(normalised)
    }
}

/// Returns the integer a float represents exactly, if it does.
#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn integral(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 9_007_199_254_740_992.0 {
        Some(value as i64)
    } else {
        None
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Name of a value's JSON type as used in validation messages.
#[must_use]
pub fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_i64() || n.is_u64() => "integer",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
