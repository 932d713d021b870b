// src/protocol/schema.rs

//! Declarative parameter schemas and validation.
//!
//! A [`ParamSchema`] lists the fields a protocol accepts. Validation never
//! stops at the first problem: every offending field is reported with the
//! constraint it violated, so a caller can render one corrective message per
//! form field.

use std::collections::BTreeMap;
use std::fmt;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::errors::{LabqueueError, Result};
use crate::protocol::value::{ParamMap, Value};

/// Accepted type of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    Integer,
    Number,
    String,
    Boolean,
    List,
    Map,
}

impl ParamKind {
    fn accepts(self, value: &Value) -> bool {
        matches!(
            (self, value),
            (ParamKind::Integer, Value::Integer(_))
                | (ParamKind::Number, Value::Integer(_) | Value::Number(_))
                | (ParamKind::String, Value::String(_))
                | (ParamKind::Boolean, Value::Bool(_))
                | (ParamKind::List, Value::List(_))
                | (ParamKind::Map, Value::Map(_))
        )
    }

    fn name(self) -> &'static str {
        match self {
            ParamKind::Integer => "integer",
            ParamKind::Number => "number",
            ParamKind::String => "string",
            ParamKind::Boolean => "boolean",
            ParamKind::List => "list",
            ParamKind::Map => "map",
        }
    }
}

/// One accepted parameter.
///
/// `min`/`max` bound the value of numbers and the length of strings and lists.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamField {
    pub name: String,

    #[serde(rename = "type")]
    pub kind: ParamKind,

    /// Defaults to `true` unless a `default` is given.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub required: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub choices: Option<Vec<Value>>,

    /// Regex the whole string value must match (strings only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ParamField {
    pub fn new(name: impl Into<String>, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: None,
            default: None,
            min: None,
            max: None,
            choices: None,
            pattern: None,
            description: None,
        }
    }

    pub fn is_required(&self) -> bool {
        self.required.unwrap_or(self.default.is_none())
    }
}

/// Machine-readable name of the violated constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Constraint {
    Required,
    Type,
    Min,
    Max,
    Choices,
    Pattern,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub constraint: Constraint,
    pub message: String,
}

/// All field errors found while validating one parameter payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationErrors {
    pub errors: Vec<FieldError>,
}

impl ValidationErrors {
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.errors.iter().map(|e| e.field.as_str())
    }

    pub fn for_field(&self, field: &str) -> Option<&FieldError> {
        self.errors.iter().find(|e| e.field == field)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.errors.iter().enumerate() {
            if i > 0 {
                f.write_str("; ")?;
            }
            write!(f, "{}: {}", err.field, err.message)?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationErrors {}

/// Parameters that passed validation, with defaults filled in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidatedParams(ParamMap);

impl ValidatedParams {
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }

    pub fn as_map(&self) -> &ParamMap {
        &self.0
    }

    pub fn into_inner(self) -> ParamMap {
        self.0
    }
}

/// Parameter schema for one protocol, with its regex patterns pre-compiled.
#[derive(Debug, Clone, Default)]
pub struct ParamSchema {
    fields: Vec<ParamField>,
    patterns: BTreeMap<String, Regex>,
}

impl ParamSchema {
    /// Build a schema, rejecting duplicate names and invalid patterns.
    pub fn new(fields: Vec<ParamField>) -> Result<Self> {
        let mut patterns = BTreeMap::new();

        for (i, field) in fields.iter().enumerate() {
            if fields[..i].iter().any(|f| f.name == field.name) {
                return Err(LabqueueError::ConfigError(format!(
                    "parameter '{}' is declared more than once",
                    field.name
                )));
            }

            let bounds = [field.min, field.max];
            if bounds.iter().flatten().any(|b| !b.is_finite()) {
                return Err(LabqueueError::ConfigError(format!(
                    "parameter '{}' has a non-finite min or max",
                    field.name
                )));
            }

            if let Some(ref pattern) = field.pattern {
                if field.kind != ParamKind::String {
                    return Err(LabqueueError::ConfigError(format!(
                        "parameter '{}' has a pattern but is not a string",
                        field.name
                    )));
                }
                let anchored = format!("^(?:{pattern})$");
                let re = Regex::new(&anchored).map_err(|e| {
                    LabqueueError::ConfigError(format!(
                        "parameter '{}' has invalid pattern '{}': {}",
                        field.name, pattern, e
                    ))
                })?;
                patterns.insert(field.name.clone(), re);
            }
        }

        Ok(Self { fields, patterns })
    }

    /// A schema that accepts no parameters at all.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn fields(&self) -> &[ParamField] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&ParamField> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// Validate a raw payload against this schema.
    pub fn validate(&self, raw: &ParamMap) -> std::result::Result<ValidatedParams, ValidationErrors> {
        let mut errors = Vec::new();
        let mut validated = ParamMap::new();

        for name in raw.keys() {
            if self.field(name).is_none() {
                errors.push(FieldError {
                    field: name.clone(),
                    constraint: Constraint::Unknown,
                    message: "unknown parameter".to_string(),
                });
            }
        }

        for field in &self.fields {
            let value = match raw.get(&field.name).or(field.default.as_ref()) {
                Some(v) => v,
                None => {
                    if field.is_required() {
                        errors.push(FieldError {
                            field: field.name.clone(),
                            constraint: Constraint::Required,
                            message: "parameter is required".to_string(),
                        });
                    }
                    continue;
                }
            };

            let field_errors = self.check_value(field, value);
            if field_errors.is_empty() {
                validated.insert(field.name.clone(), coerce(field.kind, value));
            } else {
                errors.extend(field_errors);
            }
        }

        if errors.is_empty() {
            Ok(ValidatedParams(validated))
        } else {
            Err(ValidationErrors { errors })
        }
    }

    /// Check every declared default against its own field's constraints.
    pub fn validate_defaults(&self) -> std::result::Result<(), ValidationErrors> {
        let errors: Vec<FieldError> = self
            .fields
            .iter()
            .filter_map(|f| f.default.as_ref().map(|d| self.check_value(f, d)))
            .flatten()
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationErrors { errors })
        }
    }

    fn check_value(&self, field: &ParamField, value: &Value) -> Vec<FieldError> {
        let mut errors = Vec::new();
        let err = |constraint, message: String| FieldError {
            field: field.name.clone(),
            constraint,
            message,
        };

        if !field.kind.accepts(value) {
            errors.push(err(
                Constraint::Type,
                format!("expected {}, got {}", field.kind.name(), value.kind_name()),
            ));
            return errors;
        }
        if !value.is_finite() {
            errors.push(err(
                Constraint::Type,
                "numbers must be finite (no NaN or infinity)".to_string(),
            ));
            return errors;
        }

        let measured = match value {
            Value::Integer(_) | Value::Number(_) => value.as_f64(),
            Value::String(s) => Some(s.chars().count() as f64),
            Value::List(items) => Some(items.len() as f64),
            Value::Bool(_) | Value::Map(_) => None,
        };
        let what = match value {
            Value::String(_) | Value::List(_) => "length",
            _ => "value",
        };

        if let (Some(m), Some(min)) = (measured, field.min) {
            if m < min {
                errors.push(err(Constraint::Min, format!("{what} {m} is below minimum {min}")));
            }
        }
        if let (Some(m), Some(max)) = (measured, field.max) {
            if m > max {
                errors.push(err(Constraint::Max, format!("{what} {m} is above maximum {max}")));
            }
        }

        if let Some(ref choices) = field.choices {
            let coerced = coerce(field.kind, value);
            if !choices.iter().any(|c| coerce(field.kind, c) == coerced) {
                errors.push(err(
                    Constraint::Choices,
                    format!("{value} is not one of the allowed choices"),
                ));
            }
        }

        if let (Some(re), Value::String(s)) = (self.patterns.get(&field.name), value) {
            if !re.is_match(s) {
                let pattern = field.pattern.as_deref().unwrap_or_default();
                errors.push(err(
                    Constraint::Pattern,
                    format!("'{s}' does not match pattern '{pattern}'"),
                ));
            }
        }

        errors
    }
}

/// Normalise a value to the field's declared type (integers given for a
/// `number` field become numbers).
fn coerce(kind: ParamKind, value: &Value) -> Value {
    match (kind, value) {
        (ParamKind::Number, Value::Integer(i)) => Value::Number(*i as f64),
        _ => value.clone(),
    }
}
