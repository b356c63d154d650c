use crate::error::{DocuDbError, Result};
use crate::ident::DocumentId;
use serde_json::Value;
use std::collections::BTreeMap;

/// A composable description of an accepted value shape.
///
/// Validators are pure descriptions: validating never mutates shared state,
/// and one instance can check any number of values. Object validators are
/// closed: fields not declared are rejected, missing optional fields are
/// permitted.
#[derive(Debug, Clone, PartialEq)]
pub enum Validator {
    /// Any JSON string.
    String,
    /// Any JSON number (integer or float).
    Number,
    /// `true` or `false`.
    Boolean,
    /// A document id string branded with the given table name.
    Id(std::string::String),
    /// Absence is permitted; a present value is checked by the inner
    /// validator. `null` is only accepted if the inner validator accepts it.
    Optional(Box<Validator>),
    /// A sequence whose elements all satisfy the inner validator.
    Array(Box<Validator>),
    /// A closed set of named fields.
    Object(BTreeMap<std::string::String, Validator>),
    /// Satisfied when any branch is satisfied.
    Union(Vec<Validator>),
    /// Exactly one JSON value.
    Literal(Value),
    /// An object with arbitrary string keys whose values all satisfy the
    /// inner validator.
    Record(Box<Validator>),
    /// Accepts everything, including `null`.
    Any,
}

/// An internal validation failure with the path to the offending value.
struct Invalid {
    path: Vec<std::string::String>,
    message: std::string::String,
}

impl Invalid {
    fn new(path: &[std::string::String], message: impl Into<std::string::String>) -> Self {
        Invalid {
            path: path.to_vec(),
            message: message.into(),
        }
    }

    fn into_error(self) -> DocuDbError {
        let mut rendered = std::string::String::from("$");
        for segment in &self.path {
            rendered.push('.');
            rendered.push_str(segment);
        }
        DocuDbError::validation(rendered, self.message)
    }
}

impl Validator {
    // ── Constructors ────────────────────────────────────────────────

    pub fn string() -> Self {
        Validator::String
    }

    pub fn number() -> Self {
        Validator::Number
    }

    pub fn boolean() -> Self {
        Validator::Boolean
    }

    pub fn id(table: impl Into<std::string::String>) -> Self {
        Validator::Id(table.into())
    }

    pub fn optional(inner: Validator) -> Self {
        Validator::Optional(Box::new(inner))
    }

    pub fn array(of: Validator) -> Self {
        Validator::Array(Box::new(of))
    }

    pub fn object<K, I>(fields: I) -> Self
    where
        K: Into<std::string::String>,
        I: IntoIterator<Item = (K, Validator)>,
    {
        Validator::Object(
            fields
                .into_iter()
                .map(|(name, validator)| (name.into(), validator))
                .collect(),
        )
    }

    pub fn union(branches: Vec<Validator>) -> Self {
        Validator::Union(branches)
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Validator::Literal(value.into())
    }

    pub fn record(values: Validator) -> Self {
        Validator::Record(Box::new(values))
    }

    pub fn any() -> Self {
        Validator::Any
    }

    // ── Validation ──────────────────────────────────────────────────

    /// Check `value` against this validator. Returns a `Validation` error
    /// carrying the offending field path on failure.
    pub fn validate(&self, value: &Value) -> Result<()> {
        self.check(value, &[]).map_err(Invalid::into_error)
    }

    /// Whether a field described by this validator may be absent entirely.
    pub fn accepts_missing(&self) -> bool {
        matches!(self, Validator::Optional(_))
    }

    fn check(
        &self,
        value: &Value,
        path: &[std::string::String],
    ) -> std::result::Result<(), Invalid> {
        match self {
            Validator::String => {
                if value.is_string() {
                    Ok(())
                } else {
                    Err(Invalid::new(
                        path,
                        format!("expected string, got {}", type_name(value)),
                    ))
                }
            }
            Validator::Number => {
                if value.is_number() {
                    Ok(())
                } else {
                    Err(Invalid::new(
                        path,
                        format!("expected number, got {}", type_name(value)),
                    ))
                }
            }
            Validator::Boolean => {
                if value.is_boolean() {
                    Ok(())
                } else {
                    Err(Invalid::new(
                        path,
                        format!("expected boolean, got {}", type_name(value)),
                    ))
                }
            }
            Validator::Id(table) => {
                let s = value.as_str().ok_or_else(|| {
                    Invalid::new(
                        path,
                        format!("expected id for table '{table}', got {}", type_name(value)),
                    )
                })?;
                let id = DocumentId::parse(s).map_err(|e| Invalid::new(path, e.to_string()))?;
                if id.table() == table {
                    Ok(())
                } else {
                    Err(Invalid::new(
                        path,
                        format!(
                            "expected id for table '{table}', got one for '{}'",
                            id.table()
                        ),
                    ))
                }
            }
            Validator::Optional(inner) => inner.check(value, path),
            Validator::Array(of) => {
                let items = value.as_array().ok_or_else(|| {
                    Invalid::new(path, format!("expected array, got {}", type_name(value)))
                })?;
                for (index, item) in items.iter().enumerate() {
                    let mut child = path.to_vec();
                    child.push(index.to_string());
                    of.check(item, &child)?;
                }
                Ok(())
            }
            Validator::Object(fields) => {
                let map = value.as_object().ok_or_else(|| {
                    Invalid::new(path, format!("expected object, got {}", type_name(value)))
                })?;

                for (name, field) in fields {
                    match map.get(name) {
                        Some(present) => {
                            let mut child = path.to_vec();
                            child.push(name.clone());
                            field.check(present, &child)?;
                        }
                        None if field.accepts_missing() => {}
                        None => {
                            return Err(Invalid::new(
                                path,
                                format!("required field '{name}' is missing"),
                            ));
                        }
                    }
                }

                for key in map.keys() {
                    if !fields.contains_key(key) {
                        return Err(Invalid::new(path, format!("unexpected field '{key}'")));
                    }
                }

                Ok(())
            }
            Validator::Union(branches) => {
                let mut deepest: Option<Invalid> = None;
                for branch in branches {
                    match branch.check(value, path) {
                        Ok(()) => return Ok(()),
                        Err(failure) => {
                            let deeper = deepest
                                .as_ref()
                                .map(|d| failure.path.len() > d.path.len())
                                .unwrap_or(true);
                            if deeper {
                                deepest = Some(failure);
                            }
                        }
                    }
                }
                Err(deepest
                    .unwrap_or_else(|| Invalid::new(path, "union with no branches never matches")))
            }
            Validator::Literal(expected) => {
                if value == expected {
                    Ok(())
                } else {
                    Err(Invalid::new(
                        path,
                        format!("expected literal {expected}, got {value}"),
                    ))
                }
            }
            Validator::Record(values) => {
                let map = value.as_object().ok_or_else(|| {
                    Invalid::new(path, format!("expected object, got {}", type_name(value)))
                })?;
                for (key, item) in map {
                    let mut child = path.to_vec();
                    child.push(key.clone());
                    values.check(item, &child)?;
                }
                Ok(())
            }
            Validator::Any => Ok(()),
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
