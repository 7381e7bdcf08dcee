use serde_json::{Map, Number, Value};
use std::fmt;
use std::str::FromStr;

/// A dotted key path into a JSON document, e.g. `$.metrics.cpu` or `readings.0.value`.
///
/// The `$.` prefix is optional. A purely numeric segment indexes into an array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<String>,
}

/// Result of evaluating a [FieldPath] against a document.
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<'a> {
    String(&'a str),
    Number(&'a Number),
    Bool(bool),
    Null,
    Array(&'a [Value]),
    Object(&'a Map<String, Value>),
    NotFound,
}

impl<'a> Lookup<'a> {
    pub fn kind(&self) -> &'static str {
        match self {
            Lookup::String(_) => "string",
            Lookup::Number(_) => "number",
            Lookup::Bool(_) => "boolean",
            Lookup::Null => "null",
            Lookup::Array(_) => "array",
            Lookup::Object(_) => "object",
            Lookup::NotFound => "nothing",
        }
    }
}

impl<'a> From<&'a Value> for Lookup<'a> {
    fn from(value: &'a Value) -> Self {
        match value {
            Value::String(s) => Lookup::String(s),
            Value::Number(n) => Lookup::Number(n),
            Value::Bool(b) => Lookup::Bool(*b),
            Value::Null => Lookup::Null,
            Value::Array(a) => Lookup::Array(a),
            Value::Object(o) => Lookup::Object(o),
        }
    }
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum PathError {
    #[error("field path is empty")]
    Empty,
    #[error("field path {0:?} contains an empty segment")]
    EmptySegment(String),
}

impl FieldPath {
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn lookup<'a>(&self, document: &'a Value) -> Lookup<'a> {
        let mut current = document;
        for segment in &self.segments {
            let next = match current {
                Value::Object(map) => map.get(segment),
                Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
                _ => None,
            };
            match next {
                Some(value) => current = value,
                None => return Lookup::NotFound,
            }
        }
        Lookup::from(current)
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, PathError> {
        let raw = s.trim();
        let body = raw
            .strip_prefix("$.")
            .or_else(|| raw.strip_prefix('$'))
            .unwrap_or(raw);
        if body.is_empty() {
            return Err(PathError::Empty);
        }

        let segments: Vec<String> = body.split('.').map(str::to_owned).collect();
        if segments.iter().any(|s| s.is_empty()) {
            return Err(PathError::EmptySegment(raw.to_owned()));
        }

        Ok(FieldPath {
            raw: raw.to_owned(),
            segments,
        })
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
