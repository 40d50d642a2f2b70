//! Document data validation
//!
//! Any `Fn(&Map) -> Result<(), SchemaViolation>` is a [`Schema`]. For the
//! common case of checking field presence and kinds, [`FieldSchema`] builds
//! one declaratively and reports the dotted path of the first offending
//! field.

use serde_json::{Map, Value};
use std::fmt;

/// A rejected field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaViolation {
    /// Dotted path of the field
    pub path: String,
    /// What is wrong with it
    pub message: String,
}

impl SchemaViolation {
    /// Violation at `path`
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for SchemaViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.message)
    }
}

/// Validator for document data
pub trait Schema: Send + Sync {
    /// Check `data`, reporting the first violation
    fn validate(&self, data: &Map<String, Value>) -> Result<(), SchemaViolation>;
}

impl<F> Schema for F
where
    F: Fn(&Map<String, Value>) -> Result<(), SchemaViolation> + Send + Sync,
{
    fn validate(&self, data: &Map<String, Value>) -> Result<(), SchemaViolation> {
        self(data)
    }
}

/// Expected kind of a field
#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Any value
    Any,
    /// A string
    String,
    /// Any number
    Number,
    /// An integral number
    Integer,
    /// A boolean
    Bool,
    /// An array of values of the given kind
    Array(Box<FieldKind>),
    /// A nested map checked against its own schema
    Map(FieldSchema),
}

impl FieldKind {
    fn describe(&self) -> &'static str {
        match self {
            FieldKind::Any => "any value",
            FieldKind::String => "a string",
            FieldKind::Number => "a number",
            FieldKind::Integer => "an integer",
            FieldKind::Bool => "a boolean",
            FieldKind::Array(_) => "an array",
            FieldKind::Map(_) => "a map",
        }
    }

    fn check(&self, path: &str, value: &Value) -> Result<(), SchemaViolation> {
        let matches = match (self, value) {
            (FieldKind::Any, _) => true,
            (FieldKind::String, Value::String(_)) => true,
            (FieldKind::Number, Value::Number(_)) => true,
            (FieldKind::Integer, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (FieldKind::Bool, Value::Bool(_)) => true,
            (FieldKind::Array(item), Value::Array(items)) => {
                for (index, element) in items.iter().enumerate() {
                    item.check(&format!("{path}.{index}"), element)?;
                }
                true
            }
            (FieldKind::Map(schema), Value::Object(map)) => {
                schema.check_at(path, map)?;
                true
            }
            _ => false,
        };
        if matches {
            Ok(())
        } else {
            Err(SchemaViolation::new(
                path,
                format!("expected {}", self.describe()),
            ))
        }
    }
}

#[derive(Debug, Clone)]
struct FieldRule {
    name: String,
    kind: FieldKind,
    required: bool,
    nullable: bool,
}

/// Declarative schema over named fields
#[derive(Debug, Clone, Default)]
pub struct FieldSchema {
    fields: Vec<FieldRule>,
    strict: bool,
}

impl FieldSchema {
    /// Schema accepting any map
    pub fn new() -> Self {
        Self::default()
    }

    /// A field that must be present
    pub fn required(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldRule {
            name: name.into(),
            kind,
            required: true,
            nullable: false,
        });
        self
    }

    /// A field that may be absent or null
    pub fn optional(mut self, name: impl Into<String>, kind: FieldKind) -> Self {
        self.fields.push(FieldRule {
            name: name.into(),
            kind,
            required: false,
            nullable: true,
        });
        self
    }

    /// Reject fields not declared in the schema
    pub fn strict(mut self) -> Self {
        self.strict = true;
        self
    }

    fn check_at(&self, prefix: &str, data: &Map<String, Value>) -> Result<(), SchemaViolation> {
        let join = |name: &str| {
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}.{name}")
            }
        };

        for rule in &self.fields {
            let path = join(&rule.name);
            match data.get(&rule.name) {
                None if rule.required => {
                    return Err(SchemaViolation::new(path, "required field is missing"));
                }
                None => {}
                Some(Value::Null) if rule.nullable => {}
                Some(value) => rule.kind.check(&path, value)?,
            }
        }

        if self.strict {
            if let Some(extra) = data
                .keys()
                .find(|key| !self.fields.iter().any(|rule| &rule.name == *key))
            {
                return Err(SchemaViolation::new(join(extra), "unexpected field"));
            }
        }
        Ok(())
    }
}

impl Schema for FieldSchema {
    fn validate(&self, data: &Map<String, Value>) -> Result<(), SchemaViolation> {
        self.check_at("", data)
    }
}
