//! Declarative argument schemas and their compiled generation form.
//!
//! A tool declares its arguments as an ordered map of [`PropertySchema`]s.
//! [`GenerationSchema::translate`] compiles that map once per tool into
//! something the model runtime can check arguments against and describe to
//! the model as JSON Schema.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::error::{Error, Result};

/// Constraints on a string property.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextConstraints {
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub allowed: Option<Vec<String>>,
}

/// Inclusive bounds on a number property.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NumberRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

/// The declared type of a property, with the constraints that apply to it.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyKind {
    String(TextConstraints),
    Number(NumberRange),
    Boolean,
    Array { items: Option<Box<PropertySchema>> },
    Object,
}

impl PropertyKind {
    /// The declared type name.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::Boolean => "boolean",
            Self::Array { .. } => "array",
            Self::Object => "object",
        }
    }
}

/// One argument as declared by the scripting side.
///
/// Deserializes from the declarative form:
///
/// ```json
/// { "type": "string", "required": true, "description": "City name",
///   "constraints": { "minLength": 1, "pattern": "[A-Za-z ]+" } }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawProperty", into = "RawProperty")]
pub struct PropertySchema {
    pub kind: PropertyKind,
    pub required: bool,
    pub description: Option<String>,
}

impl PropertySchema {
    pub fn new(kind: PropertyKind) -> Self {
        Self {
            kind,
            required: true,
            description: None,
        }
    }

    pub fn string() -> Self {
        Self::new(PropertyKind::String(TextConstraints::default()))
    }

    pub fn number() -> Self {
        Self::new(PropertyKind::Number(NumberRange::default()))
    }

    pub fn boolean() -> Self {
        Self::new(PropertyKind::Boolean)
    }

    pub fn array(items: Option<PropertySchema>) -> Self {
        Self::new(PropertyKind::Array {
            items: items.map(Box::new),
        })
    }

    pub fn object() -> Self {
        Self::new(PropertyKind::Object)
    }

    pub fn optional(mut self) -> Self {
        self.required = false;
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawConstraints {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    min_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    max_length: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pattern: Option<String>,
    #[serde(default, rename = "enum", skip_serializing_if = "Option::is_none")]
    allowed: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawProperty {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default = "default_required")]
    required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    constraints: Option<RawConstraints>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    items: Option<Box<PropertySchema>>,
}

fn default_required() -> bool {
    true
}

impl From<RawProperty> for PropertySchema {
    fn from(raw: RawProperty) -> Self {
        let c = raw.constraints.unwrap_or_default();
        let text = || {
            PropertyKind::String(TextConstraints {
                min_length: c.min_length,
                max_length: c.max_length,
                pattern: c.pattern.clone(),
                allowed: c.allowed.clone(),
            })
        };
        let kind = match raw.kind.as_str() {
            "string" => text(),
            "number" | "double" | "int" | "float" => PropertyKind::Number(NumberRange {
                min: c.min,
                max: c.max,
            }),
            "boolean" => PropertyKind::Boolean,
            "array" => PropertyKind::Array { items: raw.items },
            "object" => PropertyKind::Object,
            other => {
                debug!(declared = other, "unrecognized property type, treating as string");
                text()
            }
        };
        Self {
            kind,
            required: raw.required,
            description: raw.description,
        }
    }
}

impl From<PropertySchema> for RawProperty {
    fn from(schema: PropertySchema) -> Self {
        let kind = schema.kind.type_name().to_string();
        let (constraints, items) = match schema.kind {
            PropertyKind::String(t) => (
                RawConstraints {
                    min_length: t.min_length,
                    max_length: t.max_length,
                    pattern: t.pattern,
                    allowed: t.allowed,
                    ..Default::default()
                },
                None,
            ),
            PropertyKind::Number(r) => (
                RawConstraints {
                    min: r.min,
                    max: r.max,
                    ..Default::default()
                },
                None,
            ),
            PropertyKind::Array { items } => (RawConstraints::default(), items),
            PropertyKind::Boolean | PropertyKind::Object => (RawConstraints::default(), None),
        };
        let empty = constraints.min.is_none()
            && constraints.max.is_none()
            && constraints.min_length.is_none()
            && constraints.max_length.is_none()
            && constraints.pattern.is_none()
            && constraints.allowed.is_none();
        Self {
            kind,
            required: schema.required,
            description: schema.description,
            constraints: (!empty).then_some(constraints),
            items,
        }
    }
}

/// Primitive the model runtime generates for a property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationType {
    Text,
    FloatingPoint,
    Boolean,
}

/// A compiled constraint on generated values.
#[derive(Debug, Clone)]
pub enum Guide {
    /// Whole-value match against an anchored expression.
    Pattern(Regex),
    OneOf(Vec<String>),
    Length { min: Option<usize>, max: Option<usize> },
    Range { min: Option<f64>, max: Option<f64> },
}

/// One compiled property.
#[derive(Debug, Clone)]
pub struct GeneratedProperty {
    pub name: String,
    pub generation_type: GenerationType,
    pub required: bool,
    pub description: Option<String>,
    pub guides: Vec<Guide>,
    declared: PropertyKind,
}

impl GeneratedProperty {
    /// The type the scripting side declared, before any degradation.
    pub fn declared(&self) -> &PropertyKind {
        &self.declared
    }

    fn check(&self, value: &Value) -> std::result::Result<(), String> {
        match (self.generation_type, value) {
            (GenerationType::Text, Value::String(s)) => self.check_text(s),
            (GenerationType::Text, Value::Array(_))
                if matches!(self.declared, PropertyKind::Array { .. }) =>
            {
                Ok(())
            }
            (GenerationType::Text, Value::Object(_))
                if matches!(self.declared, PropertyKind::Object) =>
            {
                Ok(())
            }
            (GenerationType::FloatingPoint, Value::Number(n)) => {
                self.check_number(n.as_f64().unwrap_or(f64::NAN))
            }
            (GenerationType::Boolean, Value::Bool(_)) => Ok(()),
            (_, other) => Err(format!(
                "expected {}, got {}",
                self.declared.type_name(),
                json_type(other)
            )),
        }
    }

    fn check_text(&self, s: &str) -> std::result::Result<(), String> {
        for guide in &self.guides {
            match guide {
                Guide::Pattern(re) if !re.is_match(s) => {
                    return Err(format!("'{s}' does not match {}", re.as_str()));
                }
                Guide::OneOf(allowed) if !allowed.iter().any(|a| a == s) => {
                    return Err(format!("'{s}' is not one of {allowed:?}"));
                }
                Guide::Length { min, max } => {
                    let len = s.chars().count();
                    if min.is_some_and(|m| len < m) || max.is_some_and(|m| len > m) {
                        return Err(format!("length {len} is out of bounds"));
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn check_number(&self, n: f64) -> std::result::Result<(), String> {
        for guide in &self.guides {
            if let Guide::Range { min, max } = guide
                && (min.is_some_and(|m| n < m) || max.is_some_and(|m| n > m))
            {
                return Err(format!("{n} is out of range"));
            }
        }
        Ok(())
    }
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// The compiled, immutable argument schema of one tool.
#[derive(Debug, Clone)]
pub struct GenerationSchema {
    tool: String,
    properties: Vec<GeneratedProperty>,
}

impl GenerationSchema {
    /// Compile a tool's declared arguments.
    ///
    /// Fails with [`Error::SchemaCreation`] naming the tool and property when
    /// a pattern does not compile, a range is inverted, or a name is empty.
    pub fn translate(tool: &str, arguments: &IndexMap<String, PropertySchema>) -> Result<Self> {
        let properties = arguments
            .iter()
            .map(|(name, schema)| {
                compile_property(name, schema).map_err(|cause| {
                    Error::SchemaCreation(format!("tool '{tool}', property '{name}': {cause}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        debug!(tool, properties = properties.len(), "compiled generation schema");
        Ok(Self {
            tool: tool.to_string(),
            properties,
        })
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// Properties in declaration order.
    pub fn properties(&self) -> &[GeneratedProperty] {
        &self.properties
    }

    pub fn property(&self, name: &str) -> Option<&GeneratedProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Check generated arguments. Keys the schema does not declare are ignored.
    pub fn validate(&self, arguments: &Map<String, Value>) -> Result<()> {
        for property in &self.properties {
            match arguments.get(&property.name) {
                None | Some(Value::Null) if property.required => {
                    return Err(Error::ArgumentParsing(format!(
                        "tool '{}': missing required property '{}'",
                        self.tool, property.name
                    )));
                }
                None | Some(Value::Null) => {}
                Some(value) => property.check(value).map_err(|reason| {
                    Error::ArgumentParsing(format!(
                        "tool '{}', property '{}': {reason}",
                        self.tool, property.name
                    ))
                })?,
            }
        }
        Ok(())
    }

    /// Describe the arguments as a JSON Schema object.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        for property in &self.properties {
            let mut entry = kind_schema(&property.declared);
            if let (Some(description), Some(object)) =
                (&property.description, entry.as_object_mut())
            {
                object.insert("description".into(), description.as_str().into());
            }
            properties.insert(property.name.clone(), entry);
        }
        let required: Vec<&str> = self
            .properties
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect();

        json!({
            "type": "object",
            "properties": properties,
            "required": required,
        })
    }
}

fn kind_schema(kind: &PropertyKind) -> Value {
    let mut schema = Map::new();
    schema.insert("type".into(), kind.type_name().into());
    match kind {
        PropertyKind::String(t) => {
            if let Some(n) = t.min_length {
                schema.insert("minLength".into(), n.into());
            }
            if let Some(n) = t.max_length {
                schema.insert("maxLength".into(), n.into());
            }
            if let Some(p) = &t.pattern {
                schema.insert("pattern".into(), p.as_str().into());
            }
            if let Some(values) = &t.allowed {
                schema.insert("enum".into(), values.clone().into());
            }
        }
        PropertyKind::Number(r) => {
            if let Some(n) = r.min {
                schema.insert("minimum".into(), n.into());
            }
            if let Some(n) = r.max {
                schema.insert("maximum".into(), n.into());
            }
        }
        PropertyKind::Array { items: Some(items) } => {
            schema.insert("items".into(), kind_schema(&items.kind));
        }
        PropertyKind::Array { items: None } | PropertyKind::Boolean | PropertyKind::Object => {}
    }
    Value::Object(schema)
}

fn compile_property(
    name: &str,
    schema: &PropertySchema,
) -> std::result::Result<GeneratedProperty, String> {
    if name.trim().is_empty() {
        return Err("property name is empty".to_string());
    }

    let mut guides = Vec::new();
    let generation_type = match &schema.kind {
        PropertyKind::String(t) => {
            if let (Some(min), Some(max)) = (t.min_length, t.max_length)
                && min > max
            {
                return Err(format!("minLength {min} exceeds maxLength {max}"));
            }
            if let Some(pattern) = &t.pattern {
                let re = Regex::new(&format!("^(?:{pattern})$"))
                    .map_err(|e| format!("invalid pattern: {e}"))?;
                guides.push(Guide::Pattern(re));
            }
            if let Some(values) = &t.allowed {
                if values.is_empty() {
                    return Err("enum has no values".to_string());
                }
                guides.push(Guide::OneOf(values.clone()));
            }
            if t.min_length.is_some() || t.max_length.is_some() {
                guides.push(Guide::Length {
                    min: t.min_length,
                    max: t.max_length,
                });
            }
            GenerationType::Text
        }
        PropertyKind::Number(r) => {
            if let (Some(min), Some(max)) = (r.min, r.max)
                && min > max
            {
                return Err(format!("min {min} exceeds max {max}"));
            }
            if r.min.is_some() || r.max.is_some() {
                guides.push(Guide::Range {
                    min: r.min,
                    max: r.max,
                });
            }
            GenerationType::FloatingPoint
        }
        PropertyKind::Boolean => GenerationType::Boolean,
        PropertyKind::Array { .. } | PropertyKind::Object => {
            debug!(
                property = name,
                declared = schema.kind.type_name(),
                "no structured generation for nested values, generating text"
            );
            GenerationType::Text
        }
    };

    Ok(GeneratedProperty {
        name: name.to_string(),
        generation_type,
        required: schema.required,
        description: schema.description.clone(),
        guides,
        declared: schema.kind.clone(),
    })
}
