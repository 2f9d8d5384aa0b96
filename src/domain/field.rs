use chrono::{DateTime, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;

use crate::error::ConfigError;

static IDENTIFIER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_\-]+$").expect("identifier pattern is valid"));

/// Declared data type of a projected field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Identifier,
    String,
    DateTime,
    Picklist,
    Text,
}

impl FieldType {
    /// Parse a configured data type name. The export connector's own names
    /// (`id`, `textarea`) are accepted as aliases.
    pub fn from_config(field: &str, data_type: &str) -> Result<Self, ConfigError> {
        match data_type.trim().to_ascii_lowercase().as_str() {
            "identifier" | "id" => Ok(FieldType::Identifier),
            "string" => Ok(FieldType::String),
            "datetime" => Ok(FieldType::DateTime),
            "picklist" => Ok(FieldType::Picklist),
            "text" | "textarea" => Ok(FieldType::Text),
            _ => Err(ConfigError::UnknownDataType {
                field: field.to_string(),
                data_type: data_type.to_string(),
            }),
        }
    }

    /// Whether values of this type are free text that may carry markup
    pub fn is_textual(&self) -> bool {
        matches!(self, FieldType::String | FieldType::Text)
    }

    /// Coerce a non-blank raw value into this type
    pub fn coerce(&self, raw: &str) -> Result<FieldValue, CoercionError> {
        match self {
            FieldType::Identifier => {
                let trimmed = raw.trim();
                if IDENTIFIER_PATTERN.is_match(trimmed) {
                    Ok(FieldValue::Identifier(trimmed.to_string()))
                } else {
                    Err(CoercionError::new(*self, raw))
                }
            }
            FieldType::String => Ok(FieldValue::String(raw.to_string())),
            FieldType::DateTime => parse_datetime(raw.trim())
                .map(FieldValue::DateTime)
                .ok_or_else(|| CoercionError::new(*self, raw)),
            FieldType::Picklist => Ok(FieldValue::Picklist(raw.trim().to_string())),
            FieldType::Text => Ok(FieldValue::Text(raw.to_string())),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FieldType::Identifier => "identifier",
            FieldType::String => "string",
            FieldType::DateTime => "datetime",
            FieldType::Picklist => "picklist",
            FieldType::Text => "text",
        };
        write!(f, "{}", name)
    }
}

/// RFC 3339 first, then the CRM export form `2024-01-15T10:30:00.000+0000`
fn parse_datetime(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// A raw value that could not be coerced to its declared type
#[derive(Debug, Clone, PartialEq)]
pub struct CoercionError {
    pub declared: FieldType,
    pub raw: String,
}

impl CoercionError {
    const EXCERPT_LEN: usize = 64;

    fn new(declared: FieldType, raw: &str) -> Self {
        Self {
            declared,
            raw: raw.chars().take(Self::EXCERPT_LEN).collect(),
        }
    }
}

/// A typed field value. Serialized as a plain JSON string.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Identifier(String),
    String(String),
    DateTime(DateTime<Utc>),
    Picklist(String),
    Text(String),
}

impl FieldValue {
    /// Borrow the textual content, if this value is not a timestamp
    pub fn as_str(&self) -> Option<&str> {
        match self {
            FieldValue::Identifier(s)
            | FieldValue::String(s)
            | FieldValue::Picklist(s)
            | FieldValue::Text(s) => Some(s),
            FieldValue::DateTime(_) => None,
        }
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldValue::DateTime(dt) => write!(f, "{}", dt.to_rfc3339()),
            other => write!(f, "{}", other.as_str().unwrap_or_default()),
        }
    }
}

/// One projected field: name plus declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldSpec {
    pub name: String,
    pub data_type: FieldType,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, data_type: FieldType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

/// Position of a field inside the projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FieldIndex(pub(crate) usize);

/// The ordered, fixed set of fields retained from each raw record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Projection {
    fields: Vec<FieldSpec>,
    index: HashMap<String, FieldIndex>,
}

impl Projection {
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self, ConfigError> {
        if fields.is_empty() {
            return Err(ConfigError::EmptyProjection);
        }

        let mut index = HashMap::with_capacity(fields.len());
        for (position, spec) in fields.iter().enumerate() {
            if index.insert(spec.name.clone(), FieldIndex(position)).is_some() {
                return Err(ConfigError::DuplicateField(spec.name.clone()));
            }
        }

        Ok(Self { fields, index })
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn index_of(&self, name: &str) -> Option<FieldIndex> {
        self.index.get(name).copied()
    }

    pub fn spec(&self, index: FieldIndex) -> &FieldSpec {
        &self.fields[index.0]
    }

    /// The field used to identify records in drop reports: the first
    /// identifier-typed field, if any
    pub fn key_field(&self) -> Option<FieldIndex> {
        self.fields
            .iter()
            .position(|spec| spec.data_type == FieldType::Identifier)
            .map(FieldIndex)
    }
}
