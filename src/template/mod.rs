//! Transaction template loader (§4.3, §3): parses the transactions JSON
//! into an immutable name-indexed cache, ready for [`compose::compose`].

pub mod compose;

use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

pub use compose::compose;

/// A single field's templated value, as declared in the transactions JSON.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateValue {
    /// Populate this field at compose time per the auto-field table (§4.5).
    Auto,
    /// Sample one row from the template's dataset and apply it wholesale.
    Random,
    /// A literal value, already stringified (JSON numbers and strings both
    /// collapse to their decimal/text representation).
    Static(String),
    /// A literal composite value: subfield number -> literal string.
    StaticComposite(BTreeMap<u8, String>),
}

/// A named transaction template (§3).
#[derive(Debug, Clone)]
pub struct Transaction {
    /// Unique template name, used as the `Compose` lookup key.
    pub name: String,
    /// Free-text description (not interpreted by the engine).
    pub description: String,
    /// Declared field values, keyed by field number.
    pub fields: BTreeMap<u8, TemplateValue>,
    /// Sample rows available to fields declared `"random"`.
    pub dataset: Vec<BTreeMap<u8, String>>,
}

/// An immutable, name-indexed set of transaction templates.
#[derive(Debug, Clone)]
pub struct TransactionSet {
    by_name: BTreeMap<String, Transaction>,
}

#[derive(Debug, Deserialize)]
struct TransactionFile {
    name: String,
    #[serde(default)]
    description: String,
    fields: BTreeMap<String, Value>,
    #[serde(default)]
    dataset: Vec<BTreeMap<String, Value>>,
}

impl TransactionSet {
    /// Load templates from a JSON array file at `path`. Rejects paths
    /// containing `..` components, matching the spec loader.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.components().any(|c| c.as_os_str() == "..") {
            return Err(Error::TemplateLoadError {
                message: format!("path {} must not contain '..'", path.display()),
            });
        }
        let text = std::fs::read_to_string(path).map_err(|e| Error::TemplateLoadError {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }

    /// Parse templates directly from a JSON array string.
    pub fn from_json_str(text: &str) -> Result<Self> {
        let files: Vec<TransactionFile> = serde_json::from_str(text).map_err(|e| Error::TemplateLoadError {
            message: format!("malformed transactions JSON: {e}"),
        })?;

        if files.is_empty() {
            return Err(Error::TemplateLoadError {
                message: "transactions JSON must contain at least one template".into(),
            });
        }

        let mut by_name = BTreeMap::new();
        for file in files {
            let fields = file
                .fields
                .into_iter()
                .map(|(key, value)| {
                    let number = parse_field_number(&key)?;
                    Ok((number, convert_value(&value)?))
                })
                .collect::<Result<BTreeMap<u8, TemplateValue>>>()?;

            let dataset = file
                .dataset
                .into_iter()
                .map(|row| {
                    row.into_iter()
                        .map(|(key, value)| Ok((parse_field_number(&key)?, json_scalar_to_string(&value)?)))
                        .collect::<Result<BTreeMap<u8, String>>>()
                })
                .collect::<Result<Vec<_>>>()?;

            let transaction = Transaction {
                name: file.name.clone(),
                description: file.description,
                fields,
                dataset,
            };

            if by_name.insert(file.name.clone(), transaction).is_some() {
                return Err(Error::TemplateLoadError {
                    message: format!("duplicate template name: {}", file.name),
                });
            }
        }

        Ok(Self { by_name })
    }

    /// Look up a template by name. O(1) via the name index.
    pub fn get(&self, name: &str) -> Option<&Transaction> {
        self.by_name.get(name)
    }

    /// All template names, in lexical order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.by_name.keys().map(String::as_str)
    }
}

fn parse_field_number(key: &str) -> Result<u8> {
    key.parse().map_err(|_| Error::TemplateLoadError {
        message: format!("field key {key:?} is not a valid field number"),
    })
}

fn json_scalar_to_string(value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(Error::TemplateLoadError {
            message: format!("expected a string or number, got {other}"),
        }),
    }
}

fn convert_value(value: &Value) -> Result<TemplateValue> {
    match value {
        Value::String(s) if s == "auto" => Ok(TemplateValue::Auto),
        Value::String(s) if s == "random" => Ok(TemplateValue::Random),
        Value::String(s) => Ok(TemplateValue::Static(s.clone())),
        Value::Number(n) => Ok(TemplateValue::Static(n.to_string())),
        Value::Object(map) => {
            let subfields = map
                .iter()
                .map(|(key, v)| Ok((parse_field_number(key)?, json_scalar_to_string(v)?)))
                .collect::<Result<BTreeMap<u8, String>>>()?;
            Ok(TemplateValue::StaticComposite(subfields))
        }
        other => Err(Error::TemplateLoadError {
            message: format!("unsupported field value: {other}"),
        }),
    }
}
