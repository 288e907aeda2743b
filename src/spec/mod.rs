//! Loader for the ISO 8583 message spec JSON (§4.3): a field-number index
//! built once at startup and treated as immutable for the life of the
//! process.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

use crate::codec::field::{Encoding, FieldDescriptor, FieldType, Prefix};
use crate::error::{Error, Result};

#[derive(Debug, Deserialize)]
struct SpecFile {
    name: String,
    fields: BTreeMap<String, FieldDescriptor>,
}

/// An immutable field-number -> [`FieldDescriptor`] index, loaded once at
/// startup from spec JSON.
#[derive(Debug, Clone)]
pub struct MessageSpec {
    /// The spec's declared name (e.g. "ISO8583-1987").
    pub name: String,
    fields: BTreeMap<u8, FieldDescriptor>,
}

impl MessageSpec {
    /// Load a spec from a JSON file at `path`. Rejects paths containing
    /// `..` components (directory traversal) per §4.3.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        reject_traversal(path)?;
        let text = std::fs::read_to_string(path).map_err(|e| Error::SpecLoadError {
            message: format!("failed to read {}: {e}", path.display()),
        })?;
        Self::from_json_str(&text)
    }

    /// Parse a spec directly from a JSON string (used by tests and by
    /// [`Self::load`]).
    pub fn from_json_str(text: &str) -> Result<Self> {
        let file: SpecFile = serde_json::from_str(text).map_err(|e| Error::SpecLoadError {
            message: format!("malformed spec JSON: {e}"),
        })?;

        let mut fields = BTreeMap::new();
        for (key, mut descriptor) in file.fields {
            let number: u8 = key.parse().map_err(|_| Error::SpecLoadError {
                message: format!("field key {key:?} is not a valid field number"),
            })?;
            assign_numbers(&mut descriptor, number);
            fields.insert(number, descriptor);
        }

        let spec = MessageSpec { name: file.name, fields };
        spec.validate()?;
        Ok(spec)
    }

    /// Look up the descriptor for `number`, if the spec defines one.
    pub fn field(&self, number: u8) -> Option<&FieldDescriptor> {
        self.fields.get(&number)
    }

    /// All field numbers the spec defines, ascending.
    pub fn field_numbers(&self) -> impl Iterator<Item = u8> + '_ {
        self.fields.keys().copied()
    }

    fn validate(&self) -> Result<()> {
        let field0 = self.fields.get(&0).ok_or_else(|| Error::SpecLoadError {
            message: "spec must define field 0 (MTI)".into(),
        })?;
        if field0.field_type != FieldType::Numeric && field0.field_type != FieldType::String {
            return Err(Error::SpecLoadError {
                message: "field 0 (MTI) must be numeric or string".into(),
            });
        }

        self.fields.get(&1).ok_or_else(|| Error::SpecLoadError {
            message: "spec must define field 1 (bitmap)".into(),
        })?;

        if let Some(stan) = self.fields.get(&11) {
            let is_ascii_fixed_six = stan.encoding == Encoding::Ascii && stan.prefix == Prefix::Fixed && stan.length == 6;
            if !is_ascii_fixed_six {
                return Err(Error::SpecLoadError {
                    message: "field 11 (STAN) must be a 6-character ASCII fixed string".into(),
                });
            }
        }

        Ok(())
    }
}

fn assign_numbers(descriptor: &mut FieldDescriptor, number: u8) {
    descriptor.number = number;
    if let Some(subfields) = &mut descriptor.subfields {
        for (key, sub) in subfields.iter_mut() {
            if let Ok(sub_number) = key.parse::<u8>() {
                assign_numbers(sub, sub_number);
            }
        }
    }
}

fn reject_traversal(path: &Path) -> Result<()> {
    if path.components().any(|c| c.as_os_str() == "..") {
        return Err(Error::SpecLoadError {
            message: format!("path {} must not contain '..'", path.display()),
        });
    }
    Ok(())
}
