//! Schema resolution: header rows to an ordered list of [`Field`]s for a target record type.

use tracing::debug;

use crate::directory::{TypeDescriptor, TypeDirectory};
use crate::error::{ImportError, ImportResult};
use crate::types::{DataType, Field, HeaderRows, InvalidReason};

/// Configuration-driven column roles.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaOptions {
    /// Base names of the key columns, in identity order. Empty means "use the row index".
    pub key_fields: Vec<String>,
    /// Base name of the version column, if rows carry one.
    pub version_field: Option<String>,
}

/// Resolved header for one import run.
#[derive(Debug, Clone, PartialEq)]
pub struct Schema {
    /// Simple name of the target record type.
    pub target_type: String,
    /// One field per header column, in column order.
    pub fields: Vec<Field>,
    /// Column indexes of the key fields, in [`SchemaOptions::key_fields`] order.
    pub key_indexes: Vec<usize>,
    /// Column index of the version field, when configured and present.
    pub version_index: Option<usize>,
}

impl Schema {
    /// Column index of the first field with `base_name`.
    pub fn index_of(&self, base_name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.base_name == base_name)
    }

    /// Fields that take part in value population.
    pub fn populated_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields
            .iter()
            .filter(|f| f.is_valid && !f.is_version_field)
    }

    pub fn invalid_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| !f.is_valid)
    }

    pub fn has_keys(&self) -> bool {
        !self.key_indexes.is_empty()
    }
}

/// Split `tags[2]` into (`tags`, `Some(2)`).
///
/// A missing or malformed suffix keeps the whole (trimmed) text as the base name.
pub fn split_field_name(name: &str) -> (String, Option<usize>) {
    let name = name.trim();
    if let Some(open) = name.rfind('[') {
        if let Some(inner) = name[open + 1..].strip_suffix(']') {
            if let Ok(idx) = inner.trim().parse::<usize>() {
                let base = name[..open].trim_end();
                if !base.is_empty() {
                    return (base.to_string(), Some(idx));
                }
            }
        }
    }
    (name.to_string(), None)
}

fn is_enabled(cell: Option<&String>) -> bool {
    let Some(cell) = cell else {
        return true;
    };
    let t = cell.trim();
    if t.starts_with('#') {
        return false;
    }
    !matches!(
        t.to_ascii_lowercase().as_str(),
        "false" | "0" | "no" | "n" | "off"
    )
}

/// Build the [`Schema`] of `target` from `headers`.
///
/// Unknown or disabled columns become invalid fields (the caller decides how to report them).
/// Fails only on configuration problems: an empty header or a configured key with no column.
pub fn resolve(
    headers: &HeaderRows,
    target: &TypeDescriptor,
    directory: &TypeDirectory,
    options: &SchemaOptions,
) -> ImportResult<Schema> {
    if headers.names.is_empty() {
        return Err(ImportError::InvalidHeader {
            message: "name row is empty".to_string(),
        });
    }

    let mut fields = Vec::with_capacity(headers.names.len());
    for (col, raw_name) in headers.names.iter().enumerate() {
        let (base_name, index_hint) = split_field_name(raw_name);
        let declared_type = headers
            .types
            .as_ref()
            .and_then(|t| t.get(col))
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty());
        let enabled = is_enabled(headers.enabled.as_ref().and_then(|e| e.get(col)));
        let is_version_field =
            !base_name.is_empty() && options.version_field.as_deref() == Some(base_name.as_str());

        let member = if base_name.is_empty() {
            None
        } else {
            directory.find_member(target, &base_name)
        };
        let data_type = member.as_ref().map(|m| m.data_type().clone());
        let is_array_field = data_type.as_ref().is_some_and(DataType::is_array);

        let invalid_reason = if !enabled {
            Some(InvalidReason::Disabled)
        } else if is_version_field {
            None
        } else if member.is_none() {
            Some(InvalidReason::UnknownMember)
        } else if declared_type
            .as_deref()
            .and_then(DataType::parse_declared)
            .is_some_and(|d| d.is_array())
            && !is_array_field
        {
            Some(InvalidReason::DeclaredArrayMismatch)
        } else {
            None
        };

        fields.push(Field {
            name: raw_name.trim().to_string(),
            base_name,
            index_hint,
            declared_type,
            data_type,
            column_index: col,
            is_valid: invalid_reason.is_none(),
            invalid_reason,
            is_array_field,
            is_version_field,
        });
    }

    let mut key_indexes = Vec::with_capacity(options.key_fields.len());
    for key in &options.key_fields {
        let idx = fields
            .iter()
            .position(|f| f.base_name == *key && !f.is_version_field)
            .ok_or_else(|| ImportError::MissingKeyColumn { key: key.clone() })?;
        key_indexes.push(idx);
    }
    let version_index = fields.iter().position(|f| f.is_valid && f.is_version_field);

    debug!(
        target_type = %target.name,
        columns = fields.len(),
        valid = fields.iter().filter(|f| f.is_valid).count(),
        keys = key_indexes.len(),
        "schema resolved"
    );

    Ok(Schema {
        target_type: target.name.clone(),
        fields,
        key_indexes,
        version_index,
    })
}
