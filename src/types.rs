//! Core data model types for import.
//!
//! Tabular input arrives as a [`Sheet`] (header rows plus string-only [`TabularContent`]). The
//! importer resolves the header into a list of [`Field`]s and materializes each content row into a
//! [`Record`] whose members hold typed [`Value`]s.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ImportError, ImportResult};

/// Logical type of a record member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    /// 64-bit signed integer.
    Int64,
    /// 64-bit floating point number.
    Float64,
    /// Boolean.
    Bool,
    /// UTF-8 string.
    Utf8,
    /// Enumeration registered in the [`crate::directory::TypeDirectory`].
    Enum(String),
    /// Any other named type: a record type, or an asset type resolved by reference.
    Object(String),
    /// Array of an element type.
    Array(Box<DataType>),
}

impl DataType {
    /// Parse a type-row spelling (`int`, `float[]`, `List<string>`, `Item`, ...).
    ///
    /// Returns `None` for blank or syntactically broken text.
    pub fn parse_declared(text: &str) -> Option<Self> {
        let t = text.trim();
        if t.is_empty() {
            return None;
        }
        if let Some(inner) = t.strip_suffix("[]") {
            return Self::parse_declared(inner).map(|e| Self::Array(Box::new(e)));
        }
        if let Some(inner) = t.strip_prefix("List<").and_then(|s| s.strip_suffix('>')) {
            return Self::parse_declared(inner).map(|e| Self::Array(Box::new(e)));
        }
        if !t.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
            return None;
        }
        Some(match t.to_ascii_lowercase().as_str() {
            "int" | "long" | "short" | "byte" | "uint" | "ulong" | "int32" | "int64" => Self::Int64,
            "float" | "double" | "decimal" | "single" => Self::Float64,
            "bool" | "boolean" => Self::Bool,
            "string" => Self::Utf8,
            _ => Self::Object(t.to_string()),
        })
    }

    /// True for `Array(_)`.
    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    /// Element type for arrays, `self` otherwise.
    pub fn element(&self) -> &DataType {
        match self {
            Self::Array(inner) => inner,
            other => other,
        }
    }

    /// Name of a named type (`Enum`/`Object`), if any.
    pub fn type_name(&self) -> Option<&str> {
        match self {
            Self::Enum(n) | Self::Object(n) => Some(n),
            _ => None,
        }
    }

    /// Default member value for a freshly instantiated record.
    pub fn default_value(&self) -> Value {
        match self {
            Self::Int64 => Value::Int64(0),
            Self::Float64 => Value::Float64(0.0),
            Self::Bool => Value::Bool(false),
            Self::Utf8 => Value::Utf8(String::new()),
            _ => Value::Null,
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int64 => f.write_str("int"),
            Self::Float64 => f.write_str("float"),
            Self::Bool => f.write_str("bool"),
            Self::Utf8 => f.write_str("string"),
            Self::Enum(n) | Self::Object(n) => f.write_str(n),
            Self::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

/// A single typed member value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// Missing/unset value.
    Null,
    /// 64-bit signed integer.
    Int64(i64),
    /// 64-bit float.
    Float64(f64),
    /// Boolean.
    Bool(bool),
    /// UTF-8 string.
    Utf8(String),
    /// Enum variant name.
    Enum(String),
    /// Identifier of an existing persistent object, produced by a reference resolver.
    Reference(String),
    /// Nested record (table rows, joined children).
    Record(Record),
    /// Array member contents.
    Array(Vec<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }

    pub fn as_record_mut(&mut self) -> Option<&mut Record> {
        match self {
            Value::Record(r) => Some(r),
            _ => None,
        }
    }
}

/// One materialized row instance of a record type.
///
/// Members are addressed by name through a [`crate::directory::MemberAccessor`]; a member missing
/// from the map reads as [`Value::Null`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Simple name of the record's type.
    pub type_name: String,
    /// Member values by member name.
    pub members: BTreeMap<String, Value>,
}

impl Record {
    /// Create an empty record of `type_name`.
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            members: BTreeMap::new(),
        }
    }

    /// Builder-style member assignment.
    pub fn with(mut self, member: impl Into<String>, value: Value) -> Self {
        self.members.insert(member.into(), value);
        self
    }

    pub fn get(&self, member: &str) -> Option<&Value> {
        self.members.get(member)
    }
}

/// Dotted numeric version (`major.minor[.patch...]`).
///
/// Missing trailing components compare as zero, so `1.0` equals `1.0.0`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    parts: Vec<u64>,
}

impl Version {
    /// Version of this crate, used as the default running application version.
    pub fn current() -> Self {
        // CARGO_PKG_VERSION is always major.minor.patch.
        env!("CARGO_PKG_VERSION")
            .parse()
            .unwrap_or(Self { parts: vec![0, 0, 0] })
    }

    pub fn parts(&self) -> &[u64] {
        &self.parts
    }
}

impl FromStr for Version {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts = s
            .trim()
            .split('.')
            .map(|p| p.parse::<u64>().map_err(|e| format!("invalid version component '{p}': {e}")))
            .collect::<Result<Vec<_>, _>>()?;
        if parts.len() < 2 {
            return Err(format!("expected major.minor[.patch...], got '{}'", s.trim()));
        }
        Ok(Self { parts })
    }
}

impl TryFrom<String> for Version {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self
            .parts
            .iter()
            .map(|p| p.to_string())
            .collect::<Vec<_>>()
            .join(".");
        f.write_str(&text)
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.parts.len().max(other.parts.len());
        for i in 0..len {
            let a = self.parts.get(i).copied().unwrap_or(0);
            let b = other.parts.get(i).copied().unwrap_or(0);
            match a.cmp(&b) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }
        Ordering::Equal
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

/// Why a [`Field`] is excluded from population.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidReason {
    /// No member with the field's base name exists on the target type.
    UnknownMember,
    /// The enabled row switched the column off.
    Disabled,
    /// The type row declares an array but the member is scalar.
    DeclaredArrayMismatch,
    /// The member is an array whose element type cannot be converted from text.
    UnsupportedArrayElement,
}

/// One schema column descriptor derived from the header rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    /// Header text as written (`tags[2]`).
    pub name: String,
    /// Name used for member lookup (`tags`).
    pub base_name: String,
    /// Bracketed index from the header. Informational only; array cells accumulate in column order.
    pub index_hint: Option<usize>,
    /// Raw type-row text, if a type row was supplied.
    pub declared_type: Option<String>,
    /// Member type on the target record, when the member exists.
    pub data_type: Option<DataType>,
    /// Zero-based column in the content.
    pub column_index: usize,
    pub is_valid: bool,
    pub invalid_reason: Option<InvalidReason>,
    pub is_array_field: bool,
    pub is_version_field: bool,
}

impl Field {
    /// Mark the field invalid for the remainder of the run.
    pub fn invalidate(&mut self, reason: InvalidReason) {
        self.is_valid = false;
        self.invalid_reason = Some(reason);
    }
}

/// Header rows of a sheet.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderRows {
    /// Field-name row.
    pub names: Vec<String>,
    /// Optional declared-type row.
    pub types: Option<Vec<String>>,
    /// Optional enabled-column row.
    pub enabled: Option<Vec<String>>,
}

impl HeaderRows {
    pub fn new(names: Vec<String>) -> Self {
        Self {
            names,
            types: None,
            enabled: None,
        }
    }

    pub fn with_types(mut self, types: Vec<String>) -> Self {
        self.types = Some(types);
        self
    }

    pub fn with_enabled(mut self, enabled: Vec<String>) -> Self {
        self.enabled = Some(enabled);
        self
    }

    pub fn column_count(&self) -> usize {
        self.names.len()
    }
}

/// Row/column body of a sheet with header rows already stripped.
///
/// Row 0 is the first data row. Every row has exactly [`TabularContent::column_count`] cells.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TabularContent {
    column_count: usize,
    rows: Vec<Vec<String>>,
}

impl TabularContent {
    /// Build content of `column_count` columns.
    ///
    /// Short rows are padded with empty cells; a row wider than `column_count` is rejected.
    pub fn new(column_count: usize, rows: Vec<Vec<String>>) -> ImportResult<Self> {
        let mut out = Vec::with_capacity(rows.len());
        for (idx, mut row) in rows.into_iter().enumerate() {
            if row.len() > column_count {
                return Err(ImportError::RaggedContent {
                    row: idx,
                    expected: column_count,
                    found: row.len(),
                });
            }
            row.resize(column_count, String::new());
            out.push(row);
        }
        Ok(Self {
            column_count,
            rows: out,
        })
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn column_count(&self) -> usize {
        self.column_count
    }

    /// Raw cell text; out-of-range addresses read as an empty cell.
    pub fn cell(&self, row: usize, col: usize) -> &str {
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .map(String::as_str)
            .unwrap_or("")
    }
}

/// Header rows plus content, as produced by a tabular source.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sheet {
    pub headers: HeaderRows,
    pub content: TabularContent,
}

impl Sheet {
    /// Build a sheet from string rows; content width follows the name row.
    pub fn from_rows(headers: HeaderRows, rows: Vec<Vec<String>>) -> ImportResult<Self> {
        let content = TabularContent::new(headers.column_count(), rows)?;
        Ok(Self { headers, content })
    }
}

#[cfg(test)]
mod tests {
    use super::{DataType, TabularContent, Version};

    #[test]
    fn parse_declared_handles_primitives_and_arrays() {
        assert_eq!(DataType::parse_declared("int"), Some(DataType::Int64));
        assert_eq!(DataType::parse_declared(" Float "), Some(DataType::Float64));
        assert_eq!(
            DataType::parse_declared("string[]"),
            Some(DataType::Array(Box::new(DataType::Utf8)))
        );
        assert_eq!(
            DataType::parse_declared("List<Item>"),
            Some(DataType::Array(Box::new(DataType::Object("Item".to_string()))))
        );
        assert_eq!(DataType::parse_declared(""), None);
        assert_eq!(DataType::parse_declared("a b"), None);
    }

    #[test]
    fn version_ordering_pads_with_zero() {
        let a: Version = "1.0".parse().unwrap();
        let b: Version = "1.0.0".parse().unwrap();
        let c: Version = "1.0.1".parse().unwrap();
        assert_eq!(a, b);
        assert!(c > b);
        assert!("9.9.9".parse::<Version>().unwrap() > "1.0.0".parse::<Version>().unwrap());
    }

    #[test]
    fn version_rejects_malformed_text() {
        assert!("1".parse::<Version>().is_err());
        assert!("1.x".parse::<Version>().is_err());
        assert!("".parse::<Version>().is_err());
    }

    #[test]
    fn tabular_content_pads_short_rows_and_rejects_wide_rows() {
        let content = TabularContent::new(3, vec![vec!["a".to_string()]]).unwrap();
        assert_eq!(content.cell(0, 0), "a");
        assert_eq!(content.cell(0, 2), "");
        assert_eq!(content.cell(5, 5), "");

        let err = TabularContent::new(1, vec![vec!["a".to_string(), "b".to_string()]]).unwrap_err();
        assert!(err.to_string().contains("content row 0 has 2 cells"));
    }
}
