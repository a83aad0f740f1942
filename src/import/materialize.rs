//! Row materialization: one content row to one populated [`Record`].

use std::fmt;
use std::ops::{BitOr, BitOrAssign};

use tracing::{debug, warn};

use crate::convert::{Conversion, ConversionRegistry};
use crate::directory::{TypeDescriptor, TypeDirectory};
use crate::error::ImportResult;
use crate::schema::Schema;
use crate::storage::RecordStore;
use crate::types::{InvalidReason, Record, TabularContent, Value, Version};

use super::reconcile::JoinFailure;
use super::ImportSettings;

/// The outcome that governed a row's control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RowOutcome {
    /// Materialized and handed to the destination.
    Success,
    /// A configured key cell was blank; nothing was created or loaded.
    SkippedNoKey,
    /// The version cell could not be parsed; the row was dropped.
    ConversionFailed,
    /// The row's version is newer than the running application; the row was dropped.
    VersionMismatch,
    /// Join mode: no parent row matched the record's join key.
    JoinNoReferenceRow,
    /// Join mode: the record's index did not match the parent's collection length.
    JoinIndexMismatch,
}

/// Bit set of everything that happened to a row, for reporting.
///
/// Unlike [`RowOutcome`], flags combine: a successful row with a field that failed to convert
/// carries both [`OutcomeFlags::SUCCESS`] and [`OutcomeFlags::CONVERSION_FAILED`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct OutcomeFlags(u8);

impl OutcomeFlags {
    pub const SUCCESS: Self = Self(1);
    pub const SKIPPED_NO_KEY: Self = Self(1 << 1);
    pub const CONVERSION_FAILED: Self = Self(1 << 2);
    pub const VERSION_MISMATCH: Self = Self(1 << 3);
    pub const JOIN_NO_REFERENCE_ROW: Self = Self(1 << 4);
    pub const JOIN_INDEX_MISMATCH: Self = Self(1 << 5);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl BitOr for OutcomeFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for OutcomeFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl From<RowOutcome> for OutcomeFlags {
    fn from(outcome: RowOutcome) -> Self {
        match outcome {
            RowOutcome::Success => Self::SUCCESS,
            RowOutcome::SkippedNoKey => Self::SKIPPED_NO_KEY,
            RowOutcome::ConversionFailed => Self::CONVERSION_FAILED,
            RowOutcome::VersionMismatch => Self::VERSION_MISMATCH,
            RowOutcome::JoinNoReferenceRow => Self::JOIN_NO_REFERENCE_ROW,
            RowOutcome::JoinIndexMismatch => Self::JOIN_INDEX_MISMATCH,
        }
    }
}

impl OutcomeFlags {
    const NAMES: [(OutcomeFlags, &'static str); 6] = [
        (OutcomeFlags::SUCCESS, "SUCCESS"),
        (OutcomeFlags::SKIPPED_NO_KEY, "SKIPPED_NO_KEY"),
        (OutcomeFlags::CONVERSION_FAILED, "CONVERSION_FAILED"),
        (OutcomeFlags::VERSION_MISMATCH, "VERSION_MISMATCH"),
        (OutcomeFlags::JOIN_NO_REFERENCE_ROW, "JOIN_NO_REFERENCE_ROW"),
        (OutcomeFlags::JOIN_INDEX_MISMATCH, "JOIN_INDEX_MISMATCH"),
    ];

    /// Names of the set flags, lowest bit first.
    pub fn names(self) -> Vec<&'static str> {
        Self::NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect()
    }
}

impl fmt::Debug for OutcomeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "OutcomeFlags({})", self.names().join(" | "))
    }
}

/// How the row's record came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    /// New persistent record registered at its identity path.
    Created,
    /// Existing persistent record updated in place.
    Updated,
    /// In-memory record destined for a table or join.
    Transient,
}

/// Why a single cell did not reach its member.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldFailureKind {
    Unparsable,
    UnresolvedReference,
    UnsupportedArrayElement,
}

/// One non-fatal cell failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldFailure {
    pub column: usize,
    pub field: String,
    pub raw: String,
    pub kind: FieldFailureKind,
}

/// Structured outcome of one content row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowReport {
    /// Zero-based content row.
    pub row: usize,
    pub outcome: RowOutcome,
    pub flags: OutcomeFlags,
    /// Identity path of the record (persistent path, or the would-be path for transient rows).
    pub identity: Option<String>,
    pub lifecycle: Option<Lifecycle>,
    pub field_failures: Vec<FieldFailure>,
    /// Extra detail for aborted or unattached rows.
    pub message: Option<String>,
}

impl RowReport {
    fn new(row: usize, outcome: RowOutcome) -> Self {
        Self {
            row,
            outcome,
            flags: outcome.into(),
            identity: None,
            lifecycle: None,
            field_failures: Vec::new(),
            message: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == RowOutcome::Success
    }

    /// Downgrade a materialized row whose record could not be attached.
    pub(crate) fn apply_join_failure(&mut self, failure: &JoinFailure) {
        let outcome = match failure {
            JoinFailure::NoReferenceRow { .. } => RowOutcome::JoinNoReferenceRow,
            JoinFailure::IndexMismatch { .. } => RowOutcome::JoinIndexMismatch,
        };
        self.outcome = outcome;
        self.flags.remove(OutcomeFlags::SUCCESS);
        self.flags |= outcome.into();
        self.message = Some(failure.to_string());
    }
}

/// Result of [`RowMaterializer::materialize_row`].
#[derive(Debug)]
pub struct Materialized {
    pub report: RowReport,
    /// Populated record for successful rows; `None` for skipped/aborted rows.
    pub record: Option<Record>,
}

/// Identity path for a row: `{dir}/{Type}_{key1}_{key2}` or `{dir}/{Type}_{row}` when keyless.
pub fn identity_path(output_dir: &str, type_name: &str, keys: &[&str], row: usize) -> String {
    let stem = if keys.is_empty() {
        format!("{type_name}_{row}")
    } else {
        let keys: Vec<String> = keys
            .iter()
            .map(|k| k.trim().replace(['/', '\\'], "_"))
            .collect();
        format!("{type_name}_{}", keys.join("_"))
    };
    let dir = output_dir.trim_end_matches('/');
    if dir.is_empty() {
        stem
    } else {
        format!("{dir}/{stem}")
    }
}

/// Builds and populates records for one import run.
pub struct RowMaterializer<'a> {
    directory: &'a TypeDirectory,
    target: &'a TypeDescriptor,
    converter: &'a ConversionRegistry<'a>,
    settings: &'a ImportSettings,
    persistent: bool,
}

impl<'a> RowMaterializer<'a> {
    pub fn new(
        directory: &'a TypeDirectory,
        target: &'a TypeDescriptor,
        converter: &'a ConversionRegistry<'a>,
        settings: &'a ImportSettings,
        persistent: bool,
    ) -> Self {
        Self {
            directory,
            target,
            converter,
            settings,
            persistent,
        }
    }

    /// Materialize content row `row`.
    ///
    /// Only storage errors are returned as `Err`; every data problem is classified in the report.
    /// Fields found to be unusable during conversion are invalidated in `schema` for the rest of
    /// the run.
    pub fn materialize_row(
        &self,
        row: usize,
        schema: &mut Schema,
        content: &TabularContent,
        store: &mut dyn RecordStore,
    ) -> ImportResult<Materialized> {
        let keys: Vec<&str> = schema
            .key_indexes
            .iter()
            .map(|&col| content.cell(row, col).trim())
            .collect();
        if keys.iter().any(|k| k.is_empty()) {
            debug!(row, "row skipped: blank key");
            return Ok(Materialized {
                report: RowReport::new(row, RowOutcome::SkippedNoKey),
                record: None,
            });
        }

        if let Some(report) = self.check_version(row, schema, content) {
            return Ok(Materialized {
                report,
                record: None,
            });
        }

        let identity = identity_path(self.output_dir(), &self.target.name, &keys, row);
        let (mut record, lifecycle) = if self.persistent {
            match store.load_by_path(&identity, &self.target.name)? {
                Some(existing) => {
                    debug!(row, path = %identity, "record updated");
                    (existing, Lifecycle::Updated)
                }
                None => {
                    debug!(row, path = %identity, "record created");
                    (store.create(self.target, &identity)?, Lifecycle::Created)
                }
            }
        } else {
            (self.target.instantiate(), Lifecycle::Transient)
        };

        for field in schema.fields.iter().filter(|f| f.is_valid && f.is_array_field) {
            if let Some(accessor) = self.directory.find_member(self.target, &field.base_name) {
                accessor.set(&mut record, Value::Array(Vec::new()));
            }
        }

        let failures = self.populate(row, schema, content, &mut record);

        let mut report = RowReport::new(row, RowOutcome::Success);
        if !failures.is_empty() {
            report.flags |= OutcomeFlags::CONVERSION_FAILED;
        }
        report.identity = Some(identity);
        report.lifecycle = Some(lifecycle);
        report.field_failures = failures;
        Ok(Materialized {
            report,
            record: Some(record),
        })
    }

    fn output_dir(&self) -> &str {
        self.settings
            .output_dir
            .as_deref()
            .unwrap_or(&self.target.name)
    }

    fn check_version(&self, row: usize, schema: &Schema, content: &TabularContent) -> Option<RowReport> {
        let col = schema.version_index?;
        let raw = content.cell(row, col).trim();
        if raw.is_empty() {
            return None;
        }
        match raw.parse::<Version>() {
            Err(message) => {
                warn!(row, version = raw, error = %message, "row dropped: unparsable version");
                let mut report = RowReport::new(row, RowOutcome::ConversionFailed);
                report.message = Some(message);
                Some(report)
            }
            Ok(version) if version > self.settings.app_version => {
                warn!(
                    row,
                    version = %version,
                    app_version = %self.settings.app_version,
                    "row dropped: newer than application"
                );
                let mut report = RowReport::new(row, RowOutcome::VersionMismatch);
                report.message = Some(format!(
                    "row version {version} is newer than {}",
                    self.settings.app_version
                ));
                Some(report)
            }
            Ok(_) => None,
        }
    }

    fn populate(
        &self,
        row: usize,
        schema: &mut Schema,
        content: &TabularContent,
        record: &mut Record,
    ) -> Vec<FieldFailure> {
        let mut failures = Vec::new();
        for idx in 0..schema.fields.len() {
            let field = &schema.fields[idx];
            if !field.is_valid || field.is_version_field {
                continue;
            }
            let raw = content.cell(row, field.column_index);
            if raw.trim().is_empty() {
                if self.settings.log_blank_cells {
                    debug!(row, column = field.column_index, field = %field.name, "blank cell");
                }
                continue;
            }
            let Some(accessor) = self.directory.find_member(self.target, &field.base_name) else {
                continue;
            };

            let failure = |kind| FieldFailure {
                column: field.column_index,
                field: field.name.clone(),
                raw: raw.to_string(),
                kind,
            };

            if field.is_array_field {
                let element = accessor.data_type().element().clone();
                if !self.converter.supports_element(&element) {
                    warn!(
                        field = %field.base_name,
                        element = %element,
                        "array element type cannot be converted; field disabled for this run"
                    );
                    failures.push(failure(FieldFailureKind::UnsupportedArrayElement));
                    let base = field.base_name.clone();
                    for f in schema.fields.iter_mut().filter(|f| f.base_name == base) {
                        f.invalidate(InvalidReason::UnsupportedArrayElement);
                    }
                    continue;
                }
                match self.converter.convert_cell(&element, raw) {
                    Conversion::Converted(value) => match accessor.get_mut(record) {
                        Value::Array(items) => items.push(value),
                        slot => *slot = Value::Array(vec![value]),
                    },
                    miss => {
                        let f = failure(failure_kind(&miss));
                        self.log_failure(row, &f);
                        failures.push(f);
                    }
                }
            } else {
                match self.converter.convert_cell(accessor.data_type(), raw) {
                    Conversion::Converted(value) => accessor.set(record, value),
                    miss => {
                        let f = failure(failure_kind(&miss));
                        self.log_failure(row, &f);
                        failures.push(f);
                    }
                }
            }
        }
        failures
    }

    fn log_failure(&self, row: usize, f: &FieldFailure) {
        if f.kind == FieldFailureKind::UnresolvedReference || !self.settings.log_conversion_failures {
            debug!(row, column = f.column, field = %f.field, raw = %f.raw, kind = ?f.kind, "cell not converted");
        } else {
            warn!(row, column = f.column, field = %f.field, raw = %f.raw, "cell not converted");
        }
    }
}

fn failure_kind(miss: &Conversion) -> FieldFailureKind {
    match miss {
        Conversion::UnresolvedReference => FieldFailureKind::UnresolvedReference,
        _ => FieldFailureKind::Unparsable,
    }
}

#[cfg(test)]
mod tests {
    use super::{identity_path, FieldFailureKind, Lifecycle, OutcomeFlags, RowMaterializer, RowOutcome};
    use crate::convert::ConversionRegistry;
    use crate::directory::{TypeDescriptor, TypeDirectory};
    use crate::import::ImportSettings;
    use crate::schema::{resolve, SchemaOptions};
    use crate::storage::{MemoryStore, RecordStore};
    use crate::types::{DataType, HeaderRows, InvalidReason, Record, TabularContent, Value};

    fn strings(cells: &[&str]) -> Vec<String> {
        cells.iter().map(|s| s.to_string()).collect()
    }

    fn directory() -> TypeDirectory {
        TypeDirectory::from_types(vec![
            TypeDescriptor::record("Item")
                .member("id", DataType::Utf8)
                .member("power", DataType::Int64)
                .member("tags", DataType::Array(Box::new(DataType::Utf8)))
                .member(
                    "grid",
                    DataType::Array(Box::new(DataType::Array(Box::new(DataType::Int64)))),
                ),
        ])
    }

    fn settings() -> ImportSettings {
        ImportSettings {
            target_type: "Item".into(),
            key_fields: vec!["id".into()],
            version_field: Some("ver".into()),
            app_version: "1.0.0".parse().unwrap(),
            ..Default::default()
        }
    }

    fn content(rows: &[&[&str]]) -> TabularContent {
        let width = rows.iter().map(|r| r.len()).max().unwrap_or(0);
        TabularContent::new(width, rows.iter().map(|r| strings(r)).collect()).unwrap()
    }

    #[test]
    fn identity_path_uses_keys_or_row_index() {
        assert_eq!(identity_path("Item", "Item", &["a", " b "], 3), "Item/Item_a_b");
        assert_eq!(identity_path("Item/", "Item", &[], 3), "Item/Item_3");
        assert_eq!(identity_path("", "Item", &["x/y"], 0), "Item_x_y");
    }

    #[test]
    fn outcome_flags_combine() {
        let flags = OutcomeFlags::SUCCESS | OutcomeFlags::CONVERSION_FAILED;
        assert!(flags.contains(OutcomeFlags::SUCCESS));
        assert!(flags.contains(OutcomeFlags::CONVERSION_FAILED));
        assert!(!flags.contains(OutcomeFlags::VERSION_MISMATCH));
        assert!(OutcomeFlags::empty().is_empty());
        assert_eq!(format!("{flags:?}"), "OutcomeFlags(SUCCESS | CONVERSION_FAILED)");
    }

    #[test]
    fn materializes_persistent_row_with_array_accumulation() {
        let dir = directory();
        let item = dir.resolve_record_type("Item").unwrap();
        let headers = HeaderRows::new(strings(&["id", "power", "tags", "tags", "tags", "ver"]));
        let settings = settings();
        let mut schema = resolve(&headers, &item, &dir, &SchemaOptions {
            key_fields: settings.key_fields.clone(),
            version_field: settings.version_field.clone(),
        })
        .unwrap();
        let conv = ConversionRegistry::new(&dir);
        let m = RowMaterializer::new(&dir, &item, &conv, &settings, true);
        let mut store = MemoryStore::new();

        let body = content(&[&["sword", "12", "a", "b", "", "0.1.0"]]);
        let out = m.materialize_row(0, &mut schema, &body, &mut store).unwrap();
        assert_eq!(out.report.outcome, RowOutcome::Success);
        assert_eq!(out.report.lifecycle, Some(Lifecycle::Created));
        assert_eq!(out.report.identity.as_deref(), Some("Item/Item_sword"));

        let record = out.record.unwrap();
        assert_eq!(record.get("power"), Some(&Value::Int64(12)));
        assert_eq!(
            record.get("tags"),
            Some(&Value::Array(vec![Value::Utf8("a".into()), Value::Utf8("b".into())]))
        );
        assert!(store.get("Item/Item_sword").is_some());
    }

    #[test]
    fn existing_record_is_updated_in_place() {
        let dir = directory();
        let item = dir.resolve_record_type("Item").unwrap();
        let headers = HeaderRows::new(strings(&["id", "power"]));
        let settings = ImportSettings {
            version_field: None,
            ..settings()
        };
        let mut schema = resolve(&headers, &item, &dir, &SchemaOptions {
            key_fields: vec!["id".into()],
            version_field: None,
        })
        .unwrap();
        let conv = ConversionRegistry::new(&dir);
        let m = RowMaterializer::new(&dir, &item, &conv, &settings, true);

        let mut store = MemoryStore::new();
        store.insert(
            "Item/Item_sword",
            Record::new("Item")
                .with("id", Value::Utf8("sword".into()))
                .with("power", Value::Int64(1))
                .with("tags", Value::Array(vec![Value::Utf8("old".into())])),
        );

        let body = content(&[&["sword", "oops"]]);
        let out = m.materialize_row(0, &mut schema, &body, &mut store).unwrap();
        assert_eq!(out.report.lifecycle, Some(Lifecycle::Updated));
        assert!(out.report.flags.contains(OutcomeFlags::CONVERSION_FAILED));
        assert_eq!(out.report.field_failures[0].kind, FieldFailureKind::Unparsable);

        let record = out.record.unwrap();
        // Unparsable cell keeps the prior value; untouched members survive.
        assert_eq!(record.get("power"), Some(&Value::Int64(1)));
        assert_eq!(
            record.get("tags"),
            Some(&Value::Array(vec![Value::Utf8("old".into())]))
        );
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn blank_key_and_future_version_touch_nothing() {
        let dir = directory();
        let item = dir.resolve_record_type("Item").unwrap();
        let headers = HeaderRows::new(strings(&["id", "power", "ver"]));
        let settings = settings();
        let mut schema = resolve(&headers, &item, &dir, &SchemaOptions {
            key_fields: vec!["id".into()],
            version_field: Some("ver".into()),
        })
        .unwrap();
        let conv = ConversionRegistry::new(&dir);
        let m = RowMaterializer::new(&dir, &item, &conv, &settings, true);
        let mut store = MemoryStore::new();

        let body = content(&[
            &["  ", "1", ""],
            &["a", "1", "9.9.9"],
            &["b", "1", "one.two"],
        ]);
        let skipped = m.materialize_row(0, &mut schema, &body, &mut store).unwrap();
        assert_eq!(skipped.report.outcome, RowOutcome::SkippedNoKey);
        assert!(skipped.record.is_none());

        let future = m.materialize_row(1, &mut schema, &body, &mut store).unwrap();
        assert_eq!(future.report.outcome, RowOutcome::VersionMismatch);

        let broken = m.materialize_row(2, &mut schema, &body, &mut store).unwrap();
        assert_eq!(broken.report.outcome, RowOutcome::ConversionFailed);

        assert!(store.is_empty());
        assert!(store.save_all().unwrap() == 0);
    }

    #[test]
    fn unsupported_array_element_invalidates_field_for_the_run() {
        let dir = directory();
        let item = dir.resolve_record_type("Item").unwrap();
        let headers = HeaderRows::new(strings(&["grid", "grid", "power"]));
        let settings = ImportSettings {
            key_fields: Vec::new(),
            version_field: None,
            ..settings()
        };
        let mut schema = resolve(&headers, &item, &dir, &SchemaOptions::default()).unwrap();
        let conv = ConversionRegistry::new(&dir);
        let m = RowMaterializer::new(&dir, &item, &conv, &settings, false);
        let mut store = MemoryStore::new();

        let body = content(&[&["1", "2", "5"], &["3", "4", "6"]]);
        let first = m.materialize_row(0, &mut schema, &body, &mut store).unwrap();
        assert_eq!(first.report.lifecycle, Some(Lifecycle::Transient));
        assert_eq!(first.report.field_failures.len(), 1);
        assert_eq!(
            schema.fields[1].invalid_reason,
            Some(InvalidReason::UnsupportedArrayElement)
        );

        let second = m.materialize_row(1, &mut schema, &body, &mut store).unwrap();
        assert!(second.report.field_failures.is_empty());
        assert_eq!(second.record.unwrap().get("power"), Some(&Value::Int64(6)));
        assert!(store.is_empty());
    }
}
