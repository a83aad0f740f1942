//! Import orchestration.
//!
//! [`Importer::run`] sequences one import over a [`Sheet`]:
//!
//! - resolve the target type and the [`Schema`](crate::schema::Schema) (setup errors abort here)
//! - prepare the destination ([`Topology`]): per-record files, a flat table, or a join
//! - materialize every content row in order and hand it to the destination
//! - save storage once, then run [`PostImportHook`]s
//!
//! Row-level and field-level problems never fail the run; they are classified in the returned
//! [`ImportSummary`] and reported to the optional [`ImportObserver`].

pub mod materialize;
pub mod observer;
mod reconcile;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::convert::{ConversionRegistry, ReferenceResolver};
use crate::directory::TypeDirectory;
use crate::error::{ImportError, ImportResult};
use crate::schema::{self, SchemaOptions};
use crate::storage::RecordStore;
use crate::types::{Sheet, Version};

use materialize::{Materialized, RowMaterializer};
use reconcile::Reconciler;

pub use materialize::{
    identity_path, FieldFailure, FieldFailureKind, Lifecycle, OutcomeFlags, RowOutcome, RowReport,
};
pub use observer::{
    severity_for_error, severity_for_row, CompositeObserver, FileObserver, ImportContext, ImportObserver,
    ImportSeverity, ImportStats, TracingObserver,
};
pub use reconcile::{Destination, JoinFailure};

/// Flat-table destination: every successful row is appended to one table, rebuilt per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableTarget {
    /// Record type of the table container.
    pub table_type: String,
    /// Storage path of the table.
    pub path: String,
    /// Row collection member; defaults to the first member holding the imported type.
    #[serde(default)]
    pub rows_member: Option<String>,
}

/// Join destination: rows are attached to parent rows of an existing table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinTarget {
    /// Record type of the existing table.
    pub table_type: String,
    /// Storage path of the existing table.
    pub table_path: String,
    /// Parent row collection member; defaults to the first record collection on the table.
    #[serde(default)]
    pub rows_member: Option<String>,
    /// Collection member on the parent row type receiving imported records.
    pub nested_member: String,
    /// Member of the imported type holding the parent's key.
    pub join_key: String,
    /// Find method registered on the table type.
    pub find_method: String,
    /// Member of the imported type that must equal the parent collection length before append.
    #[serde(default)]
    pub index_member: Option<String>,
}

/// Destination topology of an import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Topology {
    /// One persistent record per row.
    #[default]
    Records,
    Table(TableTarget),
    Join(JoinTarget),
}

/// Data-only import configuration. Loadable from JSON.
///
/// ```
/// use record_import::import::{ImportSettings, Topology};
///
/// let settings = ImportSettings::from_json_str(
///     r#"{
///         "target_type": "Item",
///         "key_fields": ["id"],
///         "version_field": "ver",
///         "app_version": "1.2.0",
///         "topology": { "mode": "table", "table_type": "ItemTable", "path": "tables/items" }
///     }"#,
/// )?;
/// assert!(matches!(settings.topology, Topology::Table(_)));
/// # Ok::<(), record_import::ImportError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportSettings {
    /// Target record type, simple or `namespace.Name`.
    pub target_type: String,
    /// Base names of key columns, in identity order.
    pub key_fields: Vec<String>,
    /// Base name of the version column.
    pub version_field: Option<String>,
    /// Running application version for the version gate.
    pub app_version: Version,
    /// Types resolved through the reference resolver when direct parsing fails.
    pub reference_types: Vec<String>,
    pub topology: Topology,
    /// Directory prefix of persistent record paths; defaults to the target type name.
    pub output_dir: Option<String>,
    /// Log unparsable cells at warn (otherwise debug).
    pub log_conversion_failures: bool,
    /// Log blank cells at debug.
    pub log_blank_cells: bool,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            target_type: String::new(),
            key_fields: Vec::new(),
            version_field: None,
            app_version: Version::current(),
            reference_types: Vec::new(),
            topology: Topology::Records,
            output_dir: None,
            log_conversion_failures: true,
            log_blank_cells: false,
        }
    }
}

impl ImportSettings {
    /// Settings for `target_type` with every other option at its default.
    pub fn for_type(target_type: impl Into<String>) -> Self {
        Self {
            target_type: target_type.into(),
            ..Default::default()
        }
    }

    pub fn from_json_str(json: &str) -> ImportResult<Self> {
        let settings: Self = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_path(path: impl AsRef<Path>) -> ImportResult<Self> {
        let text = fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    /// Reject settings no import could run with.
    pub fn validate(&self) -> ImportResult<()> {
        if self.target_type.trim().is_empty() {
            return Err(ImportError::Config {
                message: "target_type is empty".to_string(),
            });
        }
        if self.key_fields.iter().any(|k| k.trim().is_empty()) {
            return Err(ImportError::Config {
                message: "key_fields contains a blank name".to_string(),
            });
        }
        if let Topology::Join(j) = &self.topology {
            if j.join_key.trim().is_empty() || j.nested_member.trim().is_empty() {
                return Err(ImportError::Config {
                    message: "join topology needs join_key and nested_member".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn schema_options(&self) -> SchemaOptions {
        SchemaOptions {
            key_fields: self.key_fields.clone(),
            version_field: self.version_field.clone(),
        }
    }
}

/// Host hook run after storage is saved.
pub trait PostImportHook: Send + Sync {
    fn name(&self) -> &str;

    fn after_import(&self, summary: &ImportSummary, store: &mut dyn RecordStore) -> Result<(), String>;
}

/// Settings plus runtime collaborators for one import.
///
/// Use [`Default`] (or [`ImportOptions::new`]) and struct-update syntax for the rest.
#[derive(Clone)]
pub struct ImportOptions {
    pub settings: ImportSettings,
    /// Lookup for reference-typed cells.
    pub reference_resolver: Option<Arc<dyn ReferenceResolver>>,
    /// Optional observer for logging/alerts.
    pub observer: Option<Arc<dyn ImportObserver>>,
    /// Severity threshold at which `on_alert` is invoked.
    pub alert_at_or_above: ImportSeverity,
    pub post_import_hooks: Vec<Arc<dyn PostImportHook>>,
    /// Checked before every row; once set the run stops early (no rollback).
    pub cancel: Option<Arc<AtomicBool>>,
}

impl fmt::Debug for ImportOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportOptions")
            .field("settings", &self.settings)
            .field("reference_resolver_set", &self.reference_resolver.is_some())
            .field("observer_set", &self.observer.is_some())
            .field("alert_at_or_above", &self.alert_at_or_above)
            .field("post_import_hooks_len", &self.post_import_hooks.len())
            .field("cancel_set", &self.cancel.is_some())
            .finish()
    }
}

impl Default for ImportOptions {
    fn default() -> Self {
        Self {
            settings: ImportSettings::default(),
            reference_resolver: None,
            observer: None,
            alert_at_or_above: ImportSeverity::Critical,
            post_import_hooks: Vec::new(),
            cancel: None,
        }
    }
}

impl ImportOptions {
    pub fn new(settings: ImportSettings) -> Self {
        Self {
            settings,
            ..Default::default()
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|c| c.load(Ordering::Relaxed))
    }
}

/// Outcome of a completed run. Returned even when rows were skipped or failed.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportSummary {
    /// Simple name of the imported type.
    pub target_type: String,
    /// Rows materialized and attached.
    pub success_count: usize,
    pub created: usize,
    pub updated: usize,
    pub skipped_no_key: usize,
    /// Rows carrying the conversion-failed flag (aborted or partially populated).
    pub conversion_failed: usize,
    pub version_mismatch: usize,
    pub join_failures: usize,
    /// Individual cells that did not convert.
    pub field_failures: usize,
    pub destination: Destination,
    /// One report per visited content row, in row order.
    pub reports: Vec<RowReport>,
    pub cancelled: bool,
    /// Objects written by the final save.
    pub saved: usize,
}

impl ImportSummary {
    fn new(target_type: String, destination: Destination) -> Self {
        Self {
            target_type,
            success_count: 0,
            created: 0,
            updated: 0,
            skipped_no_key: 0,
            conversion_failed: 0,
            version_mismatch: 0,
            join_failures: 0,
            field_failures: 0,
            destination,
            reports: Vec::new(),
            cancelled: false,
            saved: 0,
        }
    }

    fn record(&mut self, report: RowReport) {
        match report.outcome {
            RowOutcome::Success => {
                self.success_count += 1;
                match report.lifecycle {
                    Some(Lifecycle::Created) => self.created += 1,
                    Some(Lifecycle::Updated) => self.updated += 1,
                    _ => {}
                }
            }
            RowOutcome::SkippedNoKey => self.skipped_no_key += 1,
            RowOutcome::VersionMismatch => self.version_mismatch += 1,
            RowOutcome::JoinNoReferenceRow | RowOutcome::JoinIndexMismatch => self.join_failures += 1,
            RowOutcome::ConversionFailed => {}
        }
        if report.flags.contains(OutcomeFlags::CONVERSION_FAILED) {
            self.conversion_failed += 1;
        }
        self.field_failures += report.field_failures.len();
        self.reports.push(report);
    }

    /// Reports of rows that were not successfully imported or lost cells.
    pub fn problem_rows(&self) -> impl Iterator<Item = &RowReport> {
        self.reports
            .iter()
            .filter(|r| !r.is_success() || !r.field_failures.is_empty())
    }

    pub fn stats(&self) -> ImportStats {
        ImportStats {
            rows: self.reports.len(),
            succeeded: self.success_count,
            created: self.created,
            updated: self.updated,
            skipped: self.skipped_no_key,
            failed: self
                .reports
                .iter()
                .filter(|r| !r.is_success() && r.outcome != RowOutcome::SkippedNoKey)
                .count(),
        }
    }
}

/// Runs imports against one type directory and one record store.
pub struct Importer<'a> {
    directory: &'a TypeDirectory,
    store: &'a mut dyn RecordStore,
    source: Option<PathBuf>,
}

impl fmt::Debug for Importer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Importer")
            .field("directory", &self.directory)
            .field("source", &self.source)
            .finish()
    }
}

impl<'a> Importer<'a> {
    pub fn new(directory: &'a TypeDirectory, store: &'a mut dyn RecordStore) -> Self {
        Self {
            directory,
            store,
            source: None,
        }
    }

    /// Source file reported to observers.
    pub fn with_source(mut self, path: impl AsRef<Path>) -> Self {
        self.source = Some(path.as_ref().to_path_buf());
        self
    }

    /// Import every content row of `sheet`.
    ///
    /// When an observer is configured, this reports:
    ///
    /// - `on_row` for each visited row
    /// - `on_success` when the run completes, with summary stats
    /// - `on_failure` on a run-level error, with a computed severity
    /// - `on_alert` on failure when the computed severity is >= `options.alert_at_or_above`
    pub fn run(&mut self, sheet: &Sheet, options: &ImportOptions) -> ImportResult<ImportSummary> {
        let ctx = ImportContext {
            target_type: options.settings.target_type.clone(),
            source: self.source.clone(),
        };

        let result = self.run_inner(sheet, options, &ctx);

        if let Some(obs) = options.observer.as_ref() {
            match &result {
                Ok(summary) => obs.on_success(&ctx, summary.stats()),
                Err(e) => {
                    let sev = severity_for_error(e);
                    obs.on_failure(&ctx, sev, e);
                    if sev >= options.alert_at_or_above {
                        obs.on_alert(&ctx, sev, e);
                    }
                }
            }
        }

        result
    }

    fn run_inner(
        &mut self,
        sheet: &Sheet,
        options: &ImportOptions,
        ctx: &ImportContext,
    ) -> ImportResult<ImportSummary> {
        let settings = &options.settings;
        settings.validate()?;

        let target = self.directory.resolve_record_type(&settings.target_type)?;
        let mut schema = schema::resolve(&sheet.headers, &target, self.directory, &settings.schema_options())?;
        for field in schema.invalid_fields() {
            warn!(
                target_type = %target.name,
                column = field.column_index,
                field = %field.name,
                reason = ?field.invalid_reason,
                "column ignored"
            );
        }

        let output_dir = settings
            .output_dir
            .clone()
            .unwrap_or_else(|| target.name.clone());
        let mut reconciler = Reconciler::setup(
            &settings.topology,
            &target,
            &output_dir,
            self.directory,
            &mut *self.store,
        )?;

        let converter = ConversionRegistry::new(self.directory)
            .with_reference_types(settings.reference_types.iter().cloned())
            .with_resolver(options.reference_resolver.clone());
        let materializer = RowMaterializer::new(
            self.directory,
            &target,
            &converter,
            settings,
            reconciler.is_persistent(),
        );

        info!(
            target_type = %target.name,
            rows = sheet.content.row_count(),
            destination = %reconciler.destination(),
            "import started"
        );

        let mut summary = ImportSummary::new(target.name.clone(), reconciler.destination());
        for row in 0..sheet.content.row_count() {
            if options.is_cancelled() {
                warn!(target_type = %target.name, row, "import cancelled");
                summary.cancelled = true;
                break;
            }

            let Materialized { mut report, record } =
                materializer.materialize_row(row, &mut schema, &sheet.content, &mut *self.store)?;
            if let Some(record) = record {
                let identity = report.identity.clone().unwrap_or_default();
                if let Err(failure) = reconciler.attach(&identity, record, &mut *self.store)? {
                    warn!(row, error = %failure, "row not attached");
                    report.apply_join_failure(&failure);
                }
            }

            if let Some(obs) = options.observer.as_ref() {
                obs.on_row(ctx, &report);
            }
            summary.record(report);
        }

        reconciler.finish(&mut *self.store)?;
        summary.saved = self.store.save_all()?;

        for hook in &options.post_import_hooks {
            hook.after_import(&summary, &mut *self.store)
                .map_err(|message| ImportError::Hook {
                    hook: hook.name().to_string(),
                    message,
                })?;
        }

        info!(
            target_type = %summary.target_type,
            succeeded = summary.success_count,
            created = summary.created,
            updated = summary.updated,
            skipped_no_key = summary.skipped_no_key,
            conversion_failed = summary.conversion_failed,
            version_mismatch = summary.version_mismatch,
            join_failures = summary.join_failures,
            saved = summary.saved,
            cancelled = summary.cancelled,
            "import complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::{ImportSettings, Topology};

    #[test]
    fn settings_default_and_validate() {
        let settings = ImportSettings::default();
        assert!(settings.log_conversion_failures);
        assert_eq!(settings.topology, Topology::Records);
        assert!(settings.validate().is_err());
        assert!(ImportSettings::for_type("Item").validate().is_ok());
    }

    #[test]
    fn settings_parse_join_topology() {
        let settings = ImportSettings::from_json_str(
            r#"{
                "target_type": "Drop",
                "topology": {
                    "mode": "join",
                    "table_type": "MonsterTable",
                    "table_path": "tables/monsters",
                    "nested_member": "drops",
                    "join_key": "owner",
                    "find_method": "FindById"
                }
            }"#,
        )
        .unwrap();
        match settings.topology {
            Topology::Join(j) => {
                assert_eq!(j.find_method, "FindById");
                assert!(j.rows_member.is_none() && j.index_member.is_none());
            }
            other => panic!("unexpected topology {other:?}"),
        }
        assert_eq!(settings.app_version, crate::types::Version::current());
    }

    #[test]
    fn settings_reject_bad_versions_and_blank_keys() {
        assert!(ImportSettings::from_json_str(r#"{"target_type":"A","app_version":"1"}"#).is_err());
        let err = ImportSettings::from_json_str(r#"{"target_type":"A","key_fields":[" "]}"#).unwrap_err();
        assert!(err.to_string().contains("blank name"));
    }
}
