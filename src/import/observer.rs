//! Import run reporting.
//!
//! An [`ImportObserver`] sees every row report and the end of each run: its stats on success, or
//! the error with an [`ImportSeverity`] on failure. Failures at or above the configured threshold
//! are also raised as alerts. [`TracingObserver`] logs through `tracing`, [`FileObserver`] keeps a
//! plain-text event log, and [`CompositeObserver`] combines several.

use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::{error, info, warn};

use crate::error::ImportError;

use super::materialize::{RowOutcome, RowReport};

/// Severity classification used for observer callbacks and alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ImportSeverity {
    /// Informational event.
    Info,
    /// Warning-level event (non-fatal).
    Warning,
    /// Error-level event (import failed).
    Error,
    /// Critical error (typically I/O or other infrastructure failures).
    Critical,
}

/// Context about an import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportContext {
    /// Target record type as configured.
    pub target_type: String,
    /// Source file, when the sheet came from one.
    pub source: Option<PathBuf>,
}

impl ImportContext {
    fn source_display(&self) -> String {
        self.source
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "-".to_string())
    }
}

/// Counters reported on a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ImportStats {
    /// Content rows visited (less than the sheet's row count when cancelled).
    pub rows: usize,
    pub succeeded: usize,
    pub created: usize,
    pub updated: usize,
    /// Rows skipped for a blank key.
    pub skipped: usize,
    /// Rows aborted or left unattached.
    pub failed: usize,
}

/// Observer interface for import outcomes.
///
/// Implementors can record metrics, logs, or trigger alerts.
pub trait ImportObserver: Send + Sync {
    /// Called once per content row, after reconciliation.
    fn on_row(&self, _ctx: &ImportContext, _report: &RowReport) {}

    /// Called when the run completes (including cancelled runs).
    fn on_success(&self, _ctx: &ImportContext, _stats: ImportStats) {}

    /// Called when the run fails.
    fn on_failure(&self, _ctx: &ImportContext, _severity: ImportSeverity, _error: &ImportError) {}

    /// Called when a failure meets an alert threshold.
    ///
    /// Default behavior forwards to [`Self::on_failure`].
    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        self.on_failure(ctx, severity, error)
    }
}

/// Severity of a run-level error: infrastructure failures are critical, configuration ones are not.
pub fn severity_for_error(e: &ImportError) -> ImportSeverity {
    match e {
        ImportError::Io(_) => ImportSeverity::Critical,
        ImportError::Csv(err) => match err.kind() {
            ::csv::ErrorKind::Io(_) => ImportSeverity::Critical,
            _ => ImportSeverity::Error,
        },
        ImportError::Json(err) if err.is_io() => ImportSeverity::Critical,
        _ => ImportSeverity::Error,
    }
}

/// Severity of a row report, for observers that only care about problems.
pub fn severity_for_row(report: &RowReport) -> ImportSeverity {
    match report.outcome {
        RowOutcome::Success if report.field_failures.is_empty() => ImportSeverity::Info,
        // Blank keys are an expected way of leaving a row out.
        RowOutcome::SkippedNoKey => ImportSeverity::Info,
        RowOutcome::Success
        | RowOutcome::ConversionFailed
        | RowOutcome::VersionMismatch
        | RowOutcome::JoinNoReferenceRow
        | RowOutcome::JoinIndexMismatch => ImportSeverity::Warning,
    }
}

/// Forwards every callback, in order, to each inner observer.
#[derive(Default, Clone)]
pub struct CompositeObserver {
    observers: Vec<Arc<dyn ImportObserver>>,
}

impl CompositeObserver {
    pub fn new(observers: Vec<Arc<dyn ImportObserver>>) -> Self {
        Self { observers }
    }

    /// Append one more observer.
    pub fn with(mut self, observer: Arc<dyn ImportObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    fn each(&self, f: impl Fn(&dyn ImportObserver)) {
        self.observers.iter().for_each(|o| f(o.as_ref()));
    }
}

impl fmt::Debug for CompositeObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeObserver")
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl ImportObserver for CompositeObserver {
    fn on_row(&self, ctx: &ImportContext, report: &RowReport) {
        self.each(|o| o.on_row(ctx, report));
    }

    fn on_success(&self, ctx: &ImportContext, stats: ImportStats) {
        self.each(|o| o.on_success(ctx, stats));
    }

    fn on_failure(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        self.each(|o| o.on_failure(ctx, severity, error));
    }

    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        self.each(|o| o.on_alert(ctx, severity, error));
    }
}

/// Emits import events as `tracing` events.
///
/// Successful rows are not logged; problem rows are logged at warn.
#[derive(Debug, Default)]
pub struct TracingObserver;

impl ImportObserver for TracingObserver {
    fn on_row(&self, ctx: &ImportContext, report: &RowReport) {
        if severity_for_row(report) < ImportSeverity::Warning {
            return;
        }
        warn!(
            target_type = %ctx.target_type,
            row = report.row,
            outcome = ?report.outcome,
            flags = ?report.flags,
            field_failures = report.field_failures.len(),
            message = report.message.as_deref().unwrap_or(""),
            "import row reported"
        );
    }

    fn on_success(&self, ctx: &ImportContext, stats: ImportStats) {
        info!(
            target_type = %ctx.target_type,
            source = %ctx.source_display(),
            rows = stats.rows,
            succeeded = stats.succeeded,
            created = stats.created,
            updated = stats.updated,
            skipped = stats.skipped,
            failed = stats.failed,
            "import finished"
        );
    }

    fn on_failure(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        error!(
            target_type = %ctx.target_type,
            source = %ctx.source_display(),
            severity = ?severity,
            error = %error,
            "import failed"
        );
    }

    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        error!(
            alert = true,
            target_type = %ctx.target_type,
            source = %ctx.source_display(),
            severity = ?severity,
            error = %error,
            "import alert"
        );
    }
}

/// Appends one line per import event to a log file.
///
/// Lines read `<unix secs> <event> type=<target> source=<path> <detail>`. Clean rows are not
/// written; problem rows carry their outcome, flags and identity. The file is opened on the first
/// event and kept open; write errors are dropped.
#[derive(Debug)]
pub struct FileObserver {
    path: PathBuf,
    file: Mutex<Option<File>>,
}

impl FileObserver {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_event(&self, ctx: &ImportContext, event: &str, detail: fmt::Arguments<'_>) {
        let Ok(mut slot) = self.file.lock() else {
            return;
        };
        if slot.is_none() {
            *slot = OpenOptions::new().create(true).append(true).open(&self.path).ok();
        }
        let Some(file) = slot.as_mut() else {
            return;
        };
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        let _ = writeln!(
            file,
            "{secs} {event} type={} source={} {detail}",
            ctx.target_type,
            ctx.source_display()
        );
    }
}

impl ImportObserver for FileObserver {
    fn on_row(&self, ctx: &ImportContext, report: &RowReport) {
        if severity_for_row(report) == ImportSeverity::Info {
            return;
        }
        let fields: Vec<&str> = report.field_failures.iter().map(|f| f.field.as_str()).collect();
        self.write_event(
            ctx,
            "row",
            format_args!(
                "row={} outcome={:?} flags={} identity={} failed_fields={}",
                report.row,
                report.outcome,
                report.flags.names().join("|"),
                report.identity.as_deref().unwrap_or("-"),
                fields.join(",")
            ),
        );
    }

    fn on_success(&self, ctx: &ImportContext, stats: ImportStats) {
        self.write_event(
            ctx,
            "done",
            format_args!(
                "rows={} succeeded={} created={} updated={} skipped={} failed={}",
                stats.rows, stats.succeeded, stats.created, stats.updated, stats.skipped, stats.failed
            ),
        );
    }

    fn on_failure(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        self.write_event(ctx, "failed", format_args!("severity={severity:?} error={error}"));
    }

    fn on_alert(&self, ctx: &ImportContext, severity: ImportSeverity, error: &ImportError) {
        self.write_event(ctx, "alert", format_args!("severity={severity:?} error={error}"));
    }
}
