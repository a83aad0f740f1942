//! Unified path-based import entrypoint.
//!
//! Most callers should use [`import_from_path`], which reads a file into a [`Sheet`] and imports
//! it with an [`Importer`].
//!
//! - If [`SourceOptions::format`] is `None`, the source format is inferred from the file
//!   extension.
//! - If an [`crate::import::ImportObserver`] is configured, read failures are reported to it like
//!   any other run-level failure.

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::directory::TypeDirectory;
use crate::error::{ImportError, ImportResult};
use crate::import::{severity_for_error, ImportContext, ImportOptions, ImportSummary, Importer};
use crate::storage::RecordStore;
use crate::types::Sheet;

use super::{csv, HeaderLayout};

/// Supported source formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    /// Comma-separated values (or another single-byte delimiter).
    Csv,
    /// Spreadsheet/workbook formats (feature-gated behind `excel`).
    Excel,
}

impl SourceFormat {
    /// Parse a source format from a file extension (case-insensitive).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "csv" | "tsv" | "txt" => Some(Self::Csv),
            "xlsx" | "xls" | "xlsm" | "xlsb" | "ods" => Some(Self::Excel),
            _ => None,
        }
    }
}

/// How to choose the worksheet when reading a workbook.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SheetSelection {
    /// Read the first sheet (default).
    #[default]
    First,
    /// Read a single named sheet.
    Named(String),
}

/// Options controlling how a source file becomes a [`Sheet`].
///
/// Use [`Default`] for common cases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceOptions {
    /// If `None`, auto-detect format from file extension.
    pub format: Option<SourceFormat>,
    pub layout: HeaderLayout,
    /// CSV field delimiter. `.tsv` files default to tab when this is left at `,`.
    pub delimiter: u8,
    /// Workbook-specific options.
    pub sheet: SheetSelection,
}

impl Default for SourceOptions {
    fn default() -> Self {
        Self {
            format: None,
            layout: HeaderLayout::default(),
            delimiter: b',',
            sheet: SheetSelection::default(),
        }
    }
}

fn infer_format_from_path(path: &Path) -> ImportResult<SourceFormat> {
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ImportError::Config {
            message: format!("cannot infer format: path has no extension ({})", path.display()),
        })?;

    SourceFormat::from_extension(ext).ok_or_else(|| ImportError::Config {
        message: format!(
            "cannot infer format from extension '{ext}' for path ({})",
            path.display()
        ),
    })
}

fn effective_delimiter(path: &Path, options: &SourceOptions) -> u8 {
    let is_tsv = path
        .extension()
        .and_then(|s| s.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("tsv"));
    if is_tsv && options.delimiter == b',' {
        b'\t'
    } else {
        options.delimiter
    }
}

/// Read a source file into a [`Sheet`].
pub fn read_sheet(path: impl AsRef<Path>, options: &SourceOptions) -> ImportResult<Sheet> {
    let path = path.as_ref();
    let format = match options.format {
        Some(f) => f,
        None => infer_format_from_path(path)?,
    };
    match format {
        SourceFormat::Csv => csv::read_sheet_from_path(path, &options.layout, effective_delimiter(path, options)),
        SourceFormat::Excel => read_excel_dispatch(path, options),
    }
}

fn read_excel_dispatch(path: &Path, options: &SourceOptions) -> ImportResult<Sheet> {
    // Avoid unused warnings when the feature is off.
    let _ = (path, options);

    #[cfg(feature = "excel")]
    {
        use super::excel;

        match &options.sheet {
            SheetSelection::First => excel::read_sheet_from_workbook(path, None, &options.layout),
            SheetSelection::Named(name) => excel::read_sheet_from_workbook(path, Some(name.as_str()), &options.layout),
        }
    }

    #[cfg(not(feature = "excel"))]
    {
        Err(ImportError::Config {
            message: "workbook sources not enabled (enable cargo feature 'excel')".to_string(),
        })
    }
}

/// Read `path` and import it into `store`.
///
/// A read failure is reported to `options.observer` (with alerting) before it is returned; the
/// import itself reports through [`Importer::run`].
pub fn import_from_path(
    path: impl AsRef<Path>,
    directory: &TypeDirectory,
    store: &mut dyn RecordStore,
    source: &SourceOptions,
    options: &ImportOptions,
) -> ImportResult<ImportSummary> {
    let path = path.as_ref();
    let sheet = match read_sheet(path, source) {
        Ok(sheet) => sheet,
        Err(e) => {
            if let Some(obs) = options.observer.as_ref() {
                let ctx = ImportContext {
                    target_type: options.settings.target_type.clone(),
                    source: Some(path.to_path_buf()),
                };
                let sev = severity_for_error(&e);
                obs.on_failure(&ctx, sev, &e);
                if sev >= options.alert_at_or_above {
                    obs.on_alert(&ctx, sev, &e);
                }
            }
            return Err(e);
        }
    };

    Importer::new(directory, store)
        .with_source(path)
        .run(&sheet, options)
}

/// Owned description of one path-based import.
///
/// This can be useful if you want to queue imports, e.g. for [`import_all`].
#[derive(Clone)]
pub struct ImportRequest {
    /// Path to the source file.
    pub path: PathBuf,
    pub source: SourceOptions,
    pub options: ImportOptions,
}

impl fmt::Debug for ImportRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportRequest")
            .field("path", &self.path)
            .field("target_type", &self.options.settings.target_type)
            .field("source", &self.source)
            .finish()
    }
}

impl ImportRequest {
    /// Execute the request by calling [`import_from_path`].
    pub fn run(&self, directory: &TypeDirectory, store: &mut dyn RecordStore) -> ImportResult<ImportSummary> {
        import_from_path(&self.path, directory, store, &self.source, &self.options)
    }
}

/// Run every request in order against one store.
///
/// A failing request does not stop the batch; each result is returned in request order.
pub fn import_all(
    requests: &[ImportRequest],
    directory: &TypeDirectory,
    store: &mut dyn RecordStore,
) -> Vec<ImportResult<ImportSummary>> {
    let mut results = Vec::with_capacity(requests.len());
    for request in requests {
        let result = request.run(directory, &mut *store);
        if let Err(e) = &result {
            warn!(path = %request.path.display(), error = %e, "batch import failed");
        }
        results.push(result);
    }
    info!(
        requests = requests.len(),
        failed = results.iter().filter(|r| r.is_err()).count(),
        "batch import finished"
    );
    results
}

/// One request per file matching `pattern`, in path order.
///
/// Each request copies `template`; when the template's target type is empty the file stem is used
/// (`items/Weapon.csv` imports `Weapon`).
pub fn requests_from_glob(
    pattern: &str,
    source: &SourceOptions,
    template: &ImportOptions,
) -> ImportResult<Vec<ImportRequest>> {
    let paths = glob::glob(pattern).map_err(|e| ImportError::Config {
        message: format!("invalid glob pattern '{pattern}': {e}"),
    })?;

    let mut requests = Vec::new();
    for entry in paths {
        let path = entry.map_err(|e| ImportError::Io(e.into()))?;
        if !path.is_file() {
            continue;
        }
        let mut options = template.clone();
        if options.settings.target_type.trim().is_empty() {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or_default()
                .to_string();
            options.settings.target_type = stem;
        }
        requests.push(ImportRequest {
            path,
            source: source.clone(),
            options,
        });
    }
    Ok(requests)
}
