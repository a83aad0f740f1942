//! Tabular sources and path-based import entrypoints.
//!
//! Most callers should use [`import_from_path`] (from [`unified`]) which:
//!
//! - auto-detects the source format by file extension (or you can override via [`SourceOptions`])
//! - splits the header rows off the content according to a [`HeaderLayout`]
//! - runs an [`crate::import::Importer`] over the resulting [`crate::types::Sheet`]
//!
//! Format-specific readers are also available under:
//! - [`csv`]
//! - `excel` (feature `excel`)

pub mod csv;
#[cfg(feature = "excel")]
pub mod excel;
pub mod unified;

use crate::error::{ImportError, ImportResult};
use crate::types::{HeaderRows, Sheet, TabularContent};

pub use unified::{
    import_all, import_from_path, read_sheet, requests_from_glob, ImportRequest, SheetSelection, SourceFormat,
    SourceOptions,
};

/// Which leading rows of a source are header rows.
///
/// The name row always comes first, then the type row, then the enabled row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderLayout {
    /// A declared-type row follows the name row.
    pub type_row: bool,
    /// An enabled-flag row follows the name (and type) rows.
    pub enabled_row: bool,
    /// Drop content rows whose cells are all blank.
    pub skip_blank_rows: bool,
}

impl Default for HeaderLayout {
    fn default() -> Self {
        Self {
            type_row: true,
            enabled_row: false,
            skip_blank_rows: true,
        }
    }
}

impl HeaderLayout {
    /// Name row only.
    pub fn names_only() -> Self {
        Self {
            type_row: false,
            ..Default::default()
        }
    }

    pub fn header_row_count(&self) -> usize {
        1 + usize::from(self.type_row) + usize::from(self.enabled_row)
    }
}

fn is_blank(cell: &str) -> bool {
    cell.trim().is_empty()
}

fn fit_width(mut row: Vec<String>, width: usize) -> Vec<String> {
    row.resize(width, String::new());
    row
}

/// Split raw source rows into a [`Sheet`].
///
/// Trailing blank header names are dropped (spreadsheet exports often pad rows), and so are blank
/// cells past the header width. Non-blank cells past it are a [`ImportError::RaggedContent`].
pub fn assemble_sheet(rows: Vec<Vec<String>>, layout: &HeaderLayout) -> ImportResult<Sheet> {
    let needed = layout.header_row_count();
    if rows.len() < needed {
        return Err(ImportError::InvalidHeader {
            message: format!("expected {needed} header row(s), found {}", rows.len()),
        });
    }

    let mut rows = rows.into_iter();
    let mut names = rows.next().unwrap_or_default();
    while names.last().is_some_and(|n| is_blank(n)) {
        names.pop();
    }
    if names.is_empty() {
        return Err(ImportError::InvalidHeader {
            message: "name row is empty".to_string(),
        });
    }
    let width = names.len();

    let mut headers = HeaderRows::new(names);
    if layout.type_row {
        headers = headers.with_types(fit_width(rows.next().unwrap_or_default(), width));
    }
    if layout.enabled_row {
        headers = headers.with_enabled(fit_width(rows.next().unwrap_or_default(), width));
    }

    let content: Vec<Vec<String>> = rows
        .filter(|r| !(layout.skip_blank_rows && r.iter().all(|c| is_blank(c))))
        .map(|mut r| {
            while r.len() > width && r.last().is_some_and(|c| is_blank(c)) {
                r.pop();
            }
            r
        })
        .collect();

    Ok(Sheet {
        content: TabularContent::new(width, content)?,
        headers,
    })
}
