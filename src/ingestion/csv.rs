//! CSV sheet source.

use std::io::Read;
use std::path::Path;

use crate::error::ImportResult;
use crate::types::Sheet;

use super::{assemble_sheet, HeaderLayout};

fn reader_builder(delimiter: u8) -> csv::ReaderBuilder {
    let mut builder = csv::ReaderBuilder::new();
    // Header rows are interpreted by `HeaderLayout`, and rows may be shorter than the name row.
    builder.has_headers(false).flexible(true).delimiter(delimiter);
    builder
}

/// Read a CSV file into a [`Sheet`].
///
/// Rules:
///
/// - The first rows are header rows as described by `layout`.
/// - Cells are kept as raw text; conversion happens during import.
/// - Content rows shorter than the name row are padded with blank cells.
pub fn read_sheet_from_path(path: impl AsRef<Path>, layout: &HeaderLayout, delimiter: u8) -> ImportResult<Sheet> {
    let mut rdr = reader_builder(delimiter).from_path(path)?;
    read_sheet_from_reader(&mut rdr, layout)
}

/// Read CSV text held in memory.
pub fn read_sheet_from_str(text: &str, layout: &HeaderLayout, delimiter: u8) -> ImportResult<Sheet> {
    let mut rdr = reader_builder(delimiter).from_reader(text.as_bytes());
    read_sheet_from_reader(&mut rdr, layout)
}

/// Read a sheet from an existing CSV reader.
pub fn read_sheet_from_reader<R: Read>(rdr: &mut csv::Reader<R>, layout: &HeaderLayout) -> ImportResult<Sheet> {
    let mut rows: Vec<Vec<String>> = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(str::to_string).collect());
    }
    assemble_sheet(rows, layout)
}
