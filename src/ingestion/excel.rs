#![cfg(feature = "excel")]

use std::path::Path;

use calamine::{open_workbook_auto, Data, Reader};

use crate::error::{ImportError, ImportResult};
use crate::types::Sheet;

use super::{assemble_sheet, HeaderLayout};

/// Read one worksheet of a workbook (`.xlsx`, `.xls`, `.ods`, etc.) into a [`Sheet`].
///
/// Behavior:
/// - Picks `sheet_name` if provided; otherwise uses the first sheet in the workbook
/// - Leading fully-empty rows are skipped; the first non-empty row is the name row
/// - Every cell is rendered as text (whole floats without a fractional part)
pub fn read_sheet_from_workbook(
    path: impl AsRef<Path>,
    sheet_name: Option<&str>,
    layout: &HeaderLayout,
) -> ImportResult<Sheet> {
    let mut workbook = open_workbook_auto(path)?;

    let sheet = match sheet_name {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| ImportError::InvalidHeader {
                message: "workbook has no sheets".to_string(),
            })?,
    };

    let range = workbook.worksheet_range(&sheet)?;
    let rows: Vec<Vec<String>> = range
        .rows()
        .skip_while(|row| row.iter().all(|c| matches!(c, Data::Empty)))
        .map(|row| row.iter().map(cell_to_string).collect())
        .collect();

    assemble_sheet(rows, layout).map_err(|e| match e {
        ImportError::InvalidHeader { message } => ImportError::InvalidHeader {
            message: format!("sheet '{sheet}': {message}"),
        },
        other => other,
    })
}

/// Names of every sheet in the workbook, in workbook order.
pub fn sheet_names(path: impl AsRef<Path>) -> ImportResult<Vec<String>> {
    let workbook = open_workbook_auto(path)?;
    Ok(workbook.sheet_names().to_vec())
}

const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

fn cell_to_string(c: &Data) -> String {
    match c {
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        // Whole floats print without a fraction only while every integer is exactly representable.
        Data::Float(f) if f.fract() == 0.0 && f.abs() < MAX_EXACT_INTEGER => (*f as i64).to_string(),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(f) => f.to_string(),
        Data::DateTimeIso(s) => s.clone(),
        Data::DurationIso(s) => s.clone(),
        Data::Error(e) => format!("{e:?}"),
        Data::Empty => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use calamine::Data;

    use super::cell_to_string;

    #[test]
    fn whole_floats_render_as_integers_only_when_exact() {
        assert_eq!(cell_to_string(&Data::Float(12.0)), "12");
        assert_eq!(cell_to_string(&Data::Float(-3.0)), "-3");
        assert_eq!(cell_to_string(&Data::Float(2.5)), "2.5");

        let big = cell_to_string(&Data::Float(1e20));
        assert_eq!(big.parse::<f64>().unwrap(), 1e20);
        assert_ne!(big, i64::MAX.to_string());
    }

    #[test]
    fn other_cells_render_as_text() {
        assert_eq!(cell_to_string(&Data::Bool(true)), "true");
        assert_eq!(cell_to_string(&Data::Int(7)), "7");
        assert_eq!(cell_to_string(&Data::Empty), "");
    }
}
