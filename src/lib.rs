//! `record-import` imports tabular (CSV-shaped) content into strongly-typed records, driven by the
//! sheet's header rows and a registry of record types.
//!
//! The primary entrypoint is [`ingestion::import_from_path`], which reads a CSV (or, with the
//! `excel` feature, a workbook) and runs an [`import::Importer`] over it. Hosts that already hold
//! the cells can build a [`types::Sheet`] and call [`import::Importer::run`] directly.
//!
//! ## What an import does
//!
//! - Header rows (name row, optional type row, optional enabled row) are resolved against the
//!   target record type: one [`types::Field`] per column, unknown columns ignored with a warning.
//! - Each content row becomes one record. Key columns give it a stable identity so re-imports
//!   update records in place; columns sharing a base name (`tags`, `tags`, or `tags[0]`,
//!   `tags[1]`) accumulate into an array member; an optional version column drops rows written by
//!   a newer application.
//! - The destination is one of three [`import::Topology`]s: a persistent record per row, a flat
//!   table rebuilt on every run, or a join that attaches rows to parent rows of an existing table.
//!
//! Cell problems never stop a run: they are classified per row in the returned
//! [`import::ImportSummary`]. Only configuration problems (unknown type, missing key column,
//! missing find method, ...) fail the call with an [`ImportError`].
//!
//! ## Quick example
//!
//! ```rust
//! use record_import::directory::{TypeDescriptor, TypeDirectory};
//! use record_import::import::{ImportOptions, ImportSettings, Importer};
//! use record_import::ingestion::{csv::read_sheet_from_str, HeaderLayout};
//! use record_import::storage::MemoryStore;
//! use record_import::types::{DataType, Value};
//!
//! # fn main() -> Result<(), record_import::ImportError> {
//! let directory = TypeDirectory::from_types(vec![
//!     TypeDescriptor::record("Item")
//!         .member("id", DataType::Utf8)
//!         .member("power", DataType::Int64)
//!         .member("tags", DataType::Array(Box::new(DataType::Utf8))),
//! ]);
//! let sheet = read_sheet_from_str(
//!     "id,power,tags,tags\nsword,12,sharp,heavy\nshield,3,,\n",
//!     &HeaderLayout::names_only(),
//!     b',',
//! )?;
//!
//! let mut store = MemoryStore::new();
//! let options = ImportOptions::new(ImportSettings {
//!     key_fields: vec!["id".to_string()],
//!     ..ImportSettings::for_type("Item")
//! });
//! let summary = Importer::new(&directory, &mut store).run(&sheet, &options)?;
//!
//! assert_eq!(summary.created, 2);
//! let sword = store.get("Item/Item_sword").unwrap();
//! assert_eq!(sword.get("power"), Some(&Value::Int64(12)));
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`types`]: values, records, header rows and tabular content
//! - [`directory`]: registered record/enum types and cached member accessors
//! - [`convert`]: cell text to typed values, including reference lookups
//! - [`schema`]: header rows to fields
//! - [`storage`]: the record store contract plus in-memory and JSON-file stores
//! - [`import`]: row materialization, destination reconciliation and orchestration
//! - [`ingestion`]: CSV/workbook sources and path-based entrypoints
//! - [`error`]: error types used across the crate

pub mod convert;
pub mod directory;
pub mod error;
pub mod import;
pub mod ingestion;
pub mod schema;
pub mod storage;
pub mod types;

pub use error::{ImportError, ImportResult};
