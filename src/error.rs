use thiserror::Error;

/// Convenience result type for import operations.
pub type ImportResult<T> = Result<T, ImportError>;

/// Error type returned by import functions.
///
/// Every variant is a run-level failure: it aborts the import before (or instead of) producing a
/// summary. Row-level and field-level problems are never errors; they are reported through
/// [`crate::import::RowReport`]s in the returned summary.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Underlying I/O error (e.g. file not found, permission denied).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV source error.
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON error from a settings file or a JSON-backed record store.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[cfg(feature = "excel")]
    /// Workbook source error (feature-gated behind `excel`).
    #[error("excel error: {0}")]
    Excel(#[from] calamine::Error),

    /// No registered type matches the requested name.
    #[error("type '{name}' not found")]
    TypeNotFound { name: String },

    /// More than one registered type shares the requested simple name.
    #[error("type name '{name}' is ambiguous; candidates: {candidates:?}")]
    AmbiguousType { name: String, candidates: Vec<String> },

    /// The type exists but is not a record type (e.g. an enum).
    #[error("type '{name}' is not a record type")]
    NotARecordType { name: String },

    /// A configured key field has no column in the header row.
    #[error("key field '{key}' has no column in the header row")]
    MissingKeyColumn { key: String },

    /// A configured member does not exist (or has the wrong shape) on a type.
    #[error("type '{type_name}' has no usable member '{member}': {message}")]
    MissingMember {
        type_name: String,
        member: String,
        message: String,
    },

    /// The destination table type has no collection member able to hold imported rows.
    #[error("table type '{table_type}' has no row collection for '{row_type}'")]
    MissingRowCollection { table_type: String, row_type: String },

    /// The join target table type does not register the configured find method.
    #[error("table type '{table_type}' has no find method '{method}'")]
    NoFindMethod { table_type: String, method: String },

    /// Join mode requires an existing, independently populated target table.
    #[error("join target table '{path}' does not exist")]
    JoinTableMissing { path: String },

    /// A stored object exists at a path but has a different type than requested.
    #[error("object at '{path}' has type '{found}', expected '{expected}'")]
    StorageTypeMismatch {
        path: String,
        expected: String,
        found: String,
    },

    /// A content row is wider than the header row.
    #[error("content row {row} has {found} cells but the header has {expected}")]
    RaggedContent {
        row: usize,
        expected: usize,
        found: usize,
    },

    /// Header rows are missing or malformed.
    #[error("invalid header: {message}")]
    InvalidHeader { message: String },

    /// Import settings are invalid.
    #[error("invalid settings: {message}")]
    Config { message: String },

    /// A post-import hook failed.
    #[error("post-import hook '{hook}' failed: {message}")]
    Hook { hook: String, message: String },
}
