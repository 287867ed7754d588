//! Error types for the reweighting pipeline.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading data or building a pipeline.
///
/// Per-event numeric edge cases (out-of-range lookups, out-of-range histogram values) are
/// never errors; they are resolved by the neutral-weight and discard policies.
#[derive(Error, Debug)]
pub enum Error {
    /// The event table or spline file does not exist or cannot be opened.
    #[error("table not found: {}", path.display())]
    TableNotFound { path: PathBuf },

    /// A requested column is absent from the table.
    #[error("column '{name}' not found in table '{table}'")]
    ColumnNotFound { table: String, name: String },

    /// A requested column holds a null value.
    #[error("column '{column}' has a missing value at row {row}")]
    MissingValue { column: String, row: usize },

    /// Parameter vectors have the wrong shape.
    #[error("invalid parameters: {0}")]
    InvalidParameters(String),

    /// Bin edges are malformed or do not match.
    #[error("invalid binning: {0}")]
    InvalidBinning(String),

    /// Pipeline configuration is malformed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A named interpolator or reference histogram is absent from the spline file.
    #[error("'{name}' not found in spline file")]
    SplineNotFound { name: String },

    /// A knot table cannot be evaluated.
    #[error("invalid spline '{name}': {reason}")]
    InvalidSpline { name: String, reason: String },

    #[error("polars error: {0}")]
    Polars(#[from] polars::error::PolarsError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    /// Drawing a histogram image failed.
    #[error("render error: {0}")]
    Render(String),
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
