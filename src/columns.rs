//! Column source: lazily loaded, optionally cached per-event columns.

use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use polars::prelude::*;

use crate::error::{Error, Result};

/// Name of the event table inside a directory.
pub const DEFAULT_TABLE: &str = "Events";

/// Identifies a table: a file, or a directory holding `<name>.{parquet,csv,tsv}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TableId {
    path: PathBuf,
    name: String,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum TableFormat {
    Parquet,
    Csv,
    Tsv,
}

impl TableFormat {
    fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_ascii_lowercase())
            .as_deref()
        {
            Some("parquet") => TableFormat::Parquet,
            Some("tsv") => TableFormat::Tsv,
            _ => TableFormat::Csv,
        }
    }
}

impl TableId {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn resolve(&self) -> Result<(PathBuf, TableFormat)> {
        if self.path.is_dir() {
            for ext in ["parquet", "csv", "tsv"] {
                let candidate = self.path.join(format!("{}.{ext}", self.name));
                if candidate.is_file() {
                    let format = TableFormat::from_path(&candidate);
                    return Ok((candidate, format));
                }
            }
            return Err(Error::TableNotFound {
                path: self.path.join(&self.name),
            });
        }
        if self.path.is_file() {
            return Ok((self.path.clone(), TableFormat::from_path(&self.path)));
        }
        Err(Error::TableNotFound {
            path: self.path.clone(),
        })
    }

    fn scan(&self) -> Result<LazyFrame> {
        let (path, format) = self.resolve()?;
        let frame = match format {
            TableFormat::Parquet => LazyFrame::scan_parquet(&path, ScanArgsParquet::default())?,
            TableFormat::Csv => LazyCsvReader::new(&path).with_has_header(true).finish()?,
            TableFormat::Tsv => LazyCsvReader::new(&path)
                .with_has_header(true)
                .with_separator(b'\t')
                .finish()?,
        };
        tracing::debug!(path = %path.display(), ?format, "scanning table");
        Ok(frame)
    }
}

/// Materialized columns, promoted to `f64`, in source row order.
#[derive(Debug, Clone, PartialEq)]
pub struct EventColumns {
    names: Vec<String>,
    values: Vec<Vec<f64>>,
    n_rows: usize,
}

impl EventColumns {
    pub fn n_rows(&self) -> usize {
        self.n_rows
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|idx| self.values[idx].as_slice())
    }

    fn from_frame(frame: &DataFrame, names: &[String]) -> Result<Self> {
        let values = names
            .iter()
            .map(|name| {
                let series = frame.column(name)?.cast(&DataType::Float64)?;
                series
                    .f64()?
                    .into_iter()
                    .enumerate()
                    .map(|(row, value)| {
                        value.ok_or_else(|| Error::MissingValue {
                            column: name.clone(),
                            row,
                        })
                    })
                    .collect::<Result<Vec<f64>>>()
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            names: names.to_vec(),
            values,
            n_rows: frame.height(),
        })
    }
}

struct ViewInner {
    table: String,
    columns: Vec<String>,
    /// Zero-row frame of the requested columns.
    header: DataFrame,
    frame: LazyFrame,
    cache: OnceLock<Arc<EventColumns>>,
}

/// A reusable view of the requested columns of one table.
///
/// Clones share the same view and the same cache.
#[derive(Clone)]
pub struct ColumnView {
    inner: Arc<ViewInner>,
}

impl fmt::Debug for ColumnView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnView")
            .field("table", &self.inner.table)
            .field("columns", &self.inner.columns)
            .field("cached", &self.is_cached())
            .finish()
    }
}

impl ColumnView {
    /// Wrap a lazy frame, checking that every requested column exists.
    ///
    /// Only the schema is read here.
    pub fn new(table: impl Into<String>, frame: LazyFrame, columns: &[&str]) -> Result<Self> {
        let table = table.into();
        let schema = frame.clone().limit(0).collect()?;
        for name in columns {
            if schema.column(name).is_err() {
                return Err(Error::ColumnNotFound {
                    table,
                    name: name.to_string(),
                });
            }
        }
        let header = schema.select(columns.iter().copied())?;
        Ok(Self {
            inner: Arc::new(ViewInner {
                table,
                columns: columns.iter().map(|c| c.to_string()).collect(),
                header,
                frame,
                cache: OnceLock::new(),
            }),
        })
    }

    pub fn table(&self) -> &str {
        &self.inner.table
    }

    pub fn columns(&self) -> &[String] {
        &self.inner.columns
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.inner.columns.iter().any(|c| c == name)
    }

    pub fn is_cached(&self) -> bool {
        self.inner.cache.get().is_some()
    }

    /// Read the columns into memory once; later passes reuse them.
    pub fn cache(&self) -> Result<Arc<EventColumns>> {
        if let Some(cached) = self.inner.cache.get() {
            return Ok(cached.clone());
        }
        let columns = Arc::new(self.read()?);
        tracing::info!(
            table = %self.inner.table,
            rows = columns.n_rows(),
            "columns cached in memory"
        );
        Ok(self.inner.cache.get_or_init(|| columns).clone())
    }

    /// The rows for one pass: the cache if present, otherwise a fresh read.
    pub fn materialize(&self) -> Result<Arc<EventColumns>> {
        match self.inner.cache.get() {
            Some(cached) => Ok(cached.clone()),
            None => Ok(Arc::new(self.read()?)),
        }
    }

    fn read(&self) -> Result<EventColumns> {
        let exprs: Vec<Expr> = self.inner.columns.iter().map(|c| col(c.as_str())).collect();
        let frame = self.inner.frame.clone().select(exprs).collect()?;
        EventColumns::from_frame(&frame, &self.inner.columns)
    }

    pub fn describe(&self) -> TableDescription {
        TableDescription {
            table: self.inner.table.clone(),
            header: self.inner.header.clone(),
            cached_rows: self.inner.cache.get().map(|cached| cached.n_rows()),
        }
    }
}

/// Column names and source types of a view.
#[derive(Debug, Clone)]
pub struct TableDescription {
    pub table: String,
    /// The requested columns with their source types and no rows.
    pub header: DataFrame,
    pub cached_rows: Option<usize>,
}

impl TableDescription {
    pub fn column_names(&self) -> Vec<&str> {
        self.header.get_column_names()
    }
}

impl fmt::Display for TableDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Table: {}", self.table)?;
        match self.cached_rows {
            Some(rows) => writeln!(f, "Rows: {rows} (cached)")?,
            None => writeln!(f, "Rows: not materialized")?,
        }
        writeln!(f, "{}", self.header)
    }
}

/// Registry handing out one view per `(table, columns)` pair.
#[derive(Default)]
pub struct ColumnSource {
    views: HashMap<(TableId, Vec<String>), ColumnView>,
}

impl ColumnSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&mut self, table: &TableId, columns: &[&str]) -> Result<ColumnView> {
        let key = (
            table.clone(),
            columns.iter().map(|c| c.to_string()).collect::<Vec<_>>(),
        );
        if let Some(view) = self.views.get(&key) {
            return Ok(view.clone());
        }
        let frame = table.scan()?;
        let view = ColumnView::new(table.name(), frame, columns)?;
        tracing::info!(
            table = %table.name(),
            path = %table.path().display(),
            ?columns,
            "table loaded"
        );
        self.views.insert(key, view.clone());
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_table(dir: &Path, file: &str, text: &str) -> PathBuf {
        let path = dir.join(file);
        let mut out = std::fs::File::create(&path).unwrap();
        out.write_all(text.as_bytes()).unwrap();
        path
    }

    const CSV: &str = "ELep,Enu_true,Q2,Extra\n2.0,1.0,0.3,9\n0.5,-1.0,1.0,9\n1,3.999,2.5,9\n";

    #[test]
    fn load_reads_requested_columns_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(dir.path(), "events.csv", CSV);
        let mut source = ColumnSource::new();
        let view = source
            .load(&TableId::new(&path, DEFAULT_TABLE), &["Q2", "Extra"])
            .unwrap();
        let rows = view.materialize().unwrap();
        assert_eq!(rows.n_rows(), 3);
        assert_eq!(rows.names(), &["Q2".to_string(), "Extra".to_string()]);
        assert_eq!(rows.column("Q2").unwrap(), &[0.3, 1.0, 2.5]);
        // integer column promoted to f64
        assert_eq!(rows.column("Extra").unwrap(), &[9.0, 9.0, 9.0]);
        assert!(rows.column("ELep").is_none());
    }

    #[test]
    fn directory_tables_resolve_by_name() {
        let dir = tempfile::tempdir().unwrap();
        write_table(dir.path(), "Events.tsv", "ELep\tEnu_true\tQ2\n1.0\t2.0\t3.0\n");
        let mut source = ColumnSource::new();
        let view = source
            .load(&TableId::new(dir.path(), "Events"), &["Enu_true"])
            .unwrap();
        assert_eq!(view.materialize().unwrap().column("Enu_true").unwrap(), &[2.0]);
    }

    #[test]
    fn missing_table_and_column_are_reported() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = ColumnSource::new();
        let err = source
            .load(&TableId::new(dir.path().join("nope.csv"), "Events"), &["ELep"])
            .unwrap_err();
        assert!(matches!(err, Error::TableNotFound { .. }));
        let err = source
            .load(&TableId::new(dir.path(), "Events"), &["ELep"])
            .unwrap_err();
        assert!(matches!(err, Error::TableNotFound { .. }));

        let path = write_table(dir.path(), "events.csv", CSV);
        let err = source
            .load(&TableId::new(&path, "Events"), &["ELep", "CosLep"])
            .unwrap_err();
        assert!(matches!(err, Error::ColumnNotFound { ref name, .. } if name == "CosLep"));
    }

    #[test]
    fn registry_returns_one_view_per_request() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(dir.path(), "events.csv", CSV);
        let table = TableId::new(&path, "Events");
        let mut source = ColumnSource::new();
        let a = source.load(&table, &["ELep", "Q2"]).unwrap();
        a.cache().unwrap();
        let b = source.load(&table, &["ELep", "Q2"]).unwrap();
        assert!(b.is_cached());
        let c = source.load(&table, &["Q2", "ELep"]).unwrap();
        assert!(!c.is_cached());
    }

    #[test]
    fn cached_view_does_not_reread_the_source() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(dir.path(), "events.csv", CSV);
        let mut source = ColumnSource::new();
        let cached = source.load(&TableId::new(&path, "Events"), &["ELep"]).unwrap();
        let uncached = source.load(&TableId::new(&path, "Events"), &["Q2"]).unwrap();
        let first = cached.cache().unwrap();
        std::fs::remove_file(&path).unwrap();
        let again = cached.materialize().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        assert!(uncached.materialize().is_err());
    }

    #[test]
    fn null_values_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_table(dir.path(), "events.csv", "ELep,Q2\n1.0,0.2\n,0.4\n");
        let mut source = ColumnSource::new();
        let view = source.load(&TableId::new(&path, "Events"), &["ELep"]).unwrap();
        let err = view.cache().unwrap_err();
        assert!(matches!(err, Error::MissingValue { row: 1, .. }));
    }

    #[test]
    fn in_memory_frames_are_views_too() {
        let frame = df!("ELep" => [2.0, 3.0], "Q2" => [0.1, 0.2]).unwrap();
        let view = ColumnView::new("memory", frame.lazy(), &["ELep", "Q2"]).unwrap();
        let text = view.describe().to_string();
        assert!(text.contains("Table: memory"));
        assert!(text.contains("ELep"));
        assert!(text.contains("f64"));
        assert_eq!(view.describe().column_names(), ["ELep", "Q2"]);
        assert_eq!(view.describe().header.height(), 0);
        view.cache().unwrap();
        assert_eq!(view.describe().cached_rows, Some(2));
    }
}
