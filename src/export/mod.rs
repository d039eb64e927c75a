//! Result sinks for scraped records.
//!
//! Every sink writes one row per [`Record`] under a shared header: the
//! explicit leading columns first, then every other key flagged for output
//! (in the name or in the arguments), in first-seen order. Keys hidden from
//! both are bookkeeping and never become columns.

pub mod parquet_writer;
pub mod tabular;

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use crate::error::SinkError;
use crate::scrape::Record;

pub use parquet_writer::{read_parquet, records_to_batch, ParquetSink};
pub use tabular::{Delimiter, TabularSink};

/// Persists an ordered sequence of records.
pub trait ResultSink {
    /// Writes `records`, returning the number of rows written.
    fn write(&mut self, records: &[Record]) -> Result<usize, SinkError>;

    /// Where the rows end up.
    fn path(&self) -> &Path;
}

/// File format selected from an output path's extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkFormat {
    Tsv,
    Csv,
    Parquet,
}

impl SinkFormat {
    /// `.csv` and `.parquet` select those formats; anything else is TSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("csv") => SinkFormat::Csv,
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => SinkFormat::Parquet,
            _ => SinkFormat::Tsv,
        }
    }
}

/// Creates the sink matching the extension of `path`.
pub fn sink_for_path(path: impl Into<PathBuf>, column_order: &[String]) -> Box<dyn ResultSink> {
    let path = path.into();
    match SinkFormat::from_path(&path) {
        SinkFormat::Tsv => Box::new(
            TabularSink::new(path, Delimiter::Tab).with_column_order(column_order.to_vec()),
        ),
        SinkFormat::Csv => Box::new(
            TabularSink::new(path, Delimiter::Comma).with_column_order(column_order.to_vec()),
        ),
        SinkFormat::Parquet => {
            Box::new(ParquetSink::new(path).with_column_order(column_order.to_vec()))
        }
    }
}

/// Computes the header for `records`.
pub fn output_columns(records: &[Record], column_order: &[String]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    let mut known: HashSet<&str> = HashSet::new();
    for record in records {
        for (key, _, flags) in record.params().iter() {
            if flags.is_visible() && known.insert(key) {
                seen.push(key.to_string());
            }
        }
    }

    let mut columns: Vec<String> = column_order
        .iter()
        .filter(|c| known.contains(c.as_str()))
        .cloned()
        .collect();
    let leading: HashSet<String> = columns.iter().cloned().collect();
    columns.extend(seen.into_iter().filter(|c| !leading.contains(c)));
    columns
}

/// Cell text of `column` for `record`; empty when absent.
pub(crate) fn cell(record: &Record, column: &str) -> Option<String> {
    record.get(column).map(|v| v.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamSet;

    fn record(params: ParamSet) -> Record {
        Record::from(params)
    }

    #[test]
    fn test_columns_union_first_seen_with_leading_order() {
        let mut a = ParamSet::new().with("dataset", "wsj").with("time", 1);
        a.set("seed", 5, false, false);
        let b = ParamSet::new().with("accuracy", 0.5).with("dataset", "brown");

        let columns = output_columns(
            &[record(a), record(b)],
            &["accuracy".to_string(), "missing".to_string()],
        );
        assert_eq!(columns, vec!["accuracy", "dataset", "time"]);
    }

    #[test]
    fn test_format_from_extension() {
        assert_eq!(SinkFormat::from_path(Path::new("a/bnb.data")), SinkFormat::Tsv);
        assert_eq!(SinkFormat::from_path(Path::new("a/bnb.CSV")), SinkFormat::Csv);
        assert_eq!(
            SinkFormat::from_path(Path::new("a/bnb.parquet")),
            SinkFormat::Parquet
        );
    }
}
