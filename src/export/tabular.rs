//! Delimited text output (`.data` TSV and CSV).

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use csv::{QuoteStyle, WriterBuilder};
use tracing::info;

use crate::error::SinkError;
use crate::scrape::Record;

use super::{cell, output_columns, ResultSink};

/// Field separator of a [`TabularSink`].
///
/// Both quote a cell only when it holds the separator, a quote or a line
/// break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delimiter {
    Tab,
    Comma,
}

impl Delimiter {
    fn as_byte(&self) -> u8 {
        match self {
            Delimiter::Tab => b'\t',
            Delimiter::Comma => b',',
        }
    }
}

/// Writes records as a header line plus one line per record.
#[derive(Debug, Clone)]
pub struct TabularSink {
    path: PathBuf,
    delimiter: Delimiter,
    column_order: Vec<String>,
}

impl TabularSink {
    pub fn new(path: impl Into<PathBuf>, delimiter: Delimiter) -> Self {
        Self {
            path: path.into(),
            delimiter,
            column_order: Vec::new(),
        }
    }

    /// Columns placed first, when present in the records.
    pub fn with_column_order(mut self, columns: Vec<String>) -> Self {
        self.column_order = columns;
        self
    }

    fn builder(&self) -> WriterBuilder {
        let mut builder = WriterBuilder::new();
        builder
            .delimiter(self.delimiter.as_byte())
            .quote_style(QuoteStyle::Necessary);
        builder
    }

    fn write_rows<W: Write>(
        &self,
        writer: &mut csv::Writer<W>,
        records: &[Record],
    ) -> Result<(), SinkError> {
        let columns = output_columns(records, &self.column_order);
        if columns.is_empty() {
            return Ok(());
        }
        writer.write_record(&columns)?;
        for record in records {
            writer.write_record(columns.iter().map(|c| cell(record, c).unwrap_or_default()))?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Renders the whole table as text.
    pub fn render(&self, records: &[Record]) -> Result<String, SinkError> {
        let mut writer = self.builder().from_writer(Vec::new());
        self.write_rows(&mut writer, records)?;
        let bytes = writer
            .into_inner()
            .map_err(|e| SinkError::Io(e.into_error()))?;
        String::from_utf8(bytes)
            .map_err(|e| SinkError::Io(io::Error::new(io::ErrorKind::InvalidData, e)))
    }
}

impl ResultSink for TabularSink {
    fn write(&mut self, records: &[Record]) -> Result<usize, SinkError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(&self.path)?;
        let mut writer = self.builder().from_writer(BufWriter::new(file));
        self.write_rows(&mut writer, records)?;

        info!(
            path = %self.path.display(),
            rows = records.len(),
            delimiter = ?self.delimiter,
            "Result table written"
        );
        Ok(records.len())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParamSet;
    use tempfile::TempDir;

    fn records() -> Vec<Record> {
        vec![
            Record::from(ParamSet::new().with("time", 100).with("key1", 1.0)),
            Record::from(
                ParamSet::new()
                    .with("time", 200)
                    .with("note", "a, \"quoted\"\tvalue"),
            ),
        ]
    }

    #[test]
    fn test_tsv_render() {
        let sink = TabularSink::new("out.data", Delimiter::Tab);
        assert_eq!(
            sink.render(&records()).expect("render"),
            "time\tkey1\tnote\n100\t1.0\t\n200\t\t\"a, \"\"quoted\"\"\tvalue\"\n"
        );
    }

    #[test]
    fn test_csv_render_quotes() {
        let sink = TabularSink::new("out.csv", Delimiter::Comma)
            .with_column_order(vec!["note".to_string()]);
        assert_eq!(
            sink.render(&records()).expect("render"),
            "note,time,key1\n,100,1.0\n\"a, \"\"quoted\"\"\tvalue\",200,\n"
        );
    }

    #[test]
    fn test_write_creates_parent_dirs() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("scrape").join("bnb.data");
        let mut sink = TabularSink::new(&path, Delimiter::Tab);
        assert_eq!(sink.write(&records()).expect("write"), 2);
        let text = std::fs::read_to_string(&path).expect("read");
        assert!(text.starts_with("time\tkey1\tnote\n"));
    }

    #[test]
    fn test_empty_records_render_nothing() {
        let sink = TabularSink::new("out.data", Delimiter::Tab);
        assert_eq!(sink.render(&[]).expect("render"), "");
    }

    #[test]
    fn test_written_csv_reads_back() {
        let dir = TempDir::new().expect("tempdir");
        let path = dir.path().join("bnb.csv");
        let mut sink = TabularSink::new(&path, Delimiter::Comma);
        sink.write(&records()).expect("write");

        let mut reader = csv::Reader::from_path(&path).expect("open");
        let headers = reader.headers().expect("headers").clone();
        assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["time", "key1", "note"]);
        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.expect("row")).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].get(2), Some("a, \"quoted\"\tvalue"));
    }
}
