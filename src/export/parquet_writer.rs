//! Parquet output for scraped records.
//!
//! Record values are heterogeneous across rows (a column may hold integers
//! in one experiment and strings in another), so every column is written as
//! nullable UTF-8 text. Absent values become nulls.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{Array, ArrayRef, StringArray, StringBuilder};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use crate::error::SinkError;
use crate::scrape::Record;

use super::{cell, output_columns, ResultSink};

/// Schema with one nullable text column per name.
pub fn records_schema(columns: &[String]) -> Schema {
    Schema::new(
        columns
            .iter()
            .map(|c| Field::new(c, DataType::Utf8, true))
            .collect::<Vec<_>>(),
    )
}

/// Converts records into an Arrow batch with the given columns.
pub fn records_to_batch(records: &[Record], columns: &[String]) -> Result<RecordBatch, SinkError> {
    let schema = Arc::new(records_schema(columns));

    let arrays: Vec<ArrayRef> = columns
        .iter()
        .map(|column| {
            let mut builder = StringBuilder::new();
            for record in records {
                match cell(record, column) {
                    Some(value) => builder.append_value(value),
                    None => builder.append_null(),
                }
            }
            Arc::new(builder.finish()) as ArrayRef
        })
        .collect();

    Ok(RecordBatch::try_new(schema, arrays)?)
}

/// Writes records to a ZSTD-compressed Parquet file.
#[derive(Debug, Clone)]
pub struct ParquetSink {
    path: PathBuf,
    column_order: Vec<String>,
}

impl ParquetSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            column_order: Vec::new(),
        }
    }

    /// Columns placed first, when present in the records.
    pub fn with_column_order(mut self, columns: Vec<String>) -> Self {
        self.column_order = columns;
        self
    }
}

impl ResultSink for ParquetSink {
    fn write(&mut self, records: &[Record]) -> Result<usize, SinkError> {
        if records.is_empty() {
            return Err(SinkError::NoRecords);
        }

        let columns = output_columns(records, &self.column_order);
        let batch = records_to_batch(records, &columns)?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::File::create(&self.path)?;
        let props = WriterProperties::builder()
            .set_compression(Compression::ZSTD(Default::default()))
            .build();

        let mut writer = ArrowWriter::try_new(file, batch.schema(), Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        tracing::info!(
            path = %self.path.display(),
            rows = records.len(),
            columns = columns.len(),
            "Parquet file written"
        );

        Ok(records.len())
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

/// Reads a file written by [`ParquetSink`] back as column names and rows.
pub fn read_parquet(input_path: &Path) -> Result<(Vec<String>, Vec<Vec<Option<String>>>), SinkError> {
    use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

    let file = std::fs::File::open(input_path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let columns: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .map(|f| f.name().clone())
        .collect();
    let reader = builder.build()?;

    let mut rows = Vec::new();
    for batch_result in reader {
        let batch = batch_result?;
        let arrays: Vec<Option<&StringArray>> = (0..batch.num_columns())
            .map(|i| batch.column(i).as_any().downcast_ref::<StringArray>())
            .collect();
        for row in 0..batch.num_rows() {
            rows.push(
                arrays
                    .iter()
                    .map(|arr| {
                        arr.filter(|a| !a.is_null(row))
                            .map(|a| a.value(row).to_string())
                    })
                    .collect(),
            );
        }
    }

    tracing::info!(
        path = %input_path.display(),
        rows = rows.len(),
        "Parquet file loaded"
    );

    Ok((columns, rows))
}
