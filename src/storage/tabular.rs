//! Tabular episode data (Parquet)
//!
//! One Parquet file per episode. Files may carry an `episode_index` column
//! repeating the episode number on every row; when an episode is renumbered
//! that column is rewritten so the contents agree with the file name.

use super::atomic::{copy_atomic, write_atomic_with};
use crate::{Error, Result};
use arrow::array::{ArrayRef, Int32Array, Int64Array, RecordBatch, UInt32Array, UInt64Array};
use arrow::datatypes::DataType;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use parquet::file::reader::{FileReader, SerializedFileReader};
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tracing::debug;

/// Column repeating the episode number on every row
pub const EPISODE_INDEX_COLUMN: &str = "episode_index";

/// What happened to one migrated data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataMigration {
    /// Rows in the file, when it could be read as Parquet
    pub rows: Option<u64>,
    /// Whether the `episode_index` column was rewritten
    pub rewritten: bool,
}

/// Number of rows (frames) in a Parquet file, read from the footer
///
/// # Errors
///
/// Returns error if the file cannot be opened or is not Parquet
pub fn row_count(path: &Path) -> Result<u64> {
    let file = File::open(path)?;
    let reader = SerializedFileReader::new(file)?;
    let rows = reader.metadata().file_metadata().num_rows();
    u64::try_from(rows)
        .map_err(|_| Error::StorageError(format!("negative row count in {}", path.display())))
}

/// Copy an episode data file to `dst` under its new index
///
/// With `rewrite` set and an `episode_index` column present, the file is
/// re-encoded with that column set to `new_index`. Otherwise the bytes are
/// copied unchanged.
///
/// # Errors
///
/// Returns error if the source cannot be read or the destination written.
/// With `rewrite` set, a source that is not Parquet is an error.
pub fn migrate_data_file(src: &Path, dst: &Path, new_index: u64, rewrite: bool) -> Result<DataMigration> {
    if rewrite {
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(src)?)?;
        if builder.schema().field_with_name(EPISODE_INDEX_COLUMN).is_ok() {
            let rows = rewrite_episode_index(builder, dst, new_index)?;
            debug!(src = %src.display(), dst = %dst.display(), rows, new_index, "rewrote episode_index column");
            return Ok(DataMigration {
                rows: Some(rows),
                rewritten: true,
            });
        }
    }

    copy_atomic(src, dst)?;
    Ok(DataMigration {
        rows: row_count(dst).ok(),
        rewritten: false,
    })
}

fn rewrite_episode_index(
    builder: ParquetRecordBatchReaderBuilder<File>,
    dst: &Path,
    new_index: u64,
) -> Result<u64> {
    let schema = builder.schema().clone();
    let (column, field) = schema
        .column_with_name(EPISODE_INDEX_COLUMN)
        .ok_or_else(|| Error::StorageError(format!("missing {EPISODE_INDEX_COLUMN} column")))?;
    let data_type = field.data_type().clone();
    let reader = builder.build()?;

    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut rows = 0u64;
    write_atomic_with(dst, |file| {
        let mut writer = ArrowWriter::try_new(file, schema.clone(), Some(props))?;
        for batch in reader {
            let batch = batch?;
            let mut columns = batch.columns().to_vec();
            columns[column] = constant_index_column(&data_type, new_index, batch.num_rows())?;
            writer.write(&RecordBatch::try_new(batch.schema(), columns)?)?;
            rows += batch.num_rows() as u64;
        }
        writer.close()?;
        Ok(())
    })?;
    Ok(rows)
}

fn constant_index_column(data_type: &DataType, value: u64, len: usize) -> Result<ArrayRef> {
    let out_of_range =
        || Error::StorageError(format!("episode index {value} does not fit {data_type}"));
    let array: ArrayRef = match data_type {
        DataType::Int64 => {
            let v = i64::try_from(value).map_err(|_| out_of_range())?;
            Arc::new(Int64Array::from(vec![v; len]))
        }
        DataType::Int32 => {
            let v = i32::try_from(value).map_err(|_| out_of_range())?;
            Arc::new(Int32Array::from(vec![v; len]))
        }
        DataType::UInt64 => Arc::new(UInt64Array::from(vec![value; len])),
        DataType::UInt32 => {
            let v = u32::try_from(value).map_err(|_| out_of_range())?;
            Arc::new(UInt32Array::from(vec![v; len]))
        }
        other => {
            return Err(Error::StorageError(format!(
                "unsupported {EPISODE_INDEX_COLUMN} column type {other}"
            )))
        }
    };
    Ok(array)
}
