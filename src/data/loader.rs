use std::fs::File;
use std::path::{Path, PathBuf};

use arrow::array::{Array, ArrayRef, Float64Array, StringArray};
use arrow::compute::cast;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::{ParquetRecordBatchReader, ParquetRecordBatchReaderBuilder};
use parquet::arrow::ProjectionMask;

use crate::error::FileAccessError;

use super::model::{checked_coordinate, Batch, MeasuredValue, Record, COLUMNS};
use super::npy::NpyReader;

// ---------------------------------------------------------------------------
// Public entry-points
// ---------------------------------------------------------------------------

/// A data file plus the chunk size to read it with.
///
/// Each call to [`ChunkSource::chunks`] re-opens the file and starts again at
/// row 0, so a source can be scanned any number of times.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkSource {
    pub path: PathBuf,
    pub chunk_size: usize,
}

impl ChunkSource {
    pub fn new(path: impl Into<PathBuf>, chunk_size: usize) -> Self {
        Self {
            path: path.into(),
            chunk_size,
        }
    }

    pub fn chunks(&self) -> Result<RecordChunks, FileAccessError> {
        open_chunks(&self.path, self.chunk_size)
    }
}

/// Open a data file for chunked reading.  Dispatch by extension.
///
/// Supported formats:
/// * `.npy`     – one `(rows, 5)` NumPy array, read in row ranges
/// * `.npz`     – NumPy archive; its `data` array is read like `.npy`
/// * `.parquet` – columns `id, value, longitude, latitude, timestamp`
/// * `.csv`     – header row with the same five column names
///
/// Nothing beyond the file header is read until the first batch is pulled.
pub fn open_chunks(path: &Path, chunk_size: usize) -> Result<RecordChunks, FileAccessError> {
    if chunk_size == 0 {
        return Err(FileAccessError::ZeroChunkSize);
    }

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    let reader = match ext.as_str() {
        "npy" => Reader::Npy(NpyReader::open(path)?),
        "npz" => Reader::Npy(NpyReader::open_npz(path)?),
        "parquet" | "pq" => Reader::Parquet(ParquetChunks::open(path, chunk_size)?),
        "csv" => Reader::Csv(CsvChunks::open(path)?),
        other => {
            return Err(FileAccessError::UnsupportedFormat {
                path: path.to_path_buf(),
                extension: other.to_string(),
            })
        }
    };

    Ok(RecordChunks {
        reader,
        chunk_size,
        done: false,
    })
}

/// Lazy, finite sequence of batches from one file.
///
/// Yields at most `chunk_size` records per batch; only the final batch may be
/// shorter. The first error ends the sequence.
pub struct RecordChunks {
    reader: Reader,
    chunk_size: usize,
    done: bool,
}

enum Reader {
    Npy(NpyReader),
    Parquet(ParquetChunks),
    Csv(CsvChunks),
}

impl Iterator for RecordChunks {
    type Item = Result<Batch, FileAccessError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        let next = match &mut self.reader {
            Reader::Npy(r) => r.read_rows(self.chunk_size),
            Reader::Parquet(r) => r.read_chunk(),
            Reader::Csv(r) => r.read_chunk(self.chunk_size),
        };
        match next {
            Ok(Some(batch)) => Some(Ok(batch)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Parquet reader
// ---------------------------------------------------------------------------

/// Parquet file read through the Arrow record batch reader.
///
/// Only the five known columns are projected. Columns may be stored as any
/// Arrow type that casts to the target: numeric or text for `value` and the
/// coordinates, anything printable for `id` and `timestamp`. Works with files
/// written by Pandas (`df.to_parquet()`) and Polars (`df.write_parquet()`).
struct ParquetChunks {
    path: PathBuf,
    reader: ParquetRecordBatchReader,
    next_row: u64,
}

impl ParquetChunks {
    fn open(path: &Path, chunk_size: usize) -> Result<Self, FileAccessError> {
        let schema_err = |reason: String| FileAccessError::Schema {
            path: path.to_path_buf(),
            reason,
        };

        let file = File::open(path).map_err(|e| FileAccessError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| schema_err(format!("reading parquet metadata: {e}")))?;

        let schema = builder.schema().clone();
        let mut roots = Vec::with_capacity(COLUMNS.len());
        for name in COLUMNS {
            let idx = schema
                .index_of(name)
                .map_err(|_| schema_err(format!("missing '{name}' column")))?;
            roots.push(idx);
        }
        let mask = ProjectionMask::roots(builder.parquet_schema(), roots);

        let reader = builder
            .with_batch_size(chunk_size)
            .with_projection(mask)
            .build()
            .map_err(|e| schema_err(format!("building parquet reader: {e}")))?;

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            next_row: 0,
        })
    }

    fn read_chunk(&mut self) -> Result<Option<Batch>, FileAccessError> {
        loop {
            let Some(batch) = self.reader.next() else {
                return Ok(None);
            };
            let offset = self.next_row;
            let batch = batch.map_err(|e| FileAccessError::Read {
                path: self.path.clone(),
                offset,
                reason: e.to_string(),
            })?;
            if batch.num_rows() == 0 {
                continue;
            }
            let records = self.convert(&batch, offset)?;
            self.next_row += records.len() as u64;
            return Ok(Some(Batch { offset, records }));
        }
    }

    fn convert(&self, batch: &RecordBatch, offset: u64) -> Result<Vec<Record>, FileAccessError> {
        let ids = self.text_column(batch, "id")?;
        let values = self.float_column(batch, "value")?;
        let lons = self.float_column(batch, "longitude")?;
        let lats = self.float_column(batch, "latitude")?;
        let stamps = self.text_column(batch, "timestamp")?;

        let mut records = Vec::with_capacity(batch.num_rows());
        for row in 0..batch.num_rows() {
            let row_no = offset + row as u64;
            records.push(Record {
                id: text_at(&ids, row),
                value: MeasuredValue::from(float_at(&values, row)),
                longitude: self.coordinate(float_at(&lons, row), row_no, "longitude")?,
                latitude: self.coordinate(float_at(&lats, row), row_no, "latitude")?,
                timestamp: text_at(&stamps, row),
            });
        }
        Ok(records)
    }

    fn column<'b>(&self, batch: &'b RecordBatch, name: &str) -> Result<&'b ArrayRef, FileAccessError> {
        batch.column_by_name(name).ok_or_else(|| FileAccessError::Schema {
            path: self.path.clone(),
            reason: format!("missing '{name}' column"),
        })
    }

    /// Cast to Float64. Unparseable text becomes null rather than an error.
    fn float_column(&self, batch: &RecordBatch, name: &str) -> Result<Float64Array, FileAccessError> {
        let col = self.column(batch, name)?;
        self.cast_as::<Float64Array>(col, &DataType::Float64, name)
    }

    fn text_column(&self, batch: &RecordBatch, name: &str) -> Result<StringArray, FileAccessError> {
        let col = self.column(batch, name)?;
        self.cast_as::<StringArray>(col, &DataType::Utf8, name)
    }

    fn cast_as<A: Array + Clone + 'static>(
        &self,
        col: &ArrayRef,
        to: &DataType,
        name: &str,
    ) -> Result<A, FileAccessError> {
        let schema_err = || FileAccessError::Schema {
            path: self.path.clone(),
            reason: format!("column '{name}' has type {:?}, expected {to:?}", col.data_type()),
        };
        let converted = cast(col.as_ref(), to).map_err(|_| schema_err())?;
        converted
            .as_any()
            .downcast_ref::<A>()
            .cloned()
            .ok_or_else(schema_err)
    }

    fn coordinate(&self, v: Option<f64>, row: u64, column: &'static str) -> Result<f64, FileAccessError> {
        checked_coordinate(v).ok_or_else(|| FileAccessError::MalformedCoordinate {
            path: self.path.clone(),
            row,
            column,
        })
    }
}

fn float_at(arr: &Float64Array, row: usize) -> Option<f64> {
    (!arr.is_null(row)).then(|| arr.value(row))
}

fn text_at(arr: &StringArray, row: usize) -> String {
    if arr.is_null(row) {
        String::new()
    } else {
        arr.value(row).to_string()
    }
}

// ---------------------------------------------------------------------------
// CSV reader
// ---------------------------------------------------------------------------

/// CSV layout: header row naming the five columns in any order; extra columns
/// are ignored. Every row must have as many fields as the header.
struct CsvChunks {
    path: PathBuf,
    reader: csv::Reader<File>,
    indices: [usize; 5],
    record: csv::StringRecord,
    next_row: u64,
}

impl CsvChunks {
    fn open(path: &Path) -> Result<Self, FileAccessError> {
        let mut reader = csv::Reader::from_path(path).map_err(|e| FileAccessError::Open {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let headers = reader
            .headers()
            .map_err(|e| FileAccessError::Schema {
                path: path.to_path_buf(),
                reason: format!("reading CSV headers: {e}"),
            })?
            .clone();

        let mut indices = [0usize; 5];
        for (slot, name) in indices.iter_mut().zip(COLUMNS) {
            *slot = headers
                .iter()
                .position(|h| h.trim() == name)
                .ok_or_else(|| FileAccessError::Schema {
                    path: path.to_path_buf(),
                    reason: format!("CSV missing '{name}' column"),
                })?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            reader,
            indices,
            record: csv::StringRecord::new(),
            next_row: 0,
        })
    }

    fn read_chunk(&mut self, max: usize) -> Result<Option<Batch>, FileAccessError> {
        let offset = self.next_row;
        let mut records = Vec::with_capacity(max.min(4096));

        while records.len() < max {
            let row_no = self.next_row;
            let more = self.reader.read_record(&mut self.record).map_err(|e| {
                match e.kind() {
                    csv::ErrorKind::UnequalLengths { .. } => FileAccessError::Schema {
                        path: self.path.clone(),
                        reason: format!("row {row_no}: {e}"),
                    },
                    _ => FileAccessError::Read {
                        path: self.path.clone(),
                        offset: row_no,
                        reason: e.to_string(),
                    },
                }
            })?;
            if !more {
                break;
            }

            let field = |i: usize| self.record.get(self.indices[i]).unwrap_or("");
            let coord = |i: usize| {
                checked_coordinate(field(i).trim().parse::<f64>().ok()).ok_or_else(|| {
                    FileAccessError::MalformedCoordinate {
                        path: self.path.clone(),
                        row: row_no,
                        column: COLUMNS[i],
                    }
                })
            };
            records.push(Record {
                id: field(0).to_string(),
                value: MeasuredValue::parse(field(1)),
                longitude: coord(2)?,
                latitude: coord(3)?,
                timestamp: field(4).to_string(),
            });
            self.next_row += 1;
        }

        if records.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Batch { offset, records }))
        }
    }
}
