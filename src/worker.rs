//! File worker: one file, end to end.
//!
//! A [`FileWorker`] lives on one pool thread for the whole run. It owns the
//! boundary it loaded and turns every [`FileTask`] it receives into exactly one
//! [`FileResult`]; errors and panics stay inside the result.

use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;

use crate::boundary::{BoundaryCache, BoundarySource};
use crate::data::filter::filter_batch;
use crate::data::loader::open_chunks;
use crate::data::model::MeasuredValue;
use crate::error::FileError;

/// One unit of work: a file and the boundary to test it against.
#[derive(Debug, Clone, PartialEq)]
pub struct FileTask {
    /// Position in the dispatch order, for progress messages only.
    pub index: usize,
    pub path: PathBuf,
    pub boundary: BoundarySource,
}

/// Per-file counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStats {
    pub batches: u64,
    pub records_read: u64,
    pub matched: u64,
    /// Matched records whose `value` did not coerce to a number.
    pub malformed: u64,
}

impl FileStats {
    pub fn merge(&mut self, other: &FileStats) {
        self.batches += other.batches;
        self.records_read += other.records_read;
        self.matched += other.matched;
        self.malformed += other.malformed;
    }
}

/// A file that produced no values, and why.
#[derive(Debug, Clone, PartialEq)]
pub struct FileFailure {
    pub path: PathBuf,
    pub error: FileError,
}

/// Outcome of one [`FileTask`].
#[derive(Debug, Clone, PartialEq)]
pub enum FileResult {
    Matched {
        path: PathBuf,
        values: Vec<MeasuredValue>,
        stats: FileStats,
    },
    Failed(FileFailure),
}

impl FileResult {
    pub fn path(&self) -> &PathBuf {
        match self {
            FileResult::Matched { path, .. } => path,
            FileResult::Failed(failure) => &failure.path,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, FileResult::Failed(_))
    }
}

pub struct FileWorker {
    id: usize,
    chunk_size: usize,
    boundary: BoundaryCache,
}

impl FileWorker {
    pub fn new(id: usize, chunk_size: usize) -> Self {
        Self {
            id,
            chunk_size,
            boundary: BoundaryCache::new(),
        }
    }

    /// Number of boundary loads this worker has performed.
    pub fn boundary_loads(&self) -> usize {
        self.boundary.loads()
    }

    /// Process one file. Never fails and never unwinds.
    pub fn process(&mut self, task: FileTask) -> FileResult {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.scan(&task)));
        let error = match outcome {
            Ok(Ok((values, stats))) => {
                log::debug!(
                    "worker {} finished task {} ({}): {} of {} records matched in {} batches",
                    self.id,
                    task.index,
                    task.path.display(),
                    stats.matched,
                    stats.records_read,
                    stats.batches
                );
                return FileResult::Matched {
                    path: task.path,
                    values,
                    stats,
                };
            }
            Ok(Err(e)) => e,
            Err(payload) => FileError::Panicked(panic_message(payload.as_ref())),
        };
        FileResult::Failed(FileFailure {
            path: task.path,
            error,
        })
    }

    fn scan(&mut self, task: &FileTask) -> Result<(Vec<MeasuredValue>, FileStats), FileError> {
        let boundary = self.boundary.get(&task.boundary)?;
        let mut stats = FileStats::default();
        let mut values = Vec::new();

        for batch in open_chunks(&task.path, self.chunk_size)? {
            let batch = batch?;
            stats.batches += 1;
            stats.records_read += batch.len() as u64;
            for record in filter_batch(batch, &boundary) {
                if record.value.is_missing() {
                    stats.malformed += 1;
                }
                values.push(record.value);
            }
        }
        stats.matched = values.len() as u64;
        Ok((values, stats))
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::data::npy::write_npy;
    use crate::error::{BoundaryLoadError, FileAccessError};

    fn square() -> BoundarySource {
        BoundarySource::bounding_box(0.0, 0.0, 1.0, 1.0).unwrap()
    }

    fn task(index: usize, path: &Path, boundary: BoundarySource) -> FileTask {
        FileTask {
            index,
            path: path.to_path_buf(),
            boundary,
        }
    }

    #[test]
    fn collects_matched_values_across_chunks() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.npy");
        write_npy(
            &path,
            &[
                [0.0, 10.0, 0.5, 0.5, 0.0],
                [1.0, 20.0, 1.5, 0.5, 0.0],
                [2.0, f64::NAN, 0.2, 0.8, 0.0],
                [3.0, 40.0, 0.9, 0.1, 0.0],
                [4.0, 50.0, 0.5, 1.0, 0.0],
            ],
        )
        .unwrap();

        let mut worker = FileWorker::new(0, 2);
        let result = worker.process(task(0, &path, square()));
        let FileResult::Matched { values, stats, .. } = result else {
            panic!("expected a match result");
        };
        assert_eq!(
            values,
            vec![
                MeasuredValue::Number(10.0),
                MeasuredValue::Missing,
                MeasuredValue::Number(40.0),
            ]
        );
        assert_eq!(
            stats,
            FileStats {
                batches: 3,
                records_read: 5,
                matched: 3,
                malformed: 1,
            }
        );
    }

    #[test]
    fn unreadable_file_becomes_failure_marker() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.npy");
        let mut worker = FileWorker::new(0, 16);
        let result = worker.process(task(0, &path, square()));
        assert!(result.is_failure());
        assert_eq!(result.path(), &path);
        assert!(matches!(
            result,
            FileResult::Failed(FileFailure {
                error: FileError::Access(FileAccessError::Open { .. }),
                ..
            })
        ));
    }

    #[test]
    fn boundary_failure_is_local_and_loaded_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.npy");
        write_npy(&path, &[[0.0, 1.0, 0.5, 0.5, 0.0]]).unwrap();
        let bad = BoundarySource::GeoJson(dir.path().join("missing.json"));

        let mut worker = FileWorker::new(3, 16);
        for i in 0..3 {
            let result = worker.process(task(i, &path, bad.clone()));
            assert!(matches!(
                result,
                FileResult::Failed(FileFailure {
                    error: FileError::Boundary(BoundaryLoadError::Io { .. }),
                    ..
                })
            ));
        }
        assert_eq!(worker.boundary_loads(), 1);
    }

    #[test]
    fn boundary_reused_across_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut worker = FileWorker::new(0, 1);
        for i in 0..4 {
            let path = dir.path().join(format!("{i}.npy"));
            write_npy(&path, &[[0.0, 1.0, 0.5, 0.5, 0.0]; 3]).unwrap();
            assert!(!worker.process(task(i, &path, square())).is_failure());
        }
        assert_eq!(worker.boundary_loads(), 1);
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic");
    }
}
