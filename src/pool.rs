//! Worker pool dispatcher
//!
//! All tasks are queued up front on an unbounded channel. A fixed set of
//! threads, each owning one [`FileWorker`], pulls tasks until the queue is
//! drained and sends one [`FileResult`] per task back on the result channel.
//! The caller sees results in completion order.

use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::unbounded;

use crate::error::PoolError;
use crate::worker::{FileResult, FileTask, FileWorker};

/// Cores left free for the parent thread and the rest of the system.
pub const DEFAULT_RESERVED_CORES: usize = 1;

/// Rows per batch when nothing else is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Configuration for the worker pool
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Explicit worker count; `None` derives it from the CPU count.
    pub workers: Option<usize>,
    pub reserved: usize,
    pub chunk_size: usize,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: None,
            reserved: DEFAULT_RESERVED_CORES,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl PoolConfig {
    /// Resolve the number of worker threads.
    pub fn worker_count(&self) -> Result<usize, PoolError> {
        match self.workers {
            Some(0) => Err(PoolError::NoWorkers),
            Some(n) => Ok(n),
            None => Ok(num_cpus::get().saturating_sub(self.reserved).max(1)),
        }
    }
}

/// List regular files in `dir` whose extension matches `extension`
/// (case-insensitive), sorted by path.
pub fn discover_files(dir: &Path, extension: &str) -> Result<Vec<PathBuf>, PoolError> {
    let discovery_err = |source| PoolError::Discovery {
        dir: dir.to_path_buf(),
        source,
    };
    let wanted = extension.trim_start_matches('.');

    let mut files = Vec::new();
    for entry in fs::read_dir(dir).map_err(discovery_err)? {
        let entry = entry.map_err(discovery_err)?;
        let path = entry.path();
        let matches_ext = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case(wanted));
        if matches_ext && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Fixed-size pool of file workers.
#[derive(Debug)]
pub struct Dispatcher {
    num_workers: usize,
    chunk_size: usize,
}

impl Dispatcher {
    pub fn new(config: &PoolConfig) -> Result<Self, PoolError> {
        Ok(Self {
            num_workers: config.worker_count()?,
            chunk_size: config.chunk_size,
        })
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Run every task, handing each result to `on_result` as soon as it
    /// arrives. Returns once all workers have exited.
    pub fn run<F>(&self, tasks: Vec<FileTask>, mut on_result: F) -> Result<(), PoolError>
    where
        F: FnMut(FileResult),
    {
        let total = tasks.len();
        if total == 0 {
            return Ok(());
        }

        let (task_sender, task_receiver) = unbounded::<FileTask>();
        let (result_sender, result_receiver) = unbounded::<FileResult>();
        for task in tasks {
            // Receiver is alive in this scope; send cannot fail.
            let _ = task_sender.send(task);
        }
        drop(task_sender);

        let threads = self.num_workers.min(total);
        log::info!("dispatching {total} files to {threads} workers");

        let mut handles = Vec::with_capacity(threads);
        for worker_id in 0..threads {
            let task_receiver = task_receiver.clone();
            let result_sender = result_sender.clone();
            let chunk_size = self.chunk_size;
            let handle = thread::Builder::new()
                .name(format!("file-worker-{worker_id}"))
                .spawn(move || {
                    let mut worker = FileWorker::new(worker_id, chunk_size);
                    while let Ok(task) = task_receiver.recv() {
                        if result_sender.send(worker.process(task)).is_err() {
                            break;
                        }
                    }
                })
                .map_err(PoolError::Spawn)?;
            handles.push(handle);
        }
        drop(result_sender);
        drop(task_receiver);

        let mut received = 0usize;
        for result in result_receiver.iter() {
            received += 1;
            match &result {
                FileResult::Matched { path, stats, .. } => log::info!(
                    "[{received}/{total}] {} ({} matched)",
                    path.display(),
                    stats.matched
                ),
                FileResult::Failed(failure) => log::info!(
                    "[{received}/{total}] {} (failed)",
                    failure.path.display()
                ),
            }
            on_result(result);
        }

        for handle in handles {
            if handle.join().is_err() {
                log::error!("a worker thread exited abnormally");
            }
        }
        if received != total {
            log::error!("expected {total} file results, received {received}");
        }
        Ok(())
    }
}
