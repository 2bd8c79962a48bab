//! Run orchestration: discover files, dispatch them, fold the results.

use std::path::PathBuf;

use crate::aggregate::{AggregateState, RunReport};
use crate::boundary::BoundarySource;
use crate::error::PoolError;
use crate::pool::{discover_files, Dispatcher, PoolConfig};
use crate::worker::FileTask;

/// Everything one invocation needs.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub data_dir: PathBuf,
    /// File extension selecting the work list, without the dot.
    pub extension: String,
    pub boundary: BoundarySource,
    pub pool: PoolConfig,
}

pub fn build_tasks(files: Vec<PathBuf>, boundary: &BoundarySource) -> Vec<FileTask> {
    files
        .into_iter()
        .enumerate()
        .map(|(index, path)| FileTask {
            index,
            path,
            boundary: boundary.clone(),
        })
        .collect()
}

/// Process every matching file in `config.data_dir`.
///
/// Only pool and discovery errors are returned; per-file failures end up in
/// the report.
pub fn run(config: &RunConfig) -> Result<RunReport, PoolError> {
    let dispatcher = Dispatcher::new(&config.pool)?;
    let files = discover_files(&config.data_dir, &config.extension)?;
    if files.is_empty() {
        log::warn!(
            "no .{} files found in {}",
            config.extension.trim_start_matches('.'),
            config.data_dir.display()
        );
    }
    run_with(&dispatcher, files, &config.boundary)
}

/// Process an explicit file list.
pub fn run_files(
    files: Vec<PathBuf>,
    boundary: &BoundarySource,
    pool: &PoolConfig,
) -> Result<RunReport, PoolError> {
    let dispatcher = Dispatcher::new(pool)?;
    run_with(&dispatcher, files, boundary)
}

fn run_with(
    dispatcher: &Dispatcher,
    files: Vec<PathBuf>,
    boundary: &BoundarySource,
) -> Result<RunReport, PoolError> {
    log::info!(
        "boundary {boundary}, {} workers, {} files",
        dispatcher.num_workers(),
        files.len()
    );
    let tasks = build_tasks(files, boundary);
    let mut state = AggregateState::with_files(tasks.len());
    dispatcher.run(tasks, |result| state.fold(result))?;
    Ok(state.finish())
}
