use std::path::PathBuf;

use thiserror::Error;

// ---------------------------------------------------------------------------
// Error kinds
// ---------------------------------------------------------------------------
//
// Every per-file error is `Clone` + `Send` so it can travel back over the
// result channel and be cached by a worker (see `BoundaryCache`).

/// A data file could not be opened, or its layout does not match the expected
/// `[id, value, longitude, latitude, timestamp]` schema.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FileAccessError {
    #[error("cannot open {}: {reason}", path.display())]
    Open { path: PathBuf, reason: String },

    #[error("unsupported file format for {}: .{extension}", path.display())]
    UnsupportedFormat { path: PathBuf, extension: String },

    #[error("schema mismatch in {}: {reason}", path.display())]
    Schema { path: PathBuf, reason: String },

    #[error("read failed in {} at row {offset}: {reason}", path.display())]
    Read {
        path: PathBuf,
        offset: u64,
        reason: String,
    },

    #[error("malformed {column} at row {row} in {}", path.display())]
    MalformedCoordinate {
        path: PathBuf,
        row: u64,
        column: &'static str,
    },

    #[error("chunk size must be greater than 0")]
    ZeroChunkSize,
}

/// The boundary geometry resource is missing or malformed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BoundaryLoadError {
    #[error("cannot read boundary {}: {reason}", path.display())]
    Io { path: PathBuf, reason: String },

    #[error("invalid GeoJSON in {}: {reason}", path.display())]
    Parse { path: PathBuf, reason: String },

    #[error("boundary {} contains no polygon", path.display())]
    NoPolygon { path: PathBuf },

    #[error("invalid bounding box: {0}")]
    InvalidBounds(String),
}

/// Zero matched values across the whole run: there is nothing to summarise.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("no values matched the boundary")]
pub struct EmptyResultError;

/// Why a single file produced no values. Always local to that file.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FileError {
    #[error(transparent)]
    Access(#[from] FileAccessError),

    #[error(transparent)]
    Boundary(#[from] BoundaryLoadError),

    #[error("worker panicked: {0}")]
    Panicked(String),
}

/// Fatal dispatcher errors. The run cannot proceed.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("worker pool needs at least one worker")]
    NoWorkers,

    #[error("failed to spawn worker thread: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("cannot list data directory {}: {source}", dir.display())]
    Discovery {
        dir: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
