//! Parallel, memory-bounded point-in-polygon filtering and value statistics
//! over directories of chunked measurement files.
//!
//! ```text
//!  data dir ──discover──▶ [FileTask] ──▶ Dispatcher ──▶ FileWorker × N
//!                                                          │ loader → filter
//!                                                          ▼
//!  RunReport ◀──finish── AggregateState ◀──fold── FileResult (completion order)
//! ```

pub mod aggregate;
pub mod boundary;
pub mod cli;
pub mod data;
pub mod error;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod worker;
