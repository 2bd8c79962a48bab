//! Data layer: core types, chunked loading, and spatial filtering.
//!
//! Architecture:
//! ```text
//!  .npy / .npz / .parquet / .csv
//!        │
//!        ▼
//!   ┌──────────┐
//!   │  loader   │  open file → lazy RecordChunks (≤ chunk_size rows each)
//!   └──────────┘
//!        │  Batch
//!        ▼
//!   ┌──────────┐
//!   │  filter   │  keep records strictly inside the Boundary
//!   └──────────┘
//!        │
//!        ▼
//!     Vec<Record>
//! ```

pub mod filter;
pub mod loader;
pub mod model;
pub mod npy;
