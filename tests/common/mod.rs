// tests/common/mod.rs
// Shared fixtures for integration tests
#![allow(dead_code)]

use std::fs::File;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use arrow::array::{Float64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;

use regionstat::boundary::BoundarySource;
use regionstat::data::npy::{write_npy, write_npz};

pub const UNIT_SQUARE: &str = r#"{"type": "Polygon", "coordinates": [[[0,0],[1,0],[1,1],[0,1],[0,0]]]}"#;

pub fn unit_square_bbox() -> BoundarySource {
    BoundarySource::bounding_box(0.0, 0.0, 1.0, 1.0).expect("valid bbox")
}

pub fn write_boundary(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("boundary.json");
    std::fs::write(&path, body).expect("write boundary");
    path
}

/// `(value, lon, lat)` triples as an `.npy` file; ids are row numbers.
pub fn npy_file(dir: &Path, name: &str, points: &[(f64, f64, f64)]) -> PathBuf {
    let path = dir.join(name);
    let rows: Vec<[f64; 5]> = points
        .iter()
        .enumerate()
        .map(|(i, &(v, x, y))| [i as f64, v, x, y, 2021051202.0])
        .collect();
    write_npy(&path, &rows).expect("write npy");
    path
}

/// Same rows as `npy_file`, as the `data` array of an `.npz` archive.
pub fn npz_file(dir: &Path, name: &str, points: &[(f64, f64, f64)]) -> PathBuf {
    let path = dir.join(name);
    let rows: Vec<[f64; 5]> = points
        .iter()
        .enumerate()
        .map(|(i, &(v, x, y))| [i as f64, v, x, y, 2021051202.0])
        .collect();
    write_npz(&path, &rows).expect("write npz");
    path
}

/// Same layout as `npy_file`, stored as Parquet with a text `value` column.
pub fn parquet_file(dir: &Path, name: &str, points: &[(f64, f64, f64)]) -> PathBuf {
    let path = dir.join(name);
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Utf8, false),
        Field::new("value", DataType::Utf8, true),
        Field::new("longitude", DataType::Float64, false),
        Field::new("latitude", DataType::Float64, false),
        Field::new("timestamp", DataType::Utf8, false),
    ]));
    let ids: Vec<String> = (0..points.len()).map(|i| i.to_string()).collect();
    let values: Vec<String> = points.iter().map(|p| p.0.to_string()).collect();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(StringArray::from_iter_values(ids)),
            Arc::new(StringArray::from_iter_values(values)),
            Arc::new(Float64Array::from_iter_values(points.iter().map(|p| p.1))),
            Arc::new(Float64Array::from_iter_values(points.iter().map(|p| p.2))),
            Arc::new(StringArray::from_iter_values(
                std::iter::repeat("2021051202").take(points.len()),
            )),
        ],
    )
    .expect("record batch");
    let file = File::create(&path).expect("create parquet");
    let mut writer = ArrowWriter::try_new(file, schema, None).expect("parquet writer");
    writer.write(&batch).expect("write batch");
    writer.close().expect("close writer");
    path
}

pub fn csv_file(dir: &Path, name: &str, points: &[(f64, f64, f64)]) -> PathBuf {
    let path = dir.join(name);
    let mut body = String::from("id,value,longitude,latitude,timestamp\n");
    for (i, (v, x, y)) in points.iter().enumerate() {
        body.push_str(&format!("{i},{v},{x},{y},2021051202\n"));
    }
    std::fs::write(&path, body).expect("write csv");
    path
}

/// Deterministic scatter over [-0.5, 1.5]², roughly a quarter outside the square.
pub fn scatter(n: usize, seed: u64) -> Vec<(f64, f64, f64)> {
    let mut x = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut next = move || {
        x ^= x << 13;
        x ^= x >> 7;
        x ^= x << 17;
        (x >> 11) as f64 / (1u64 << 53) as f64
    };
    (0..n)
        .map(|i| (i as f64, next() * 2.0 - 0.5, next() * 2.0 - 0.5))
        .collect()
}

/// Run the built binary and capture `(stdout, stderr, exit code)`.
pub fn run_regionstat(args: &[&str]) -> (String, String, i32) {
    let output = Command::new(env!("CARGO_BIN_EXE_regionstat"))
        .args(args)
        .env_remove("RUST_LOG")
        .output()
        .expect("Failed to start regionstat");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.code().unwrap_or(-1),
    )
}
