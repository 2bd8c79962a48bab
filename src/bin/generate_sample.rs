use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{Float64Array, Int64Array, StringArray};
use arrow::datatypes::{DataType, Field, Schema};
use arrow::record_batch::RecordBatch;
use clap::{Parser, ValueEnum};
use parquet::arrow::ArrowWriter;

use regionstat::data::npy::{write_npy, write_npz};

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Format {
    Npy,
    Npz,
    Parquet,
    Csv,
}

/// Write synthetic measurement files and a matching boundary polygon.
#[derive(Parser, Debug)]
#[command(name = "generate_sample")]
struct Args {
    /// Output directory (created if missing)
    #[arg(short, long, default_value = "sample_data")]
    out: PathBuf,

    #[arg(short, long, value_enum, default_value = "npy")]
    format: Format,

    #[arg(long, default_value_t = 8)]
    files: usize,

    #[arg(long, default_value_t = 50_000)]
    rows: usize,

    #[arg(long, default_value_t = 42)]
    seed: u64,
}

/// Minimal deterministic PRNG (xoshiro256**)
struct SimpleRng {
    state: [u64; 4],
}

impl SimpleRng {
    fn new(seed: u64) -> Self {
        let mut s = [0u64; 4];
        let mut x = seed;
        for slot in &mut s {
            x = x.wrapping_mul(6364136223846793005).wrapping_add(1);
            *slot = x;
        }
        SimpleRng { state: s }
    }

    fn next_u64(&mut self) -> u64 {
        let result = (self.state[1].wrapping_mul(5))
            .rotate_left(7)
            .wrapping_mul(9);
        let t = self.state[1] << 17;
        self.state[2] ^= self.state[0];
        self.state[3] ^= self.state[1];
        self.state[1] ^= self.state[2];
        self.state[0] ^= self.state[3];
        self.state[2] ^= t;
        self.state[3] = self.state[3].rotate_left(45);
        result
    }

    fn next_f64(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    fn uniform(&mut self, lo: f64, hi: f64) -> f64 {
        lo + (hi - lo) * self.next_f64()
    }

    /// Box-Muller transform for normal distribution
    fn gauss(&mut self, mean: f64, std_dev: f64) -> f64 {
        let u1 = self.next_f64().max(1e-15);
        let u2 = self.next_f64();
        let z = (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos();
        mean + std_dev * z
    }
}

/// Rough hexagon around the Beijing municipality.
const BOUNDARY: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {
      "type": "Feature",
      "properties": { "name": "sample region" },
      "geometry": {
        "type": "Polygon",
        "coordinates": [[
          [115.7, 39.9], [116.2, 39.4], [117.0, 39.5],
          [117.4, 40.2], [116.9, 41.0], [116.0, 40.8], [115.7, 39.9]
        ]]
      }
    }
  ]
}
"#;

/// One row: id, height in metres (NaN ≈ 1 %), lon, lat, yyyymmddhh.
fn generate_rows(rng: &mut SimpleRng, file_no: usize, rows: usize) -> Vec<[f64; 5]> {
    (0..rows)
        .map(|i| {
            let height = if rng.next_f64() < 0.01 {
                f64::NAN
            } else {
                rng.gauss(45.0, 15.0).max(0.0)
            };
            [
                (file_no * rows + i) as f64,
                height,
                rng.uniform(115.0, 118.0),
                rng.uniform(39.0, 41.5),
                2021051200.0 + (i % 24) as f64,
            ]
        })
        .collect()
}

fn write_parquet(path: &Path, rows: &[[f64; 5]]) -> Result<()> {
    let schema = Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int64, false),
        Field::new("value", DataType::Utf8, true),
        Field::new("longitude", DataType::Float64, false),
        Field::new("latitude", DataType::Float64, false),
        Field::new("timestamp", DataType::Utf8, false),
    ]));

    // Values are stored as text with "n/a" for missing, as the raw exports do.
    let values: Vec<String> = rows
        .iter()
        .map(|r| if r[1].is_nan() { "n/a".to_string() } else { format!("{:.2}", r[1]) })
        .collect();
    let stamps: Vec<String> = rows.iter().map(|r| format!("{}", r[4] as i64)).collect();

    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int64Array::from_iter_values(rows.iter().map(|r| r[0] as i64))),
            Arc::new(StringArray::from_iter_values(values)),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r[2]))),
            Arc::new(Float64Array::from_iter_values(rows.iter().map(|r| r[3]))),
            Arc::new(StringArray::from_iter_values(stamps)),
        ],
    )
    .context("building record batch")?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    let mut writer = ArrowWriter::try_new(file, schema, None).context("creating parquet writer")?;
    writer.write(&batch).context("writing record batch")?;
    writer.close().context("closing parquet writer")?;
    Ok(())
}

fn write_csv(path: &Path, rows: &[[f64; 5]]) -> Result<()> {
    let mut w = csv::Writer::from_path(path).with_context(|| format!("creating {}", path.display()))?;
    w.write_record(["id", "value", "longitude", "latitude", "timestamp"])?;
    for r in rows {
        let value = if r[1].is_nan() { String::new() } else { format!("{:.2}", r[1]) };
        w.write_record([
            format!("{}", r[0] as i64),
            value,
            r[2].to_string(),
            r[3].to_string(),
            format!("{}", r[4] as i64),
        ])?;
    }
    w.flush()?;
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();
    let mut rng = SimpleRng::new(args.seed);

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("creating {}", args.out.display()))?;

    for file_no in 0..args.files {
        let rows = generate_rows(&mut rng, file_no, args.rows);
        let stem = format!("2021051202_{file_no:03}");
        match args.format {
            Format::Npy => {
                let path = args.out.join(format!("{stem}.npy"));
                write_npy(&path, &rows).with_context(|| format!("writing {}", path.display()))?
            }
            Format::Npz => {
                let path = args.out.join(format!("{stem}.npz"));
                write_npz(&path, &rows).with_context(|| format!("writing {}", path.display()))?
            }
            Format::Parquet => write_parquet(&args.out.join(format!("{stem}.parquet")), &rows)?,
            Format::Csv => write_csv(&args.out.join(format!("{stem}.csv")), &rows)?,
        }
    }

    let boundary = args.out.join("boundary.json");
    std::fs::write(&boundary, BOUNDARY).context("writing boundary")?;

    println!(
        "Wrote {} files ({} rows each) and {} to {}",
        args.files,
        args.rows,
        boundary.display(),
        args.out.display()
    );
    Ok(())
}
