//! Output for downstream consumers: text summary, JSON report, histogram CSV.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use anyhow::{Context, Result};

use crate::aggregate::{Histogram, RunReport};

/// Human-readable summary.
pub fn render_text(report: &RunReport) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "Files: {} processed, {} failed",
        report.files_succeeded, report.files_failed
    );
    let _ = writeln!(
        out,
        "Records: {} read, {} inside boundary, {} with malformed value",
        report.records_read, report.matched, report.malformed
    );

    match &report.summary {
        Some(stats) => {
            let h = &stats.histogram;
            let _ = writeln!(out, "Count: {}", stats.count);
            let _ = writeln!(out, "Number of bins: {}", h.bin_count);
            let _ = writeln!(out, "Bin width: {:.2}", h.bin_width());
            let _ = writeln!(out, "Min: {:.2}", stats.min);
            let _ = writeln!(out, "Max: {:.2}", stats.max);
            let _ = writeln!(out, "Mean: {:.2}", stats.mean);
            let _ = writeln!(out, "Median: {:.2}", stats.median);
        }
        None => {
            let _ = writeln!(out, "Count: 0 (no values inside the boundary)");
        }
    }

    for failure in &report.failures {
        let _ = writeln!(out, "Failed: {}: {}", failure.file_path, failure.error);
    }
    out
}

pub fn write_json<W: Write>(report: &RunReport, writer: W) -> Result<()> {
    serde_json::to_writer_pretty(writer, report).context("serialising report")
}

pub fn write_json_file(report: &RunReport, path: &Path) -> Result<()> {
    let file = File::create(path)
        .with_context(|| format!("creating report file {}", path.display()))?;
    let mut writer = BufWriter::new(file);
    write_json(report, &mut writer)?;
    writer.flush().context("flushing report file")
}

/// One row per histogram interval: `lower,upper,count`.
pub fn write_histogram_csv<W: Write>(histogram: &Histogram, writer: W) -> Result<()> {
    let mut csv = csv::Writer::from_writer(writer);
    csv.write_record(["lower", "upper", "count"])
        .context("writing CSV header")?;
    for (lower, upper, count) in histogram.intervals() {
        csv.write_record([lower.to_string(), upper.to_string(), count.to_string()])
            .context("writing CSV row")?;
    }
    csv.flush().context("flushing CSV")
}
