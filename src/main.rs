use std::io;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;

use regionstat::cli::Cli;
use regionstat::{pipeline, report};

fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::new()
        .filter_level(cli.log_level())
        .parse_default_env()
        .init();

    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = cli.run_config()?;
    let report = pipeline::run(&config).context("run aborted")?;

    if let Some(path) = &cli.report {
        report::write_json_file(&report, path)?;
        log::info!("report written to {}", path.display());
    }

    if let Some(path) = &cli.histogram_csv {
        match &report.summary {
            Some(stats) => {
                let file = std::fs::File::create(path)
                    .with_context(|| format!("creating {}", path.display()))?;
                report::write_histogram_csv(&stats.histogram, file)?;
            }
            None => log::warn!("no histogram to write to {}", path.display()),
        }
    }

    if cli.json {
        report::write_json(&report, io::stdout().lock())?;
        println!();
    } else {
        print!("{}", report::render_text(&report));
    }
    Ok(())
}
