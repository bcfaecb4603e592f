//! rnaseq_report command-line interface

use clap::Parser;
use log::{error, info, LevelFilter};

use rnaseq_report::cli::{Cli, Commands};
use rnaseq_report::pipeline::run_report;
use rnaseq_report::report::format_thousands;
use rnaseq_report::Result;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let result = match cli.command {
        Commands::Run(args) => run(args),
    };

    if let Err(e) = result {
        error!("{}", e);
        std::process::exit(1);
    }
}

fn run(args: rnaseq_report::cli::RunArgs) -> Result<()> {
    let config = args.into_config()?;
    let summary = run_report(&config)?;
    let prep = summary.preparation;
    info!(
        "Genes: {} in counts, {} after control rows, {} non-zero, {} above threshold",
        format_thousands(prep.input as u64),
        format_thousands(prep.after_marker_strip as u64),
        format_thousands(prep.after_zero_filter as u64),
        format_thousands(prep.after_threshold as u64)
    );
    info!("{}", summary.results);
    info!("Done! Report at {}", summary.report_path.display());
    Ok(())
}
