//! Command-line interface for rnaseq_report

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::config::ReportConfig;
use crate::error::Result;

#[derive(Parser, Debug)]
#[command(name = "rnaseq_report")]
#[command(version)]
#[command(about = "RNA-seq differential expression report with sample QC")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the full analysis and write the report
    #[command(
        long_about = "Run the full analysis and write the report\n\n\
            Loads annotation, alignment summary, metadata, counts and the log2\n\
            expression threshold; prepares and normalizes the counts; computes\n\
            sample diagnostics on rlog values; tests the sex contrast under the\n\
            reduced design and writes report.html plus CSV tables.",
        after_long_help = "\
Examples:
  # Everything from a JSON config
  rnaseq_report run --config report.json

  # Flags override config values
  rnaseq_report run --config report.json --alpha 0.05 -o out/

  # No config file
  rnaseq_report run --annotation genes.tsv --alignment align.tsv \\
    --metadata samples.tsv --counts counts.tsv --threshold threshold.txt -o out/"
    )]
    Run(RunArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// JSON configuration file; flags below override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Gene annotation table (gene_id, symbol)
    #[arg(long)]
    pub annotation: Option<PathBuf>,

    /// Alignment summary (sample_id, unit_id, uniquely_aligned)
    #[arg(long)]
    pub alignment: Option<PathBuf>,

    /// Sample metadata (sample_id, sex, tissue, genotype, treatment_duration)
    #[arg(short, long)]
    pub metadata: Option<PathBuf>,

    /// Count matrix, gene ids in the first column
    #[arg(short, long)]
    pub counts: Option<PathBuf>,

    /// File holding the log2 expression threshold
    #[arg(short, long)]
    pub threshold: Option<PathBuf>,

    /// Directory for report.html and the CSV tables
    #[arg(short, long = "output-dir")]
    pub output_dir: Option<PathBuf>,

    /// Adjusted p-value cutoff for significance
    #[arg(short, long)]
    pub alpha: Option<f64>,
}

impl RunArgs {
    /// Config file values (or defaults) with command-line overrides applied
    pub fn into_config(self) -> Result<ReportConfig> {
        let mut config = match &self.config {
            Some(path) => ReportConfig::from_json_file(path)?,
            None => ReportConfig::default(),
        };
        let inputs = &mut config.inputs;
        let overrides = [
            (&mut inputs.annotation, self.annotation),
            (&mut inputs.alignment, self.alignment),
            (&mut inputs.metadata, self.metadata),
            (&mut inputs.counts, self.counts),
            (&mut inputs.threshold, self.threshold),
        ];
        for (slot, value) in overrides {
            if let Some(path) = value {
                *slot = path;
            }
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(alpha) = self.alpha {
            config.alpha = alpha;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_flags() {
        let cli = Cli::try_parse_from([
            "rnaseq_report",
            "-v",
            "run",
            "--counts",
            "counts.tsv",
            "--alpha",
            "0.05",
            "--output-dir",
            "out",
        ])
        .unwrap();
        assert!(cli.verbose);
        let Commands::Run(args) = cli.command;
        let config = args.into_config().unwrap();
        assert_eq!(config.inputs.counts, PathBuf::from("counts.tsv"));
        assert_eq!(config.alpha, 0.05);
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.table_rows, 30);
    }

    #[test]
    fn test_missing_subcommand_is_an_error() {
        assert!(Cli::try_parse_from(["rnaseq_report"]).is_err());
    }
}
