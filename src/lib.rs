//! rnaseq_report: RNA-seq differential expression report
//!
//! Loads a count matrix with sample metadata, alignment statistics and a
//! gene annotation, fits negative binomial GLMs, tests the sex contrast and
//! renders an HTML report with sample quality diagnostics.
//!
//! # Example
//!
//! ```ignore
//! use rnaseq_report::prelude::*;
//!
//! let mut config = ReportConfig::default();
//! config.inputs.counts = "counts.tsv".into();
//! // ... remaining inputs
//! let summary = run_report(&config)?;
//! println!("{}", summary.results);
//! ```

pub mod cli;
pub mod config;
pub mod data;
pub mod diagnostics;
pub mod dispersion;
pub mod error;
pub mod filter;
pub mod glm;
pub mod io;
pub mod normalization;
pub mod pipeline;
pub mod report;
pub mod stats;
pub mod testing;
pub mod transform;

pub use error::{ReportError, Result};

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{InputPaths, ReportConfig};
    pub use crate::data::{CountMatrix, ExpressionDataset, GeneAnnotation, SampleDescriptor, SampleMetadata};
    pub use crate::diagnostics::{compute_diagnostics, SampleDiagnostics};
    pub use crate::dispersion::{estimate_dispersions, DispersionParams};
    pub use crate::error::{ReportError, Result};
    pub use crate::filter::{align_to_metadata, drop_zero_rows, filter_by_normalized_threshold, strip_marker_rows};
    pub use crate::glm::{fit_glm, Contrast, Design, DesignInfo, GlmFitParams};
    pub use crate::io::{extract_significant, read_count_matrix, read_metadata, DeResults, SignificantGene};
    pub use crate::normalization::estimate_size_factors;
    pub use crate::pipeline::{run_report, AnalysisSession, PipelineStage, ReportSummary};
    pub use crate::testing::{benjamini_hochberg, wald_test};
    pub use crate::transform::rlog;
}
