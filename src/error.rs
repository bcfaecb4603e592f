//! Error types for rnaseq_report

use thiserror::Error;

/// Main error type for report generation
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("Invalid count matrix: {reason}")]
    InvalidCountMatrix { reason: String },

    #[error("Invalid metadata: {reason}")]
    InvalidMetadata { reason: String },

    #[error("{path} is missing required column `{column}`")]
    MissingColumn { path: String, column: String },

    #[error("Sample mismatch between counts and metadata: {reason}")]
    SampleMismatch { reason: String },

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: String, got: String },

    #[error("Invalid design matrix: {reason}")]
    InvalidDesignMatrix { reason: String },

    #[error("Invalid contrast: {reason}")]
    InvalidContrast { reason: String },

    #[error("Size factor estimation failed: {reason}")]
    SizeFactorFailed { reason: String },

    #[error("Dispersion estimation failed: {reason}")]
    DispersionEstimationFailed { reason: String },

    #[error("Trend fitting failed: {reason}")]
    TrendFittingFailed { reason: String },

    #[error("GLM fit failed: {reason}")]
    GlmFitFailed { reason: String },

    #[error("Numerical failure: {reason}")]
    NumericalFailure { reason: String },

    #[error("Pipeline stage error: expected {expected}, found {found}")]
    InvalidStage { expected: String, found: String },

    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("Empty data: {reason}")]
    EmptyData { reason: String },

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Number parsing error: {0}")]
    ParseFloatError(#[from] std::num::ParseFloatError),

    #[error("Plot rendering error: {0}")]
    PlotError(#[from] plotters::drawing::DrawingAreaErrorKind<std::io::Error>),

    #[error("Report formatting error: {0}")]
    FmtError(#[from] std::fmt::Error),
}

/// Result type alias for report operations
pub type Result<T> = std::result::Result<T, ReportError>;
