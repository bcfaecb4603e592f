//! Differential expression testing

mod fdr;
mod wald;

pub use fdr::benjamini_hochberg;
pub use wald::{wald_pvalue, wald_test};
