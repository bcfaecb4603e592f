//! Variance-stabilized values for sample-level diagnostics

mod rlog;

pub use rlog::{rlog, rlog_prior_variance};
