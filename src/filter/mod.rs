//! Count matrix preparation and low-expression filtering

mod counts;
mod expression;

pub use counts::{align_to_metadata, drop_zero_rows, strip_marker_rows};
pub use expression::{expression_threshold, filter_by_normalized_threshold};
