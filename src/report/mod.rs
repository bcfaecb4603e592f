//! HTML report rendering with inline SVG plots

mod format;
mod html;
mod svg;

pub use format::{escape_html, format_count, format_mean, format_significant, format_thousands};
pub use html::{render_report, Grouping, PreparationCounts, ReportContext, RunSummary};
pub use svg::{distance_heatmap, expression_heatmap, ma_plot, pca_plot, scatter_matrix};
