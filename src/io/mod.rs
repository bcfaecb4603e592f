//! Input tables, result types and CSV exports

mod results;
mod tables;

pub use results::{extract_significant, DeResults, ResultsSummary, SignificantGene};
pub use tables::{
    read_alignment_summary, read_annotation, read_count_matrix, read_metadata, read_metadata_records,
    read_threshold, sniff_delimiter, write_de_results, write_matrix, write_sample_table, write_significant,
    write_size_factors,
};
