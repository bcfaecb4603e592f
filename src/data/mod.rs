//! Data structures for counts, sample descriptors and gene annotation

mod annotation;
mod count_matrix;
mod dataset;
mod metadata;
mod sample_table;

pub use annotation::{GeneAnnotation, GeneRecord, GENE_ID_PLACEHOLDER};
pub use count_matrix::CountMatrix;
pub use dataset::ExpressionDataset;
pub use metadata::SampleMetadata;
pub use sample_table::{
    build_sample_table, metadata_from_records, AlignmentRecord, MetadataRecord, SampleDescriptor,
    COVARIATE_COLUMNS,
};
