//! Count matrix preparation: column alignment, marker rows and empty genes

use std::collections::HashSet;

use crate::data::{CountMatrix, SampleMetadata};
use crate::error::{ReportError, Result};

/// Reorder count columns to the metadata sample order.
///
/// Every metadata sample must have a count column and every count column must
/// be described by the metadata.
pub fn align_to_metadata(counts: &CountMatrix, metadata: &SampleMetadata) -> Result<CountMatrix> {
    let in_counts: HashSet<&str> = counts.sample_ids().iter().map(|s| s.as_str()).collect();
    let in_metadata: HashSet<&str> = metadata.sample_ids().iter().map(|s| s.as_str()).collect();

    let missing_from_counts: Vec<&str> = metadata
        .sample_ids()
        .iter()
        .map(|s| s.as_str())
        .filter(|s| !in_counts.contains(s))
        .collect();
    let missing_from_metadata: Vec<&str> = counts
        .sample_ids()
        .iter()
        .map(|s| s.as_str())
        .filter(|s| !in_metadata.contains(s))
        .collect();

    if !missing_from_counts.is_empty() || !missing_from_metadata.is_empty() {
        return Err(ReportError::SampleMismatch {
            reason: format!(
                "samples missing from counts: {:?}; count columns missing from metadata: {:?}",
                missing_from_counts, missing_from_metadata
            ),
        });
    }

    let order = metadata
        .sample_ids()
        .iter()
        .map(|id| {
            counts.sample_index(id).ok_or_else(|| ReportError::SampleMismatch {
                reason: format!("sample '{}' not found in counts", id),
            })
        })
        .collect::<Result<Vec<usize>>>()?;
    counts.subset_samples(&order)
}

/// Drop genes whose id starts with any of `prefixes`
pub fn strip_marker_rows(counts: &CountMatrix, prefixes: &[String]) -> Result<CountMatrix> {
    let keep: Vec<usize> = counts
        .gene_ids()
        .iter()
        .enumerate()
        .filter(|(_, id)| !prefixes.iter().any(|p| !p.is_empty() && id.starts_with(p.as_str())))
        .map(|(i, _)| i)
        .collect();

    let removed = counts.n_genes() - keep.len();
    if removed > 0 {
        log::info!("Removed {} marker and spike-in rows", removed);
    }
    counts.subset_genes(&keep)
}

/// Drop genes with zero total count
pub fn drop_zero_rows(counts: &CountMatrix) -> Result<CountMatrix> {
    let keep: Vec<usize> = counts
        .row_sums()
        .iter()
        .enumerate()
        .filter(|(_, total)| **total > 0.0)
        .map(|(i, _)| i)
        .collect();

    log::info!(
        "Removed {} genes with no counts, {} remain",
        counts.n_genes() - keep.len(),
        keep.len()
    );
    counts.subset_genes(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn counts() -> CountMatrix {
        CountMatrix::new(
            array![[1.0, 2.0, 3.0], [0.0, 0.0, 0.0], [4.0, 5.0, 6.0], [7.0, 0.0, 1.0]],
            strings(&["g1", "g2", "__no_feature", "ERCC-00002"]),
            strings(&["s1", "s2", "s3"]),
        )
        .unwrap()
    }

    #[test]
    fn test_align_reorders_columns() {
        let meta = SampleMetadata::new(strings(&["s3", "s1", "s2"])).unwrap();
        let aligned = align_to_metadata(&counts(), &meta).unwrap();
        assert_eq!(aligned.sample_ids(), meta.sample_ids());
        assert_eq!(aligned.gene_counts(0).to_vec(), vec![3.0, 1.0, 2.0]);
    }

    #[test]
    fn test_align_names_both_sides() {
        let meta = SampleMetadata::new(strings(&["s1", "s2", "s4"])).unwrap();
        let err = align_to_metadata(&counts(), &meta).unwrap_err();
        let message = err.to_string();
        assert!(message.contains("s4"));
        assert!(message.contains("s3"));
    }

    #[test]
    fn test_repeated_count_column_never_aligns() {
        let repeated = CountMatrix::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            strings(&["g1", "g2"]),
            strings(&["a", "b", "a"]),
        );
        assert!(matches!(repeated, Err(ReportError::InvalidCountMatrix { .. })));

        let unique = CountMatrix::new(
            array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            strings(&["g1", "g2"]),
            strings(&["a", "b", "c"]),
        )
        .unwrap();
        let meta = SampleMetadata::new(strings(&["a", "b"])).unwrap();
        let err = align_to_metadata(&unique, &meta).unwrap_err();
        assert!(err.to_string().contains("\"c\""));
    }

    #[test]
    fn test_strip_markers_and_zero_rows() {
        let prefixes = strings(&["__", "ERCC-"]);
        let stripped = strip_marker_rows(&counts(), &prefixes).unwrap();
        assert_eq!(stripped.gene_ids(), &["g1", "g2"]);
        let nonzero = drop_zero_rows(&stripped).unwrap();
        assert_eq!(nonzero.gene_ids(), &["g1"]);
    }
}
