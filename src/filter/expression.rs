//! Low-expression filter on normalized counts

use ndarray::Axis;

use crate::data::{CountMatrix, ExpressionDataset};
use crate::error::{ReportError, Result};

/// Normalized count a gene must exceed in at least one sample: 2^L - 1
pub fn expression_threshold(log2_threshold: f64) -> f64 {
    log2_threshold.exp2() - 1.0
}

/// Raw counts of the genes whose normalized count is strictly above
/// `2^L - 1` in at least one sample. The dataset must carry size factors.
pub fn filter_by_normalized_threshold(dds: &ExpressionDataset, log2_threshold: f64) -> Result<CountMatrix> {
    let normalized = dds.normalized_counts().ok_or_else(|| ReportError::SizeFactorFailed {
        reason: "size factors must be estimated before the expression filter".to_string(),
    })?;
    let cutoff = expression_threshold(log2_threshold);

    let keep: Vec<usize> = normalized
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().any(|&v| v > cutoff))
        .map(|(i, _)| i)
        .collect();

    log::info!(
        "Expression filter (normalized count > {:.3}): kept {} of {} genes",
        cutoff,
        keep.len(),
        dds.n_genes()
    );
    dds.counts().subset_genes(&keep)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::SampleMetadata;
    use crate::glm::Design;
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_threshold_value() {
        assert_eq!(expression_threshold(0.0), 0.0);
        assert_eq!(expression_threshold(3.0), 7.0);
    }

    #[test]
    fn test_keeps_gene_iff_any_sample_exceeds() {
        let counts = CountMatrix::new(
            array![[8.0, 1.0], [7.0, 7.0], [2.0, 16.0]],
            strings(&["above", "at", "above_scaled"]),
            strings(&["a", "b"]),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(strings(&["a", "b"])).unwrap();
        meta.add_condition("sex", strings(&["male", "female"])).unwrap();
        let mut dds = ExpressionDataset::new(counts, meta, Design::new(&["sex"])).unwrap();
        dds.set_size_factors(array![1.0, 2.0]).unwrap();

        // cutoff 7: normalized rows are [8, 0.5], [7, 3.5], [2, 8]
        let kept = filter_by_normalized_threshold(&dds, 3.0).unwrap();
        assert_eq!(kept.gene_ids(), &["above", "above_scaled"]);
        assert_eq!(kept.gene_counts(1).to_vec(), vec![2.0, 16.0]);
    }

    #[test]
    fn test_requires_size_factors() {
        let counts = CountMatrix::new(array![[1.0, 2.0]], strings(&["g"]), strings(&["a", "b"])).unwrap();
        let mut meta = SampleMetadata::new(strings(&["a", "b"])).unwrap();
        meta.add_condition("sex", strings(&["male", "female"])).unwrap();
        let dds = ExpressionDataset::new(counts, meta, Design::new(&["sex"])).unwrap();
        assert!(filter_by_normalized_threshold(&dds, 1.0).is_err());
    }
}
