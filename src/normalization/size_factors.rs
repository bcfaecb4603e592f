//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView2, Axis};

use crate::data::ExpressionDataset;
use crate::error::{ReportError, Result};
use crate::stats::median;

/// Estimate size factors and memoize the normalized counts on the dataset.
///
/// Accounts for both sequencing depth and RNA composition: each sample's
/// factor is the median ratio of its counts to the per-gene geometric mean.
pub fn estimate_size_factors(dds: &mut ExpressionDataset) -> Result<()> {
    let size_factors = median_of_ratios(dds.counts().counts())?;
    log::debug!("Size factors: {:?}", size_factors.to_vec());
    dds.set_size_factors(size_factors)
}

/// Median of ratios over genes with every count positive
pub fn median_of_ratios(counts: ArrayView2<f64>) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(ReportError::EmptyData {
            reason: "count matrix is empty".to_string(),
        });
    }

    let log_geo_means: Vec<(usize, f64)> = counts
        .axis_iter(Axis(0))
        .enumerate()
        .filter(|(_, row)| row.iter().all(|&x| x > 0.0))
        .map(|(i, row)| (i, row.iter().map(|x| x.ln()).sum::<f64>() / n_samples as f64))
        .collect();

    if log_geo_means.is_empty() {
        return Err(ReportError::SizeFactorFailed {
            reason: "every gene contains at least one zero, cannot compute geometric means".to_string(),
        });
    }

    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let log_ratios: Vec<f64> = log_geo_means
            .iter()
            .map(|&(i, lg)| counts[[i, j]].ln() - lg)
            .collect();
        size_factors[j] = median(&log_ratios).exp();
    }

    if size_factors.iter().any(|&s: &f64| s <= 0.0 || !s.is_finite()) {
        return Err(ReportError::SizeFactorFailed {
            reason: format!("invalid size factors computed: {:?}", size_factors.to_vec()),
        });
    }
    Ok(size_factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_proportional_samples() {
        let counts = array![[10.0, 20.0, 40.0], [30.0, 60.0, 120.0], [5.0, 10.0, 20.0]];
        let sf = median_of_ratios(counts.view()).unwrap();
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-10);
        assert!((sf[2] / sf[0] - 4.0).abs() < 1e-10);
        // geometric mean of factors is one
        let log_mean: f64 = sf.iter().map(|s| s.ln()).sum::<f64>() / 3.0;
        assert!(log_mean.abs() < 1e-10);
    }

    #[test]
    fn test_zero_genes_are_skipped() {
        let counts = array![[10.0, 20.0], [0.0, 50.0], [30.0, 60.0]];
        let sf = median_of_ratios(counts.view()).unwrap();
        assert!((sf[1] / sf[0] - 2.0).abs() < 1e-10);
    }

    #[test]
    fn test_all_genes_with_zero_fails() {
        let counts = array![[0.0, 20.0], [10.0, 0.0]];
        assert!(matches!(
            median_of_ratios(counts.view()),
            Err(ReportError::SizeFactorFailed { .. })
        ));
    }
}
