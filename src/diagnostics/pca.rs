//! Principal components of samples on the most variable genes

use nalgebra::{DMatrix, SymmetricEigen};
use ndarray::{Array1, Array2, Axis};

use crate::error::{ReportError, Result};
use crate::stats::variance;

const EIGEN_EPS: f64 = 1e-12;
const EIGEN_MAX_ITER: usize = 10_000;
const N_COMPONENTS: usize = 2;

#[derive(Debug, Clone)]
pub struct PcaResult {
    /// Samples × 2 component scores
    pub scores: Array2<f64>,
    /// Percent of total variance on PC1 and PC2
    pub percent_variance: [f64; N_COMPONENTS],
    pub n_genes_used: usize,
}

/// Eigen-decomposition of a symmetric matrix. Returns eigenvalues
/// (descending) and eigenvectors as columns.
fn symmetric_eigen(matrix: &Array2<f64>) -> Result<(Array1<f64>, Array2<f64>)> {
    let n = matrix.nrows();
    let dense = DMatrix::from_fn(n, n, |i, j| matrix[[i, j]]);
    let eigen = SymmetricEigen::try_new(dense, EIGEN_EPS, EIGEN_MAX_ITER).ok_or_else(|| ReportError::NumericalFailure {
        reason: format!("eigen-decomposition of the {} x {} sample Gram matrix did not converge", n, n),
    })?;

    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&i, &j| eigen.eigenvalues[j].total_cmp(&eigen.eigenvalues[i]));
    let values = Array1::from_iter(order.iter().map(|&i| eigen.eigenvalues[i]));
    let vectors = Array2::from_shape_fn((n, n), |(r, c)| eigen.eigenvectors[(r, order[c])]);
    Ok((values, vectors))
}

/// PCA of the samples (columns) on the `ntop` genes (rows) with the highest
/// variance. Genes are centered, not scaled. Each score vector is signed so
/// that its largest absolute entry is positive.
pub fn pca(matrix: &Array2<f64>, ntop: usize) -> Result<PcaResult> {
    let (n_genes, n_samples) = matrix.dim();
    if n_samples < 2 || n_genes == 0 {
        return Err(ReportError::EmptyData {
            reason: format!("PCA needs at least 2 samples and 1 gene, got {} x {}", n_genes, n_samples),
        });
    }

    let variances: Vec<f64> = matrix.axis_iter(Axis(0)).map(|row| variance(&row.to_vec())).collect();
    let mut selected: Vec<usize> = (0..n_genes).collect();
    selected.sort_by(|&a, &b| variances[b].total_cmp(&variances[a]));
    selected.truncate(ntop.min(n_genes));

    // samples × genes, centered per gene
    let mut x = matrix.select(Axis(0), &selected).reversed_axes();
    for mut column in x.axis_iter_mut(Axis(1)) {
        let mean = column.mean().unwrap_or(0.0);
        column.mapv_inplace(|v| v - mean);
    }

    let gram = x.dot(&x.t());
    let (values, vectors) = symmetric_eigen(&gram)?;
    let total: f64 = values.iter().map(|v| v.max(0.0)).sum();

    let mut scores = Array2::zeros((n_samples, N_COMPONENTS));
    let mut percent_variance = [0.0; N_COMPONENTS];
    for k in 0..N_COMPONENTS.min(n_samples) {
        let lambda = values[k].max(0.0);
        let mut column: Array1<f64> = vectors.column(k).mapv(|u| u * lambda.sqrt());
        let dominant = column.iter().copied().fold(0.0_f64, |acc, v| if v.abs() > acc.abs() { v } else { acc });
        if dominant < 0.0 {
            column.mapv_inplace(|v| -v);
        }
        scores.column_mut(k).assign(&column);
        percent_variance[k] = if total > 0.0 { 100.0 * lambda / total } else { 0.0 };
    }

    log::info!(
        "PCA on {} genes: PC1 {:.1}%, PC2 {:.1}%",
        selected.len(),
        percent_variance[0],
        percent_variance[1]
    );
    Ok(PcaResult {
        scores,
        percent_variance,
        n_genes_used: selected.len(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_symmetric_eigen() {
        let m = array![[2.0, 1.0], [1.0, 2.0]];
        let (values, vectors) = symmetric_eigen(&m).unwrap();
        assert!((values[0] - 3.0).abs() < 1e-10);
        assert!((values[1] - 1.0).abs() < 1e-10);
        let v0 = vectors.column(0);
        assert!((v0[0].abs() - v0[1].abs()).abs() < 1e-10);
        assert!((v0.dot(&v0) - 1.0).abs() < 1e-10);

        // eigenvalues come back largest first whatever the input order
        let diagonal = array![[1.0, 0.0, 0.0], [0.0, 5.0, 0.0], [0.0, 0.0, 3.0]];
        let (values, vectors) = symmetric_eigen(&diagonal).unwrap();
        for (got, want) in values.iter().zip([5.0, 3.0, 1.0]) {
            assert!((got - want).abs() < 1e-12);
        }
        assert!((vectors[[1, 0]].abs() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_dominant_axis() {
        // genes vary mostly along a sample split {0, 1} vs {2, 3}
        let m = array![
            [10.0, 10.2, 2.0, 2.1],
            [8.0, 8.1, 1.0, 0.9],
            [5.0, 5.3, 5.1, 4.9],
            [3.0, 3.2, 9.0, 9.1]
        ];
        let result = pca(&m, 500).unwrap();
        assert!(result.percent_variance[0] > 50.0);
        assert!(result.percent_variance[0] >= result.percent_variance[1]);
        assert_eq!(result.n_genes_used, 4);
        let pc1 = result.scores.column(0);
        assert!(pc1[0] * pc1[2] < 0.0);
        assert!(pc1[0] * pc1[1] > 0.0);
    }

    #[test]
    fn test_ntop_limits_genes() {
        let m = array![[1.0, 2.0, 3.0], [5.0, 5.0, 5.1], [0.0, 10.0, 0.0]];
        let result = pca(&m, 2).unwrap();
        assert_eq!(result.n_genes_used, 2);
        assert_eq!(result.scores.dim(), (3, 2));
    }

    #[test]
    fn test_too_few_samples() {
        assert!(pca(&array![[1.0], [2.0]], 10).is_err());
    }
}
