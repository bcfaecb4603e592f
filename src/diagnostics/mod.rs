//! Sample-level quality diagnostics on transformed values

mod clustering;
mod pca;

pub use clustering::{hierarchical_clustering, Dendrogram, Merge};
pub use pca::{pca, PcaResult};

use ndarray::{Array2, Axis};

use crate::error::Result;
use crate::stats::pearson;

/// Everything the report draws about samples, computed once from the rlog
/// matrix and the normalized counts
#[derive(Debug, Clone)]
pub struct SampleDiagnostics {
    pub abs_correlation: Array2<f64>,
    pub distances: Array2<f64>,
    pub clustering: Dendrogram,
    /// Rows of the most expressed genes, highest mean first
    pub top_genes: Vec<usize>,
    /// rlog values of `top_genes`
    pub top_values: Array2<f64>,
    pub pca: PcaResult,
}

/// Correlation, distances with clustering, the `n_top` most expressed genes
/// and a PCA on the `pca_genes` most variable genes
pub fn compute_diagnostics(
    rlog: &Array2<f64>,
    normalized: &Array2<f64>,
    n_top: usize,
    pca_genes: usize,
) -> Result<SampleDiagnostics> {
    let abs_correlation = abs_correlation(rlog);
    let distances = sample_distances(rlog);
    let clustering = hierarchical_clustering(&distances)?;
    let top_genes = top_expressed(normalized, n_top);
    let top_values = rlog.select(Axis(0), &top_genes);
    let pca = pca(rlog, pca_genes)?;
    log::info!(
        "Diagnostics: {} top genes, PCA on {} genes ({:.1}% / {:.1}% variance)",
        top_genes.len(),
        pca.n_genes_used,
        pca.percent_variance[0],
        pca.percent_variance[1]
    );
    Ok(SampleDiagnostics {
        abs_correlation,
        distances,
        clustering,
        top_genes,
        top_values,
        pca,
    })
}

/// Samples × samples matrix of |Pearson r| between columns
pub fn abs_correlation(matrix: &Array2<f64>) -> Array2<f64> {
    let columns: Vec<Vec<f64>> = matrix.axis_iter(Axis(1)).map(|c| c.to_vec()).collect();
    let n = columns.len();
    let mut out = Array2::zeros((n, n));
    for i in 0..n {
        out[[i, i]] = 1.0;
        for j in (i + 1)..n {
            let r = pearson(&columns[i], &columns[j]).abs();
            out[[i, j]] = r;
            out[[j, i]] = r;
        }
    }
    out
}

/// Euclidean distances between columns; symmetric with a zero diagonal
pub fn sample_distances(matrix: &Array2<f64>) -> Array2<f64> {
    let n = matrix.ncols();
    let mut out = Array2::zeros((n, n));
    for i in 0..n {
        for j in (i + 1)..n {
            let d = matrix
                .column(i)
                .iter()
                .zip(matrix.column(j))
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                .sqrt();
            out[[i, j]] = d;
            out[[j, i]] = d;
        }
    }
    out
}

/// Row indices of the `n` genes with the highest mean, highest first.
/// Equal means keep row order.
pub fn top_expressed(normalized: &Array2<f64>, n: usize) -> Vec<usize> {
    let means: Vec<f64> = normalized
        .axis_iter(Axis(0))
        .map(|row| row.mean().unwrap_or(0.0))
        .collect();
    let mut order: Vec<usize> = (0..means.len()).collect();
    order.sort_by(|&a, &b| means[b].total_cmp(&means[a]));
    order.truncate(n);
    order
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_abs_correlation() {
        let m = array![[1.0, 4.0, 2.0], [2.0, 3.0, 2.5], [3.0, 2.0, 2.0], [4.0, 1.0, 3.5]];
        let c = abs_correlation(&m);
        assert_eq!(c.dim(), (3, 3));
        // perfectly anti-correlated columns give |r| = 1
        assert!((c[[0, 1]] - 1.0).abs() < 1e-12);
        assert_eq!(c[[1, 0]], c[[0, 1]]);
        assert!(c.iter().all(|&v| (0.0..=1.0 + 1e-12).contains(&v)));
    }

    #[test]
    fn test_sample_distances_symmetric() {
        let m = array![[0.0, 3.0, 1.0], [0.0, 4.0, 1.0]];
        let d = sample_distances(&m);
        assert_eq!(d[[0, 1]], 5.0);
        for i in 0..3 {
            assert_eq!(d[[i, i]], 0.0);
            for j in 0..3 {
                assert_eq!(d[[i, j]], d[[j, i]]);
            }
        }
    }

    #[test]
    fn test_compute_diagnostics_selects_top_rows() {
        let rlog = array![[1.0, 2.0, 3.0], [5.0, 5.5, 4.0], [0.5, 0.1, 0.9], [8.0, 7.0, 9.0]];
        let normalized = rlog.mapv(f64::exp2);
        let diag = compute_diagnostics(&rlog, &normalized, 2, 500).unwrap();
        assert_eq!(diag.top_genes, vec![3, 1]);
        assert_eq!(diag.top_values.row(0), rlog.row(3));
        assert_eq!(diag.clustering.order.len(), 3);
        assert_eq!(diag.distances.dim(), (3, 3));
    }

    #[test]
    fn test_top_expressed() {
        let m = array![[1.0, 1.0], [10.0, 12.0], [5.0, 5.0], [11.0, 11.0]];
        assert_eq!(top_expressed(&m, 2), vec![1, 3]);
        assert_eq!(top_expressed(&m, 10).len(), 4);
    }
}
