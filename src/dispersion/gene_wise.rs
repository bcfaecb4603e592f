//! Gene-wise dispersion estimation using Cox-Reid adjusted profile likelihood

use ndarray::{Array1, Array2};
use rayon::prelude::*;

use super::likelihood::{grid_search, line_search};
use super::DispersionParams;
use crate::data::ExpressionDataset;
use crate::error::{ReportError, Result};
use crate::glm::linalg::{solve_symmetric, weighted_crossprod, weighted_xtz};
use crate::glm::{create_design_matrix, default_ridge, fit_single_gene, GlmFitParams};
use crate::stats::{mean, variance};

/// True when the design is a pure group model: as many distinct rows as
/// coefficients. Fitted means then equal the group means of normalized counts.
fn is_linear_mu(design: &Array2<f64>) -> bool {
    let mut unique_rows: Vec<Vec<i64>> = Vec::new();
    for row in design.rows() {
        let key: Vec<i64> = row.iter().map(|v| (v * 1000.0).round() as i64).collect();
        if !unique_rows.contains(&key) {
            unique_rows.push(key);
        }
    }
    unique_rows.len() == design.ncols()
}

/// Least-squares fitted values of `y` on `design`
fn linear_fit(y: &[f64], design: &Array2<f64>) -> Vec<f64> {
    let ones = vec![1.0; y.len()];
    let beta = solve_symmetric(&weighted_crossprod(design, &ones), weighted_xtz(design, &ones, y).view());
    design.dot(&beta).to_vec()
}

/// sum(((y - mu)^2 - mu) / mu^2) / (m - p), with mu from a linear fit floored at 1
fn rough_disp_estimate(normalized: &[f64], design: &Array2<f64>) -> f64 {
    let (m, p) = design.dim();
    if m <= p {
        return 0.0;
    }
    let est: f64 = linear_fit(normalized, design)
        .iter()
        .zip(normalized)
        .map(|(&mu, &y)| {
            let mu = mu.max(1.0);
            ((y - mu).powi(2) - mu) / (mu * mu)
        })
        .sum::<f64>()
        / (m - p) as f64;
    est.max(0.0)
}

/// (var - xim * mean) / mean^2, where xim is the mean of 1 / size factor
fn moments_disp_estimate(normalized: &[f64], xim: f64) -> f64 {
    let base_mean = mean(normalized);
    if base_mean <= 1e-10 {
        return f64::INFINITY;
    }
    (variance(normalized) - xim * base_mean) / (base_mean * base_mean)
}

/// Means of a gene under an initial dispersion, from a ridge GLM fit with
/// the same penalty as the final coefficient fit
fn glm_mu(counts: &[f64], size_factors: &[f64], design: &Array2<f64>, alpha: f64, params: &DispersionParams) -> Vec<f64> {
    let glm_params = GlmFitParams {
        maxit: params.maxit,
        beta_tol: params.disp_tol,
    };
    let sf = Array1::from(size_factors.to_vec());
    let y = Array1::from(counts.to_vec());
    fit_single_gene(y.view(), design, sf.view(), alpha, &default_ridge(design.ncols()), &glm_params)
        .mu
        .to_vec()
}

/// Dispersion of one gene and the fitted means it was profiled at
pub fn estimate_dispersion_gene(
    counts: &[f64],
    size_factors: &[f64],
    design: &Array2<f64>,
    use_linear_mu: bool,
    params: &DispersionParams,
) -> (f64, Vec<f64>) {
    let n = counts.len();
    if counts.iter().all(|&c| c == 0.0) {
        return (f64::NAN, vec![0.0; n]);
    }

    let max_disp = (n as f64).max(10.0);
    let normalized: Vec<f64> = counts.iter().zip(size_factors).map(|(&c, &s)| c / s).collect();
    let xim = mean(&size_factors.iter().map(|s| 1.0 / s).collect::<Vec<_>>());

    let rough = rough_disp_estimate(&normalized, design);
    let moments = moments_disp_estimate(&normalized, xim);
    let alpha_init = rough.min(moments).clamp(params.min_disp, max_disp);

    let mu: Vec<f64> = if use_linear_mu {
        linear_fit(&normalized, design)
            .iter()
            .zip(size_factors)
            .map(|(&fitted, &s)| fitted * s)
            .collect()
    } else {
        glm_mu(counts, size_factors, design, alpha_init, params)
    };

    let search = line_search(counts, design, &mu, alpha_init.ln(), None, params);

    let no_increase = search.last_lp < search.initial_lp + search.initial_lp.abs() / 1e6;
    let mut alpha = if no_increase { alpha_init } else { search.log_alpha.exp() };

    let converged = search.iterations < params.maxit && search.iterations != 1;
    if !converged && alpha > params.min_disp * 10.0 {
        alpha = grid_search(counts, design, &mu, params.min_disp, max_disp, None);
    }

    (alpha.clamp(params.min_disp, max_disp), mu)
}

/// Estimate gene-wise dispersions for the dataset's design and store them
/// with the fitted means and the design matrix.
pub fn estimate_gene_dispersions(dds: &mut ExpressionDataset, params: &DispersionParams) -> Result<()> {
    let size_factors = dds
        .size_factors()
        .ok_or_else(|| ReportError::DispersionEstimationFailed {
            reason: "size factors must be estimated first".to_string(),
        })?
        .to_vec();

    let (design, info) = create_design_matrix(dds.metadata(), dds.design())?;
    if design.nrows() <= design.ncols() {
        return Err(ReportError::DispersionEstimationFailed {
            reason: format!(
                "design {} has as many coefficients as samples; no replicates to estimate dispersion",
                dds.design().formula()
            ),
        });
    }

    let use_linear_mu = is_linear_mu(&design);
    let counts = dds.counts().counts();
    let results: Vec<(f64, Vec<f64>)> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            let gene_counts = counts.row(i).to_vec();
            estimate_dispersion_gene(&gene_counts, &size_factors, &design, use_linear_mu, params)
        })
        .collect();

    let (n_genes, n_samples) = (dds.n_genes(), dds.n_samples());
    let mut dispersions = Array1::zeros(n_genes);
    let mut mu = Array2::zeros((n_genes, n_samples));
    for (i, (disp, gene_mu)) in results.into_iter().enumerate() {
        dispersions[i] = disp;
        mu.row_mut(i).assign(&Array1::from(gene_mu));
    }

    dds.set_gene_dispersions(dispersions)?;
    dds.set_mu(mu)?;
    dds.set_design_matrix(design, info)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_is_linear_mu() {
        let group = array![[1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0]];
        assert!(is_linear_mu(&group));
        let additive = array![[1.0, 0.0, 0.0], [1.0, 1.0, 0.0], [1.0, 0.0, 1.0], [1.0, 1.0, 1.0]];
        assert!(!is_linear_mu(&additive));
    }

    #[test]
    fn test_moments_estimate() {
        // mean 10 with unit size factors
        let normalized = [6.0, 8.0, 12.0, 14.0];
        let v = variance(&normalized);
        assert!((v - 40.0 / 3.0).abs() < 1e-12);
        let est = moments_disp_estimate(&normalized, 1.0);
        assert!((est - (v - 10.0) / 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_overdispersed_gene_gets_larger_dispersion() {
        let design = array![[1.0], [1.0], [1.0], [1.0], [1.0], [1.0]];
        let sf = [1.0; 6];
        let params = DispersionParams::default();
        let (tight, _) = estimate_dispersion_gene(&[100.0, 104.0, 98.0, 101.0, 97.0, 103.0], &sf, &design, true, &params);
        let (loose, mu) = estimate_dispersion_gene(&[40.0, 180.0, 70.0, 150.0, 60.0, 120.0], &sf, &design, true, &params);
        assert!(loose > tight);
        assert!(loose > 0.05);
        assert!((mu[0] - 103.333).abs() < 1e-2);
    }

    #[test]
    fn test_additive_design_means_match_coefficient_fit() {
        let design = array![
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 0.0],
            [1.0, 0.0, 1.0],
            [1.0, 1.0, 1.0],
            [1.0, 0.0, 0.0],
            [1.0, 1.0, 1.0]
        ];
        let counts = [20.0, 45.0, 31.0, 80.0, 25.0, 70.0];
        let sf = [1.0, 1.1, 0.9, 1.0, 1.2, 0.8];
        let params = DispersionParams::default();
        let mu = glm_mu(&counts, &sf, &design, 0.05, &params);

        let final_fit = fit_single_gene(
            Array1::from(counts.to_vec()).view(),
            &design,
            Array1::from(sf.to_vec()).view(),
            0.05,
            &default_ridge(3),
            &GlmFitParams {
                maxit: params.maxit,
                beta_tol: params.disp_tol,
            },
        );
        for (a, b) in mu.iter().zip(final_fit.mu.iter()) {
            assert!((a - b).abs() < 1e-9);
        }
        let (disp, profiled) = estimate_dispersion_gene(&counts, &sf, &design, false, &params);
        assert!(disp.is_finite());
        assert_eq!(profiled.len(), 6);
    }

    #[test]
    fn test_all_zero_gene_is_nan() {
        let design = array![[1.0], [1.0]];
        let (disp, _) = estimate_dispersion_gene(&[0.0, 0.0], &[1.0, 1.0], &design, true, &DispersionParams::default());
        assert!(disp.is_nan());
    }
}
