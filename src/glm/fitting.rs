//! GLM fitting using Iteratively Reweighted Least Squares (IRLS)

use ndarray::{Array1, Array2, ArrayView1};
use rayon::prelude::*;

use super::design::{create_design_matrix, DesignInfo};
use super::linalg::{invert_symmetric, solve_symmetric, weighted_crossprod, weighted_xtz};
use super::negative_binomial::{nb_log_likelihood, nb_mean, nb_weight, MAX_LFC_BETA, MIN_MU};
use crate::data::ExpressionDataset;
use crate::error::{ReportError, Result};

/// Ridge penalty on every coefficient: 1e-6 on the log2 scale
pub fn default_ridge(n_coefs: usize) -> Vec<f64> {
    let ln2 = std::f64::consts::LN_2;
    vec![1e-6 / (ln2 * ln2); n_coefs]
}

/// Configurable parameters for GLM fitting
#[derive(Debug, Clone)]
pub struct GlmFitParams {
    /// Maximum IRLS iterations
    pub maxit: usize,
    /// Relative deviance change that counts as converged
    pub beta_tol: f64,
}

impl Default for GlmFitParams {
    fn default() -> Self {
        Self {
            maxit: 100,
            beta_tol: 1e-8,
        }
    }
}

/// Per-gene fit, coefficients on the natural log scale
#[derive(Debug, Clone)]
pub struct GlmFitResult {
    pub coefficients: Array1<f64>,
    pub standard_errors: Array1<f64>,
    pub mu: Array1<f64>,
    pub converged: bool,
}

/// Fit the dataset's current design to every gene and store the result
pub fn fit_glm(dds: &mut ExpressionDataset, params: &GlmFitParams) -> Result<DesignInfo> {
    let size_factors = dds.size_factors().ok_or_else(|| ReportError::GlmFitFailed {
        reason: "size factors must be estimated first".to_string(),
    })?;
    let dispersions = dds.dispersions().ok_or_else(|| ReportError::GlmFitFailed {
        reason: "dispersions must be estimated first".to_string(),
    })?;

    let (design, info) = create_design_matrix(dds.metadata(), dds.design())?;
    if design.nrows() <= design.ncols() {
        return Err(ReportError::InvalidDesignMatrix {
            reason: format!(
                "design {} has {} coefficients but only {} samples",
                dds.design().formula(),
                design.ncols(),
                design.nrows()
            ),
        });
    }

    let counts = dds.counts().counts();
    let lambda = default_ridge(design.ncols());
    let results: Vec<GlmFitResult> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            fit_single_gene(
                counts.row(i),
                &design,
                size_factors.view(),
                dispersions[i],
                &lambda,
                params,
            )
        })
        .collect();

    let n_coefs = design.ncols();
    let mut coefficients = Array2::zeros((results.len(), n_coefs));
    let mut standard_errors = Array2::zeros((results.len(), n_coefs));
    let mut n_failed = 0;
    for (i, result) in results.into_iter().enumerate() {
        coefficients.row_mut(i).assign(&result.coefficients);
        standard_errors.row_mut(i).assign(&result.standard_errors);
        if !result.converged {
            n_failed += 1;
        }
    }

    if n_failed > 0 {
        log::warn!("{} genes did not converge in the GLM fit for {}", n_failed, dds.design().formula());
    }
    log::debug!("Fitted {} coefficients: {:?}", n_coefs, info.coef_names);

    dds.set_design_matrix(design, info.clone())?;
    dds.set_glm_fit(coefficients, standard_errors)?;
    Ok(info)
}

/// IRLS for one gene with a per-coefficient ridge penalty `lambda`
/// (natural log scale). Standard errors come from the sandwich
/// `(X'WX + L)^-1 X'WX (X'WX + L)^-1`.
pub fn fit_single_gene(
    counts: ArrayView1<f64>,
    design: &Array2<f64>,
    size_factors: ArrayView1<f64>,
    alpha: f64,
    lambda: &[f64],
    params: &GlmFitParams,
) -> GlmFitResult {
    let n_samples = counts.len();
    let n_coefs = design.ncols();

    // start from least squares on log normalized counts
    let log_counts: Vec<f64> = counts
        .iter()
        .zip(size_factors.iter())
        .map(|(&c, &s)| (c / s + 0.1).ln())
        .collect();
    let ones = vec![1.0; n_samples];
    let mut beta = solve_symmetric(
        &weighted_crossprod(design, &ones),
        weighted_xtz(design, &ones, &log_counts).view(),
    );
    if beta.iter().any(|b| !b.is_finite()) {
        let mean_norm = log_counts.iter().map(|l| l.exp() - 0.1).sum::<f64>() / n_samples as f64;
        beta = Array1::zeros(n_coefs);
        beta[0] = mean_norm.max(0.1).ln();
    }

    let fitted_means = |beta: &Array1<f64>| -> Vec<f64> {
        design
            .dot(beta)
            .iter()
            .zip(size_factors.iter())
            .map(|(&eta, &s)| nb_mean(eta, s).max(MIN_MU))
            .collect()
    };

    let mut converged = false;
    let mut dev_old = 0.0_f64;
    let mut mu = fitted_means(&beta);

    for iter in 0..params.maxit {
        let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
        let z: Vec<f64> = (0..n_samples)
            .map(|i| (mu[i] / size_factors[i]).ln() + (counts[i] - mu[i]) / mu[i])
            .collect();

        let mut xtwx = weighted_crossprod(design, &weights);
        for j in 0..n_coefs {
            xtwx[[j, j]] += lambda[j];
        }
        beta = solve_symmetric(&xtwx, weighted_xtz(design, &weights, &z).view());

        if beta.iter().any(|b| b.abs() > MAX_LFC_BETA) {
            break;
        }

        mu = fitted_means(&beta);
        let dev: f64 = mu
            .iter()
            .zip(counts.iter())
            .map(|(&m, &y)| -2.0 * nb_log_likelihood(y, m, alpha))
            .sum();
        let conv_test = (dev - dev_old).abs() / (dev.abs() + 0.1);
        if conv_test.is_nan() {
            break;
        }
        if iter > 0 && conv_test < params.beta_tol {
            converged = true;
            break;
        }
        dev_old = dev;
    }

    let mu = fitted_means(&beta);
    let weights: Vec<f64> = mu.iter().map(|&m| nb_weight(m, alpha)).collect();
    let xtwx = weighted_crossprod(design, &weights);
    let mut ridged = xtwx.clone();
    for j in 0..n_coefs {
        ridged[[j, j]] += lambda[j];
    }
    let ridged_inv = invert_symmetric(&ridged);
    let sigma = ridged_inv.dot(&xtwx).dot(&ridged_inv);
    let standard_errors = sigma
        .diag()
        .mapv(|v| if v > 0.0 { v.sqrt() } else { f64::NAN });

    GlmFitResult {
        coefficients: beta,
        standard_errors,
        mu: Array1::from(mu),
        converged,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::glm::Design;
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_two_group_fold_change() {
        let design = array![[1.0, 0.0], [1.0, 0.0], [1.0, 0.0], [1.0, 1.0], [1.0, 1.0], [1.0, 1.0]];
        let counts = array![100.0, 100.0, 100.0, 400.0, 400.0, 400.0];
        let sf = array![1.0, 1.0, 1.0, 1.0, 1.0, 1.0];
        let fit = fit_single_gene(
            counts.view(),
            &design,
            sf.view(),
            0.01,
            &default_ridge(2),
            &GlmFitParams::default(),
        );
        assert!(fit.converged);
        assert!((fit.coefficients[0] - 100.0_f64.ln()).abs() < 1e-3);
        assert!((fit.coefficients[1] - 4.0_f64.ln()).abs() < 1e-3);
        assert!(fit.standard_errors.iter().all(|s| s.is_finite() && *s > 0.0));
    }

    #[test]
    fn test_size_factors_absorb_depth() {
        let design = array![[1.0], [1.0], [1.0], [1.0]];
        let counts = array![50.0, 100.0, 200.0, 100.0];
        let sf = array![0.5, 1.0, 2.0, 1.0];
        let fit = fit_single_gene(
            counts.view(),
            &design,
            sf.view(),
            0.05,
            &default_ridge(1),
            &GlmFitParams::default(),
        );
        assert!((fit.coefficients[0] - 100.0_f64.ln()).abs() < 1e-3);
        assert!((fit.mu[2] - 200.0).abs() < 0.5);
    }

    #[test]
    fn test_fit_glm_requires_dispersions() {
        let counts = CountMatrix::new(
            array![[10.0, 12.0, 20.0, 22.0]],
            strings(&["g1"]),
            strings(&["a", "b", "c", "d"]),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(strings(&["a", "b", "c", "d"])).unwrap();
        meta.add_condition("sex", strings(&["male", "male", "female", "female"])).unwrap();
        let mut dds = ExpressionDataset::new(counts, meta, Design::new(&["sex"])).unwrap();
        dds.set_size_factors(array![1.0, 1.0, 1.0, 1.0]).unwrap();
        assert!(fit_glm(&mut dds, &GlmFitParams::default()).is_err());

        dds.set_dispersions(array![0.01]).unwrap();
        let info = fit_glm(&mut dds, &GlmFitParams::default()).unwrap();
        assert_eq!(info.coef_names.len(), 2);
        assert!(dds.has_glm_fit());
    }
}
