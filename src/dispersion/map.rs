//! Maximum a posteriori dispersions: gene-wise estimates shrunk toward the
//! trend under a log-normal prior.

use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{ChiSquared, Distribution, StandardNormal};
use rayon::prelude::*;

use super::likelihood::{grid_search, line_search, LogNormalPrior};
use super::DispersionParams;
use crate::data::ExpressionDataset;
use crate::error::{ReportError, Result};
use crate::glm::linalg::{solve_symmetric, weighted_crossprod, weighted_xtz};
use crate::stats::{mad_squared, trigamma};

/// Floor on the prior variance of log dispersion
const MIN_PRIOR_VAR: f64 = 0.25;
/// Gene-wise estimates below this do not inform the prior
const MIN_PRIOR_DISPERSION: f64 = 1e-6;
/// Residual degrees of freedom at or below which the prior variance is
/// matched by simulation
const SIMULATION_MAX_DF: f64 = 3.0;
const SIMULATION_SEED: u64 = 2;
const N_SIMULATIONS: usize = 10_000;
const HISTOGRAM_BIN: f64 = 0.5;
const LOESS_SPAN: f64 = 0.2;

/// Prior variance of log dispersion and the squared MAD of the log residuals
/// it was derived from.
pub fn estimate_prior_variance(
    gene_dispersions: &[f64],
    trended_dispersions: &[f64],
    n_samples: usize,
    n_coef: usize,
) -> (f64, f64) {
    let residuals: Vec<f64> = gene_dispersions
        .iter()
        .zip(trended_dispersions)
        .filter(|(g, t)| g.is_finite() && t.is_finite() && **g >= MIN_PRIOR_DISPERSION && **t > 0.0)
        .map(|(g, t)| g.ln() - t.ln())
        .collect();
    if residuals.len() < 3 {
        return (MIN_PRIOR_VAR, MIN_PRIOR_VAR);
    }

    let var_log_disp_ests = mad_squared(&residuals);
    if n_samples <= n_coef {
        return (MIN_PRIOR_VAR, var_log_disp_ests);
    }

    let df = (n_samples - n_coef) as f64;
    let prior_var = if df <= SIMULATION_MAX_DF {
        simulated_prior_variance(&residuals, df)
    } else {
        (var_log_disp_ests - trigamma(df / 2.0)).max(MIN_PRIOR_VAR)
    };
    log::debug!(
        "Dispersion prior: df={}, var(log residuals)={:.4}, prior variance={:.4}",
        df,
        var_log_disp_ests,
        prior_var
    );
    (prior_var, var_log_disp_ests)
}

fn histogram_breaks() -> Vec<f64> {
    (-20..=20).map(|i| i as f64 * HISTOGRAM_BIN).collect()
}

/// Density of `values` over equal-width bins `[b_i, b_i+1)`
fn histogram_density(values: &[f64], breaks: &[f64]) -> Vec<f64> {
    let n_bins = breaks.len() - 1;
    let mut counts = vec![0usize; n_bins];
    for &v in values {
        let bin = ((v - breaks[0]) / HISTOGRAM_BIN).floor();
        if bin >= 0.0 && (bin as usize) < n_bins {
            counts[bin as usize] += 1;
        }
    }
    if values.is_empty() {
        return vec![0.0; n_bins];
    }
    let scale = values.len() as f64 * HISTOGRAM_BIN;
    counts.iter().map(|&c| c as f64 / scale).collect()
}

/// Kullback-Leibler divergence of `q` from `p`, offset by the smallest
/// positive density so empty bins stay finite
fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    let small = p
        .iter()
        .chain(q)
        .copied()
        .filter(|&x| x > 0.0)
        .fold(f64::INFINITY, f64::min);
    if !small.is_finite() {
        return f64::INFINITY;
    }
    p.iter()
        .zip(q)
        .filter(|(o, _)| **o > 0.0)
        .map(|(&o, &r)| o * ((o + small).ln() - (r + small).ln()))
        .sum()
}

/// Prior variance whose simulated residual distribution,
/// log(chi2_df / df) + N(0, var), is closest to the observed residuals
fn simulated_prior_variance(residuals: &[f64], df: f64) -> f64 {
    let breaks = histogram_breaks();
    let (lo, hi) = (breaks[0], breaks[breaks.len() - 1]);
    let observed: Vec<f64> = residuals.iter().copied().filter(|&x| x > lo && x < hi).collect();
    if observed.is_empty() {
        return MIN_PRIOR_VAR;
    }
    let observed_density = histogram_density(&observed, &breaks);

    let chi_squared = match ChiSquared::new(df) {
        Ok(dist) => dist,
        Err(e) => {
            log::warn!("Cannot simulate chi-squared with df={}: {}", df, e);
            return MIN_PRIOR_VAR;
        }
    };
    let mut rng = StdRng::seed_from_u64(SIMULATION_SEED);

    let grid: Vec<f64> = (0..200).map(|i| i as f64 * 8.0 / 199.0).collect();
    let divergences: Vec<f64> = grid
        .iter()
        .map(|&var| {
            let sd = var.sqrt();
            let simulated: Vec<f64> = (0..N_SIMULATIONS)
                .map(|_| {
                    let chi: f64 = chi_squared.sample(&mut rng);
                    let z: f64 = rng.sample(StandardNormal);
                    chi.ln() + z * sd - df.ln()
                })
                .filter(|&x| x > lo && x < hi)
                .collect();
            kl_divergence(&observed_density, &histogram_density(&simulated, &breaks))
        })
        .collect();

    let fine: Vec<f64> = (0..1000).map(|i| i as f64 * 8.0 / 999.0).collect();
    let smoothed = loess_predict(&grid, &divergences, &fine, LOESS_SPAN);
    let best = smoothed
        .iter()
        .enumerate()
        .filter(|(_, v)| v.is_finite())
        .min_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0.0, |(i, _)| fine[i]);

    log::debug!("Simulated prior variance (df={}): {:.4}", df, best);
    best.max(MIN_PRIOR_VAR)
}

/// Local quadratic regression with tricube weights over the nearest
/// `span * n` points, evaluated at each of `at`
fn loess_predict(x: &[f64], y: &[f64], at: &[f64], span: f64) -> Vec<f64> {
    let points: Vec<(f64, f64)> = x
        .iter()
        .zip(y)
        .filter(|(_, yv)| yv.is_finite())
        .map(|(&xv, &yv)| (xv, yv))
        .collect();
    if points.is_empty() {
        return vec![f64::NAN; at.len()];
    }
    let k = ((points.len() as f64 * span).round() as usize).clamp(3.min(points.len()), points.len());

    at.iter()
        .map(|&x0| {
            let mut by_distance: Vec<(f64, f64, f64)> =
                points.iter().map(|&(xv, yv)| ((xv - x0).abs(), xv, yv)).collect();
            by_distance.sort_by(|a, b| a.0.total_cmp(&b.0));
            by_distance.truncate(k);

            let max_dist = by_distance.iter().map(|p| p.0).fold(0.0_f64, f64::max);
            let max_dist = if max_dist > 1e-10 { max_dist * 1.0001 } else { 1.0 };
            let center = by_distance.iter().map(|p| p.1).sum::<f64>() / k as f64;

            let mut design = Array2::zeros((k, 3));
            let mut weights = Vec::with_capacity(k);
            let mut response = Vec::with_capacity(k);
            for (row, &(d, xv, yv)) in by_distance.iter().enumerate() {
                let xc = xv - center;
                design[[row, 0]] = 1.0;
                design[[row, 1]] = xc;
                design[[row, 2]] = xc * xc;
                weights.push((1.0 - (d / max_dist).powi(3)).max(0.0).powi(3));
                response.push(yv);
            }
            let beta = solve_symmetric(
                &weighted_crossprod(&design, &weights),
                weighted_xtz(&design, &weights, &response).view(),
            );
            let xc = x0 - center;
            beta[0] + beta[1] * xc + beta[2] * xc * xc
        })
        .collect()
}

/// Posterior mode of one gene's dispersion
pub fn fit_map_dispersion(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    gene_dispersion: f64,
    trended_dispersion: f64,
    prior_var: f64,
    params: &DispersionParams,
) -> f64 {
    let max_disp = (counts.len() as f64).max(10.0);
    if !trended_dispersion.is_finite() || trended_dispersion <= 0.0 {
        return 0.1;
    }
    if !gene_dispersion.is_finite() {
        return trended_dispersion;
    }

    let prior = LogNormalPrior {
        mean: trended_dispersion.ln(),
        var: prior_var,
    };
    let init = if gene_dispersion > 0.1 * trended_dispersion {
        gene_dispersion
    } else {
        trended_dispersion
    };

    let search = line_search(counts, design, mu, init.ln(), Some(prior), params);
    let alpha = if search.converged {
        search.log_alpha.exp()
    } else {
        grid_search(counts, design, mu, params.min_disp, max_disp, Some(prior))
    };
    alpha.clamp(params.min_disp, max_disp)
}

/// Shrink gene-wise dispersions toward the trend and store the final values.
/// Genes far above the trend keep their gene-wise estimate.
pub fn estimate_map_dispersions(dds: &mut ExpressionDataset, params: &DispersionParams) -> Result<()> {
    let missing = |what: &str| ReportError::DispersionEstimationFailed {
        reason: format!("{} required for MAP dispersions", what),
    };
    let gene_dispersions = dds.gene_dispersions().ok_or_else(|| missing("gene-wise dispersions"))?.to_vec();
    let trended = dds.trended_dispersions().ok_or_else(|| missing("trended dispersions"))?.to_vec();
    let mu = dds.mu().ok_or_else(|| missing("fitted means"))?.clone();
    let design = dds.design_matrix().ok_or_else(|| missing("design matrix"))?.clone();

    let (prior_var, var_log_disp_ests) =
        estimate_prior_variance(&gene_dispersions, &trended, dds.n_samples(), design.ncols());
    dds.set_dispersion_prior_var(prior_var);

    let counts = dds.counts().counts();
    let map: Vec<f64> = (0..dds.n_genes())
        .into_par_iter()
        .map(|i| {
            fit_map_dispersion(
                &counts.row(i).to_vec(),
                &design,
                &mu.row(i).to_vec(),
                gene_dispersions[i],
                trended[i],
                prior_var,
                params,
            )
        })
        .collect();

    let threshold = params.outlier_sd * var_log_disp_ests.sqrt();
    let mut n_outliers = 0;
    let finals: Array1<f64> = map
        .iter()
        .zip(gene_dispersions.iter().zip(&trended))
        .map(|(&map_disp, (&gene, &trend))| {
            let outlier = gene.is_finite() && gene > 0.0 && trend > 0.0 && gene.ln() - trend.ln() > threshold;
            if outlier {
                n_outliers += 1;
                gene
            } else {
                map_disp
            }
        })
        .collect();

    log::info!(
        "MAP dispersions: prior variance {:.4}, {} genes kept their gene-wise estimate",
        prior_var,
        n_outliers
    );
    dds.set_dispersions(finals)
}
