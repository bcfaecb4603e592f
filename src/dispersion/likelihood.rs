//! Cox-Reid adjusted profile log posterior of log(alpha), its derivative,
//! and the two maximizers shared by gene-wise and MAP estimation.

use ndarray::Array2;
use statrs::function::gamma::{digamma, ln_gamma};

use super::DispersionParams;
use crate::glm::linalg::{invert_symmetric, log_det_symmetric, weighted_crossprod};

/// Hard lower bound on proposed log(alpha)
const MIN_LOG_ALPHA_HARD: f64 = -30.0;
/// Hard upper bound on proposed log(alpha)
const MAX_LOG_ALPHA_HARD: f64 = 10.0;
/// Armijo sufficient-increase constant
const ARMIJO_EPSILON: f64 = 1e-4;

/// Normal prior on log(alpha)
#[derive(Debug, Clone, Copy)]
pub(crate) struct LogNormalPrior {
    pub mean: f64,
    pub var: f64,
}

fn cox_reid_weights(mu: &[f64], alpha: f64) -> Vec<f64> {
    mu.iter().map(|&m| 1.0 / (1.0 / m.max(1e-10) + alpha)).collect()
}

pub(crate) fn log_posterior(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;

    let ll: f64 = counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let m = m.max(1e-10);
            ln_gamma(y + alpha_inv) - ln_gamma(alpha_inv) - y * (m + alpha_inv).ln()
                - alpha_inv * (1.0 + m * alpha).ln()
        })
        .sum();

    let b = weighted_crossprod(design, &cox_reid_weights(mu, alpha));
    let log_det = log_det_symmetric(&b);
    let cr = if log_det.is_finite() { -0.5 * log_det } else { 0.0 };

    let prior_term = prior.map_or(0.0, |p| -0.5 * (log_alpha - p.mean).powi(2) / p.var);
    ll + cr + prior_term
}

/// Derivative of [`log_posterior`] with respect to log(alpha)
pub(crate) fn d_log_posterior(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    let alpha = log_alpha.exp();
    let alpha_inv = 1.0 / alpha;

    let ll_sum: f64 = counts
        .iter()
        .zip(mu)
        .map(|(&y, &m)| {
            let m = m.max(1e-10);
            digamma(alpha_inv) + (1.0 + m * alpha).ln() - m * alpha / (1.0 + m * alpha)
                - digamma(y + alpha_inv)
                + y / (m + alpha_inv)
        })
        .sum();
    let ll_part = ll_sum * alpha_inv * alpha_inv;

    // d/dalpha of -0.5 log|X'WX| = -0.5 tr(B^-1 dB), dw/dalpha = -w^2
    let w = cox_reid_weights(mu, alpha);
    let dw: Vec<f64> = w.iter().map(|wi| -wi * wi).collect();
    let b_inv = invert_symmetric(&weighted_crossprod(design, &w));
    let db = weighted_crossprod(design, &dw);
    let trace: f64 = (0..b_inv.nrows())
        .flat_map(|i| (0..b_inv.ncols()).map(move |j| (i, j)))
        .map(|(i, j)| b_inv[[i, j]] * db[[j, i]])
        .sum();
    let cr_part = if trace.is_finite() { -0.5 * trace } else { 0.0 };

    let prior_part = prior.map_or(0.0, |p| -(log_alpha - p.mean) / p.var);
    (ll_part + cr_part) * alpha + prior_part
}

/// Outcome of the Armijo line search
#[derive(Debug, Clone, Copy)]
pub(crate) struct LineSearch {
    pub log_alpha: f64,
    pub initial_lp: f64,
    pub last_lp: f64,
    pub iterations: usize,
    pub converged: bool,
}

/// Gradient ascent on log(alpha) with Armijo backtracking
pub(crate) fn line_search(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    log_alpha_init: f64,
    prior: Option<LogNormalPrior>,
    params: &DispersionParams,
) -> LineSearch {
    let min_log_alpha = (params.min_disp / 10.0).ln();

    let mut log_alpha = log_alpha_init.clamp(MIN_LOG_ALPHA_HARD, MAX_LOG_ALPHA_HARD);
    let initial_lp = log_posterior(counts, design, mu, log_alpha, prior);
    let mut lp = initial_lp;
    let mut dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
    let mut kappa = params.kappa_0;
    let mut accepted = 0;

    for iter in 0..params.maxit {
        let raw = log_alpha + kappa * dlp;
        if dlp.abs() > 1e-10 {
            if raw < MIN_LOG_ALPHA_HARD {
                kappa = (MIN_LOG_ALPHA_HARD - log_alpha) / dlp;
            } else if raw > MAX_LOG_ALPHA_HARD {
                kappa = (MAX_LOG_ALPHA_HARD - log_alpha) / dlp;
            }
        }
        let proposal = log_alpha + kappa * dlp;
        let lp_proposal = log_posterior(counts, design, mu, proposal, prior);

        if -lp_proposal <= -lp - kappa * ARMIJO_EPSILON * dlp * dlp {
            accepted += 1;
            log_alpha = proposal;
            let change = lp_proposal - lp;
            lp = lp_proposal;
            if change < params.disp_tol || log_alpha < min_log_alpha {
                return LineSearch {
                    log_alpha,
                    initial_lp,
                    last_lp: lp,
                    iterations: iter + 1,
                    converged: true,
                };
            }
            dlp = d_log_posterior(counts, design, mu, log_alpha, prior);
            kappa = (kappa * 1.1).min(params.kappa_0);
            if accepted % 5 == 0 {
                kappa /= 2.0;
            }
        } else {
            kappa /= 2.0;
        }
    }

    LineSearch {
        log_alpha,
        initial_lp,
        last_lp: lp,
        iterations: params.maxit,
        converged: false,
    }
}

/// Coarse grid of 20 points over [min, max] on the log scale, refined by a
/// second 20-point grid around the best coarse value. Returns alpha.
pub(crate) fn grid_search(
    counts: &[f64],
    design: &Array2<f64>,
    mu: &[f64],
    min_disp: f64,
    max_disp: f64,
    prior: Option<LogNormalPrior>,
) -> f64 {
    const N_GRID: usize = 20;

    let best_on = |grid: &[f64]| -> f64 {
        grid.iter()
            .map(|&la| (la, log_posterior(counts, design, mu, la, prior)))
            .filter(|(_, lp)| lp.is_finite())
            .fold((grid[0], f64::NEG_INFINITY), |best, cur| if cur.1 > best.1 { cur } else { best })
            .0
    };
    let spaced = |lo: f64, hi: f64| -> Vec<f64> {
        let step = (hi - lo) / (N_GRID - 1) as f64;
        (0..N_GRID).map(|i| lo + i as f64 * step).collect()
    };

    let (lo, hi) = (min_disp.ln(), max_disp.ln());
    let delta = (hi - lo) / (N_GRID - 1) as f64;
    let coarse = best_on(&spaced(lo, hi));
    best_on(&spaced(coarse - delta, coarse + delta)).exp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn setup() -> (Vec<f64>, Array2<f64>, Vec<f64>) {
        let counts = vec![80.0, 120.0, 95.0, 140.0, 60.0, 110.0];
        let design = array![[1.0], [1.0], [1.0], [1.0], [1.0], [1.0]];
        let mean = counts.iter().sum::<f64>() / counts.len() as f64;
        (counts, design, vec![mean; 6])
    }

    #[test]
    fn test_derivative_matches_finite_difference() {
        let (counts, design, mu) = setup();
        let prior = Some(LogNormalPrior { mean: -2.0, var: 0.5 });
        for &la in &[-4.0, -2.5, -1.0] {
            let h = 1e-5;
            let numeric = (log_posterior(&counts, &design, &mu, la + h, prior)
                - log_posterior(&counts, &design, &mu, la - h, prior))
                / (2.0 * h);
            let analytic = d_log_posterior(&counts, &design, &mu, la, prior);
            assert!((numeric - analytic).abs() < 1e-4 * (1.0 + analytic.abs()));
        }
    }

    #[test]
    fn test_line_search_and_grid_agree() {
        let (counts, design, mu) = setup();
        let params = DispersionParams::default();
        let ls = line_search(&counts, &design, &mu, (0.1_f64).ln(), None, &params);
        assert!(ls.converged);
        assert!(ls.last_lp >= ls.initial_lp);
        let grid = grid_search(&counts, &design, &mu, 1e-8, 10.0, None);
        assert!((ls.log_alpha - grid.ln()).abs() < 0.15);
    }
}
