//! Dispersion-mean trend: alpha(mu) = asympt_disp + extra_pois / mu

use ndarray::Array1;

use crate::data::ExpressionDataset;
use crate::error::{ReportError, Result};

/// Gene-wise estimates at or below this are excluded from the trend fit
const MIN_FIT_DISPERSION: f64 = 1e-6;
/// Outer iterations of residual filtering
const MAX_TREND_ITER: usize = 11;

/// Fitted dispersion trend
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispersionTrend {
    Parametric { asympt_disp: f64, extra_pois: f64 },
    /// Constant fallback used when the parametric fit fails
    Mean(f64),
}

impl DispersionTrend {
    pub fn evaluate(&self, mean: f64) -> f64 {
        match *self {
            DispersionTrend::Parametric { asympt_disp, extra_pois } => {
                if mean > 0.0 {
                    asympt_disp + extra_pois / mean
                } else {
                    asympt_disp
                }
            }
            DispersionTrend::Mean(value) => value,
        }
    }
}

/// Fit the trend on gene-wise dispersions vs base mean and store the trended
/// value of every gene
pub fn fit_dispersion_trend(dds: &mut ExpressionDataset) -> Result<DispersionTrend> {
    let gene_dispersions = dds
        .gene_dispersions()
        .ok_or_else(|| ReportError::TrendFittingFailed {
            reason: "gene-wise dispersions must be estimated first".to_string(),
        })?
        .to_vec();
    let means = dds.base_means().ok_or_else(|| ReportError::TrendFittingFailed {
        reason: "normalized counts required for trend fitting".to_string(),
    })?;

    let trend = match fit_parametric_trend(&means.to_vec(), &gene_dispersions) {
        Ok(trend) => trend,
        Err(e) => {
            let fallback = mean_dispersion(&gene_dispersions)?;
            log::warn!("{}; using the mean dispersion {:.4} as trend", e, fallback);
            DispersionTrend::Mean(fallback)
        }
    };
    log::debug!("Dispersion trend: {:?}", trend);

    let trended: Array1<f64> = means.mapv(|m| trend.evaluate(m));
    dds.set_trended_dispersions(trended)?;
    Ok(trend)
}

fn mean_dispersion(dispersions: &[f64]) -> Result<f64> {
    let valid: Vec<f64> = dispersions
        .iter()
        .copied()
        .filter(|d| d.is_finite() && *d > 0.0)
        .collect();
    if valid.is_empty() {
        return Err(ReportError::TrendFittingFailed {
            reason: "no finite gene-wise dispersions".to_string(),
        });
    }
    Ok(valid.iter().sum::<f64>() / valid.len() as f64)
}

/// Iterated Gamma GLM with identity link on (1, 1/mean), refitting on genes
/// whose residual dispersion / fit lies in (1e-4, 15).
pub fn fit_parametric_trend(means: &[f64], dispersions: &[f64]) -> Result<DispersionTrend> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .filter(|(m, d)| **m > 0.0 && d.is_finite() && **d > MIN_FIT_DISPERSION)
        .map(|(&m, &d)| (m, d))
        .collect();
    if data.len() < 3 {
        return Err(ReportError::TrendFittingFailed {
            reason: format!("only {} genes usable for the parametric trend", data.len()),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for iter in 0..MAX_TREND_ITER {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(m, d)| {
                let fitted = coefs.0 + coefs.1 / m;
                let residual = d / fitted;
                fitted > 0.0 && residual > 1e-4 && residual < 15.0
            })
            .collect();
        if good.len() < 3 {
            return Err(ReportError::TrendFittingFailed {
                reason: "too few genes with usable residuals".to_string(),
            });
        }

        let (new_coefs, glm_converged) = fit_gamma_identity(&good, coefs);
        coefs = new_coefs;
        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(ReportError::TrendFittingFailed {
                reason: format!(
                    "parametric trend coefficients not positive (a0={:.4}, a1={:.4})",
                    coefs.0, coefs.1
                ),
            });
        }

        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        log::debug!(
            "Trend iteration {}: {} genes, a0={:.6}, a1={:.6}",
            iter + 1,
            good.len(),
            coefs.0,
            coefs.1
        );
        if change < 1e-6 && glm_converged {
            return Ok(DispersionTrend::Parametric {
                asympt_disp: coefs.0,
                extra_pois: coefs.1,
            });
        }
    }

    Err(ReportError::TrendFittingFailed {
        reason: "parametric trend did not converge".to_string(),
    })
}

fn gamma_deviance(data: &[(f64, f64)], a0: f64, a1: f64) -> f64 {
    data.iter()
        .map(|&(m, d)| {
            let mu = (a0 + a1 / m).max(1e-8);
            2.0 * (-(d / mu).ln() + (d - mu) / mu)
        })
        .sum()
}

/// Gamma GLM, identity link, `disp ~ 1 + I(1 / mean)`
fn fit_gamma_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let mut dev_old = gamma_deviance(data, a0, a1);

    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * d;
            swxx += w * x * x;
            swxz += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-300 {
            break;
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = gamma_deviance(data, a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}
