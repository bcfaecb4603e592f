//! Dispersion estimation for negative binomial models

mod gene_wise;
mod likelihood;
mod map;
mod trend;

pub use gene_wise::{estimate_dispersion_gene, estimate_gene_dispersions};
pub use map::{estimate_map_dispersions, estimate_prior_variance, fit_map_dispersion};
pub use trend::{fit_dispersion_trend, fit_parametric_trend, DispersionTrend};

use crate::data::ExpressionDataset;
use crate::error::Result;

/// Tuning of the dispersion optimizers
#[derive(Debug, Clone)]
pub struct DispersionParams {
    /// Lower bound on any dispersion
    pub min_disp: f64,
    /// Log-posterior change below which the line search stops
    pub disp_tol: f64,
    /// Initial line search step
    pub kappa_0: f64,
    pub maxit: usize,
    /// Gene-wise estimates more than this many SDs above the trend are not shrunk
    pub outlier_sd: f64,
}

impl Default for DispersionParams {
    fn default() -> Self {
        Self {
            min_disp: 1e-8,
            disp_tol: 1e-6,
            kappa_0: 1.0,
            maxit: 100,
            outlier_sd: 2.0,
        }
    }
}

/// Gene-wise, trended and MAP dispersions for the dataset's current design
pub fn estimate_dispersions(dds: &mut ExpressionDataset, params: &DispersionParams) -> Result<DispersionTrend> {
    log::info!("Estimating gene-wise dispersions for {} genes", dds.n_genes());
    estimate_gene_dispersions(dds, params)?;

    let trend = fit_dispersion_trend(dds)?;
    match trend {
        DispersionTrend::Parametric { asympt_disp, extra_pois } => {
            log::info!("Dispersion trend: {:.4} + {:.4} / mean", asympt_disp, extra_pois)
        }
        DispersionTrend::Mean(value) => log::info!("Dispersion trend: constant {:.4}", value),
    }

    estimate_map_dispersions(dds, params)?;
    Ok(trend)
}
