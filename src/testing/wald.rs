//! Wald test for a two-level contrast of one design variable

use statrs::function::erf::erfc;
use std::f64::consts::{LN_2, SQRT_2};

use super::fdr::benjamini_hochberg;
use crate::data::ExpressionDataset;
use crate::error::{ReportError, Result};
use crate::glm::{get_contrast_index, Contrast};
use crate::io::DeResults;

/// Two-sided normal p-value, 2 * Phi(-|z|)
pub fn wald_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    erfc(z.abs() / SQRT_2)
}

/// Test the contrast on the dataset's fitted coefficients. Genes with zero
/// base mean get a zero fold change and missing statistics.
pub fn wald_test(dds: &ExpressionDataset, contrast: &Contrast) -> Result<DeResults> {
    let not_fitted = || ReportError::InvalidContrast {
        reason: "the GLM must be fitted before testing".to_string(),
    };
    let coefficients = dds.coefficients().ok_or_else(not_fitted)?;
    let standard_errors = dds.standard_errors().ok_or_else(not_fitted)?;
    let info = dds.design_info().ok_or_else(not_fitted)?;
    let base_means = dds.base_means().ok_or_else(not_fitted)?;
    let dispersions = dds.dispersions().ok_or_else(not_fitted)?;

    let (coef, sign) = get_contrast_index(info, contrast)?;
    log::info!(
        "Wald test for {} (coefficient {}) on {} genes",
        contrast,
        info.coef_names[coef],
        dds.n_genes()
    );

    let n = dds.n_genes();
    let mut log2_fold_changes = Vec::with_capacity(n);
    let mut lfc_se = Vec::with_capacity(n);
    let mut stat = Vec::with_capacity(n);
    for i in 0..n {
        if base_means[i] == 0.0 {
            log2_fold_changes.push(0.0);
            lfc_se.push(0.0);
            stat.push(f64::NAN);
            continue;
        }
        let beta = sign * coefficients[[i, coef]];
        let se = standard_errors[[i, coef]];
        log2_fold_changes.push(beta / LN_2);
        lfc_se.push(se / LN_2);
        stat.push(if se.is_finite() && se > 0.0 { beta / se } else { f64::NAN });
    }

    let pvalues: Vec<f64> = stat.iter().map(|&z| wald_pvalue(z)).collect();
    let padj = benjamini_hochberg(&pvalues);

    Ok(DeResults {
        gene_ids: dds.counts().gene_ids().to_vec(),
        base_means: base_means.to_vec(),
        log2_fold_changes,
        lfc_se,
        stat,
        pvalues,
        padj,
        dispersions: dispersions.to_vec(),
        contrast: contrast.clone(),
    })
}
