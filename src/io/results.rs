//! Per-gene test results and the significant-gene presentation table

use std::cmp::Ordering;

use serde::Serialize;

use crate::data::GeneAnnotation;
use crate::glm::Contrast;

/// Wald test output for every gene of the fitted dataset
#[derive(Debug, Clone)]
pub struct DeResults {
    pub gene_ids: Vec<String>,
    /// Mean of normalized counts
    pub base_means: Vec<f64>,
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stat: Vec<f64>,
    pub pvalues: Vec<f64>,
    pub padj: Vec<f64>,
    /// Final dispersion used in the fit
    pub dispersions: Vec<f64>,
    pub contrast: Contrast,
}

/// One row of the fixed significant-gene schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SignificantGene {
    pub gene_id: String,
    pub symbol: String,
    pub base_mean: f64,
    pub log2_fold_change: f64,
    pub lfc_se: f64,
    pub stat: f64,
    pub pvalue: f64,
    pub padj: f64,
    pub link: Option<String>,
}

/// Counts of tested and significant genes
#[derive(Debug, Clone, PartialEq)]
pub struct ResultsSummary {
    pub total_genes: usize,
    pub genes_tested: usize,
    pub significant: usize,
    pub upregulated: usize,
    pub downregulated: usize,
    pub alpha: f64,
}

impl DeResults {
    pub fn n_genes(&self) -> usize {
        self.gene_ids.len()
    }

    /// padj present and at most alpha
    pub fn is_significant(&self, idx: usize, alpha: f64) -> bool {
        let p = self.padj[idx];
        !p.is_nan() && p <= alpha
    }

    pub fn summary(&self, alpha: f64) -> ResultsSummary {
        let significant: Vec<usize> = (0..self.n_genes()).filter(|&i| self.is_significant(i, alpha)).collect();
        ResultsSummary {
            total_genes: self.n_genes(),
            genes_tested: self.pvalues.iter().filter(|p| !p.is_nan()).count(),
            significant: significant.len(),
            upregulated: significant.iter().filter(|&&i| self.log2_fold_changes[i] > 0.0).count(),
            downregulated: significant.iter().filter(|&&i| self.log2_fold_changes[i] < 0.0).count(),
            alpha,
        }
    }
}

impl std::fmt::Display for ResultsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} genes, {} tested, {} with padj <= {} ({} up, {} down)",
            self.total_genes, self.genes_tested, self.significant, self.alpha, self.upregulated, self.downregulated
        )
    }
}

/// Significant genes joined with the annotation, sorted by log2 fold change
/// descending and then by gene id. Unknown genes get an empty symbol.
pub fn extract_significant(results: &DeResults, annotation: &GeneAnnotation, alpha: f64) -> Vec<SignificantGene> {
    let mut rows: Vec<SignificantGene> = (0..results.n_genes())
        .filter(|&i| results.is_significant(i, alpha))
        .map(|i| {
            let gene_id = &results.gene_ids[i];
            SignificantGene {
                gene_id: gene_id.clone(),
                symbol: annotation.symbol(gene_id).unwrap_or_default().to_string(),
                base_mean: results.base_means[i],
                log2_fold_change: results.log2_fold_changes[i],
                lfc_se: results.lfc_se[i],
                stat: results.stat[i],
                pvalue: results.pvalues[i],
                padj: results.padj[i],
                link: annotation.link(gene_id),
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.log2_fold_change
            .partial_cmp(&a.log2_fold_change)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.gene_id.cmp(&b.gene_id))
    });
    log::info!("{} genes with padj <= {}", rows.len(), alpha);
    rows
}
