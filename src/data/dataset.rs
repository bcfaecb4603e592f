//! Model object holding counts, sample covariates, the design and every
//! estimate derived from them.

use ndarray::{Array1, Array2, Axis};

use super::{CountMatrix, SampleMetadata};
use crate::error::{ReportError, Result};
use crate::glm::{Design, DesignInfo};

/// Counts plus design, mutated in place as each estimation step runs.
///
/// Normalized counts are memoized when size factors are set. Replacing the
/// design drops every design-dependent estimate so the next fit starts over.
#[derive(Debug, Clone)]
pub struct ExpressionDataset {
    counts: CountMatrix,
    metadata: SampleMetadata,
    design: Design,

    size_factors: Option<Array1<f64>>,
    normalized_counts: Option<Array2<f64>>,

    gene_dispersions: Option<Array1<f64>>,
    trended_dispersions: Option<Array1<f64>>,
    dispersions: Option<Array1<f64>>,
    dispersion_prior_var: Option<f64>,
    /// Fitted means from gene-wise dispersion estimation
    mu: Option<Array2<f64>>,

    design_matrix: Option<Array2<f64>>,
    design_info: Option<DesignInfo>,
    coefficients: Option<Array2<f64>>,
    standard_errors: Option<Array2<f64>>,
}

impl ExpressionDataset {
    /// Create a dataset; sample ids must match the metadata in the same order
    pub fn new(counts: CountMatrix, metadata: SampleMetadata, design: Design) -> Result<Self> {
        if counts.sample_ids() != metadata.sample_ids() {
            return Err(ReportError::SampleMismatch {
                reason: format!(
                    "count columns {:?} do not match metadata rows {:?}",
                    counts.sample_ids(),
                    metadata.sample_ids()
                ),
            });
        }
        design.validate(&metadata)?;

        Ok(Self {
            counts,
            metadata,
            design,
            size_factors: None,
            normalized_counts: None,
            gene_dispersions: None,
            trended_dispersions: None,
            dispersions: None,
            dispersion_prior_var: None,
            mu: None,
            design_matrix: None,
            design_info: None,
            coefficients: None,
            standard_errors: None,
        })
    }

    pub fn counts(&self) -> &CountMatrix {
        &self.counts
    }

    pub fn metadata(&self) -> &SampleMetadata {
        &self.metadata
    }

    pub fn design(&self) -> &Design {
        &self.design
    }

    pub fn n_genes(&self) -> usize {
        self.counts.n_genes()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.n_samples()
    }

    /// Replace the design, discarding dispersions and coefficients
    pub fn set_design(&mut self, design: Design) -> Result<()> {
        design.validate(&self.metadata)?;
        self.design = design;
        self.gene_dispersions = None;
        self.trended_dispersions = None;
        self.dispersions = None;
        self.dispersion_prior_var = None;
        self.mu = None;
        self.design_matrix = None;
        self.design_info = None;
        self.coefficients = None;
        self.standard_errors = None;
        Ok(())
    }

    pub fn size_factors(&self) -> Option<&Array1<f64>> {
        self.size_factors.as_ref()
    }

    /// Set size factors and recompute normalized counts
    pub fn set_size_factors(&mut self, size_factors: Array1<f64>) -> Result<()> {
        if size_factors.len() != self.n_samples() {
            return Err(ReportError::DimensionMismatch {
                expected: format!("{} size factors", self.n_samples()),
                got: format!("{} size factors", size_factors.len()),
            });
        }
        if size_factors.iter().any(|&s| s <= 0.0 || !s.is_finite()) {
            return Err(ReportError::SizeFactorFailed {
                reason: "size factors must be positive and finite".to_string(),
            });
        }

        let normalized = &self.counts.counts() / &size_factors.view().insert_axis(Axis(0));
        self.normalized_counts = Some(normalized);
        self.size_factors = Some(size_factors);
        Ok(())
    }

    /// Counts divided by the size factor of their sample
    pub fn normalized_counts(&self) -> Option<&Array2<f64>> {
        self.normalized_counts.as_ref()
    }

    /// Mean normalized count per gene
    pub fn base_means(&self) -> Option<Array1<f64>> {
        self.normalized_counts.as_ref().and_then(|n| n.mean_axis(Axis(1)))
    }

    pub fn gene_dispersions(&self) -> Option<&Array1<f64>> {
        self.gene_dispersions.as_ref()
    }

    pub fn set_gene_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len(dispersions.len(), "gene-wise dispersions")?;
        self.gene_dispersions = Some(dispersions);
        Ok(())
    }

    pub fn trended_dispersions(&self) -> Option<&Array1<f64>> {
        self.trended_dispersions.as_ref()
    }

    pub fn set_trended_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len(dispersions.len(), "trended dispersions")?;
        self.trended_dispersions = Some(dispersions);
        Ok(())
    }

    /// Final (shrunken) dispersions used by the GLM
    pub fn dispersions(&self) -> Option<&Array1<f64>> {
        self.dispersions.as_ref()
    }

    pub fn set_dispersions(&mut self, dispersions: Array1<f64>) -> Result<()> {
        self.check_gene_len(dispersions.len(), "dispersions")?;
        if dispersions.iter().any(|&d| d <= 0.0 || !d.is_finite()) {
            return Err(ReportError::DispersionEstimationFailed {
                reason: "final dispersions must be positive and finite".to_string(),
            });
        }
        self.dispersions = Some(dispersions);
        Ok(())
    }

    pub fn dispersion_prior_var(&self) -> Option<f64> {
        self.dispersion_prior_var
    }

    pub fn set_dispersion_prior_var(&mut self, prior_var: f64) {
        self.dispersion_prior_var = Some(prior_var);
    }

    pub fn mu(&self) -> Option<&Array2<f64>> {
        self.mu.as_ref()
    }

    pub fn set_mu(&mut self, mu: Array2<f64>) -> Result<()> {
        if mu.dim() != (self.n_genes(), self.n_samples()) {
            return Err(ReportError::DimensionMismatch {
                expected: format!("({}, {})", self.n_genes(), self.n_samples()),
                got: format!("{:?}", mu.dim()),
            });
        }
        self.mu = Some(mu);
        Ok(())
    }

    pub fn design_matrix(&self) -> Option<&Array2<f64>> {
        self.design_matrix.as_ref()
    }

    pub fn design_info(&self) -> Option<&DesignInfo> {
        self.design_info.as_ref()
    }

    pub fn set_design_matrix(&mut self, matrix: Array2<f64>, info: DesignInfo) -> Result<()> {
        if matrix.nrows() != self.n_samples() {
            return Err(ReportError::DimensionMismatch {
                expected: format!("{} design rows", self.n_samples()),
                got: format!("{} design rows", matrix.nrows()),
            });
        }
        self.design_matrix = Some(matrix);
        self.design_info = Some(info);
        Ok(())
    }

    /// GLM coefficients on the natural log scale (genes × coefficients)
    pub fn coefficients(&self) -> Option<&Array2<f64>> {
        self.coefficients.as_ref()
    }

    pub fn standard_errors(&self) -> Option<&Array2<f64>> {
        self.standard_errors.as_ref()
    }

    /// Store one GLM fit: coefficients and standard errors
    pub fn set_glm_fit(&mut self, coefficients: Array2<f64>, standard_errors: Array2<f64>) -> Result<()> {
        self.check_gene_len(coefficients.nrows(), "coefficient rows")?;
        if coefficients.dim() != standard_errors.dim() {
            return Err(ReportError::DimensionMismatch {
                expected: format!("{:?}", coefficients.dim()),
                got: format!("{:?}", standard_errors.dim()),
            });
        }
        self.coefficients = Some(coefficients);
        self.standard_errors = Some(standard_errors);
        Ok(())
    }

    pub fn has_size_factors(&self) -> bool {
        self.size_factors.is_some()
    }

    pub fn has_dispersions(&self) -> bool {
        self.dispersions.is_some()
    }

    pub fn has_glm_fit(&self) -> bool {
        self.coefficients.is_some() && self.standard_errors.is_some()
    }

    fn check_gene_len(&self, len: usize, what: &str) -> Result<()> {
        if len != self.n_genes() {
            return Err(ReportError::DimensionMismatch {
                expected: format!("{} {}", self.n_genes(), what),
                got: format!("{} {}", len, what),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn create_test_dataset() -> ExpressionDataset {
        let counts = CountMatrix::new(
            array![[10.0, 20.0, 30.0, 40.0], [5.0, 5.0, 5.0, 5.0]],
            strings(&["g1", "g2"]),
            strings(&["m1", "m2", "f1", "f2"]),
        )
        .unwrap();
        let mut meta = SampleMetadata::new(strings(&["m1", "m2", "f1", "f2"])).unwrap();
        meta.add_condition("sex", strings(&["male", "male", "female", "female"])).unwrap();
        ExpressionDataset::new(counts, meta, Design::new(&["sex"])).unwrap()
    }

    #[test]
    fn test_normalized_counts_follow_size_factors() {
        let mut dds = create_test_dataset();
        dds.set_size_factors(array![0.5, 1.0, 2.0, 4.0]).unwrap();
        let norm = dds.normalized_counts().unwrap();
        assert_eq!(norm[[0, 0]], 20.0);
        assert_eq!(norm[[0, 3]], 10.0);
        assert_eq!(norm[[1, 2]], 2.5);
    }

    #[test]
    fn test_rejects_non_positive_size_factors() {
        let mut dds = create_test_dataset();
        assert!(dds.set_size_factors(array![1.0, 0.0, 1.0, 1.0]).is_err());
        assert!(dds.set_size_factors(array![1.0, 1.0]).is_err());
    }

    #[test]
    fn test_sample_order_must_match() {
        let counts = CountMatrix::new(array![[1.0, 2.0]], strings(&["g1"]), strings(&["a", "b"])).unwrap();
        let mut meta = SampleMetadata::new(strings(&["b", "a"])).unwrap();
        meta.add_condition("sex", strings(&["male", "female"])).unwrap();
        let result = ExpressionDataset::new(counts, meta, Design::new(&["sex"]));
        assert!(matches!(result, Err(ReportError::SampleMismatch { .. })));
    }

    #[test]
    fn test_set_design_clears_fit() {
        let mut dds = create_test_dataset();
        dds.set_dispersions(array![0.1, 0.2]).unwrap();
        assert!(dds.has_dispersions());
        dds.set_design(Design::new(&["sex"])).unwrap();
        assert!(!dds.has_dispersions());
        assert!(dds.set_design(Design::new(&["genotype"])).is_err());
    }
}
