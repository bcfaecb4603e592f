//! Report pipeline: an explicit analysis state machine and the end-to-end run

use std::fmt;
use std::fs;
use std::path::PathBuf;

use ndarray::Array2;

use crate::config::ReportConfig;
use crate::data::{build_sample_table, metadata_from_records, CountMatrix, ExpressionDataset, SampleMetadata};
use crate::diagnostics::compute_diagnostics;
use crate::dispersion::{estimate_dispersions, DispersionParams};
use crate::error::{ReportError, Result};
use crate::filter::{align_to_metadata, drop_zero_rows, filter_by_normalized_threshold, strip_marker_rows};
use crate::glm::{fit_glm, Contrast, Design, DesignInfo, GlmFitParams};
use crate::io::{
    extract_significant, read_alignment_summary, read_annotation, read_count_matrix, read_metadata_records,
    read_threshold, write_de_results, write_matrix, write_sample_table, write_significant, write_size_factors,
    DeResults, ResultsSummary,
};
use crate::normalization::estimate_size_factors;
use crate::report::{render_report, Grouping, PreparationCounts, ReportContext, RunSummary};
use crate::testing::wald_test;
use crate::transform::rlog;

/// Stages of an analysis, in the only order they may be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum PipelineStage {
    Constructed,
    SizeFactorsEstimated,
    Filtered,
    FullDesignFit,
    ReducedDesignAssigned,
    ReducedDesignFit,
    ResultsExtracted,
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineStage::Constructed => "constructed",
            PipelineStage::SizeFactorsEstimated => "size factors estimated",
            PipelineStage::Filtered => "filtered",
            PipelineStage::FullDesignFit => "full design fit",
            PipelineStage::ReducedDesignAssigned => "reduced design assigned",
            PipelineStage::ReducedDesignFit => "reduced design fit",
            PipelineStage::ResultsExtracted => "results extracted",
        };
        f.write_str(name)
    }
}

/// A dataset moving through normalization, filtering, two model fits and
/// the final test. Each step checks the current stage.
#[derive(Debug)]
pub struct AnalysisSession {
    dataset: ExpressionDataset,
    stage: PipelineStage,
    full_design: Design,
    reduced_design: Design,
    dispersion_params: DispersionParams,
    glm_params: GlmFitParams,
    rlog: Option<Array2<f64>>,
    design_info: Option<DesignInfo>,
    results: Option<DeResults>,
}

impl AnalysisSession {
    /// Wrap prepared counts under the full design
    pub fn new(counts: CountMatrix, metadata: SampleMetadata, full_design: Design, reduced_design: Design) -> Result<Self> {
        reduced_design.validate(&metadata)?;
        let dataset = ExpressionDataset::new(counts, metadata, full_design.clone())?;
        log::info!(
            "Analysis dataset: {} genes x {} samples, design {}",
            dataset.n_genes(),
            dataset.n_samples(),
            full_design.formula()
        );
        Ok(Self {
            dataset,
            stage: PipelineStage::Constructed,
            full_design,
            reduced_design,
            dispersion_params: DispersionParams::default(),
            glm_params: GlmFitParams::default(),
            rlog: None,
            design_info: None,
            results: None,
        })
    }

    pub fn with_params(mut self, dispersion_params: DispersionParams, glm_params: GlmFitParams) -> Self {
        self.dispersion_params = dispersion_params;
        self.glm_params = glm_params;
        self
    }

    pub fn stage(&self) -> PipelineStage {
        self.stage
    }

    pub fn dataset(&self) -> &ExpressionDataset {
        &self.dataset
    }

    /// Coefficient layout of the latest fit
    pub fn design_info(&self) -> Option<&DesignInfo> {
        self.design_info.as_ref()
    }

    fn expect_stage(&self, expected: PipelineStage) -> Result<()> {
        if self.stage != expected {
            return Err(ReportError::InvalidStage {
                expected: expected.to_string(),
                found: self.stage.to_string(),
            });
        }
        Ok(())
    }

    pub fn estimate_size_factors(&mut self) -> Result<()> {
        self.expect_stage(PipelineStage::Constructed)?;
        estimate_size_factors(&mut self.dataset)?;
        self.stage = PipelineStage::SizeFactorsEstimated;
        Ok(())
    }

    /// Keep genes with a normalized count above `2^L - 1` in some sample and
    /// rebuild the dataset from their raw counts with fresh size factors.
    /// Returns the number of genes kept.
    pub fn filter(&mut self, log2_threshold: f64) -> Result<usize> {
        self.expect_stage(PipelineStage::SizeFactorsEstimated)?;
        let kept = filter_by_normalized_threshold(&self.dataset, log2_threshold)?;
        if kept.n_genes() == 0 {
            return Err(ReportError::EmptyData {
                reason: format!("no gene passes the log2 expression threshold {}", log2_threshold),
            });
        }
        let mut dataset = ExpressionDataset::new(kept, self.dataset.metadata().clone(), self.full_design.clone())?;
        estimate_size_factors(&mut dataset)?;
        self.dataset = dataset;
        self.stage = PipelineStage::Filtered;
        Ok(self.dataset.n_genes())
    }

    fn fit_current_design(&mut self) -> Result<()> {
        estimate_dispersions(&mut self.dataset, &self.dispersion_params)?;
        let info = fit_glm(&mut self.dataset, &self.glm_params)?;
        log::info!("Fitted {} with coefficients {:?}", self.dataset.design().formula(), info.coef_names);
        self.design_info = Some(info);
        Ok(())
    }

    pub fn fit_full(&mut self) -> Result<()> {
        self.expect_stage(PipelineStage::Filtered)?;
        self.fit_current_design()?;
        self.stage = PipelineStage::FullDesignFit;
        Ok(())
    }

    /// rlog matrix under the full-design dispersion trend. Computed on the
    /// first call after the full fit and reused afterwards.
    pub fn rlog(&mut self) -> Result<&Array2<f64>> {
        if self.rlog.is_none() {
            self.expect_stage(PipelineStage::FullDesignFit)?;
            self.rlog = Some(rlog(&self.dataset)?);
        }
        self.rlog.as_ref().ok_or_else(|| ReportError::EmptyData {
            reason: "rlog matrix unavailable".to_string(),
        })
    }

    /// Switch to the reduced design, dropping dispersions and coefficients
    pub fn assign_reduced_design(&mut self) -> Result<()> {
        self.expect_stage(PipelineStage::FullDesignFit)?;
        self.dataset.set_design(self.reduced_design.clone())?;
        self.design_info = None;
        log::info!("Design reassigned to {}", self.reduced_design.formula());
        self.stage = PipelineStage::ReducedDesignAssigned;
        Ok(())
    }

    pub fn fit_reduced(&mut self) -> Result<()> {
        self.expect_stage(PipelineStage::ReducedDesignAssigned)?;
        self.fit_current_design()?;
        self.stage = PipelineStage::ReducedDesignFit;
        Ok(())
    }

    /// Wald test of `contrast` with BH-adjusted p-values
    pub fn extract_results(&mut self, contrast: &Contrast) -> Result<&DeResults> {
        self.expect_stage(PipelineStage::ReducedDesignFit)?;
        let results = wald_test(&self.dataset, contrast)?;
        self.stage = PipelineStage::ResultsExtracted;
        let results: &DeResults = self.results.insert(results);
        Ok(results)
    }

    pub fn results(&self) -> Option<&DeResults> {
        self.results.as_ref()
    }
}

/// What a finished run produced
#[derive(Debug, Clone)]
pub struct ReportSummary {
    pub report_path: PathBuf,
    pub preparation: PreparationCounts,
    pub results: ResultsSummary,
}

fn grouping_levels<'a>(metadata: &'a SampleMetadata, column: &str) -> Result<&'a [String]> {
    metadata
        .condition(column)
        .map(|v| v.as_slice())
        .ok_or_else(|| ReportError::InvalidConfig {
            reason: format!("grouping column `{}` is not a metadata column", column),
        })
}

/// Load inputs, run the analysis and write the report with its CSV tables
/// into `config.output_dir`
pub fn run_report(config: &ReportConfig) -> Result<ReportSummary> {
    config.validate()?;
    let inputs = &config.inputs;

    log::info!("Loading annotation from {}", inputs.annotation.display());
    let annotation = read_annotation(&inputs.annotation, &config.gene_link_template)?;
    log::info!("Loading alignment summary from {}", inputs.alignment.display());
    let alignment = read_alignment_summary(&inputs.alignment)?;
    log::info!("Loading metadata from {}", inputs.metadata.display());
    let metadata_records = read_metadata_records(&inputs.metadata)?;
    log::info!("Loading counts from {}", inputs.counts.display());
    let counts = read_count_matrix(&inputs.counts)?;
    let log2_threshold = read_threshold(&inputs.threshold)?;
    log::info!(
        "{} annotated genes, {} alignment units, {} samples, {} x {} counts, threshold {}",
        annotation.len(),
        alignment.len(),
        metadata_records.len(),
        counts.n_genes(),
        counts.n_samples(),
        log2_threshold
    );

    let sample_table = build_sample_table(&metadata_records, &alignment)?;
    let metadata = metadata_from_records(&metadata_records)?;

    let input_genes = counts.n_genes();
    let aligned = align_to_metadata(&counts, &metadata)?;
    let stripped = strip_marker_rows(&aligned, &config.marker_prefixes)?;
    let nonzero = drop_zero_rows(&stripped)?;
    let after_marker_strip = stripped.n_genes();
    let after_zero_filter = nonzero.n_genes();

    let mut session = AnalysisSession::new(nonzero, metadata, config.full_design(), config.reduced_design())?;
    session.estimate_size_factors()?;
    let after_threshold = session.filter(log2_threshold)?;
    let preparation = PreparationCounts {
        input: input_genes,
        after_marker_strip,
        after_zero_filter,
        after_threshold,
    };

    session.fit_full()?;
    let rlog_values = session.rlog()?.clone();
    let normalized = session
        .dataset()
        .normalized_counts()
        .ok_or_else(|| ReportError::SizeFactorFailed {
            reason: "normalized counts missing after filtering".to_string(),
        })?
        .clone();
    let size_factors = session
        .dataset()
        .size_factors()
        .ok_or_else(|| ReportError::SizeFactorFailed {
            reason: "size factors missing after filtering".to_string(),
        })?
        .to_vec();
    let diagnostics = compute_diagnostics(&rlog_values, &normalized, config.heatmap_genes, config.pca_genes)?;

    session.assign_reduced_design()?;
    session.fit_reduced()?;
    let results = session.extract_results(&config.contrast)?.clone();
    let result_summary = results.summary(config.alpha);
    log::info!("{}", result_summary);
    let significant = extract_significant(&results, &annotation, config.alpha);

    let dataset = session.dataset();
    let sample_ids = dataset.counts().sample_ids().to_vec();
    let gene_ids = dataset.counts().gene_ids().to_vec();

    let out_dir = &config.output_dir;
    fs::create_dir_all(out_dir)?;
    write_de_results(out_dir.join("de_results.csv"), &results)?;
    write_significant(out_dir.join("de_significant.csv"), &significant)?;
    write_size_factors(out_dir.join("size_factors.csv"), &sample_ids, &size_factors)?;
    write_matrix(out_dir.join("normalized_counts.csv"), &gene_ids, &sample_ids, &normalized)?;
    write_matrix(out_dir.join("rlog.csv"), &gene_ids, &sample_ids, &rlog_values)?;
    write_sample_table(out_dir.join("sample_table.csv"), &sample_table)?;

    let summary = RunSummary {
        preparation,
        log2_threshold,
        sample_ids: sample_ids.clone(),
        size_factors,
        full_design: config.full_design().formula(),
        reduced_design: config.reduced_design().formula(),
        contrast: config.contrast.clone(),
        results: result_summary.clone(),
    };
    let metadata = dataset.metadata();
    let html = render_report(&ReportContext {
        title: &config.title,
        summary: &summary,
        sample_table: &sample_table,
        sample_ids: &sample_ids,
        gene_ids: &gene_ids,
        rlog: &rlog_values,
        diagnostics: &diagnostics,
        color_by: Grouping {
            name: &config.color_by,
            levels: grouping_levels(metadata, &config.color_by)?,
        },
        shape_by: Grouping {
            name: &config.shape_by,
            levels: grouping_levels(metadata, &config.shape_by)?,
        },
        results: &results,
        significant: &significant,
        top_rows: config.table_rows,
        alpha: config.alpha,
    })?;
    let report_path = out_dir.join("report.html");
    fs::write(&report_path, html)?;
    log::info!("Report written to {}", report_path.display());

    Ok(ReportSummary {
        report_path,
        preparation,
        results: result_summary,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// 8 samples, sex x genotype balanced, one duration level. The first
    /// 5 genes are doubled in females.
    fn session() -> AnalysisSession {
        let samples = strings(&["m1", "m2", "m3", "m4", "f1", "f2", "f3", "f4"]);
        let depth = [1.0, 1.3, 0.8, 1.1, 0.9, 1.2, 1.0, 0.7];
        let jitter = [1.05, 0.95, 1.0, 0.98, 1.02, 0.97, 1.03, 1.0];
        let n_genes = 40;
        let counts = Array2::from_shape_fn((n_genes, 8), |(i, j)| {
            let base = 200.0 + 37.0 * i as f64;
            let effect = if i < 5 && j >= 4 { 2.0 } else { 1.0 };
            let noise = jitter[(i + j) % 8];
            (base * effect * depth[j] * noise).round()
        });
        let gene_ids = (0..n_genes).map(|i| format!("g{}", i)).collect();
        let counts = CountMatrix::new(counts, gene_ids, samples.clone()).unwrap();

        let mut metadata = SampleMetadata::new(samples).unwrap();
        metadata
            .add_condition("sex", strings(&["male", "male", "male", "male", "female", "female", "female", "female"]))
            .unwrap();
        metadata
            .add_condition("genotype", strings(&["wt", "ko", "wt", "ko", "wt", "ko", "wt", "ko"]))
            .unwrap();
        metadata.add_condition("treatment_duration", vec!["4w".to_string(); 8]).unwrap();

        let full = Design::new(&["sex", "genotype", "treatment_duration"]).with_reference("sex", "male");
        let reduced = Design::new(&["sex"]).with_reference("sex", "male");
        AnalysisSession::new(counts, metadata, full, reduced).unwrap()
    }

    #[test]
    fn test_rejects_out_of_order_calls() {
        let mut s = session();
        match s.fit_full() {
            Err(ReportError::InvalidStage { expected, found }) => {
                assert_eq!(expected, "filtered");
                assert_eq!(found, "constructed");
            }
            other => panic!("expected a stage error, got {:?}", other.map(|_| ())),
        }
        assert!(s.filter(0.0).is_err());
        assert!(s.rlog().is_err());
        assert!(s.extract_results(&Contrast::new("sex", "female", "male")).is_err());
        assert_eq!(s.stage(), PipelineStage::Constructed);

        s.estimate_size_factors().unwrap();
        assert!(s.estimate_size_factors().is_err());
        assert_eq!(s.stage(), PipelineStage::SizeFactorsEstimated);
    }

    #[test]
    fn test_full_sequence() {
        let mut s = session();
        s.estimate_size_factors().unwrap();
        assert_eq!(s.filter(0.0).unwrap(), 40);
        s.fit_full().unwrap();
        let info = s.design_info().unwrap();
        assert_eq!(info.coef_names.len(), 3);

        let rlog_first = s.rlog().unwrap().clone();
        s.assign_reduced_design().unwrap();
        assert!(!s.dataset().has_dispersions());
        assert!(s.design_info().is_none());
        // memoized value survives the design change
        assert_eq!(s.rlog().unwrap(), &rlog_first);

        s.fit_reduced().unwrap();
        let results = s.extract_results(&Contrast::new("sex", "female", "male")).unwrap();
        assert_eq!(results.n_genes(), 40);
        for i in 0..5 {
            assert!(results.log2_fold_changes[i] > 0.7, "gene {} lfc {}", i, results.log2_fold_changes[i]);
        }
        assert_eq!(s.stage(), PipelineStage::ResultsExtracted);
        assert!(s.fit_reduced().is_err());
    }

    #[test]
    fn test_filter_threshold_removes_low_genes() {
        let mut s = session();
        s.estimate_size_factors().unwrap();
        // 2^10 - 1 = 1023 removes the lowest genes
        let kept = s.filter(10.0).unwrap();
        assert!(kept < 40 && kept > 0);
        assert!(s.dataset().has_size_factors());

        let mut s = session();
        s.estimate_size_factors().unwrap();
        assert!(matches!(s.filter(20.0), Err(ReportError::EmptyData { .. })));
        assert_eq!(s.stage(), PipelineStage::SizeFactorsEstimated);
    }
}
