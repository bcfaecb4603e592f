//! Run configuration

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::data::GENE_ID_PLACEHOLDER;
use crate::error::{ReportError, Result};
use crate::glm::{Contrast, Design};

/// Input files of one run
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct InputPaths {
    /// gene_id, symbol
    pub annotation: PathBuf,
    /// sample_id, unit_id, uniquely_aligned
    pub alignment: PathBuf,
    /// sample_id, sex, tissue, genotype, treatment_duration
    pub metadata: PathBuf,
    /// Gene ids in the first column, one column per sample
    pub counts: PathBuf,
    /// Single number: the log2 expression threshold
    pub threshold: PathBuf,
}

/// Everything a report run needs besides the data
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub inputs: InputPaths,
    pub output_dir: PathBuf,
    pub title: String,
    pub alpha: f64,
    pub full_design: Vec<String>,
    pub reduced_design: Vec<String>,
    /// Reference level per design variable
    pub reference_levels: HashMap<String, String>,
    pub contrast: Contrast,
    /// Gene id prefixes of control and spike-in rows
    pub marker_prefixes: Vec<String>,
    pub heatmap_genes: usize,
    pub table_rows: usize,
    pub pca_genes: usize,
    pub color_by: String,
    pub shape_by: String,
    /// URL with a `{gene_id}` placeholder
    pub gene_link_template: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            inputs: InputPaths::default(),
            output_dir: PathBuf::from("report"),
            title: "RNA-seq differential expression report".to_string(),
            alpha: 0.1,
            full_design: vec!["sex".to_string(), "genotype".to_string(), "treatment_duration".to_string()],
            reduced_design: vec!["sex".to_string()],
            reference_levels: HashMap::from([("sex".to_string(), "male".to_string())]),
            contrast: Contrast::new("sex", "female", "male"),
            marker_prefixes: vec!["__".to_string(), "ERCC-".to_string()],
            heatmap_genes: 20,
            table_rows: 30,
            pca_genes: 500,
            color_by: "sex".to_string(),
            shape_by: "genotype".to_string(),
            gene_link_template: format!("https://www.ensembl.org/id/{}", GENE_ID_PLACEHOLDER),
        }
    }
}

impl ReportConfig {
    /// Read a JSON config; missing keys take their defaults
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: ReportConfig = serde_json::from_str(&text)?;
        log::debug!("Loaded configuration from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn full_design(&self) -> Design {
        Design::from_variables(self.full_design.clone()).with_references(&self.reference_levels)
    }

    pub fn reduced_design(&self) -> Design {
        Design::from_variables(self.reduced_design.clone()).with_references(&self.reference_levels)
    }

    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Err(ReportError::InvalidConfig { reason });
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return invalid(format!("alpha must be in (0, 1], got {}", self.alpha));
        }
        if self.full_design.is_empty() || self.reduced_design.is_empty() {
            return invalid("designs must name at least one variable".to_string());
        }
        if !self.reduced_design.contains(&self.contrast.variable) {
            return invalid(format!(
                "contrast variable `{}` is not in the reduced design",
                self.contrast.variable
            ));
        }
        if self.contrast.numerator == self.contrast.denominator {
            return invalid("contrast compares a level with itself".to_string());
        }
        if self.pca_genes == 0 {
            return invalid("pca_genes must be positive".to_string());
        }
        let inputs = [
            ("annotation", &self.inputs.annotation),
            ("alignment", &self.inputs.alignment),
            ("metadata", &self.inputs.metadata),
            ("counts", &self.inputs.counts),
            ("threshold", &self.inputs.threshold),
        ];
        for (name, path) in inputs {
            if path.as_os_str().is_empty() {
                return invalid(format!("no {} file given", name));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn with_inputs(mut config: ReportConfig) -> ReportConfig {
        config.inputs = InputPaths {
            annotation: "a.tsv".into(),
            alignment: "b.tsv".into(),
            metadata: "c.tsv".into(),
            counts: "d.tsv".into(),
            threshold: "e.txt".into(),
        };
        config
    }

    #[test]
    fn test_defaults() {
        let config = ReportConfig::default();
        assert_eq!(config.alpha, 0.1);
        assert_eq!(config.full_design().variables(), ["sex", "genotype", "treatment_duration"]);
        assert_eq!(config.reduced_design().reference_level("sex"), Some("male"));
        assert_eq!(config.heatmap_genes, 20);
        assert_eq!(config.table_rows, 30);
        assert!(with_inputs(config).validate().is_ok());
    }

    #[test]
    fn test_json_overrides_and_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"alpha": 0.05, "inputs": {{"counts": "counts.tsv"}}, "marker_prefixes": ["__"]}}"#
        )
        .unwrap();
        let config = ReportConfig::from_json_file(file.path()).unwrap();
        assert_eq!(config.alpha, 0.05);
        assert_eq!(config.inputs.counts, PathBuf::from("counts.tsv"));
        assert_eq!(config.marker_prefixes, vec!["__".to_string()]);
        assert_eq!(config.reduced_design, vec!["sex".to_string()]);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = with_inputs(ReportConfig::default());
        config.alpha = 0.0;
        assert!(matches!(config.validate(), Err(ReportError::InvalidConfig { .. })));

        let mut config = with_inputs(ReportConfig::default());
        config.reduced_design = vec!["genotype".to_string()];
        assert!(config.validate().is_err());

        assert!(ReportConfig::default().validate().is_err());
    }
}
