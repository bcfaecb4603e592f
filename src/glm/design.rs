//! Model design: categorical variables with treatment contrasts

use std::collections::HashMap;

use ndarray::{Array1, Array2};
use serde::Deserialize;

use crate::data::SampleMetadata;
use crate::error::{ReportError, Result};

/// Additive design over categorical variables, e.g. `~ sex + genotype`.
///
/// Each variable is coded with treatment contrasts against its reference
/// level: the configured one if present, else the alphabetically first level.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Design {
    variables: Vec<String>,
    reference_levels: HashMap<String, String>,
}

impl Design {
    pub fn new(variables: &[&str]) -> Self {
        Self {
            variables: variables.iter().map(|v| v.to_string()).collect(),
            reference_levels: HashMap::new(),
        }
    }

    /// Build from owned variable names
    pub fn from_variables(variables: Vec<String>) -> Self {
        Self {
            variables,
            reference_levels: HashMap::new(),
        }
    }

    /// Set the baseline level of `variable`
    pub fn with_reference(mut self, variable: &str, level: &str) -> Self {
        self.reference_levels.insert(variable.to_string(), level.to_string());
        self
    }

    /// Apply several reference levels, ignoring variables not in the design
    pub fn with_references(mut self, references: &HashMap<String, String>) -> Self {
        for (variable, level) in references {
            if self.variables.contains(variable) {
                self.reference_levels.insert(variable.clone(), level.clone());
            }
        }
        self
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn reference_level(&self, variable: &str) -> Option<&str> {
        self.reference_levels.get(variable).map(|s| s.as_str())
    }

    /// Formula notation, e.g. `~ sex + genotype`
    pub fn formula(&self) -> String {
        if self.variables.is_empty() {
            "~ 1".to_string()
        } else {
            format!("~ {}", self.variables.join(" + "))
        }
    }

    /// Check that every variable and reference level exists in the metadata
    pub fn validate(&self, metadata: &SampleMetadata) -> Result<()> {
        for variable in &self.variables {
            let levels = metadata.levels(variable).map_err(|_| ReportError::InvalidDesignMatrix {
                reason: format!("design variable '{}' not found in metadata", variable),
            })?;
            if let Some(reference) = self.reference_levels.get(variable) {
                if !levels.contains(reference) {
                    return Err(ReportError::InvalidDesignMatrix {
                        reason: format!(
                            "reference level '{}' not present for '{}' (levels: {:?})",
                            reference, variable, levels
                        ),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Columns contributed by one design variable
#[derive(Debug, Clone, PartialEq)]
pub struct FactorColumns {
    pub reference: String,
    /// Non-reference levels, one column each
    pub levels: Vec<String>,
    pub columns: Vec<usize>,
}

/// Coefficient layout of a design matrix
#[derive(Debug, Clone, PartialEq)]
pub struct DesignInfo {
    /// `Intercept` followed by `<variable>_<level>_vs_<reference>` names
    pub coef_names: Vec<String>,
    pub factors: HashMap<String, FactorColumns>,
}

/// Comparison of two levels of one design variable
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Contrast {
    pub variable: String,
    pub numerator: String,
    pub denominator: String,
}

impl Contrast {
    pub fn new(variable: &str, numerator: &str, denominator: &str) -> Self {
        Self {
            variable: variable.to_string(),
            numerator: numerator.to_string(),
            denominator: denominator.to_string(),
        }
    }
}

impl std::fmt::Display for Contrast {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {} vs {}", self.variable, self.numerator, self.denominator)
    }
}

/// Build the model matrix: intercept, then one indicator per non-reference
/// level of each variable in design order.
pub fn create_design_matrix(metadata: &SampleMetadata, design: &Design) -> Result<(Array2<f64>, DesignInfo)> {
    design.validate(metadata)?;

    let n_samples = metadata.n_samples();
    let mut coef_names = vec!["Intercept".to_string()];
    let mut factors = HashMap::new();
    let mut n_cols = 1;

    for variable in design.variables() {
        let levels = metadata.levels(variable)?;
        let reference = design
            .reference_level(variable)
            .map(|s| s.to_string())
            .unwrap_or_else(|| levels[0].clone());

        let non_ref: Vec<String> = levels.into_iter().filter(|l| *l != reference).collect();
        let mut columns = Vec::with_capacity(non_ref.len());
        for level in &non_ref {
            coef_names.push(format!("{}_{}_vs_{}", variable, level, reference));
            columns.push(n_cols);
            n_cols += 1;
        }
        factors.insert(
            variable.clone(),
            FactorColumns {
                reference,
                levels: non_ref,
                columns,
            },
        );
    }

    let mut matrix = Array2::zeros((n_samples, n_cols));
    for i in 0..n_samples {
        matrix[[i, 0]] = 1.0;
        for variable in design.variables() {
            let value = metadata.get_value(variable, i)?;
            let fc = &factors[variable];
            for (level, &col) in fc.levels.iter().zip(&fc.columns) {
                if value == level {
                    matrix[[i, col]] = 1.0;
                }
            }
        }
    }

    check_full_rank(&matrix)?;
    Ok((matrix, DesignInfo { coef_names, factors }))
}

/// Coefficient index and sign for a contrast.
///
/// The coefficient encodes `level vs reference`; asking for
/// `reference vs level` returns the same column with sign -1.
pub fn get_contrast_index(info: &DesignInfo, contrast: &Contrast) -> Result<(usize, f64)> {
    let fc = info.factors.get(&contrast.variable).ok_or_else(|| ReportError::InvalidContrast {
        reason: format!("variable '{}' is not part of the design", contrast.variable),
    })?;

    let find = |level: &str| {
        fc.levels
            .iter()
            .position(|l| l == level)
            .map(|k| fc.columns[k])
    };

    if contrast.denominator == fc.reference {
        if let Some(col) = find(&contrast.numerator) {
            return Ok((col, 1.0));
        }
    } else if contrast.numerator == fc.reference {
        if let Some(col) = find(&contrast.denominator) {
            return Ok((col, -1.0));
        }
    }

    Err(ReportError::InvalidContrast {
        reason: format!(
            "contrast '{}' must compare a level of '{}' against its reference '{}'",
            contrast, contrast.variable, fc.reference
        ),
    })
}

/// Reject rank-deficient design matrices
pub fn check_full_rank(matrix: &Array2<f64>) -> Result<()> {
    let (nrow, ncol) = matrix.dim();
    if nrow == 0 || ncol == 0 {
        return Err(ReportError::InvalidDesignMatrix {
            reason: "design matrix has zero rows or columns".to_string(),
        });
    }
    if (0..ncol).any(|j| matrix.column(j).iter().all(|&v| v == 0.0)) {
        return Err(ReportError::InvalidDesignMatrix {
            reason: "the model matrix is not full rank: a level has no samples".to_string(),
        });
    }
    if matrix_rank(matrix) < ncol {
        return Err(ReportError::InvalidDesignMatrix {
            reason: "the model matrix is not full rank: some variables are linear combinations of others"
                .to_string(),
        });
    }
    Ok(())
}

/// Numerical column rank by modified Gram-Schmidt
fn matrix_rank(matrix: &Array2<f64>) -> usize {
    let scale = matrix
        .columns()
        .into_iter()
        .map(|c| c.dot(&c).sqrt())
        .fold(0.0_f64, f64::max);
    let tol = 1e-9 * scale.max(1.0);

    let mut basis: Vec<Array1<f64>> = Vec::new();
    for column in matrix.columns() {
        let mut v = column.to_owned();
        for q in &basis {
            let proj = q.dot(&v);
            v.scaled_add(-proj, q);
        }
        let norm = v.dot(&v).sqrt();
        if norm > tol {
            basis.push(v / norm);
        }
    }
    basis.len()
}
