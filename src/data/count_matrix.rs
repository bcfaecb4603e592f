//! Gene × sample read count matrix

use std::collections::{HashMap, HashSet};

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{ReportError, Result};

/// Rename repeated ids to `id_1`, `id_2`, ... so every row stays addressable.
/// Suffixes already taken by another id are skipped.
fn deduplicate_ids(ids: Vec<String>) -> Vec<String> {
    let taken: HashSet<String> = ids.iter().cloned().collect();
    if taken.len() == ids.len() {
        return ids;
    }

    let mut used: HashSet<String> = HashSet::with_capacity(ids.len());
    let mut next_suffix: HashMap<String, usize> = HashMap::new();
    ids.into_iter()
        .map(|id| {
            if used.insert(id.clone()) {
                return id;
            }
            let suffix = next_suffix.entry(id.clone()).or_insert(1);
            let mut renamed = format!("{}_{}", id, suffix);
            while taken.contains(&renamed) || used.contains(&renamed) {
                *suffix += 1;
                renamed = format!("{}_{}", id, suffix);
            }
            *suffix += 1;
            used.insert(renamed.clone());
            log::warn!("Duplicate gene id '{}' renamed to '{}'", id, renamed);
            renamed
        })
        .collect()
}

/// Raw read counts, rows are genes and columns are samples
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a count matrix, validating shape and values
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(ReportError::DimensionMismatch {
                expected: format!("{} gene ids", n_genes),
                got: format!("{} gene ids", gene_ids.len()),
            });
        }
        if sample_ids.len() != n_samples {
            return Err(ReportError::DimensionMismatch {
                expected: format!("{} sample ids", n_samples),
                got: format!("{} sample ids", sample_ids.len()),
            });
        }

        let mut seen = HashSet::with_capacity(sample_ids.len());
        if let Some(dup) = sample_ids.iter().find(|id| !seen.insert(id.as_str())) {
            return Err(ReportError::InvalidCountMatrix {
                reason: format!("sample column '{}' appears more than once", dup),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(ReportError::InvalidCountMatrix {
                reason: "counts must be non-negative finite values".to_string(),
            });
        }

        if !counts.is_empty() && counts.iter().all(|&x| x == 0.0) {
            return Err(ReportError::InvalidCountMatrix {
                reason: "all samples have 0 counts for all genes".to_string(),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!("Some count values are not integers; negative binomial modeling expects raw integer counts");
        }

        Ok(Self {
            counts,
            gene_ids: deduplicate_ids(gene_ids),
            sample_ids,
        })
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    /// Raw counts as a view
    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Counts of one gene across samples
    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Total count per gene across all samples
    pub fn row_sums(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(0)).map(|row| row.sum()).collect()
    }

    /// Keep only the given gene rows, in the given order
    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        if gene_indices.is_empty() {
            return Err(ReportError::EmptyData {
                reason: "no genes left after filtering".to_string(),
            });
        }
        let counts = self.counts.select(Axis(0), gene_indices);
        let gene_ids = gene_indices.iter().map(|&i| self.gene_ids[i].clone()).collect();
        Ok(Self {
            counts,
            gene_ids,
            sample_ids: self.sample_ids.clone(),
        })
    }

    /// Keep only the given sample columns, in the given order
    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        if sample_indices.is_empty() {
            return Err(ReportError::EmptyData {
                reason: "no samples selected".to_string(),
            });
        }
        let counts = self.counts.select(Axis(1), sample_indices);
        let sample_ids = sample_indices.iter().map(|&j| self.sample_ids[j].clone()).collect();
        Ok(Self {
            counts,
            gene_ids: self.gene_ids.clone(),
            sample_ids,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn ids(prefix: &str, n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("{}{}", prefix, i)).collect()
    }

    #[test]
    fn test_count_matrix_creation() {
        let cm = CountMatrix::new(array![[1.0, 2.0], [3.0, 4.0], [0.0, 5.0]], ids("g", 3), ids("s", 2)).unwrap();
        assert_eq!(cm.n_genes(), 3);
        assert_eq!(cm.n_samples(), 2);
        assert_eq!(cm.row_sums(), vec![3.0, 7.0, 5.0]);
    }

    #[test]
    fn test_rejects_negative_counts() {
        let result = CountMatrix::new(array![[1.0, -2.0]], ids("g", 1), ids("s", 2));
        assert!(matches!(result, Err(ReportError::InvalidCountMatrix { .. })));
    }

    #[test]
    fn test_rejects_all_zero() {
        let result = CountMatrix::new(array![[0.0, 0.0], [0.0, 0.0]], ids("g", 2), ids("s", 2));
        assert!(result.is_err());
    }

    #[test]
    fn test_dimension_mismatch() {
        let result = CountMatrix::new(array![[1.0, 2.0]], ids("g", 2), ids("s", 2));
        assert!(matches!(result, Err(ReportError::DimensionMismatch { .. })));
    }

    #[test]
    fn test_duplicate_gene_ids_renamed() {
        let genes = vec!["a".to_string(), "a".to_string(), "b".to_string()];
        let cm = CountMatrix::new(array![[1.0], [2.0], [3.0]], genes, ids("s", 1)).unwrap();
        assert_eq!(cm.gene_ids(), &["a", "a_1", "b"]);
    }

    #[test]
    fn test_renamed_ids_skip_taken_suffixes() {
        let genes = vec!["a".to_string(), "a".to_string(), "a_1".to_string()];
        let cm = CountMatrix::new(array![[1.0], [2.0], [3.0]], genes, ids("s", 1)).unwrap();
        assert_eq!(cm.gene_ids(), &["a", "a_2", "a_1"]);
    }

    #[test]
    fn test_rejects_duplicate_sample_ids() {
        let samples = vec!["a".to_string(), "b".to_string(), "a".to_string()];
        let result = CountMatrix::new(array![[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]], ids("g", 2), samples);
        match result {
            Err(ReportError::InvalidCountMatrix { reason }) => assert!(reason.contains("'a'")),
            other => panic!("expected InvalidCountMatrix, got {:?}", other),
        }
    }

    #[test]
    fn test_subset_samples_reorders() {
        let cm = CountMatrix::new(array![[1.0, 2.0, 3.0]], ids("g", 1), ids("s", 3)).unwrap();
        let sub = cm.subset_samples(&[2, 0]).unwrap();
        assert_eq!(sub.sample_ids(), &["s3", "s1"]);
        assert_eq!(sub.counts()[[0, 0]], 3.0);
        assert_eq!(sub.counts()[[0, 1]], 1.0);
    }
}
