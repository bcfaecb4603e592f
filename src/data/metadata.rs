//! Per-sample categorical covariates

use std::collections::{HashMap, HashSet};

use crate::error::{ReportError, Result};

/// Ordered sample ids with their covariate levels
#[derive(Debug, Clone)]
pub struct SampleMetadata {
    sample_ids: Vec<String>,
    /// Covariate name -> level of each sample
    conditions: HashMap<String, Vec<String>>,
}

impl SampleMetadata {
    /// Create metadata for the given samples; ids must be unique
    pub fn new(sample_ids: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::new();
        for id in &sample_ids {
            if !seen.insert(id) {
                return Err(ReportError::InvalidMetadata {
                    reason: format!("duplicate sample id '{}'", id),
                });
            }
        }
        Ok(Self {
            sample_ids,
            conditions: HashMap::new(),
        })
    }

    /// Add a categorical covariate column
    pub fn add_condition(&mut self, name: &str, values: Vec<String>) -> Result<()> {
        if values.len() != self.sample_ids.len() {
            return Err(ReportError::DimensionMismatch {
                expected: format!("{} values", self.sample_ids.len()),
                got: format!("{} values", values.len()),
            });
        }
        self.conditions.insert(name.to_string(), values);
        Ok(())
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions.contains_key(name)
    }

    /// Level of `condition` for one sample
    pub fn get_value(&self, condition: &str, sample_idx: usize) -> Result<&str> {
        self.conditions
            .get(condition)
            .and_then(|v| v.get(sample_idx))
            .map(|s| s.as_str())
            .ok_or_else(|| ReportError::InvalidMetadata {
                reason: format!("condition '{}' or sample index {} not found", condition, sample_idx),
            })
    }

    /// Sorted unique levels of a condition
    pub fn levels(&self, condition: &str) -> Result<Vec<String>> {
        self.conditions
            .get(condition)
            .map(|values| {
                let mut unique = values.clone();
                unique.sort();
                unique.dedup();
                unique
            })
            .ok_or_else(|| ReportError::InvalidMetadata {
                reason: format!("condition '{}' not found", condition),
            })
    }

    pub fn condition(&self, name: &str) -> Option<&Vec<String>> {
        self.conditions.get(name)
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    pub fn n_samples(&self) -> usize {
        self.sample_ids.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_levels_sorted_unique() {
        let mut meta = SampleMetadata::new(strings(&["a", "b", "c"])).unwrap();
        meta.add_condition("sex", strings(&["male", "female", "male"])).unwrap();
        assert_eq!(meta.levels("sex").unwrap(), strings(&["female", "male"]));
        assert!(meta.levels("tissue").is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        assert!(SampleMetadata::new(strings(&["a", "a"])).is_err());
    }

    #[test]
    fn test_add_condition_length_checked() {
        let mut meta = SampleMetadata::new(strings(&["a", "b"])).unwrap();
        assert!(meta.add_condition("sex", strings(&["male"])).is_err());
    }
}
