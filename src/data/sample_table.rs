//! Sample descriptor table: metadata left-joined with alignment statistics

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use super::SampleMetadata;
use crate::error::{ReportError, Result};

/// Covariate columns carried by every metadata row, in sort-key order
pub const COVARIATE_COLUMNS: [&str; 4] = ["sex", "tissue", "genotype", "treatment_duration"];

/// One row of the sample metadata file
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MetadataRecord {
    pub sample_id: String,
    pub sex: String,
    pub tissue: String,
    pub genotype: String,
    pub treatment_duration: String,
}

impl MetadataRecord {
    fn covariate(&self, name: &str) -> &str {
        match name {
            "sex" => &self.sex,
            "tissue" => &self.tissue,
            "genotype" => &self.genotype,
            _ => &self.treatment_duration,
        }
    }
}

/// One row of the alignment summary: a sequencing unit of a sample
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AlignmentRecord {
    pub sample_id: String,
    pub unit_id: String,
    #[serde(rename = "uniquely_aligned")]
    pub aligned_reads: u64,
}

/// Joined row; alignment fields are `None` when the sample has no alignment entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleDescriptor {
    pub sample_id: String,
    pub unit_id: Option<String>,
    pub sex: String,
    pub tissue: String,
    pub genotype: String,
    pub treatment_duration: String,
    pub aligned_reads: Option<u64>,
}

impl SampleDescriptor {
    fn sort_key(&self) -> (&str, &str, &str, &str, &str, Option<&str>) {
        (
            &self.sex,
            &self.tissue,
            &self.genotype,
            &self.treatment_duration,
            &self.sample_id,
            self.unit_id.as_deref(),
        )
    }
}

fn compare_descriptors(a: &SampleDescriptor, b: &SampleDescriptor) -> Ordering {
    a.sort_key().cmp(&b.sort_key())
}

/// Left join metadata with alignment rows on sample id, then sort by
/// sex, tissue, genotype, treatment duration, sample id and unit id.
pub fn build_sample_table(
    metadata: &[MetadataRecord],
    alignment: &[AlignmentRecord],
) -> Result<Vec<SampleDescriptor>> {
    let mut units: HashSet<(&str, &str)> = HashSet::new();
    let mut by_sample: HashMap<&str, Vec<&AlignmentRecord>> = HashMap::new();
    for rec in alignment {
        if !units.insert((&rec.sample_id, &rec.unit_id)) {
            return Err(ReportError::InvalidMetadata {
                reason: format!(
                    "duplicate alignment entry for sample '{}' unit '{}'",
                    rec.sample_id, rec.unit_id
                ),
            });
        }
        by_sample.entry(rec.sample_id.as_str()).or_default().push(rec);
    }

    let mut table = Vec::with_capacity(metadata.len().max(alignment.len()));
    for meta in metadata {
        let descriptor = |unit_id: Option<String>, aligned_reads: Option<u64>| SampleDescriptor {
            sample_id: meta.sample_id.clone(),
            unit_id,
            sex: meta.sex.clone(),
            tissue: meta.tissue.clone(),
            genotype: meta.genotype.clone(),
            treatment_duration: meta.treatment_duration.clone(),
            aligned_reads,
        };
        match by_sample.get(meta.sample_id.as_str()) {
            Some(recs) => {
                for rec in recs {
                    table.push(descriptor(Some(rec.unit_id.clone()), Some(rec.aligned_reads)));
                }
            }
            None => {
                log::warn!("Sample '{}' has no alignment summary entry", meta.sample_id);
                table.push(descriptor(None, None));
            }
        }
    }

    table.sort_by(compare_descriptors);
    Ok(table)
}

/// Convert metadata rows into the modeling representation, keeping file order
pub fn metadata_from_records(records: &[MetadataRecord]) -> Result<SampleMetadata> {
    if records.is_empty() {
        return Err(ReportError::EmptyData {
            reason: "metadata has no samples".to_string(),
        });
    }
    let mut metadata = SampleMetadata::new(records.iter().map(|r| r.sample_id.clone()).collect())?;
    for column in COVARIATE_COLUMNS {
        let values = records.iter().map(|r| r.covariate(column).to_string()).collect();
        metadata.add_condition(column, values)?;
    }
    Ok(metadata)
}
