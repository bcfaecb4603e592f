//! Delimited input tables and CSV exports

use std::fs::{self, File};
use std::io::{BufRead, BufReader};
use std::path::Path;

use csv::{ReaderBuilder, StringRecord, Trim, Writer};
use ndarray::Array2;
use serde::de::DeserializeOwned;

use super::results::{DeResults, SignificantGene};
use crate::data::{
    metadata_from_records, AlignmentRecord, CountMatrix, GeneAnnotation, GeneRecord, MetadataRecord,
    SampleDescriptor, SampleMetadata,
};
use crate::error::{ReportError, Result};

const ANNOTATION_COLUMNS: [&str; 2] = ["gene_id", "symbol"];
const ALIGNMENT_COLUMNS: [&str; 3] = ["sample_id", "unit_id", "uniquely_aligned"];
const METADATA_COLUMNS: [&str; 5] = ["sample_id", "sex", "tissue", "genotype", "treatment_duration"];

/// Tab when the header line contains one, comma otherwise
pub fn sniff_delimiter(path: &Path) -> Result<u8> {
    let mut header = String::new();
    BufReader::new(File::open(path)?).read_line(&mut header)?;
    if header.trim().is_empty() {
        return Err(ReportError::EmptyData {
            reason: format!("{} is empty", path.display()),
        });
    }
    Ok(if header.contains('\t') { b'\t' } else { b',' })
}

fn open_table(path: &Path) -> Result<csv::Reader<File>> {
    let delimiter = sniff_delimiter(path)?;
    Ok(ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .trim(Trim::All)
        .from_path(path)?)
}

fn check_columns(headers: &StringRecord, required: &[&str], path: &Path) -> Result<()> {
    for column in required {
        if !headers.iter().any(|h| h == *column) {
            return Err(ReportError::MissingColumn {
                path: path.display().to_string(),
                column: column.to_string(),
            });
        }
    }
    Ok(())
}

fn read_records<T: DeserializeOwned>(path: &Path, required: &[&str]) -> Result<Vec<T>> {
    let mut reader = open_table(path)?;
    check_columns(reader.headers()?, required, path)?;
    let records = reader.deserialize().collect::<std::result::Result<Vec<T>, _>>()?;
    if records.is_empty() {
        return Err(ReportError::EmptyData {
            reason: format!("{} has no data rows", path.display()),
        });
    }
    Ok(records)
}

/// Gene annotation with `gene_id` and `symbol` columns
pub fn read_annotation<P: AsRef<Path>>(path: P, link_template: &str) -> Result<GeneAnnotation> {
    let records: Vec<GeneRecord> = read_records(path.as_ref(), &ANNOTATION_COLUMNS)?;
    log::info!("Loaded annotation for {} genes", records.len());
    Ok(GeneAnnotation::new(records, link_template))
}

pub fn read_alignment_summary<P: AsRef<Path>>(path: P) -> Result<Vec<AlignmentRecord>> {
    let records: Vec<AlignmentRecord> = read_records(path.as_ref(), &ALIGNMENT_COLUMNS)?;
    log::info!("Loaded {} alignment summary rows", records.len());
    Ok(records)
}

/// Metadata rows in file order
pub fn read_metadata_records<P: AsRef<Path>>(path: P) -> Result<Vec<MetadataRecord>> {
    let records: Vec<MetadataRecord> = read_records(path.as_ref(), &METADATA_COLUMNS)?;
    log::info!("Loaded metadata for {} samples", records.len());
    Ok(records)
}

pub fn read_metadata<P: AsRef<Path>>(path: P) -> Result<SampleMetadata> {
    metadata_from_records(&read_metadata_records(path)?)
}

/// Count matrix whose first column holds gene ids and whose remaining
/// columns are samples
pub fn read_count_matrix<P: AsRef<Path>>(path: P) -> Result<CountMatrix> {
    let path = path.as_ref();
    let mut reader = open_table(path)?;
    let headers = reader.headers()?.clone();
    if headers.len() < 2 {
        return Err(ReportError::InvalidCountMatrix {
            reason: format!("{} needs a gene id column and at least one sample column", path.display()),
        });
    }
    let sample_ids: Vec<String> = headers.iter().skip(1).map(|s| s.to_string()).collect();

    let mut gene_ids = Vec::new();
    let mut values = Vec::new();
    for record in reader.records() {
        let record = record?;
        let gene_id = record.get(0).unwrap_or_default().to_string();
        if record.len() != headers.len() {
            return Err(ReportError::InvalidCountMatrix {
                reason: format!(
                    "row for {} has {} fields, expected {}",
                    gene_id,
                    record.len(),
                    headers.len()
                ),
            });
        }
        for (field, sample) in record.iter().skip(1).zip(&sample_ids) {
            let count = field.parse::<f64>().map_err(|_| ReportError::InvalidCountMatrix {
                reason: format!("unparsable count '{}' for gene {} in sample {}", field, gene_id, sample),
            })?;
            values.push(count);
        }
        gene_ids.push(gene_id);
    }

    if gene_ids.is_empty() {
        return Err(ReportError::EmptyData {
            reason: format!("{} has no genes", path.display()),
        });
    }
    let counts = Array2::from_shape_vec((gene_ids.len(), sample_ids.len()), values).map_err(|e| {
        ReportError::InvalidCountMatrix {
            reason: e.to_string(),
        }
    })?;
    log::info!(
        "Loaded count matrix: {} genes x {} samples",
        gene_ids.len(),
        sample_ids.len()
    );
    CountMatrix::new(counts, gene_ids, sample_ids)
}

/// Single log2 expression threshold; surrounding whitespace is allowed
pub fn read_threshold<P: AsRef<Path>>(path: P) -> Result<f64> {
    let path = path.as_ref();
    let text = fs::read_to_string(path)?;
    let text = text.trim();
    if text.is_empty() {
        return Err(ReportError::EmptyData {
            reason: format!("{} holds no threshold", path.display()),
        });
    }
    let threshold: f64 = text.parse()?;
    log::info!("Log2 expression threshold: {}", threshold);
    Ok(threshold)
}

fn format_value(v: f64) -> String {
    if v.is_nan() {
        "NA".to_string()
    } else {
        v.to_string()
    }
}

/// Full result table, one row per gene
pub fn write_de_results<P: AsRef<Path>>(path: P, results: &DeResults) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record([
        "gene_id",
        "base_mean",
        "log2_fold_change",
        "lfc_se",
        "stat",
        "pvalue",
        "padj",
        "dispersion",
    ])?;
    for i in 0..results.n_genes() {
        let mut row = vec![results.gene_ids[i].clone()];
        row.extend(
            [
                results.base_means[i],
                results.log2_fold_changes[i],
                results.lfc_se[i],
                results.stat[i],
                results.pvalues[i],
                results.padj[i],
                results.dispersions[i],
            ]
            .into_iter()
            .map(format_value),
        );
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_significant<P: AsRef<Path>>(path: P, rows: &[SignificantGene]) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    if rows.is_empty() {
        writer.write_record([
            "gene_id",
            "symbol",
            "base_mean",
            "log2_fold_change",
            "lfc_se",
            "stat",
            "pvalue",
            "padj",
            "link",
        ])?;
    }
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_sample_table<P: AsRef<Path>>(path: P, table: &[SampleDescriptor]) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    for row in table {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_size_factors<P: AsRef<Path>>(path: P, sample_ids: &[String], size_factors: &[f64]) -> Result<()> {
    let mut writer = Writer::from_path(path)?;
    writer.write_record(["sample_id", "size_factor"])?;
    for (id, sf) in sample_ids.iter().zip(size_factors) {
        writer.write_record([id.clone(), sf.to_string()])?;
    }
    writer.flush()?;
    Ok(())
}

/// Genes × samples matrix with a `gene_id` column
pub fn write_matrix<P: AsRef<Path>>(
    path: P,
    gene_ids: &[String],
    sample_ids: &[String],
    matrix: &Array2<f64>,
) -> Result<()> {
    if matrix.dim() != (gene_ids.len(), sample_ids.len()) {
        return Err(ReportError::DimensionMismatch {
            expected: format!("{} x {}", gene_ids.len(), sample_ids.len()),
            got: format!("{} x {}", matrix.nrows(), matrix.ncols()),
        });
    }
    let mut writer = Writer::from_path(path)?;
    let mut header = vec!["gene_id".to_string()];
    header.extend(sample_ids.iter().cloned());
    writer.write_record(&header)?;
    for (id, row) in gene_ids.iter().zip(matrix.rows()) {
        let mut record = vec![id.clone()];
        record.extend(row.iter().map(|&v| format_value(v)));
        writer.write_record(&record)?;
    }
    writer.flush()?;
    Ok(())
}
