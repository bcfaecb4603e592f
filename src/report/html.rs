//! Single-page HTML report

use std::fmt::Write;

use super::format::{escape_html, format_count, format_mean, format_significant, format_thousands};
use super::svg;
use crate::data::SampleDescriptor;
use crate::diagnostics::SampleDiagnostics;
use crate::error::Result;
use crate::glm::Contrast;
use crate::io::{DeResults, ResultsSummary, SignificantGene};

const STAT_DIGITS: usize = 3;

/// Gene counts after each preparation step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PreparationCounts {
    pub input: usize,
    pub after_marker_strip: usize,
    pub after_zero_filter: usize,
    pub after_threshold: usize,
}

/// Facts about the run shown at the top of the report
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub preparation: PreparationCounts,
    pub log2_threshold: f64,
    pub sample_ids: Vec<String>,
    pub size_factors: Vec<f64>,
    pub full_design: String,
    pub reduced_design: String,
    pub contrast: Contrast,
    pub results: ResultsSummary,
}

/// A sample grouping drawn in the PCA plot
#[derive(Debug, Clone, Copy)]
pub struct Grouping<'a> {
    pub name: &'a str,
    /// One level per sample, in model column order
    pub levels: &'a [String],
}

/// Inputs of `render_report`
#[derive(Debug, Clone, Copy)]
pub struct ReportContext<'a> {
    pub title: &'a str,
    pub summary: &'a RunSummary,
    pub sample_table: &'a [SampleDescriptor],
    /// Model column order
    pub sample_ids: &'a [String],
    pub gene_ids: &'a [String],
    pub rlog: &'a ndarray::Array2<f64>,
    pub diagnostics: &'a SampleDiagnostics,
    pub color_by: Grouping<'a>,
    pub shape_by: Grouping<'a>,
    pub results: &'a DeResults,
    pub significant: &'a [SignificantGene],
    pub top_rows: usize,
    pub alpha: f64,
}

fn section(out: &mut String, title: &str) -> Result<()> {
    writeln!(out, "<h2>{}</h2>", escape_html(title))?;
    Ok(())
}

fn write_summary(out: &mut String, summary: &RunSummary) -> Result<()> {
    section(out, "Run summary")?;
    let prep = &summary.preparation;
    writeln!(out, "<table class=\"summary\">")?;
    let rows = [
        ("Genes in count matrix", prep.input),
        ("After removing control rows", prep.after_marker_strip),
        ("After dropping all-zero genes", prep.after_zero_filter),
        ("After expression threshold", prep.after_threshold),
    ];
    for (label, n) in rows {
        writeln!(out, "<tr><th>{}</th><td>{}</td></tr>", label, format_thousands(n as u64))?;
    }
    writeln!(
        out,
        "<tr><th>Expression threshold (log2)</th><td>{}</td></tr>",
        format_significant(summary.log2_threshold, STAT_DIGITS)
    )?;
    writeln!(out, "<tr><th>Full design</th><td><code>{}</code></td></tr>", escape_html(&summary.full_design))?;
    writeln!(
        out,
        "<tr><th>Reduced design</th><td><code>{}</code></td></tr>",
        escape_html(&summary.reduced_design)
    )?;
    writeln!(out, "<tr><th>Contrast</th><td>{}</td></tr>", escape_html(&summary.contrast.to_string()))?;
    let r = &summary.results;
    writeln!(
        out,
        "<tr><th>Significant genes (padj &le; {})</th><td>{} ({} up, {} down) of {} tested</td></tr>",
        r.alpha,
        format_thousands(r.significant as u64),
        format_thousands(r.upregulated as u64),
        format_thousands(r.downregulated as u64),
        format_thousands(r.genes_tested as u64)
    )?;
    writeln!(out, "</table>")?;

    writeln!(out, "<h3>Size factors</h3>")?;
    writeln!(out, "<table><tr><th>Sample</th><th>Size factor</th></tr>")?;
    for (id, sf) in summary.sample_ids.iter().zip(&summary.size_factors) {
        writeln!(
            out,
            "<tr><td>{}</td><td class=\"num\">{}</td></tr>",
            escape_html(id),
            format_significant(*sf, STAT_DIGITS)
        )?;
    }
    writeln!(out, "</table>")?;
    Ok(())
}

fn write_sample_table(out: &mut String, rows: &[SampleDescriptor]) -> Result<()> {
    section(out, "Samples")?;
    writeln!(
        out,
        "<table><tr><th>Sample</th><th>Unit</th><th>Sex</th><th>Tissue</th><th>Genotype</th><th>Duration</th><th>Uniquely aligned</th></tr>"
    )?;
    for row in rows {
        writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td>{}</td><td class=\"num\">{}</td></tr>",
            escape_html(&row.sample_id),
            escape_html(row.unit_id.as_deref().unwrap_or("NA")),
            escape_html(&row.sex),
            escape_html(&row.tissue),
            escape_html(&row.genotype),
            escape_html(&row.treatment_duration),
            format_count(row.aligned_reads)
        )?;
    }
    writeln!(out, "</table>")?;
    Ok(())
}

fn write_significant_table(out: &mut String, rows: &[SignificantGene], top_rows: usize, alpha: f64) -> Result<()> {
    section(out, "Differentially expressed genes")?;
    writeln!(
        out,
        "<p>{} genes with padj &le; {}; showing the top {} by log2 fold change.</p>",
        format_thousands(rows.len() as u64),
        alpha,
        rows.len().min(top_rows)
    )?;
    writeln!(
        out,
        "<table><tr><th>Gene</th><th>Symbol</th><th>Base mean</th><th>log2 FC</th><th>lfcSE</th><th>stat</th><th>p-value</th><th>padj</th></tr>"
    )?;
    for row in rows.iter().take(top_rows) {
        let symbol = match &row.link {
            Some(link) => format!("<a href=\"{}\">{}</a>", escape_html(link), escape_html(&row.symbol)),
            None => escape_html(&row.symbol),
        };
        writeln!(
            out,
            "<tr><td>{}</td><td>{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td><td class=\"num\">{}</td></tr>",
            escape_html(&row.gene_id),
            symbol,
            format_mean(row.base_mean),
            format_significant(row.log2_fold_change, STAT_DIGITS),
            format_significant(row.lfc_se, STAT_DIGITS),
            format_significant(row.stat, STAT_DIGITS),
            format_significant(row.pvalue, STAT_DIGITS),
            format_significant(row.padj, STAT_DIGITS)
        )?;
    }
    writeln!(out, "</table>")?;
    Ok(())
}

/// Render the full report page
pub fn render_report(ctx: &ReportContext) -> Result<String> {
    let mut out = String::new();
    writeln!(out, "<!DOCTYPE html>")?;
    writeln!(out, "<html lang=\"en\"><head><meta charset=\"utf-8\">")?;
    writeln!(out, "<title>{}</title>", escape_html(ctx.title))?;
    writeln!(out, "<style>")?;
    writeln!(out, "body {{ font-family: Arial, sans-serif; margin: 24px; color: #222; }}")?;
    writeln!(out, "table {{ border-collapse: collapse; margin: 8px 0 16px; font-size: 13px; }}")?;
    writeln!(out, "th, td {{ border: 1px solid #ddd; padding: 4px 8px; text-align: left; }}")?;
    writeln!(out, "td.num {{ text-align: right; font-variant-numeric: tabular-nums; }}")?;
    writeln!(out, ".plot {{ margin: 8px 0 24px; }}")?;
    writeln!(out, "</style></head><body>")?;
    writeln!(out, "<h1>{}</h1>", escape_html(ctx.title))?;

    write_summary(&mut out, ctx.summary)?;
    write_sample_table(&mut out, ctx.sample_table)?;

    let diag = ctx.diagnostics;
    section(&mut out, "Sample correlation (rlog)")?;
    svg::scatter_matrix(&mut out, ctx.rlog, ctx.sample_ids, &diag.abs_correlation)?;

    section(&mut out, "Sample distances")?;
    svg::distance_heatmap(&mut out, &diag.distances, ctx.sample_ids, &diag.clustering)?;

    section(&mut out, "Most expressed genes (rlog)")?;
    let top_labels: Vec<String> = diag
        .top_genes
        .iter()
        .filter_map(|&i| ctx.gene_ids.get(i).cloned())
        .collect();
    svg::expression_heatmap(&mut out, &diag.top_values, &top_labels, ctx.sample_ids)?;

    section(&mut out, "Principal components")?;
    svg::pca_plot(
        &mut out,
        &diag.pca,
        ctx.sample_ids,
        (ctx.color_by.name, ctx.color_by.levels),
        (ctx.shape_by.name, ctx.shape_by.levels),
    )?;

    section(&mut out, &format!("MA plot ({})", ctx.results.contrast))?;
    let significant: Vec<bool> = (0..ctx.results.n_genes())
        .map(|i| ctx.results.is_significant(i, ctx.alpha))
        .collect();
    svg::ma_plot(&mut out, &ctx.results.base_means, &ctx.results.log2_fold_changes, &significant)?;

    write_significant_table(&mut out, ctx.significant, ctx.top_rows, ctx.alpha)?;

    writeln!(out, "</body></html>")?;
    Ok(out)
}
