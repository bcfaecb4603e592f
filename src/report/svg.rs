//! Inline SVG plots drawn with plotters into in-memory strings

use std::fmt::Write;

use ndarray::Array2;
use plotters::coord::Shift;
use plotters::prelude::*;
use plotters::style::text_anchor::{HPos, Pos, VPos};

use super::format::format_significant;
use crate::diagnostics::{Dendrogram, PcaResult};
use crate::error::{ReportError, Result};

type Area<'a> = DrawingArea<SVGBackend<'a>, Shift>;

/// Side of one scatter-matrix panel in pixels
const PANEL: u32 = 126;
/// Points drawn per scatter panel
const MAX_PANEL_POINTS: usize = 1500;
const MA_Y_LIMIT: f64 = 2.0;

const PALETTE: [RGBColor; 8] = [
    RGBColor(0x1f, 0x77, 0xb4),
    RGBColor(0xd6, 0x27, 0x28),
    RGBColor(0x2c, 0xa0, 0x2c),
    RGBColor(0xff, 0x7f, 0x0e),
    RGBColor(0x94, 0x67, 0xbd),
    RGBColor(0x8c, 0x56, 0x4b),
    RGBColor(0xe3, 0x77, 0xc2),
    RGBColor(0x17, 0xbe, 0xcf),
];
const BORDER: RGBColor = RGBColor(0xdd, 0xdd, 0xdd);
const HISTOGRAM: RGBColor = RGBColor(0x7d, 0xb8, 0xda);
const POINT: RGBColor = RGBColor(0x55, 0x55, 0x55);
const GREY: RGBColor = RGBColor(0x99, 0x99, 0x99);
const HIGHLIGHT: RGBColor = RGBColor(0xd6, 0x27, 0x28);
const TREE: RGBColor = RGBColor(0x44, 0x44, 0x44);

/// Draw into a fresh SVG document and append it to `out` inside a plot div
fn render(out: &mut String, size: (u32, u32), draw: impl FnOnce(&Area<'_>) -> Result<()>) -> Result<()> {
    let mut svg = String::new();
    {
        let root = SVGBackend::with_string(&mut svg, size).into_drawing_area();
        root.fill(&WHITE)?;
        draw(&root)?;
        root.present()?;
    }
    writeln!(out, "<div class=\"plot\">")?;
    out.push_str(&svg);
    writeln!(out, "</div>")?;
    Ok(())
}

fn text_style(size: f64, pos: Pos) -> TextStyle<'static> {
    ("sans-serif", size).into_font().color(&BLACK).pos(pos)
}

fn rotated_style(size: f64, transform: FontTransform) -> TextStyle<'static> {
    ("sans-serif", size)
        .into_font()
        .transform(transform)
        .color(&BLACK)
        .pos(Pos::new(HPos::Left, VPos::Center))
}

fn px(v: f64) -> i32 {
    v.round() as i32
}

fn finite_range(values: impl Iterator<Item = f64>) -> (f64, f64) {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if lo.is_finite() {
        (lo, hi)
    } else {
        (0.0, 1.0)
    }
}

fn padded((lo, hi): (f64, f64)) -> (f64, f64) {
    let pad = if hi > lo { (hi - lo) * 0.05 } else { 0.5 };
    (lo - pad, hi + pad)
}

/// White to dark blue
fn sequential_color(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let channel = |hi: f64, lo: f64| (hi + (lo - hi) * t).round() as u8;
    RGBColor(channel(255.0, 8.0), channel(255.0, 48.0), channel(255.0, 107.0))
}

/// Blue through white to red
fn diverging_color(t: f64) -> RGBColor {
    let t = t.clamp(0.0, 1.0);
    let (r, g, b) = if t < 0.5 {
        let s = t / 0.5;
        (33.0 + s * 222.0, 102.0 + s * 153.0, 172.0 + s * 83.0)
    } else {
        let s = (t - 0.5) / 0.5;
        (255.0 - s * 77.0, 255.0 - s * 231.0, 255.0 - s * 212.0)
    };
    RGBColor(r.round() as u8, g.round() as u8, b.round() as u8)
}

/// Circle, square, triangle or diamond, cycling with `shape`
fn marker(area: &Area<'_>, shape: usize, (x, y): (i32, i32), color: RGBColor) -> Result<()> {
    let style = color.filled();
    match shape % 4 {
        0 => area.draw(&Circle::new((x, y), 5, style))?,
        1 => area.draw(&Rectangle::new([(x - 4, y - 4), (x + 4, y + 4)], style))?,
        2 => area.draw(&Polygon::new(vec![(x, y - 6), (x - 5, y + 4), (x + 5, y + 4)], style))?,
        _ => area.draw(&Polygon::new(vec![(x, y - 6), (x + 5, y), (x, y + 6), (x - 5, y)], style))?,
    }
    Ok(())
}

fn least_squares(points: &[(f64, f64)]) -> Option<(f64, f64)> {
    if points.len() < 2 {
        return None;
    }
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mx).powi(2)).sum();
    if sxx <= 0.0 {
        return None;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    let slope = sxy / sxx;
    Some((slope, my - slope * mx))
}

/// Pairwise sample panels: scatter above the diagonal, histograms on it and
/// a least-squares line with |r| below it
pub fn scatter_matrix(out: &mut String, values: &Array2<f64>, labels: &[String], abs_cor: &Array2<f64>) -> Result<()> {
    let n = labels.len();
    if n == 0 {
        return Err(ReportError::EmptyData {
            reason: "scatter matrix needs at least one sample".to_string(),
        });
    }
    let range = padded(finite_range(values.iter().copied()));
    let step = (values.nrows() / MAX_PANEL_POINTS).max(1);
    let side = PANEL * n as u32;

    render(out, (side, side), |root| {
        for (k, panel) in root.split_evenly((n, n)).iter().enumerate() {
            let (i, j) = (k / n, k % n);
            let (w, h) = panel.dim_in_pixel();
            let (w, h) = (w as i32, h as i32);
            panel.draw(&Rectangle::new([(1, 1), (w - 2, h - 2)], BORDER.stroke_width(1)))?;
            let xs = values.column(j);
            let ys = values.column(i);

            if i == j {
                let bins = 20;
                let width = (range.1 - range.0) / bins as f64;
                let mut counts = vec![0usize; bins];
                for &v in xs.iter().filter(|v| v.is_finite()) {
                    let b = ((v - range.0) / width).floor() as usize;
                    counts[b.min(bins - 1)] += 1;
                }
                let max = counts.iter().copied().max().unwrap_or(1).max(1) as f64;
                let mut chart = ChartBuilder::on(panel)
                    .margin(6)
                    .build_cartesian_2d(range.0..range.1, 0.0..max * 1.25)?;
                chart.draw_series(counts.iter().enumerate().map(|(b, &c)| {
                    let x0 = range.0 + b as f64 * width;
                    Rectangle::new([(x0, 0.0), (x0 + width, c as f64)], HISTOGRAM.filled())
                }))?;
                panel.draw(&Text::new(
                    labels[i].clone(),
                    (w / 2, 6),
                    text_style(11.0, Pos::new(HPos::Center, VPos::Top)),
                ))?;
            } else if j > i {
                let mut chart = ChartBuilder::on(panel)
                    .margin(6)
                    .build_cartesian_2d(range.0..range.1, range.0..range.1)?;
                chart.draw_series(
                    (0..values.nrows())
                        .step_by(step)
                        .map(|g| (xs[g], ys[g]))
                        .filter(|(x, y)| x.is_finite() && y.is_finite())
                        .map(|point| Circle::new(point, 1, POINT.mix(0.4).filled())),
                )?;
            } else {
                let pairs: Vec<(f64, f64)> = xs
                    .iter()
                    .zip(ys.iter())
                    .filter(|(x, y)| x.is_finite() && y.is_finite())
                    .map(|(&x, &y)| (x, y))
                    .collect();
                if let Some((slope, intercept)) = least_squares(&pairs) {
                    let (lo, hi) = range;
                    let mut chart = ChartBuilder::on(panel).margin(6).build_cartesian_2d(lo..hi, lo..hi)?;
                    let line = vec![
                        (lo, (intercept + slope * lo).clamp(lo, hi)),
                        (hi, (intercept + slope * hi).clamp(lo, hi)),
                    ];
                    chart.draw_series(std::iter::once(PathElement::new(line, HIGHLIGHT.stroke_width(2))))?;
                }
                panel.draw(&Text::new(
                    format!("|r| = {}", format_significant(abs_cor[[i, j]], 3)),
                    (w / 2, h - 8),
                    text_style(12.0, Pos::new(HPos::Center, VPos::Bottom)),
                ))?;
            }
        }
        Ok(())
    })
}

/// Dendrogram links; `along` maps a leaf-order position to pixels and
/// `depth` maps a merge height to pixels on the other axis
fn dendrogram(
    area: &Area<'_>,
    tree: &Dendrogram,
    along: impl Fn(f64) -> f64,
    depth: impl Fn(f64) -> f64,
    horizontal: bool,
) -> Result<()> {
    let style = TREE.stroke_width(1);
    for (k, merge) in tree.merges.iter().enumerate() {
        let (xl, hl) = tree.node_position(merge.left);
        let (xr, hr) = tree.node_position(merge.right);
        let (_, h) = tree.node_position(tree.n_leaves + k);
        let corners = [
            (along(xl), depth(hl)),
            (along(xl), depth(h)),
            (along(xr), depth(h)),
            (along(xr), depth(hr)),
        ];
        let points: Vec<(i32, i32)> = corners
            .iter()
            .map(|&(a, d)| if horizontal { (px(a), px(d)) } else { (px(d), px(a)) })
            .collect();
        area.draw(&PathElement::new(points, style))?;
    }
    Ok(())
}

/// Sample-distance heatmap with rows and columns in dendrogram leaf order
pub fn distance_heatmap(out: &mut String, distances: &Array2<f64>, labels: &[String], tree: &Dendrogram) -> Result<()> {
    let n = labels.len();
    let cell = (360 / n.max(1) as i32).clamp(14, 40);
    let dendro = 70;
    let label_w = 110;
    let grid = n as i32 * cell;
    let (gx, gy) = (dendro + 4, dendro + 4);
    let size = ((gx + grid + label_w) as u32, (gy + grid + label_w) as u32);

    render(out, size, |root| {
        let max_d = distances.iter().copied().fold(0.0, f64::max);
        for (r, &i) in tree.order.iter().enumerate() {
            let r = r as i32;
            for (c, &j) in tree.order.iter().enumerate() {
                let c = c as i32;
                let t = if max_d > 0.0 { 1.0 - distances[[i, j]] / max_d } else { 1.0 };
                let (x, y) = (gx + c * cell, gy + r * cell);
                root.draw(&Rectangle::new([(x, y), (x + cell, y + cell)], sequential_color(t).filled()))?;
            }
            root.draw(&Text::new(
                labels[i].clone(),
                (gx + grid + 4, gy + r * cell + cell / 2),
                text_style(10.0, Pos::new(HPos::Left, VPos::Center)),
            ))?;
            root.draw(&Text::new(
                labels[i].clone(),
                (gx + r * cell + cell / 2, gy + grid + 4),
                rotated_style(10.0, FontTransform::Rotate90),
            ))?;
        }

        let max_h = tree.max_height();
        let scale = |h: f64| if max_h > 0.0 { h / max_h * (dendro - 6) as f64 } else { 0.0 };
        let along = |x0: i32| move |pos: f64| x0 as f64 + (pos + 0.5) * cell as f64;
        dendrogram(root, tree, along(gx), |h| (gy - 2) as f64 - scale(h), true)?;
        dendrogram(root, tree, along(gy), |h| (gx - 2) as f64 - scale(h), false)?;
        Ok(())
    })
}

/// Heatmap of the given genes (rows) across samples in their given order
pub fn expression_heatmap(out: &mut String, values: &Array2<f64>, row_labels: &[String], col_labels: &[String]) -> Result<()> {
    let (n_rows, n_cols) = values.dim();
    let cell_w = (480 / n_cols.max(1) as i32).clamp(14, 48);
    let cell_h = 14;
    let label_w = 120;
    let top = 90;
    let size = (
        (label_w + n_cols as i32 * cell_w + 80) as u32,
        (top + n_rows as i32 * cell_h + 10).max(top + 60) as u32,
    );

    render(out, size, |root| {
        let (lo, hi) = finite_range(values.iter().copied());
        let scaled = |v: f64| if hi > lo { (v - lo) / (hi - lo) } else { 0.5 };
        for (c, label) in col_labels.iter().enumerate() {
            root.draw(&Text::new(
                label.clone(),
                (label_w + c as i32 * cell_w + cell_w / 2, top - 4),
                rotated_style(10.0, FontTransform::Rotate270),
            ))?;
        }
        for r in 0..n_rows {
            let y = top + r as i32 * cell_h;
            root.draw(&Text::new(
                row_labels.get(r).cloned().unwrap_or_default(),
                (label_w - 4, y + cell_h / 2),
                text_style(10.0, Pos::new(HPos::Right, VPos::Center)),
            ))?;
            for c in 0..n_cols {
                let x = label_w + c as i32 * cell_w;
                let color = diverging_color(scaled(values[[r, c]]));
                root.draw(&Rectangle::new([(x, y), (x + cell_w, y + cell_h)], color.filled()))?;
            }
        }

        let legend_x = label_w + n_cols as i32 * cell_w + 12;
        for (k, t) in [1.0, 0.5, 0.0].into_iter().enumerate() {
            let y = top + k as i32 * 18;
            root.draw(&Rectangle::new([(legend_x, y), (legend_x + 12, y + 12)], diverging_color(t).filled()))?;
            root.draw(&Text::new(
                format_significant(lo + t * (hi - lo), 3),
                (legend_x + 16, y + 6),
                text_style(10.0, Pos::new(HPos::Left, VPos::Center)),
            ))?;
        }
        Ok(())
    })
}

fn distinct(values: &[String]) -> Vec<String> {
    let mut levels: Vec<String> = Vec::new();
    for v in values {
        if !levels.contains(v) {
            levels.push(v.clone());
        }
    }
    levels
}

/// PC1 vs PC2, colored by one grouping and shaped by another
pub fn pca_plot(
    out: &mut String,
    result: &PcaResult,
    labels: &[String],
    color_by: (&str, &[String]),
    shape_by: (&str, &[String]),
) -> Result<()> {
    let (w, h) = (620, 420);
    let legend_w = 140;

    render(out, (w, h), |root| {
        let (plot, legend) = root.split_horizontally(w - legend_w);
        let x_range = padded(finite_range(result.scores.column(0).iter().copied()));
        let y_range = padded(finite_range(result.scores.column(1).iter().copied()));
        let mut chart = ChartBuilder::on(&plot)
            .margin(12)
            .x_label_area_size(36)
            .y_label_area_size(50)
            .build_cartesian_2d(x_range.0..x_range.1, y_range.0..y_range.1)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_labels(5)
            .y_labels(5)
            .x_label_formatter(&|v: &f64| format_significant(*v, 2))
            .y_label_formatter(&|v: &f64| format_significant(*v, 2))
            .x_desc(format!("PC1: {:.0}% variance", result.percent_variance[0]))
            .y_desc(format!("PC2: {:.0}% variance", result.percent_variance[1]))
            .draw()?;

        let color_levels = distinct(color_by.1);
        let shape_levels = distinct(shape_by.1);
        for s in 0..labels.len() {
            let color = color_levels.iter().position(|l| Some(l) == color_by.1.get(s)).unwrap_or(0);
            let shape = shape_levels.iter().position(|l| Some(l) == shape_by.1.get(s)).unwrap_or(0);
            let at = chart.backend_coord(&(result.scores[[s, 0]], result.scores[[s, 1]]));
            marker(root, shape, at, PALETTE[color % PALETTE.len()])?;
        }

        let heading = ("sans-serif", 11.0)
            .into_font()
            .style(FontStyle::Bold)
            .color(&BLACK)
            .pos(Pos::new(HPos::Left, VPos::Center));
        let entry = text_style(11.0, Pos::new(HPos::Left, VPos::Center));
        let mut y = 20;
        legend.draw(&Text::new(color_by.0.to_string(), (4, y), heading.clone()))?;
        for (k, level) in color_levels.iter().enumerate() {
            y += 16;
            marker(&legend, 0, (9, y), PALETTE[k % PALETTE.len()])?;
            legend.draw(&Text::new(level.clone(), (20, y), entry.clone()))?;
        }
        y += 24;
        legend.draw(&Text::new(shape_by.0.to_string(), (4, y), heading))?;
        for (k, level) in shape_levels.iter().enumerate() {
            y += 16;
            marker(&legend, k, (9, y), POINT)?;
            legend.draw(&Text::new(level.clone(), (20, y), entry.clone()))?;
        }
        Ok(())
    })
}

/// log10 mean expression against log2 fold change. The y axis is fixed to
/// [-2, 2]; values beyond it are drawn as triangles on the border.
pub fn ma_plot(out: &mut String, base_means: &[f64], log2_fold_changes: &[f64], significant: &[bool]) -> Result<()> {
    let x_values: Vec<f64> = base_means.iter().map(|&m| if m > 0.0 { m.log10() } else { f64::NAN }).collect();
    let x_range = padded(finite_range(x_values.iter().copied()));

    render(out, (620, 380), |root| {
        let mut chart = ChartBuilder::on(root)
            .margin(12)
            .x_label_area_size(36)
            .y_label_area_size(50)
            .build_cartesian_2d(x_range.0..x_range.1, -MA_Y_LIMIT..MA_Y_LIMIT)?;
        chart
            .configure_mesh()
            .disable_mesh()
            .x_labels(5)
            .y_labels(5)
            .x_label_formatter(&|v: &f64| format_significant(*v, 2))
            .y_label_formatter(&|v: &f64| format_significant(*v, 2))
            .x_desc("log10 mean of normalized counts")
            .y_desc("log2 fold change")
            .draw()?;
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(x_range.0, 0.0), (x_range.1, 0.0)],
            GREY.stroke_width(1),
        )))?;

        // non-significant genes first so highlighted ones stay on top
        for pass in [false, true] {
            let color = if pass { HIGHLIGHT } else { GREY };
            let mut inside = Vec::new();
            for ((&x, &lfc), &sig) in x_values.iter().zip(log2_fold_changes).zip(significant) {
                if sig != pass || !x.is_finite() || lfc.is_nan() {
                    continue;
                }
                if lfc > MA_Y_LIMIT {
                    let (cx, cy) = chart.backend_coord(&(x, MA_Y_LIMIT));
                    root.draw(&Polygon::new(vec![(cx, cy), (cx - 3, cy + 5), (cx + 3, cy + 5)], color.filled()))?;
                } else if lfc < -MA_Y_LIMIT {
                    let (cx, cy) = chart.backend_coord(&(x, -MA_Y_LIMIT));
                    root.draw(&Polygon::new(vec![(cx, cy), (cx - 3, cy - 5), (cx + 3, cy - 5)], color.filled()))?;
                } else {
                    inside.push((x, lfc));
                }
            }
            chart.draw_series(inside.into_iter().map(|point| Circle::new(point, 2, color.filled())))?;
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{hierarchical_clustering, pca, sample_distances};
    use ndarray::array;

    fn strings(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    /// Text content of every `<text>` element
    fn texts(svg: &str) -> Vec<String> {
        svg.split("<text")
            .skip(1)
            .filter_map(|chunk| chunk.split_once('>'))
            .map(|(_, rest)| rest.split('<').next().unwrap_or("").trim().to_string())
            .collect()
    }

    #[test]
    fn test_ma_plot_draws_border_triangles() {
        let mut out = String::new();
        ma_plot(&mut out, &[10.0, 100.0, 1000.0, 0.0], &[3.5, 0.2, -4.0, 0.0], &[true, false, true, false]).unwrap();
        assert_eq!(out.matches("<polygon").count(), 2);
        assert_eq!(out.matches("<circle").count(), 1);
        assert!(out.starts_with("<div class=\"plot\">"));
        assert_eq!(out.matches("<svg").count(), 1);
    }

    #[test]
    fn test_distance_heatmap_cells() {
        let values = array![[1.0, 2.0, 8.0], [1.5, 2.5, 9.0]];
        let distances = sample_distances(&values);
        let tree = hierarchical_clustering(&distances).unwrap();
        let labels = strings(&["a", "b", "c&d"]);
        let mut out = String::new();
        distance_heatmap(&mut out, &distances, &labels, &tree).unwrap();
        // white background plus nine cells
        assert_eq!(out.matches("<rect").count(), 10);
        // two merges, each one polyline per side
        assert_eq!(out.matches("<polyline").count(), 4);
        assert!(out.contains("c&amp;d"));
        assert!(!out.contains("c&d"));
    }

    #[test]
    fn test_scatter_matrix_annotates_lower_panels() {
        let values = array![[1.0, 2.0, 8.0], [2.0, 3.0, 1.0], [3.0, 4.5, 5.0], [4.0, 5.0, 2.0]];
        let labels = strings(&["s1", "s2", "s3"]);
        let abs_cor = array![[1.0, 0.99, 0.3], [0.99, 1.0, 0.25], [0.3, 0.25, 1.0]];
        let mut out = String::new();
        scatter_matrix(&mut out, &values, &labels, &abs_cor).unwrap();
        let labels_drawn = texts(&out);
        assert_eq!(labels_drawn.iter().filter(|t| t.starts_with("|r| = ")).count(), 3);
        assert!(labels_drawn.contains(&"s3".to_string()));
        // three upper panels with four points each
        assert_eq!(out.matches("<circle").count(), 12);
    }

    #[test]
    fn test_pca_plot_legend() {
        let values = array![[1.0, 2.0, 8.0, 9.0], [4.0, 4.5, 1.0, 0.5], [3.0, 3.0, 3.1, 2.9]];
        let result = pca(&values, 500).unwrap();
        let labels = strings(&["s1", "s2", "s3", "s4"]);
        let sex = strings(&["male", "male", "female", "female"]);
        let genotype = strings(&["wt", "ko", "wt", "ko"]);
        let mut out = String::new();
        pca_plot(&mut out, &result, &labels, ("sex", &sex), ("genotype", &genotype)).unwrap();
        let drawn = texts(&out);
        for expected in ["sex", "male", "female", "genotype", "wt", "ko"] {
            assert!(drawn.contains(&expected.to_string()), "{} missing", expected);
        }
        assert!(drawn.iter().any(|t| t.starts_with("PC1: ")));
    }

    #[test]
    fn test_expression_heatmap_labels() {
        let values = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let mut out = String::new();
        expression_heatmap(&mut out, &values, &strings(&["Xist", "Ddx3y", "Actb"]), &strings(&["m1", "f1"])).unwrap();
        let drawn = texts(&out);
        assert!(drawn.contains(&"Ddx3y".to_string()));
        assert!(drawn.contains(&"f1".to_string()));
        // background, six cells and three legend swatches
        assert_eq!(out.matches("<rect").count(), 10);
    }

    #[test]
    fn test_colors() {
        let RGBColor(r, g, b) = sequential_color(0.0);
        assert_eq!((r, g, b), (255, 255, 255));
        let RGBColor(r, g, b) = diverging_color(0.5);
        assert_eq!((r, g, b), (255, 255, 255));
        let RGBColor(r, _, b) = diverging_color(1.0);
        assert!(r > b);
    }
}
