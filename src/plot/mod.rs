//! SVG figures: volcano plots, sample PCA and enrichment bar charts

use std::path::Path;

use ndarray::{Array2, Axis};
use plotters::prelude::*;
use plotters::style::full_palette;

use crate::contrast::{ContrastResult, DegThresholds, Regulation};
use crate::data::ExpressionDataSet;
use crate::enrichment::EnrichmentResult;
use crate::error::{PipelineError, Result};
use crate::normalization::{log_normalized, LOG_PSEUDOCOUNT};
use crate::stats::{cmp_nan_last, mean, variance};
use crate::surrogate::{center_columns, pca};

/// Smallest padj drawn; anything below is plotted at -log10 of this
const MIN_PADJ: f64 = 1e-300;

/// Genes labelled on a volcano plot
const VOLCANO_LABELS: usize = 10;

const GROUP_COLORS: [RGBColor; 8] = [
    full_palette::BLUE_600,
    full_palette::ORANGE_600,
    full_palette::GREEN_600,
    full_palette::PURPLE_500,
    full_palette::TEAL_600,
    full_palette::BROWN_500,
    full_palette::RED_400,
    full_palette::GREY_700,
];

fn plot_err<E: std::fmt::Display>(e: E) -> PipelineError {
    PipelineError::PlotFailed { reason: e.to_string() }
}

/// (min, max) of `values` padded by `pct` of the range, or ±1 around a constant
fn padded_range(values: impl Iterator<Item = f64>, pct: f64) -> (f64, f64) {
    let (lo, hi) = values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() {
        return (-1.0, 1.0);
    }
    if (hi - lo).abs() < 1e-9 {
        return (lo - 1.0, hi + 1.0);
    }
    let pad = (hi - lo) * pct;
    (lo - pad, hi + pad)
}

fn regulation_color(regulation: Regulation) -> RGBColor {
    match regulation {
        Regulation::Up => full_palette::RED_600,
        Regulation::Down => full_palette::BLUE_600,
        Regulation::Unchanged => full_palette::GREY_400,
    }
}

/// log2 fold change against -log10 padj, coloured by regulation
pub fn volcano_plot<P: AsRef<Path>>(path: P, result: &ContrastResult, thresholds: &DegThresholds) -> Result<()> {
    let points: Vec<(f64, f64, Regulation)> = result
        .rows
        .iter()
        .filter(|r| r.log2_fold_change.is_finite() && r.padj.is_finite())
        .map(|r| {
            (
                r.log2_fold_change,
                -r.padj.max(MIN_PADJ).log10(),
                thresholds.classify(r),
            )
        })
        .collect();
    if points.is_empty() {
        return Err(PipelineError::PlotFailed {
            reason: format!("{} has no genes with adjusted p-values", result.label()),
        });
    }

    let max_abs_lfc = points
        .iter()
        .map(|p| p.0.abs())
        .fold(thresholds.lfc_cutoff, f64::max)
        .max(1.0)
        * 1.1;
    let max_y = points.iter().map(|p| p.1).fold(-thresholds.alpha.log10(), f64::max) * 1.1;

    let root = SVGBackend::new(path.as_ref(), (900, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;

    let mut chart = ChartBuilder::on(&root)
        .caption(format!("{} vs {}", result.numerator, result.denominator), ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(-max_abs_lfc..max_abs_lfc, 0.0..max_y.max(1.0))
        .map_err(plot_err)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("log2 fold change")
        .y_desc("-log10 adjusted p-value")
        .axis_desc_style(("sans-serif", 16))
        .draw()
        .map_err(plot_err)?;

    // unchanged first so DEGs are drawn on top
    for regulation in [Regulation::Unchanged, Regulation::Down, Regulation::Up] {
        let color = regulation_color(regulation);
        chart
            .draw_series(
                points
                    .iter()
                    .filter(|p| p.2 == regulation)
                    .map(|p| Circle::new((p.0, p.1), 2, color.filled())),
            )
            .map_err(plot_err)?;
    }

    let guide = full_palette::GREY_700.stroke_width(1);
    let y_top = max_y.max(1.0);
    for x in [-thresholds.lfc_cutoff, thresholds.lfc_cutoff] {
        chart
            .draw_series(LineSeries::new(vec![(x, 0.0), (x, y_top)], guide))
            .map_err(plot_err)?;
    }
    let y_alpha = -thresholds.alpha.log10();
    chart
        .draw_series(LineSeries::new(vec![(-max_abs_lfc, y_alpha), (max_abs_lfc, y_alpha)], guide))
        .map_err(plot_err)?;

    let mut labelled = result.degs(thresholds);
    labelled.sort_by(|a, b| cmp_nan_last(a.padj, b.padj));
    for row in labelled.into_iter().take(VOLCANO_LABELS) {
        chart
            .draw_series(std::iter::once(Text::new(
                row.label().to_string(),
                (row.log2_fold_change, -row.padj.max(MIN_PADJ).log10()),
                ("sans-serif", 11).into_font().color(&BLACK),
            )))
            .map_err(plot_err)?;
    }

    root.present().map_err(plot_err)?;
    log::debug!("Wrote volcano plot {}", path.as_ref().display());
    Ok(())
}

/// PCA of log-normalized expression over the `n_top` most variable genes,
/// samples coloured by status
pub fn pca_plot<P: AsRef<Path>>(path: P, dataset: &ExpressionDataSet, n_top: usize) -> Result<()> {
    let logged = log_normalized(dataset, LOG_PSEUDOCOUNT)?;
    let mut by_variance: Vec<(usize, f64)> = logged
        .axis_iter(Axis(0))
        .enumerate()
        .map(|(i, row)| {
            let values = row.to_vec();
            (i, variance(&values, mean(&values)))
        })
        .filter(|(_, v)| v.is_finite() && *v > 0.0)
        .collect();
    if by_variance.is_empty() {
        return Err(PipelineError::PlotFailed {
            reason: "no variable genes for PCA".to_string(),
        });
    }
    by_variance.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    by_variance.truncate(n_top.max(2));

    let n_samples = dataset.n_samples();
    let mut data = Array2::zeros((n_samples, by_variance.len()));
    for (c, &(gene, _)) in by_variance.iter().enumerate() {
        data.column_mut(c).assign(&logged.row(gene));
    }
    let centered = center_columns(data.view());
    let components = pca(centered.view(), 2);
    let scores = components.scores();
    let coord = |s: usize, k: usize| if k < scores.ncols() { scores[[s, k]] } else { 0.0 };
    let percent = |k: usize| components.explained.get(k).copied().unwrap_or(0.0) * 100.0;

    let (x_lo, x_hi) = padded_range((0..n_samples).map(|s| coord(s, 0)), 0.1);
    let (y_lo, y_hi) = padded_range((0..n_samples).map(|s| coord(s, 1)), 0.1);

    let root = SVGBackend::new(path.as_ref(), (800, 700)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Sample PCA", ("sans-serif", 24))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(60)
        .build_cartesian_2d(x_lo..x_hi, y_lo..y_hi)
        .map_err(plot_err)?;
    chart
        .configure_mesh()
        .x_desc(format!("PC1 ({:.1}%)", percent(0)))
        .y_desc(format!("PC2 ({:.1}%)", percent(1)))
        .axis_desc_style(("sans-serif", 16))
        .draw()
        .map_err(plot_err)?;

    let status = dataset.status_column();
    for (g, level) in dataset.levels().iter().enumerate() {
        let color = GROUP_COLORS[g % GROUP_COLORS.len()];
        let samples = dataset.metadata().samples_with_level(status, level);
        chart
            .draw_series(samples.iter().map(|&s| Circle::new((coord(s, 0), coord(s, 1)), 6, color.filled())))
            .map_err(plot_err)?
            .label(level.clone())
            .legend(move |(x, y)| Circle::new((x, y), 5, color.filled()));
    }
    for (s, id) in dataset.counts().sample_ids().iter().enumerate() {
        chart
            .draw_series(std::iter::once(Text::new(
                id.clone(),
                (coord(s, 0), coord(s, 1)),
                ("sans-serif", 11).into_font().color(&BLACK),
            )))
            .map_err(plot_err)?;
    }
    chart
        .configure_series_labels()
        .background_style(&WHITE.mix(0.8))
        .border_style(&BLACK)
        .draw()
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    log::debug!("Wrote PCA plot {}", path.as_ref().display());
    Ok(())
}

/// Horizontal bars of -log10 padj for the top `n` terms
///
/// GSEA terms are coloured by the sign of their NES.
pub fn enrichment_bar_plot<P: AsRef<Path>>(path: P, result: &EnrichmentResult, n: usize) -> Result<()> {
    let terms: Vec<_> = result.top(n).into_iter().filter(|t| t.padj.is_finite()).collect();
    if terms.is_empty() {
        return Err(PipelineError::PlotFailed {
            reason: format!("{} has no terms to plot", result.label()),
        });
    }

    let heights: Vec<f64> = terms.iter().map(|t| -t.padj.max(MIN_PADJ).log10()).collect();
    let x_max = heights.iter().copied().fold(0.0, f64::max).max(1.0) * 1.1;
    let names: Vec<String> = terms.iter().map(|t| t.term.clone()).collect();
    let n_bars = terms.len();

    let height = 120 + 28 * n_bars as u32;
    let root = SVGBackend::new(path.as_ref(), (1000, height)).into_drawing_area();
    root.fill(&WHITE).map_err(plot_err)?;
    let mut chart = ChartBuilder::on(&root)
        .caption(result.label(), ("sans-serif", 22))
        .margin(20)
        .x_label_area_size(50)
        .y_label_area_size(380)
        .build_cartesian_2d(0.0..x_max, -0.5..n_bars as f64 - 0.5)
        .map_err(plot_err)?;

    // top term at the top
    let label_for = move |v: &f64| {
        let idx = v.round();
        if idx < 0.0 || (v - idx).abs() > 1e-6 {
            return String::new();
        }
        names.get(n_bars.saturating_sub(1 + idx as usize)).cloned().unwrap_or_default()
    };
    chart
        .configure_mesh()
        .disable_mesh()
        .y_labels(n_bars)
        .y_label_formatter(&label_for)
        .x_desc("-log10 adjusted p-value")
        .axis_desc_style(("sans-serif", 16))
        .draw()
        .map_err(plot_err)?;

    chart
        .draw_series(terms.iter().zip(&heights).enumerate().map(|(i, (term, &h))| {
            let y = (n_bars - 1 - i) as f64;
            let color = if term.nes.is_nan() || term.nes >= 0.0 {
                full_palette::RED_400
            } else {
                full_palette::BLUE_400
            };
            Rectangle::new([(0.0, y - 0.35), (h, y + 0.35)], color.filled())
        }))
        .map_err(plot_err)?;

    root.present().map_err(plot_err)?;
    log::debug!("Wrote enrichment plot {}", path.as_ref().display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contrast::ContrastRow;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::enrichment::EnrichmentTerm;
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};
    use tempfile::tempdir;

    fn contrast() -> ContrastResult {
        let rows = (0..30)
            .map(|i| {
                let lfc = (i as f64 - 15.0) / 4.0;
                let padj = if lfc.abs() > 2.0 { 1e-4 } else { 0.5 };
                ContrastRow {
                    gene_id: format!("g{}", i),
                    symbol: None,
                    base_mean: 100.0,
                    log2_fold_change: lfc,
                    lfc_se: 0.3,
                    stat: lfc / 0.3,
                    pvalue: padj / 10.0,
                    padj,
                }
            })
            .collect();
        ContrastResult {
            status_column: "status".to_string(),
            numerator: "ko".to_string(),
            denominator: "wt".to_string(),
            rows,
        }
    }

    #[test]
    fn test_padded_range() {
        assert_eq!(padded_range([1.0, 3.0].into_iter(), 0.5), (0.0, 4.0));
        assert_eq!(padded_range([2.0].into_iter(), 0.1), (1.0, 3.0));
        assert_eq!(padded_range(std::iter::empty(), 0.1), (-1.0, 1.0));
    }

    #[test]
    fn test_volcano_plot_writes_svg() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("volcano.svg");
        volcano_plot(&path, &contrast(), &DegThresholds::default()).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("<svg"));
        assert!(svg.contains("g0"));
    }

    #[test]
    fn test_volcano_plot_without_padj_fails() {
        let dir = tempdir().unwrap();
        let mut result = contrast();
        for row in &mut result.rows {
            row.padj = f64::NAN;
        }
        assert!(volcano_plot(dir.path().join("v.svg"), &result, &DegThresholds::default()).is_err());
    }

    #[test]
    fn test_pca_plot_writes_svg() {
        let counts = CountMatrix::new(
            ndarray::array![
                [10.0, 12.0, 11.0, 40.0, 42.0, 39.0],
                [100.0, 90.0, 95.0, 20.0, 25.0, 22.0],
                [50.0, 55.0, 52.0, 51.0, 49.0, 50.0],
                [5.0, 7.0, 6.0, 6.0, 5.0, 8.0],
            ],
            (1..=4).map(|i| format!("g{}", i)).collect(),
            (1..=6).map(|i| format!("s{}", i)).collect(),
        )
        .unwrap();
        let mut meta = SampleMetadata::new((1..=6).map(|i| format!("s{}", i)).collect());
        meta.add_condition(
            "status",
            ["wt", "wt", "wt", "ko", "ko", "ko"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        let mut ds = ExpressionDataSet::new(counts, meta, "status").unwrap();
        estimate_size_factors(&mut ds, SizeFactorMethod::Ratio).unwrap();

        let dir = tempdir().unwrap();
        let path = dir.path().join("pca.svg");
        pca_plot(&path, &ds, 500).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("PC1"));
        assert!(svg.contains("s4"));
    }

    #[test]
    fn test_enrichment_bar_plot() {
        let term = |name: &str, padj: f64, nes: f64| EnrichmentTerm {
            term: name.to_string(),
            description: String::new(),
            set_size: 20,
            hits: 5,
            gene_ratio: f64::NAN,
            bg_ratio: f64::NAN,
            enrichment_score: nes / 2.0,
            nes,
            pvalue: padj / 2.0,
            padj,
            genes: vec!["A".to_string()],
        };
        let result = EnrichmentResult {
            method: "gsea".to_string(),
            contrast: "ko_vs_wt".to_string(),
            gene_list: "ranked".to_string(),
            terms: vec![term("UP_PATHWAY", 0.001, 2.1), term("DOWN_PATHWAY", 0.01, -1.8), term("NA", f64::NAN, f64::NAN)],
        };
        let dir = tempdir().unwrap();
        let path = dir.path().join("bars.svg");
        enrichment_bar_plot(&path, &result, 10).unwrap();
        let svg = std::fs::read_to_string(&path).unwrap();
        assert!(svg.contains("UP_PATHWAY"));

        let empty = EnrichmentResult { terms: Vec::new(), ..result };
        assert!(enrichment_bar_plot(dir.path().join("empty.svg"), &empty, 10).is_err());
    }
}
