//! Contrast extraction and DEG classification

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::data::ExpressionDataSet;
use crate::error::{PipelineError, Result};
use crate::io::nullable_f64;
use crate::stats::cmp_nan_last;
use crate::testing::wald_test;

/// One gene of a contrast result table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastRow {
    pub gene_id: String,
    #[serde(default)]
    pub symbol: Option<String>,
    #[serde(rename = "baseMean", deserialize_with = "nullable_f64")]
    pub base_mean: f64,
    #[serde(rename = "log2FoldChange", deserialize_with = "nullable_f64")]
    pub log2_fold_change: f64,
    #[serde(rename = "lfcSE", deserialize_with = "nullable_f64")]
    pub lfc_se: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub stat: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub pvalue: f64,
    #[serde(deserialize_with = "nullable_f64")]
    pub padj: f64,
}

impl ContrastRow {
    /// Symbol when annotated, otherwise the gene id
    pub fn label(&self) -> &str {
        self.symbol.as_deref().unwrap_or(&self.gene_id)
    }
}

/// Direction of a gene under a set of thresholds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Regulation {
    Up,
    Down,
    Unchanged,
}

impl fmt::Display for Regulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Regulation::Up => write!(f, "up"),
            Regulation::Down => write!(f, "down"),
            Regulation::Unchanged => write!(f, "unchanged"),
        }
    }
}

/// Significance and effect-size cutoffs
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DegThresholds {
    /// Adjusted p-value must be strictly below this
    pub alpha: f64,
    /// |log2FC| must be at least this
    pub lfc_cutoff: f64,
}

impl Default for DegThresholds {
    fn default() -> Self {
        Self {
            alpha: 0.05,
            lfc_cutoff: 1.0,
        }
    }
}

impl DegThresholds {
    pub fn new(alpha: f64, lfc_cutoff: f64) -> Result<Self> {
        if !(alpha > 0.0 && alpha < 1.0) {
            return Err(PipelineError::InvalidInput {
                reason: format!("alpha must be in (0, 1), got {}", alpha),
            });
        }
        if !(lfc_cutoff >= 0.0) {
            return Err(PipelineError::InvalidInput {
                reason: format!("log2 fold change cutoff must be non-negative, got {}", lfc_cutoff),
            });
        }
        Ok(Self { alpha, lfc_cutoff })
    }

    pub fn is_deg(&self, row: &ContrastRow) -> bool {
        row.padj < self.alpha && row.log2_fold_change.abs() >= self.lfc_cutoff
    }

    /// NaN padj or NaN log2FC is always `Unchanged`
    pub fn classify(&self, row: &ContrastRow) -> Regulation {
        if !self.is_deg(row) {
            Regulation::Unchanged
        } else if row.log2_fold_change > 0.0 {
            Regulation::Up
        } else if row.log2_fold_change < 0.0 {
            Regulation::Down
        } else {
            // lfc_cutoff == 0 and an exact zero fold change
            Regulation::Unchanged
        }
    }
}

/// Counts of a classified contrast
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContrastSummary {
    pub contrast: String,
    pub total_genes: usize,
    pub genes_tested: usize,
    pub up: usize,
    pub down: usize,
    pub alpha: f64,
    pub lfc_cutoff: f64,
}

impl fmt::Display for ContrastSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Contrast {}", self.contrast)?;
        writeln!(f, "  Total genes: {}", self.total_genes)?;
        writeln!(f, "  Genes tested: {}", self.genes_tested)?;
        writeln!(
            f,
            "  DEGs (padj < {}, |log2FC| >= {}): {}",
            self.alpha,
            self.lfc_cutoff,
            self.up + self.down
        )?;
        writeln!(f, "    Up-regulated: {}", self.up)?;
        write!(f, "    Down-regulated: {}", self.down)
    }
}

/// Per-gene statistics of one pairwise comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContrastResult {
    pub status_column: String,
    pub numerator: String,
    pub denominator: String,
    pub rows: Vec<ContrastRow>,
}

impl ContrastResult {
    /// `numerator_vs_denominator`, used for file names
    ///
    /// Tables read from a file without `_vs_` in its name keep the bare stem.
    pub fn label(&self) -> String {
        if self.denominator.is_empty() {
            self.numerator.clone()
        } else {
            format!("{}_vs_{}", self.numerator, self.denominator)
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Same contrast with a different set of rows
    pub fn with_rows(&self, rows: Vec<ContrastRow>) -> Self {
        Self {
            status_column: self.status_column.clone(),
            numerator: self.numerator.clone(),
            denominator: self.denominator.clone(),
            rows,
        }
    }

    /// Rows passing both thresholds, in table order
    pub fn degs(&self, thresholds: &DegThresholds) -> Vec<&ContrastRow> {
        self.rows.iter().filter(|r| thresholds.is_deg(r)).collect()
    }

    pub fn up_genes(&self, thresholds: &DegThresholds) -> Vec<&str> {
        self.genes_with(thresholds, Regulation::Up)
    }

    pub fn down_genes(&self, thresholds: &DegThresholds) -> Vec<&str> {
        self.genes_with(thresholds, Regulation::Down)
    }

    fn genes_with(&self, thresholds: &DegThresholds, regulation: Regulation) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|r| thresholds.classify(r) == regulation)
            .map(|r| r.label())
            .collect()
    }

    /// Labels of genes with a p-value, the background for over-representation tests
    pub fn tested_genes(&self) -> Vec<&str> {
        self.rows
            .iter()
            .filter(|r| r.pvalue.is_finite())
            .map(|r| r.label())
            .collect()
    }

    pub fn summary(&self, thresholds: &DegThresholds) -> ContrastSummary {
        ContrastSummary {
            contrast: self.label(),
            total_genes: self.rows.len(),
            genes_tested: self.rows.iter().filter(|r| r.pvalue.is_finite()).count(),
            up: self.up_genes(thresholds).len(),
            down: self.down_genes(thresholds).len(),
            alpha: thresholds.alpha,
            lfc_cutoff: thresholds.lfc_cutoff,
        }
    }

    /// (label, stat) for genes with a finite statistic, descending, ties by label
    pub fn ranked_by_stat(&self) -> Vec<(String, f64)> {
        let mut ranked: Vec<(String, f64)> = self
            .rows
            .iter()
            .filter(|r| r.stat.is_finite())
            .map(|r| (r.label().to_string(), r.stat))
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        ranked
    }

    /// Rows by ascending padj, NaN last
    pub fn sorted_by_padj(&self) -> Vec<&ContrastRow> {
        let mut rows: Vec<&ContrastRow> = self.rows.iter().collect();
        rows.sort_by(|a, b| cmp_nan_last(a.padj, b.padj).then_with(|| cmp_nan_last(a.pvalue, b.pvalue)));
        rows
    }
}

/// Wald test of `numerator` vs `denominator` on a fitted dataset
pub fn extract_contrast(dataset: &ExpressionDataSet, numerator: &str, denominator: &str) -> Result<ContrastResult> {
    let wald = wald_test(dataset, numerator, denominator)?;
    let base_means = dataset.base_means().ok_or_else(|| PipelineError::InvalidInput {
        reason: "size factors must be estimated before extracting contrasts".to_string(),
    })?;

    let rows = dataset
        .counts()
        .gene_ids()
        .iter()
        .enumerate()
        .map(|(i, id)| ContrastRow {
            gene_id: id.clone(),
            symbol: None,
            base_mean: base_means[i],
            log2_fold_change: wald.log2_fold_changes[i],
            lfc_se: wald.lfc_se[i],
            stat: wald.stats[i],
            pvalue: wald.pvalues[i],
            padj: wald.padj[i],
        })
        .collect();

    let result = ContrastResult {
        status_column: dataset.status_column().to_string(),
        numerator: numerator.to_string(),
        denominator: denominator.to_string(),
        rows,
    };
    log::info!(
        "Extracted {} ({} genes tested)",
        result.label(),
        result.tested_genes().len()
    );
    Ok(result)
}
