//! Gene id to symbol annotation of contrast results

use std::collections::HashMap;
use std::path::Path;

use crate::contrast::{ContrastResult, ContrastRow};
use crate::error::{PipelineError, Result};
use crate::io::open_delimited;
use crate::stats::cmp_nan_last;

/// Drop a trailing `.N` version suffix, e.g. `ENSG00000141510.16` -> `ENSG00000141510`
pub fn strip_version(id: &str) -> &str {
    match id.rsplit_once('.') {
        Some((base, version)) if !base.is_empty() && !version.is_empty() && version.bytes().all(|b| b.is_ascii_digit()) => {
            base
        }
        _ => id,
    }
}

/// Mapping from (unversioned) gene id to symbol
#[derive(Debug, Clone, Default)]
pub struct GeneAnnotation {
    symbols: HashMap<String, String>,
}

impl GeneAnnotation {
    /// Build from (gene id, symbol) pairs; empty symbols are skipped, first mapping wins
    pub fn from_pairs<I, S, T>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (S, T)>,
        S: AsRef<str>,
        T: AsRef<str>,
    {
        let mut symbols = HashMap::new();
        for (id, symbol) in pairs {
            let symbol = symbol.as_ref().trim();
            if symbol.is_empty() || symbol == "NA" {
                continue;
            }
            let id = strip_version(id.as_ref().trim()).to_string();
            symbols.entry(id).or_insert_with(|| symbol.to_string());
        }
        Self { symbols }
    }

    /// Read a CSV/TSV annotation table with the given id and symbol columns
    pub fn from_path<P: AsRef<Path>>(path: P, id_column: &str, symbol_column: &str) -> Result<Self> {
        let mut reader = open_delimited(&path, true)?;
        let header = reader.headers()?.clone();
        let find = |name: &str| {
            header
                .iter()
                .position(|h| h == name)
                .ok_or_else(|| PipelineError::InvalidAnnotation {
                    reason: format!(
                        "column '{}' not found in {} (columns: {})",
                        name,
                        path.as_ref().display(),
                        header.iter().collect::<Vec<_>>().join(", ")
                    ),
                })
        };
        let id_idx = find(id_column)?;
        let symbol_idx = find(symbol_column)?;

        let mut pairs = Vec::new();
        for record in reader.records() {
            let record = record?;
            if let (Some(id), Some(symbol)) = (record.get(id_idx), record.get(symbol_idx)) {
                pairs.push((id.to_string(), symbol.to_string()));
            }
        }
        let annotation = Self::from_pairs(pairs);
        if annotation.is_empty() {
            return Err(PipelineError::InvalidAnnotation {
                reason: format!("no gene symbols found in {}", path.as_ref().display()),
            });
        }
        log::info!("Loaded {} gene symbols", annotation.len());
        Ok(annotation)
    }

    pub fn len(&self) -> usize {
        self.symbols.len()
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    pub fn symbol(&self, gene_id: &str) -> Option<&str> {
        self.symbols.get(strip_version(gene_id)).map(|s| s.as_str())
    }

    /// Attach symbols to a contrast result
    ///
    /// Unmapped genes are dropped. When several ids map to the same symbol the
    /// row with the smallest adjusted p-value is kept.
    pub fn annotate(&self, result: &ContrastResult) -> ContrastResult {
        let mut best: HashMap<String, ContrastRow> = HashMap::new();
        let mut order: Vec<String> = Vec::new();
        let mut n_unmapped = 0;

        for row in &result.rows {
            let Some(symbol) = self.symbol(&row.gene_id) else {
                log::debug!("No symbol for {}, dropped", row.gene_id);
                n_unmapped += 1;
                continue;
            };
            let mut annotated = row.clone();
            annotated.symbol = Some(symbol.to_string());

            match best.get_mut(symbol) {
                Some(existing) => {
                    let better = cmp_nan_last(annotated.padj, existing.padj)
                        .then_with(|| cmp_nan_last(annotated.pvalue, existing.pvalue))
                        .is_lt();
                    log::debug!("{} and {} share symbol {}", existing.gene_id, row.gene_id, symbol);
                    if better {
                        *existing = annotated;
                    }
                }
                None => {
                    order.push(symbol.to_string());
                    best.insert(symbol.to_string(), annotated);
                }
            }
        }

        let rows: Vec<ContrastRow> = order.iter().filter_map(|s| best.remove(s)).collect();
        log::debug!(
            "Annotated {}: {} rows kept, {} unmapped",
            result.label(),
            rows.len(),
            n_unmapped
        );
        result.with_rows(rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn row(id: &str, padj: f64) -> ContrastRow {
        ContrastRow {
            gene_id: id.to_string(),
            symbol: None,
            base_mean: 50.0,
            log2_fold_change: 1.2,
            lfc_se: 0.3,
            stat: 4.0,
            pvalue: padj / 10.0,
            padj,
        }
    }

    #[test]
    fn test_strip_version() {
        assert_eq!(strip_version("ENSG00000141510.16"), "ENSG00000141510");
        assert_eq!(strip_version("ENSG00000141510"), "ENSG00000141510");
        assert_eq!(strip_version("NKX2.x"), "NKX2.x");
        assert_eq!(strip_version(".5"), ".5");
    }

    #[test]
    fn test_annotate_drops_unmapped_and_keeps_best_duplicate() {
        let annotation = GeneAnnotation::from_pairs(vec![
            ("ENSG1", "TP53"),
            ("ENSG2", "MYC"),
            ("ENSG3", "MYC"),
            ("ENSG4", ""),
        ]);
        let result = ContrastResult {
            status_column: "status".to_string(),
            numerator: "ko".to_string(),
            denominator: "wt".to_string(),
            rows: vec![
                row("ENSG1.4", 0.01),
                row("ENSG2", f64::NAN),
                row("ENSG3", 0.2),
                row("ENSG4", 0.001),
                row("ENSG5", 0.001),
            ],
        };

        let annotated = annotation.annotate(&result);
        assert_eq!(annotated.len(), 2);
        assert_eq!(annotated.rows[0].symbol.as_deref(), Some("TP53"));
        assert_eq!(annotated.rows[0].gene_id, "ENSG1.4");
        assert_eq!(annotated.rows[1].gene_id, "ENSG3");
        assert_eq!(annotated.label(), "ko_vs_wt");
    }

    #[test]
    fn test_from_path_custom_columns() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "ensembl\tname\tbiotype").unwrap();
        writeln!(file, "ENSG1.2\tTP53\tprotein_coding").unwrap();
        writeln!(file, "ENSG2\t\tlncRNA").unwrap();

        let annotation = GeneAnnotation::from_path(file.path(), "ensembl", "name").unwrap();
        assert_eq!(annotation.len(), 1);
        assert_eq!(annotation.symbol("ENSG1"), Some("TP53"));
        assert!(GeneAnnotation::from_path(file.path(), "gene_id", "name").is_err());
    }
}
