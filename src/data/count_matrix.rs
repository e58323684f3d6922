//! Count matrix representation for RNA-seq data

use std::collections::HashMap;

use ndarray::{Array2, ArrayView1, ArrayView2, Axis};

use crate::error::{PipelineError, Result};

/// Rename repeated gene ids to `id_1`, `id_2`, ... keeping the first occurrence as is
fn deduplicate_names(names: Vec<String>) -> Vec<String> {
    let mut totals: HashMap<&str, usize> = HashMap::new();
    for name in &names {
        *totals.entry(name.as_str()).or_insert(0) += 1;
    }
    if totals.values().all(|&c| c == 1) {
        return names;
    }

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut result = Vec::with_capacity(names.len());
    for name in names {
        let count = seen.entry(name.clone()).or_insert(0);
        *count += 1;
        if *count == 1 {
            result.push(name);
        } else {
            let renamed = format!("{}_{}", name, *count - 1);
            log::warn!("Duplicate gene id '{}' renamed to '{}'", name, renamed);
            result.push(renamed);
        }
    }
    result
}

/// Read counts for genes (rows) across samples (columns)
#[derive(Debug, Clone)]
pub struct CountMatrix {
    counts: Array2<f64>,
    gene_ids: Vec<String>,
    sample_ids: Vec<String>,
}

impl CountMatrix {
    /// Create a new count matrix from raw data
    pub fn new(counts: Array2<f64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        let (n_genes, n_samples) = counts.dim();

        if gene_ids.len() != n_genes {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} gene IDs", n_genes),
                got: format!("{} gene IDs", gene_ids.len()),
            });
        }

        if sample_ids.len() != n_samples {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} sample IDs", n_samples),
                got: format!("{} sample IDs", sample_ids.len()),
            });
        }

        if counts.iter().any(|&x| x < 0.0 || !x.is_finite()) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: "Counts must be non-negative finite values".to_string(),
            });
        }

        if !counts.is_empty() && counts.iter().all(|&x| x == 0.0) {
            return Err(PipelineError::InvalidCountMatrix {
                reason: "All samples have 0 counts for all genes".to_string(),
            });
        }

        if counts.iter().any(|&x| x != x.round()) {
            log::warn!(
                "Some count values are not integers; the negative binomial model \
                 expects integer counts"
            );
        }

        let gene_ids = deduplicate_names(gene_ids);

        Ok(Self {
            counts,
            gene_ids,
            sample_ids,
        })
    }

    /// Create from integer counts
    pub fn from_integers(counts: Array2<u64>, gene_ids: Vec<String>, sample_ids: Vec<String>) -> Result<Self> {
        Self::new(counts.mapv(|x| x as f64), gene_ids, sample_ids)
    }

    pub fn n_genes(&self) -> usize {
        self.counts.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.counts.ncols()
    }

    pub fn counts(&self) -> ArrayView2<'_, f64> {
        self.counts.view()
    }

    pub fn gene_ids(&self) -> &[String] {
        &self.gene_ids
    }

    pub fn sample_ids(&self) -> &[String] {
        &self.sample_ids
    }

    /// Counts for one gene across all samples
    pub fn gene_counts(&self, gene_idx: usize) -> ArrayView1<'_, f64> {
        self.counts.row(gene_idx)
    }

    pub fn sample_index(&self, sample_id: &str) -> Option<usize> {
        self.sample_ids.iter().position(|id| id == sample_id)
    }

    /// Total counts per sample
    pub fn library_sizes(&self) -> Vec<f64> {
        self.counts.axis_iter(Axis(1)).map(|col| col.sum()).collect()
    }

    /// Keep genes with at least `min_count` reads in at least `min_samples` samples
    pub fn filter_low_counts(&self, min_count: f64, min_samples: usize) -> Result<Self> {
        let keep: Vec<usize> = (0..self.n_genes())
            .filter(|&i| {
                self.counts.row(i).iter().filter(|&&x| x >= min_count).count() >= min_samples
            })
            .collect();

        if keep.is_empty() {
            return Err(PipelineError::EmptyData {
                reason: "No genes passed the low-count filter".to_string(),
            });
        }

        log::info!(
            "Low-count filter kept {} of {} genes (>= {} reads in >= {} samples)",
            keep.len(),
            self.n_genes(),
            min_count,
            min_samples
        );

        self.subset_genes(&keep)
    }

    pub fn subset_samples(&self, sample_indices: &[usize]) -> Result<Self> {
        let counts = self.counts.select(Axis(1), sample_indices);
        let sample_ids = sample_indices.iter().map(|&i| self.sample_ids[i].clone()).collect();
        Self::new(counts, self.gene_ids.clone(), sample_ids)
    }

    pub fn subset_genes(&self, gene_indices: &[usize]) -> Result<Self> {
        let counts = self.counts.select(Axis(0), gene_indices);
        let gene_ids = gene_indices.iter().map(|&i| self.gene_ids[i].clone()).collect();
        Self::new(counts, gene_ids, self.sample_ids.clone())
    }

    /// Reorder columns to follow `order`, which must name every sample exactly once
    pub fn reorder_samples(&self, order: &[String]) -> Result<Self> {
        if order.len() != self.n_samples() {
            return Err(PipelineError::DimensionMismatch {
                expected: format!("{} sample IDs", self.n_samples()),
                got: format!("{} sample IDs", order.len()),
            });
        }
        let indices = order
            .iter()
            .map(|id| {
                self.sample_index(id).ok_or_else(|| PipelineError::InvalidCountMatrix {
                    reason: format!("sample '{}' not present in count matrix", id),
                })
            })
            .collect::<Result<Vec<usize>>>()?;
        self.subset_samples(&indices)
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
        let matrix = CountMatrix::new(array![[10.0, 20.0, 30.0], [5.0, 15.0, 25.0]], ids("gene", 2), ids("s", 3)).unwrap();
        assert_eq!(matrix.n_genes(), 2);
        assert_eq!(matrix.n_samples(), 3);
    }

    #[test]
    fn test_negative_counts_rejected() {
        let result = CountMatrix::new(array![[10.0, -5.0], [5.0, 15.0]], ids("gene", 2), ids("s", 2));
        assert!(result.is_err());
    }

    #[test]
    fn test_all_zero_rejected() {
        let result = CountMatrix::new(array![[0.0, 0.0], [0.0, 0.0]], ids("gene", 2), ids("s", 2));
        assert!(matches!(result, Err(PipelineError::InvalidCountMatrix { .. })));
    }

    #[test]
    fn test_duplicate_gene_ids_renamed() {
        let matrix = CountMatrix::new(
            array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]],
            vec!["a".to_string(), "a".to_string(), "b".to_string()],
            ids("s", 2),
        )
        .unwrap();
        assert_eq!(matrix.gene_ids(), &["a", "a_1", "b"]);
    }

    #[test]
    fn test_library_sizes() {
        let matrix = CountMatrix::new(array![[10.0, 20.0], [5.0, 15.0]], ids("gene", 2), ids("s", 2)).unwrap();
        assert_eq!(matrix.library_sizes(), vec![15.0, 35.0]);
    }

    #[test]
    fn test_filter_low_counts() {
        let matrix = CountMatrix::new(
            array![[10.0, 20.0, 30.0], [0.0, 1.0, 0.0], [0.0, 12.0, 15.0]],
            ids("gene", 3),
            ids("s", 3),
        )
        .unwrap();
        let filtered = matrix.filter_low_counts(10.0, 2).unwrap();
        assert_eq!(filtered.gene_ids(), &["gene1", "gene3"]);
    }

    #[test]
    fn test_reorder_samples() {
        let matrix = CountMatrix::new(array![[1.0, 2.0, 3.0]], ids("gene", 1), ids("s", 3)).unwrap();
        let order = vec!["s3".to_string(), "s1".to_string(), "s2".to_string()];
        let reordered = matrix.reorder_samples(&order).unwrap();
        assert_eq!(reordered.sample_ids(), order.as_slice());
        assert_eq!(reordered.gene_counts(0).to_vec(), vec![3.0, 1.0, 2.0]);
    }
}
