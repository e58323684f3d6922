//! Surrogate variable estimation for hidden batch effects

mod pca;

pub use pca::{center_columns, pca, Pca};

use ndarray::Array2;

use crate::data::ExpressionDataSet;
use crate::error::{PipelineError, Result};
use crate::normalization::{log_normalized, LOG_PSEUDOCOUNT};

/// Produces latent covariates (samples x k) for a dataset
pub trait SurrogateEstimator {
    fn estimate(&self, dataset: &ExpressionDataSet) -> Result<Array2<f64>>;
}

/// Principal components of log expression after removing status group means
#[derive(Debug, Clone, Copy)]
pub struct ResidualPcaEstimator {
    pub n_sv: usize,
}

impl Default for ResidualPcaEstimator {
    fn default() -> Self {
        Self { n_sv: 2 }
    }
}

/// Largest number of surrogate variables the design can absorb
pub fn max_surrogates(n_samples: usize, n_levels: usize) -> usize {
    n_samples.saturating_sub(n_levels + 1)
}

impl SurrogateEstimator for ResidualPcaEstimator {
    fn estimate(&self, dataset: &ExpressionDataSet) -> Result<Array2<f64>> {
        let n_samples = dataset.n_samples();
        let levels = dataset.levels();
        let cap = max_surrogates(n_samples, levels.len());
        let k = self.n_sv.min(cap);
        if k < self.n_sv {
            log::warn!(
                "Requested {} surrogate variables, design allows {} ({} samples, {} levels)",
                self.n_sv,
                cap,
                n_samples,
                levels.len()
            );
        }
        if k == 0 {
            log::info!("No surrogate variables estimated");
            return Ok(Array2::zeros((n_samples, 0)));
        }

        let logged = log_normalized(dataset, LOG_PSEUDOCOUNT)?;
        let counts = dataset.counts().counts();
        let expressed: Vec<usize> = (0..dataset.n_genes())
            .filter(|&i| counts.row(i).iter().any(|&c| c > 0.0))
            .collect();
        if expressed.is_empty() {
            return Err(PipelineError::SurrogateFailed {
                reason: "no expressed genes".to_string(),
            });
        }

        let groups: Vec<Vec<usize>> = levels
            .iter()
            .map(|level| dataset.metadata().samples_with_level(dataset.status_column(), level))
            .collect();

        // samples x genes residuals from the group means
        let mut residuals = Array2::zeros((n_samples, expressed.len()));
        for (c, &gene) in expressed.iter().enumerate() {
            let row = logged.row(gene);
            for group in &groups {
                let mean = group.iter().map(|&s| row[s]).sum::<f64>() / group.len() as f64;
                for &s in group {
                    residuals[[s, c]] = row[s] - mean;
                }
            }
        }

        let result = pca(residuals.view(), k);
        if result.n_components() < k {
            log::warn!(
                "Residuals support only {} of {} surrogate variables",
                result.n_components(),
                k
            );
        }
        for (i, explained) in result.explained.iter().enumerate() {
            log::debug!("sv{} explains {:.1}% of residual variance", i + 1, explained * 100.0);
        }
        Ok(result.vectors)
    }
}

/// Estimate surrogate variables and store them as `sv1..svK` metadata columns
///
/// Returns the number of columns added.
pub fn estimate_surrogates<E: SurrogateEstimator + ?Sized>(dataset: &mut ExpressionDataSet, estimator: &E) -> Result<usize> {
    let surrogates = estimator.estimate(dataset)?;
    let k = surrogates.ncols();
    dataset.metadata_mut().add_surrogate_variables(&surrogates)?;
    log::info!("Added {} surrogate variables to the design", k);
    Ok(k)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use crate::normalization::{estimate_size_factors, SizeFactorMethod};

    /// 8 samples, two statuses, a hidden batch on samples 0, 2, 4, 6
    fn dataset() -> ExpressionDataSet {
        let n_genes = 60;
        let n_samples = 8;
        let mut counts = Array2::zeros((n_genes, n_samples));
        for i in 0..n_genes {
            for j in 0..n_samples {
                let mut value = 50.0 + 10.0 * (i % 7) as f64;
                if j >= 4 && i < 10 {
                    value *= 3.0;
                }
                if j % 2 == 0 && i % 3 == 0 {
                    value *= 4.0;
                }
                value *= [1.0, 1.05, 0.95, 1.02, 0.98, 1.03, 0.97, 1.0][(i + j) % 8];
                counts[[i, j]] = value.round();
            }
        }
        let genes = (0..n_genes).map(|i| format!("g{}", i)).collect();
        let samples: Vec<String> = (0..n_samples).map(|j| format!("s{}", j)).collect();
        let mut meta = SampleMetadata::new(samples.clone());
        meta.add_condition(
            "status",
            (0..n_samples).map(|j| if j < 4 { "wt" } else { "ko" }.to_string()).collect(),
        )
        .unwrap();
        let mut ds = ExpressionDataSet::new(CountMatrix::new(counts, genes, samples).unwrap(), meta, "status").unwrap();
        estimate_size_factors(&mut ds, SizeFactorMethod::Ratio).unwrap();
        ds
    }

    #[test]
    fn test_max_surrogates() {
        assert_eq!(max_surrogates(8, 2), 5);
        assert_eq!(max_surrogates(3, 2), 0);
        assert_eq!(max_surrogates(2, 2), 0);
    }

    #[test]
    fn test_residual_pca_finds_hidden_batch() {
        let ds = dataset();
        let sv = ResidualPcaEstimator { n_sv: 1 }.estimate(&ds).unwrap();
        assert_eq!(sv.dim(), (8, 1));

        let col = sv.column(0);
        assert!((col.dot(&col) - 1.0).abs() < 1e-9);
        // batch samples share a sign
        let batch_sign = col[0].signum();
        for j in 0..8 {
            let expected = if j % 2 == 0 { batch_sign } else { -batch_sign };
            assert_eq!(col[j].signum(), expected, "sample {}", j);
        }
    }

    #[test]
    fn test_estimate_surrogates_updates_metadata() {
        let mut ds = dataset();
        let k = estimate_surrogates(&mut ds, &ResidualPcaEstimator::default()).unwrap();
        assert_eq!(k, 2);
        assert_eq!(ds.metadata().surrogate_names(), &["sv1".to_string(), "sv2".to_string()]);
        assert_eq!(ds.design_covariates(), vec!["sv1".to_string(), "sv2".to_string()]);
    }

    #[test]
    fn test_too_few_samples_gives_no_columns() {
        let mut ds = dataset();
        let sub = ds.metadata().subset(&[0, 1, 4]).unwrap();
        let counts = ds.counts().subset_samples(&[0, 1, 4]).unwrap();
        ds = ExpressionDataSet::new(counts, sub, "status").unwrap();
        estimate_size_factors(&mut ds, SizeFactorMethod::Ratio).unwrap();
        let sv = ResidualPcaEstimator { n_sv: 2 }.estimate(&ds).unwrap();
        assert_eq!(sv.ncols(), 0);
    }
}
