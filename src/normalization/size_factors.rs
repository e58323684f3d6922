//! Size factor estimation using the median of ratios method

use ndarray::{Array1, ArrayView2, Axis};

use crate::data::ExpressionDataSet;
use crate::error::{PipelineError, Result};
use crate::stats::median;

/// Method for size factor estimation
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizeFactorMethod {
    /// Standard median of ratios over genes with no zero counts
    Ratio,
    /// Geometric means over positive counts only, for sparse data
    PosCounts,
}

impl std::str::FromStr for SizeFactorMethod {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "ratio" => Ok(SizeFactorMethod::Ratio),
            "poscounts" => Ok(SizeFactorMethod::PosCounts),
            other => Err(PipelineError::InvalidInput {
                reason: format!("unknown size factor method '{}' (expected ratio or poscounts)", other),
            }),
        }
    }
}

/// Estimate size factors and store them (with normalized counts) on the dataset
///
/// Accounts for both sequencing depth and RNA composition.
pub fn estimate_size_factors(dataset: &mut ExpressionDataSet, method: SizeFactorMethod) -> Result<()> {
    let size_factors = size_factors_for(dataset.counts().counts(), method)?;
    log::info!(
        "Size factors ({:?}): {}",
        method,
        size_factors
            .iter()
            .map(|s| format!("{:.3}", s))
            .collect::<Vec<_>>()
            .join(", ")
    );
    dataset.set_size_factors(size_factors)
}

/// Compute size factors for a raw count matrix
pub fn size_factors_for(counts: ArrayView2<f64>, method: SizeFactorMethod) -> Result<Array1<f64>> {
    let (n_genes, n_samples) = counts.dim();
    if n_genes == 0 || n_samples == 0 {
        return Err(PipelineError::EmptyData {
            reason: "Count matrix is empty".to_string(),
        });
    }

    // Log geometric mean per usable gene
    let mut log_geo_means: Vec<(usize, f64)> = Vec::new();
    for (i, row) in counts.axis_iter(Axis(0)).enumerate() {
        match method {
            SizeFactorMethod::Ratio => {
                if row.iter().all(|&x| x > 0.0) {
                    let log_sum: f64 = row.iter().map(|&x| x.ln()).sum();
                    log_geo_means.push((i, log_sum / n_samples as f64));
                }
            }
            SizeFactorMethod::PosCounts => {
                // Divide by the total number of samples, not the number of positive ones
                let log_sum: f64 = row.iter().filter(|&&x| x > 0.0).map(|&x| x.ln()).sum();
                if row.iter().any(|&x| x > 0.0) {
                    log_geo_means.push((i, log_sum / n_samples as f64));
                }
            }
        }
    }

    if log_geo_means.is_empty() {
        return Err(PipelineError::SizeFactorFailed {
            reason: match method {
                SizeFactorMethod::Ratio => {
                    "No genes with all non-zero counts; try the poscounts method".to_string()
                }
                SizeFactorMethod::PosCounts => "No genes with positive counts found".to_string(),
            },
        });
    }

    let mut size_factors = Array1::zeros(n_samples);
    for j in 0..n_samples {
        let log_ratios: Vec<f64> = log_geo_means
            .iter()
            .filter(|&&(i, _)| counts[[i, j]] > 0.0)
            .map(|&(i, lg)| counts[[i, j]].ln() - lg)
            .collect();

        size_factors[j] = if log_ratios.is_empty() {
            match method {
                SizeFactorMethod::Ratio => {
                    return Err(PipelineError::SizeFactorFailed {
                        reason: format!("No valid ratios for sample {}", j),
                    })
                }
                SizeFactorMethod::PosCounts => 1.0,
            }
        } else {
            median(&log_ratios).exp()
        };
    }

    if method == SizeFactorMethod::PosCounts {
        // Re-center so the geometric mean of size factors is 1
        let log_mean = size_factors.iter().map(|&s: &f64| s.ln()).sum::<f64>() / n_samples as f64;
        let center = log_mean.exp();
        size_factors.mapv_inplace(|s| s / center);
    }

    if size_factors.iter().any(|&x| x <= 0.0 || !x.is_finite()) {
        return Err(PipelineError::SizeFactorFailed {
            reason: "Invalid size factors computed".to_string(),
        });
    }

    Ok(size_factors)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use ndarray::array;

    fn test_dataset() -> ExpressionDataSet {
        let counts = CountMatrix::new(
            array![
                [100.0, 200.0, 80.0, 160.0],
                [500.0, 1000.0, 400.0, 800.0],
                [50.0, 100.0, 40.0, 80.0],
                [200.0, 400.0, 160.0, 320.0]
            ],
            vec!["gene1".to_string(), "gene2".to_string(), "gene3".to_string(), "gene4".to_string()],
            vec!["s1".to_string(), "s2".to_string(), "s3".to_string(), "s4".to_string()],
        )
        .unwrap();

        let mut metadata = SampleMetadata::new(vec![
            "s1".to_string(),
            "s2".to_string(),
            "s3".to_string(),
            "s4".to_string(),
        ]);
        metadata
            .add_condition(
                "status",
                vec!["A".to_string(), "A".to_string(), "B".to_string(), "B".to_string()],
            )
            .unwrap();

        ExpressionDataSet::new(counts, metadata, "status").unwrap()
    }

    #[test]
    fn test_size_factor_estimation() {
        let mut ds = test_dataset();
        estimate_size_factors(&mut ds, SizeFactorMethod::Ratio).unwrap();

        let sf = ds.size_factors().unwrap();
        assert_eq!(sf.len(), 4);
        assert!(sf.iter().all(|&x| x > 0.0));

        // s2 has 2x the depth of s1
        let ratio = sf[1] / sf[0];
        assert!((ratio - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_normalized_counts_equalize_depth() {
        let mut ds = test_dataset();
        estimate_size_factors(&mut ds, SizeFactorMethod::Ratio).unwrap();

        let norm = ds.normalized_counts().unwrap();
        let row: Vec<f64> = norm.row(0).to_vec();
        let mean = row.iter().sum::<f64>() / 4.0;
        for val in row {
            assert!((val - mean).abs() / mean < 1e-9);
        }
    }

    #[test]
    fn test_ratio_fails_with_zero_in_every_gene() {
        let counts = array![[0.0, 5.0], [5.0, 0.0]];
        let result = size_factors_for(counts.view(), SizeFactorMethod::Ratio);
        assert!(matches!(result, Err(PipelineError::SizeFactorFailed { .. })));
    }

    #[test]
    fn test_poscounts_handles_zeros() {
        let counts = array![[0.0, 10.0, 20.0], [10.0, 0.0, 40.0], [5.0, 10.0, 0.0]];
        let sf = size_factors_for(counts.view(), SizeFactorMethod::PosCounts).unwrap();
        assert!(sf.iter().all(|&s| s > 0.0 && s.is_finite()));
        let log_mean: f64 = sf.iter().map(|s| s.ln()).sum::<f64>() / 3.0;
        assert!(log_mean.abs() < 1e-12);
    }

    #[test]
    fn test_method_from_str() {
        assert_eq!("ratio".parse::<SizeFactorMethod>().unwrap(), SizeFactorMethod::Ratio);
        assert_eq!("PosCounts".parse::<SizeFactorMethod>().unwrap(), SizeFactorMethod::PosCounts);
        assert!("iterate".parse::<SizeFactorMethod>().is_err());
    }
}
