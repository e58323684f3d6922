//! Log-scale transformation of normalized counts
//!
//! `log2(count / size_factor + pseudocount)`, used for surrogate variable
//! estimation and sample-level plots where a variance-stabilized scale is
//! good enough.

use ndarray::Array2;

use crate::data::ExpressionDataSet;
use crate::error::{PipelineError, Result};

/// Pseudocount added before taking logs
pub const LOG_PSEUDOCOUNT: f64 = 1.0;

/// log2 of normalized counts (genes x samples)
pub fn log_normalized(dataset: &ExpressionDataSet, pseudocount: f64) -> Result<Array2<f64>> {
    if pseudocount <= 0.0 {
        return Err(PipelineError::InvalidInput {
            reason: format!("pseudocount must be positive, got {}", pseudocount),
        });
    }
    let normalized = dataset.normalized_counts().ok_or_else(|| PipelineError::InvalidInput {
        reason: "Size factors must be estimated before log transformation".to_string(),
    })?;
    Ok(normalized.mapv(|x| (x + pseudocount).log2()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{CountMatrix, SampleMetadata};
    use ndarray::array;

    #[test]
    fn test_log_normalized() {
        let counts = CountMatrix::new(
            array![[1.0, 6.0], [3.0, 14.0]],
            vec!["g1".to_string(), "g2".to_string()],
            vec!["s1".to_string(), "s2".to_string()],
        )
        .unwrap();
        let mut meta = SampleMetadata::new(vec!["s1".to_string(), "s2".to_string()]);
        meta.add_condition("status", vec!["a".to_string(), "b".to_string()]).unwrap();
        let mut ds = ExpressionDataSet::new(counts, meta, "status").unwrap();

        assert!(log_normalized(&ds, LOG_PSEUDOCOUNT).is_err());

        ds.set_size_factors(array![1.0, 2.0]).unwrap();
        let logged = log_normalized(&ds, LOG_PSEUDOCOUNT).unwrap();
        assert!((logged[[0, 0]] - 1.0).abs() < 1e-12);
        assert!((logged[[0, 1]] - 2.0).abs() < 1e-12);
        assert!((logged[[1, 1]] - 3.0).abs() < 1e-12);
    }
}
