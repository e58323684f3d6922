//! Design matrix creation for the per-gene GLM

use std::collections::HashMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::linalg::matrix_rank;
use crate::data::{ExpressionDataSet, SampleMetadata};
use crate::error::{PipelineError, Result};

/// Layout of the design matrix columns
///
/// Column order follows the formula `~ covariate1 + ... + status`: intercept,
/// numeric covariates (surrogate variables), then one indicator per
/// non-reference status level.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DesignInfo {
    pub coef_names: Vec<String>,
    pub status_column: String,
    pub reference_level: String,
    /// All status levels, sorted
    pub levels: Vec<String>,
    /// Non-reference status level -> column index
    pub level_columns: HashMap<String, usize>,
    /// Numeric covariate -> column index
    pub covariate_columns: HashMap<String, usize>,
}

impl DesignInfo {
    pub fn n_coefs(&self) -> usize {
        self.coef_names.len()
    }

    /// Textual formula, e.g. `~ sv1 + sv2 + status`
    pub fn formula(&self) -> String {
        let mut covariates: Vec<(&String, &usize)> = self.covariate_columns.iter().collect();
        covariates.sort_by_key(|entry| *entry.1);
        let mut terms: Vec<&str> = covariates.iter().map(|(name, _)| name.as_str()).collect();
        terms.push(&self.status_column);
        format!("~ {}", terms.join(" + "))
    }

    /// Contrast vector for `numerator` vs `denominator` status levels
    ///
    /// Either level may be the reference level, whose indicator is implicit.
    pub fn contrast_vector(&self, numerator: &str, denominator: &str) -> Result<Vec<f64>> {
        if numerator == denominator {
            return Err(PipelineError::InvalidContrast {
                reason: format!("numerator and denominator are both '{}'", numerator),
            });
        }
        for level in [numerator, denominator] {
            if !self.levels.iter().any(|l| l == level) {
                return Err(PipelineError::InvalidContrast {
                    reason: format!(
                        "'{}' is not a level of '{}' (levels: {})",
                        level,
                        self.status_column,
                        self.levels.join(", ")
                    ),
                });
            }
        }

        let mut contrast = vec![0.0; self.n_coefs()];
        if let Some(&idx) = self.level_columns.get(numerator) {
            contrast[idx] += 1.0;
        }
        if let Some(&idx) = self.level_columns.get(denominator) {
            contrast[idx] -= 1.0;
        }
        Ok(contrast)
    }
}

/// Build the design matrix for a dataset from its status column and design covariates
pub fn create_design_matrix(dataset: &ExpressionDataSet) -> Result<(Array2<f64>, DesignInfo)> {
    build_design(
        dataset.metadata(),
        dataset.status_column(),
        &dataset.design_covariates(),
        &dataset.reference_level(),
    )
}

/// Create a treatment-coded design matrix `~ covariates + status`
pub fn build_design(
    metadata: &SampleMetadata,
    status_column: &str,
    covariates: &[String],
    reference_level: &str,
) -> Result<(Array2<f64>, DesignInfo)> {
    let status = metadata.condition(status_column).ok_or_else(|| PipelineError::InvalidDesignMatrix {
        reason: format!("Variable '{}' not found in metadata", status_column),
    })?;
    let levels = metadata.levels(status_column).unwrap_or_default();

    if levels.len() < 2 {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: format!("'{}' must have at least 2 levels", status_column),
        });
    }
    if !levels.iter().any(|l| l == reference_level) {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: format!("Reference level '{}' not found in '{}'", reference_level, status_column),
        });
    }

    let n_samples = metadata.n_samples();
    let n_coefs = 1 + covariates.len() + levels.len() - 1;
    let mut design = Array2::zeros((n_samples, n_coefs));
    let mut coef_names = vec!["Intercept".to_string()];
    let mut covariate_columns = HashMap::new();
    let mut level_columns = HashMap::new();

    for i in 0..n_samples {
        design[[i, 0]] = 1.0;
    }

    for (k, name) in covariates.iter().enumerate() {
        let values = metadata.covariate(name).ok_or_else(|| PipelineError::InvalidDesignMatrix {
            reason: format!("Covariate '{}' not found in metadata", name),
        })?;
        let col = 1 + k;
        for i in 0..n_samples {
            design[[i, col]] = values[i];
        }
        coef_names.push(name.clone());
        covariate_columns.insert(name.clone(), col);
    }

    let mut col = 1 + covariates.len();
    for level in levels.iter().filter(|l| l.as_str() != reference_level) {
        for (i, value) in status.iter().enumerate() {
            if value == level {
                design[[i, col]] = 1.0;
            }
        }
        coef_names.push(format!("{}_{}_vs_{}", status_column, level, reference_level));
        level_columns.insert(level.clone(), col);
        col += 1;
    }

    for j in 0..n_coefs {
        if design.column(j).iter().all(|&x| x == 0.0) {
            return Err(PipelineError::InvalidDesignMatrix {
                reason: format!("Design matrix column '{}' is all zeros", coef_names[j]),
            });
        }
    }

    check_full_rank(&design, &coef_names)?;

    let info = DesignInfo {
        coef_names,
        status_column: status_column.to_string(),
        reference_level: reference_level.to_string(),
        levels,
        level_columns,
        covariate_columns,
    };

    log::debug!("Design {} with {} coefficients", info.formula(), n_coefs);
    Ok((design, info))
}

/// Reject designs whose columns are linearly dependent
pub fn check_full_rank(design: &Array2<f64>, coef_names: &[String]) -> Result<()> {
    let (rows, cols) = design.dim();
    if rows <= cols {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: format!(
                "design has {} coefficients but only {} samples; no residual degrees of freedom",
                cols, rows
            ),
        });
    }
    let flat: Vec<f64> = design.iter().copied().collect();
    let rank = matrix_rank(&flat, rows, cols);
    if rank < cols {
        return Err(PipelineError::InvalidDesignMatrix {
            reason: format!(
                "design matrix is not full rank ({} of {} columns independent: {})",
                rank,
                cols,
                coef_names.join(", ")
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn metadata() -> SampleMetadata {
        let mut meta = SampleMetadata::new((1..=6).map(|i| format!("s{}", i)).collect());
        meta.add_condition(
            "status",
            ["ctrl", "ctrl", "ko", "ko", "oe", "oe"].iter().map(|s| s.to_string()).collect(),
        )
        .unwrap();
        meta
    }

    #[test]
    fn test_design_layout() {
        let mut meta = metadata();
        meta.add_surrogate_variables(&array![[0.5], [-0.5], [0.2], [-0.2], [0.1], [-0.1]])
            .unwrap();
        let (design, info) = build_design(&meta, "status", &["sv1".to_string()], "ctrl").unwrap();

        assert_eq!(design.dim(), (6, 4));
        assert_eq!(info.coef_names, vec!["Intercept", "sv1", "status_ko_vs_ctrl", "status_oe_vs_ctrl"]);
        assert_eq!(design.column(2).to_vec(), vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        assert_eq!(design[[0, 1]], 0.5);
        assert_eq!(info.formula(), "~ sv1 + status");
    }

    #[test]
    fn test_contrast_vectors() {
        let (_, info) = build_design(&metadata(), "status", &[], "ctrl").unwrap();
        assert_eq!(info.contrast_vector("ko", "ctrl").unwrap(), vec![0.0, 1.0, 0.0]);
        assert_eq!(info.contrast_vector("ctrl", "oe").unwrap(), vec![0.0, 0.0, -1.0]);
        assert_eq!(info.contrast_vector("oe", "ko").unwrap(), vec![0.0, -1.0, 1.0]);
        assert!(info.contrast_vector("ko", "ko").is_err());
        assert!(info.contrast_vector("wt", "ko").is_err());
    }

    #[test]
    fn test_rank_deficient_covariate() {
        let mut meta = metadata();
        // identical to the ko indicator
        meta.add_covariate("dup", vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]).unwrap();
        let result = build_design(&meta, "status", &["dup".to_string()], "ctrl");
        assert!(matches!(result, Err(PipelineError::InvalidDesignMatrix { .. })));
    }

    #[test]
    fn test_unknown_reference() {
        assert!(build_design(&metadata(), "status", &[], "wt").is_err());
    }
}
