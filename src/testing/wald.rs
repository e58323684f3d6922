//! Wald test for differential expression

use super::fdr::benjamini_hochberg;
use super::pvalue::calculate_pvalue;
use crate::data::ExpressionDataSet;
use crate::error::{PipelineError, Result};
use crate::glm::ModelFit;

/// Per-gene Wald test output on the log2 scale
#[derive(Debug, Clone)]
pub struct WaldTestResult {
    pub log2_fold_changes: Vec<f64>,
    pub lfc_se: Vec<f64>,
    pub stats: Vec<f64>,
    pub pvalues: Vec<f64>,
    pub padj: Vec<f64>,
}

/// Wald test of `numerator` vs `denominator` levels of the status factor
pub fn wald_test(dataset: &ExpressionDataSet, numerator: &str, denominator: &str) -> Result<WaldTestResult> {
    let model = dataset.model().ok_or_else(|| PipelineError::InvalidContrast {
        reason: "model must be fitted before testing".to_string(),
    })?;
    let contrast = model.info.contrast_vector(numerator, denominator)?;
    wald_test_contrast(model, &contrast)
}

/// Wald test of an arbitrary contrast vector over the model coefficients
///
/// lfc = c'beta, SE = sqrt(c' Sigma c), z = lfc / SE. Genes that were not
/// fitted get NaN everywhere.
pub fn wald_test_contrast(model: &ModelFit, contrast: &[f64]) -> Result<WaldTestResult> {
    let n_coefs = model.coefficients.ncols();
    if contrast.len() != n_coefs {
        return Err(PipelineError::InvalidContrast {
            reason: format!(
                "contrast vector has {} entries but the model has {} coefficients",
                contrast.len(),
                n_coefs
            ),
        });
    }
    if contrast.iter().all(|&c| c == 0.0) {
        return Err(PipelineError::InvalidContrast {
            reason: "contrast vector is all zeros".to_string(),
        });
    }

    let ln2 = std::f64::consts::LN_2;
    let n_genes = model.coefficients.nrows();
    let mut log2_fold_changes = vec![f64::NAN; n_genes];
    let mut lfc_se = vec![f64::NAN; n_genes];
    let mut stats = vec![f64::NAN; n_genes];

    for i in 0..n_genes {
        if !model.tested[i] {
            continue;
        }
        let lfc: f64 = (0..n_coefs).map(|j| contrast[j] * model.coefficients[[i, j]]).sum();
        let mut var = 0.0;
        for j in 0..n_coefs {
            for k in 0..n_coefs {
                var += contrast[j] * model.covariances[[i, j, k]] * contrast[k];
            }
        }
        let se = if var > 0.0 { var.sqrt() } else { f64::NAN };

        log2_fold_changes[i] = lfc / ln2;
        lfc_se[i] = se / ln2;
        if se.is_finite() {
            stats[i] = lfc / se;
        }
    }

    let pvalues: Vec<f64> = stats.iter().map(|&z| calculate_pvalue(z)).collect();
    let padj = benjamini_hochberg(&pvalues);

    Ok(WaldTestResult {
        log2_fold_changes,
        lfc_se,
        stats,
        pvalues,
        padj,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::glm::build_design;
    use crate::data::SampleMetadata;
    use ndarray::{array, Array3};

    fn model() -> ModelFit {
        let mut meta = SampleMetadata::new((0..6).map(|i| format!("s{}", i)).collect());
        meta.add_condition("status", ["a", "a", "b", "b", "c", "c"].iter().map(|s| s.to_string()).collect())
            .unwrap();
        let (design, info) = build_design(&meta, "status", &[], "a").unwrap();

        let ln2 = std::f64::consts::LN_2;
        let coefficients = array![[1.0, 2.0 * ln2, -1.0 * ln2], [f64::NAN, f64::NAN, f64::NAN]];
        let mut covariances = Array3::zeros((2, 3, 3));
        for j in 0..3 {
            covariances[[0, j, j]] = 0.25 * ln2 * ln2;
        }
        covariances[[0, 1, 2]] = 0.1 * ln2 * ln2;
        covariances[[0, 2, 1]] = 0.1 * ln2 * ln2;

        ModelFit {
            design,
            info,
            coefficients,
            covariances,
            converged: vec![true, false],
            tested: vec![true, false],
        }
    }

    #[test]
    fn test_reference_contrast() {
        let model = model();
        let contrast = model.info.contrast_vector("b", "a").unwrap();
        let res = wald_test_contrast(&model, &contrast).unwrap();

        assert!((res.log2_fold_changes[0] - 2.0).abs() < 1e-12);
        assert!((res.lfc_se[0] - 0.5).abs() < 1e-12);
        assert!((res.stats[0] - 4.0).abs() < 1e-12);
        assert!(res.pvalues[0] < 1e-4);
        assert!(res.log2_fold_changes[1].is_nan());
        assert!(res.padj[1].is_nan());
    }

    #[test]
    fn test_non_reference_contrast_uses_covariance() {
        let model = model();
        let contrast = model.info.contrast_vector("c", "b").unwrap();
        let res = wald_test_contrast(&model, &contrast).unwrap();

        // -1 - 2 = -3 log2; var = 0.25 + 0.25 - 2 * 0.1 = 0.3
        assert!((res.log2_fold_changes[0] + 3.0).abs() < 1e-12);
        assert!((res.lfc_se[0] - 0.3_f64.sqrt()).abs() < 1e-12);
    }

    #[test]
    fn test_bad_contrast_length() {
        assert!(wald_test_contrast(&model(), &[0.0, 1.0]).is_err());
        assert!(wald_test_contrast(&model(), &[0.0, 0.0, 0.0]).is_err());
    }
}
