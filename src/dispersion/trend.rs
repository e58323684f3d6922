//! Dispersion trend fitting

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Method for fitting the dispersion-mean trend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendFitMethod {
    /// dispersion = a0 + a1/mean, falling back to `Mean` when the fit fails
    Parametric,
    /// A constant trend at the (trimmed) mean of gene-wise dispersions
    Mean,
}

/// Fitted trend
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct DispersionTrend {
    pub trended: Vec<f64>,
    /// (asymptotic dispersion, extra-Poisson term) when the parametric fit succeeded
    pub coefs: Option<(f64, f64)>,
}

/// Fit a trend of gene-wise dispersions against mean normalized counts
///
/// Genes with a NaN gene-wise dispersion keep a NaN trend value.
pub(crate) fn fit_dispersion_trend(
    base_means: &[f64],
    gene_dispersions: &[f64],
    min_disp: f64,
    method: TrendFitMethod,
) -> Result<DispersionTrend> {
    let coefs = match method {
        TrendFitMethod::Parametric => match fit_parametric(base_means, gene_dispersions, min_disp) {
            Ok(coefs) => {
                log::info!("Dispersion trend: {:.4} + {:.4} / mean", coefs.0, coefs.1);
                Some(coefs)
            }
            Err(e) => {
                log::warn!("Parametric dispersion fit failed ({}), using the mean dispersion", e);
                None
            }
        },
        TrendFitMethod::Mean => None,
    };

    let trended = match coefs {
        Some((a0, a1)) => base_means
            .iter()
            .zip(gene_dispersions)
            .map(|(&m, &d)| {
                if d.is_nan() {
                    f64::NAN
                } else if m > 0.0 {
                    a0 + a1 / m
                } else {
                    a0
                }
            })
            .collect(),
        None => {
            let mean = trimmed_mean_dispersion(gene_dispersions, min_disp)?;
            log::info!("Dispersion trend: constant {:.4}", mean);
            gene_dispersions
                .iter()
                .map(|d| if d.is_nan() { f64::NAN } else { mean })
                .collect()
        }
    };

    Ok(DispersionTrend { trended, coefs })
}

/// Mean of usable gene-wise dispersions with 0.1% trimmed from each end
fn trimmed_mean_dispersion(dispersions: &[f64], min_disp: f64) -> Result<f64> {
    let mut usable: Vec<f64> = dispersions
        .iter()
        .copied()
        .filter(|&d| d.is_finite() && d > 10.0 * min_disp)
        .collect();
    if usable.is_empty() {
        usable = dispersions.iter().copied().filter(|d| d.is_finite()).collect();
    }
    if usable.is_empty() {
        return Err(PipelineError::TrendFittingFailed {
            reason: "no finite gene-wise dispersions".to_string(),
        });
    }
    usable.sort_by(|a, b| a.total_cmp(b));
    let n = usable.len();
    let trim = (n as f64 * 0.001).floor() as usize;
    let kept = &usable[trim..n - trim];
    Ok(kept.iter().sum::<f64>() / kept.len() as f64)
}

/// Iterated Gamma GLM with residual filtering
fn fit_parametric(means: &[f64], dispersions: &[f64], min_disp: f64) -> Result<(f64, f64)> {
    let data: Vec<(f64, f64)> = means
        .iter()
        .zip(dispersions)
        .filter(|(&m, &d)| m > 0.0 && d.is_finite() && d > 100.0 * min_disp)
        .map(|(&m, &d)| (m, d))
        .collect();

    if data.len() < 3 {
        return Err(PipelineError::TrendFittingFailed {
            reason: "not enough genes above the minimum dispersion".to_string(),
        });
    }

    let mut coefs = (0.1_f64, 1.0_f64);
    for _ in 0..11 {
        let old = coefs;
        let good: Vec<(f64, f64)> = data
            .iter()
            .copied()
            .filter(|&(m, d)| {
                let fitted = coefs.0 + coefs.1 / m;
                fitted > 0.0 && {
                    let residual = d / fitted;
                    residual > 1e-4 && residual < 15.0
                }
            })
            .collect();

        if good.len() < 3 {
            return Err(PipelineError::TrendFittingFailed {
                reason: "not enough genes with acceptable residuals".to_string(),
            });
        }

        let (next, converged) = gamma_glm_identity(&good, coefs);
        coefs = next;

        if coefs.0 <= 0.0 || coefs.1 <= 0.0 {
            return Err(PipelineError::TrendFittingFailed {
                reason: format!("coefficients not positive (a0={:.4}, a1={:.4})", coefs.0, coefs.1),
            });
        }

        let change = (coefs.0 / old.0).ln().powi(2) + (coefs.1 / old.1).ln().powi(2);
        if change < 1e-6 && converged {
            return Ok(coefs);
        }
    }

    Err(PipelineError::TrendFittingFailed {
        reason: "did not converge".to_string(),
    })
}

/// Gamma GLM, identity link: disp ~ a0 + a1 * (1/mean)
fn gamma_glm_identity(data: &[(f64, f64)], start: (f64, f64)) -> ((f64, f64), bool) {
    let (mut a0, mut a1) = start;
    let deviance = |a0: f64, a1: f64| -> f64 {
        data.iter()
            .map(|&(m, d)| {
                let mu = (a0 + a1 / m).max(1e-8);
                2.0 * (-(d / mu).ln() + (d - mu) / mu)
            })
            .sum()
    };

    let mut dev_old = deviance(a0, a1);
    for _ in 0..25 {
        let (mut sw, mut swx, mut swz, mut swxx, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for &(m, d) in data {
            let x = 1.0 / m;
            let mu = (a0 + a1 * x).max(1e-8);
            let w = 1.0 / (mu * mu);
            sw += w;
            swx += w * x;
            swz += w * d;
            swxx += w * x * x;
            swxz += w * x * d;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() < 1e-10 {
            return ((a0, a1), false);
        }
        a0 = (swxx * swz - swx * swxz) / det;
        a1 = (sw * swxz - swx * swz) / det;

        let dev = deviance(a0, a1);
        if (dev_old - dev).abs() / (0.1 + dev.abs()) < 1e-8 {
            return ((a0, a1), true);
        }
        dev_old = dev;
    }
    ((a0, a1), false)
}
