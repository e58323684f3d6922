//! P-value calculation from test statistics

use statrs::function::erf::erfc;

/// Two-sided normal p-value for a z statistic, 2 * P(Z > |z|)
pub fn calculate_pvalue(z: f64) -> f64 {
    if !z.is_finite() {
        return f64::NAN;
    }
    erfc(z.abs() / std::f64::consts::SQRT_2)
}
