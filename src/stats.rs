//! Statistical utility functions shared across modules

use std::cmp::Ordering;

/// Total order on floats for sorting, NaN last
pub fn cmp_nan_last(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Median of the finite values; NaN when there are none
pub fn median(values: &[f64]) -> f64 {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return f64::NAN;
    }
    sorted.sort_by(|a, b| cmp_nan_last(*a, *b));
    let n = sorted.len();
    if n % 2 == 0 {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    } else {
        sorted[n / 2]
    }
}

/// Median absolute deviation scaled by 1.4826 (consistent for the normal SD)
pub fn mad(values: &[f64]) -> f64 {
    let center = median(values);
    if center.is_nan() {
        return f64::NAN;
    }
    let deviations: Vec<f64> = values
        .iter()
        .filter(|v| v.is_finite())
        .map(|&v| (v - center).abs())
        .collect();
    median(&deviations) * 1.4826
}

/// Arithmetic mean of the finite values
pub fn mean(values: &[f64]) -> f64 {
    let finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return f64::NAN;
    }
    finite.iter().sum::<f64>() / finite.len() as f64
}

/// Unbiased sample variance around `mean`
pub fn variance(values: &[f64], mean: f64) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    values.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Trigamma function (derivative of digamma)
pub fn trigamma(x: f64) -> f64 {
    if x < 0.5 {
        let pi = std::f64::consts::PI;
        return (pi / (pi * x).sin()).powi(2) - trigamma(1.0 - x);
    }

    if x >= 8.0 {
        let x2 = x * x;
        return 1.0 / x + 0.5 / x2 + 1.0 / (6.0 * x2 * x) - 1.0 / (30.0 * x2 * x2 * x)
            + 1.0 / (42.0 * x2 * x2 * x2 * x);
    }

    let mut result = 0.0;
    let mut z = x;
    while z < 8.0 {
        result += 1.0 / (z * z);
        z += 1.0;
    }
    result + trigamma(z)
}

/// Maximize a unimodal function on [lower, upper] by golden-section search
pub fn golden_section_max<F>(f: F, lower: f64, upper: f64, tol: f64) -> f64
where
    F: Fn(f64) -> f64,
{
    let ratio = (5.0_f64.sqrt() - 1.0) / 2.0;
    let (mut a, mut b) = (lower, upper);
    let mut c = b - ratio * (b - a);
    let mut d = a + ratio * (b - a);
    let mut fc = f(c);
    let mut fd = f(d);

    while (b - a).abs() > tol {
        if fc > fd {
            b = d;
            d = c;
            fd = fc;
            c = b - ratio * (b - a);
            fc = f(c);
        } else {
            a = c;
            c = d;
            fc = fd;
            d = a + ratio * (b - a);
            fd = f(d);
        }
    }
    (a + b) / 2.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median_even_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_mad() {
        // deviations from median 3: 2,1,0,1,2 -> median 1
        let m = mad(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        assert!((m - 1.4826).abs() < 1e-12);
    }

    #[test]
    fn test_trigamma_known_values() {
        // trigamma(1) = pi^2 / 6
        let expected = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - expected).abs() < 1e-6);
        // asymptotic branch: 1/x + 1/(2x^2) + ...
        assert!((trigamma(1000.0) - 0.0010005).abs() < 1e-9);
        // recurrence branch: pi^2/2 - 4 - 4/9
        assert!((trigamma(2.5) - 0.4903577).abs() < 1e-6);
        // reflection branch
        assert!((trigamma(0.25) - 17.1973291).abs() < 1e-6);
    }

    #[test]
    fn test_golden_section_max() {
        let x = golden_section_max(|x| -(x - 1.5).powi(2), -10.0, 10.0, 1e-8);
        assert!((x - 1.5).abs() < 1e-6);
    }

    #[test]
    fn test_cmp_nan_last() {
        let mut v = vec![f64::NAN, 2.0, 1.0];
        v.sort_by(|a, b| cmp_nan_last(*a, *b));
        assert_eq!(v[0], 1.0);
        assert_eq!(v[1], 2.0);
        assert!(v[2].is_nan());
    }
}
