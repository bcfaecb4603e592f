//! Statistical helpers shared by normalization, dispersion, rlog and the
//! diagnostics.

use std::cmp::Ordering;

/// Upper 2.5% point of the standard normal
const QNORM_0975: f64 = 1.959963984540054;

/// Consistency constant turning a MAD into a normal standard deviation
const MAD_CONSTANT: f64 = 1.4826;

fn sorted_finite(x: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    v
}

/// Median of the finite values, NaN when there are none
pub fn median(x: &[f64]) -> f64 {
    let v = sorted_finite(x);
    let n = v.len();
    match n {
        0 => f64::NAN,
        _ if n % 2 == 0 => (v[n / 2 - 1] + v[n / 2]) / 2.0,
        _ => v[n / 2],
    }
}

pub fn mean(x: &[f64]) -> f64 {
    if x.is_empty() {
        return f64::NAN;
    }
    x.iter().sum::<f64>() / x.len() as f64
}

/// Sample variance with the n - 1 denominator
pub fn variance(x: &[f64]) -> f64 {
    let n = x.len();
    if n < 2 {
        return f64::NAN;
    }
    let m = mean(x);
    x.iter().map(|v| (v - m).powi(2)).sum::<f64>() / (n - 1) as f64
}

/// Squared median absolute deviation, scaled to estimate a normal variance
pub fn mad_squared(x: &[f64]) -> f64 {
    let center = median(x);
    let deviations: Vec<f64> = x.iter().map(|v| (v - center).abs()).collect();
    let mad = MAD_CONSTANT * median(&deviations);
    mad * mad
}

/// Trigamma function: asymptotic series after shifting the argument above 6
pub fn trigamma(x: f64) -> f64 {
    if x <= 0.0 && x == x.floor() {
        return f64::INFINITY;
    }
    let mut x = x;
    let mut acc = 0.0;
    while x < 6.0 {
        acc += 1.0 / (x * x);
        x += 1.0;
    }
    let x2 = 1.0 / (x * x);
    acc + 1.0 / x
        + x2 / 2.0
        + (1.0 / x) * x2 * (1.0 / 6.0 - x2 * (1.0 / 30.0 - x2 * (1.0 / 42.0 - x2 / 30.0)))
}

/// Pearson correlation, NaN when either side is constant
pub fn pearson(x: &[f64], y: &[f64]) -> f64 {
    let n = x.len().min(y.len());
    if n < 2 {
        return f64::NAN;
    }
    let mx = mean(&x[..n]);
    let my = mean(&y[..n]);
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for i in 0..n {
        let dx = x[i] - mx;
        let dy = y[i] - my;
        sxy += dx * dy;
        sxx += dx * dx;
        syy += dy * dy;
    }
    if sxx == 0.0 || syy == 0.0 {
        return f64::NAN;
    }
    sxy / (sxx * syy).sqrt()
}

/// Weighted quantile with weights normalized to sum to the sample size.
///
/// Duplicated values pool their weight; the quantile interpolates between
/// the order statistics bracketing `1 + (n - 1) * prob` on the cumulative
/// weight scale.
pub fn weighted_quantile(x: &[f64], weights: &[f64], prob: f64) -> f64 {
    let mut pairs: Vec<(f64, f64)> = x
        .iter()
        .zip(weights)
        .filter(|(xi, wi)| **wi > 0.0 && xi.is_finite() && wi.is_finite())
        .map(|(&xi, &wi)| (xi, wi))
        .collect();
    if pairs.is_empty() {
        return 0.0;
    }
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(Ordering::Equal));

    let scale = pairs.len() as f64 / pairs.iter().map(|p| p.1).sum::<f64>();
    let mut values: Vec<f64> = Vec::new();
    let mut cumulative: Vec<f64> = Vec::new();
    let mut total = 0.0;
    for (xi, wi) in pairs {
        total += wi * scale;
        if values.last() == Some(&xi) {
            if let Some(last) = cumulative.last_mut() {
                *last = total;
            }
        } else {
            values.push(xi);
            cumulative.push(total);
        }
    }

    let order = 1.0 + (total - 1.0) * prob;
    let low = order.floor().max(1.0);
    let high = (low + 1.0).min(total);
    let frac = order - order.floor();

    let step = |target: f64| -> f64 {
        let idx = cumulative
            .iter()
            .position(|&c| c >= target)
            .unwrap_or(values.len() - 1);
        values[idx]
    };
    (1.0 - frac) * step(low) + frac * step(high)
}

/// Variance of a zero-centered normal whose `1 - upper_quantile` quantile
/// of |x| matches the weighted empirical one.
pub fn match_weighted_upper_quantile_for_variance(x: &[f64], weights: &[f64], upper_quantile: f64) -> f64 {
    let abs_x: Vec<f64> = x.iter().map(|v| v.abs()).collect();
    let q = weighted_quantile(&abs_x, weights, 1.0 - upper_quantile);
    let sd = q / QNORM_0975;
    let var = sd * sd;
    if var <= 0.0 || !var.is_finite() {
        1e-6
    } else {
        var
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
        assert!(median(&[]).is_nan());
    }

    #[test]
    fn test_mad_squared_of_constant_is_zero() {
        assert_eq!(mad_squared(&[2.0, 2.0, 2.0]), 0.0);
        let v = mad_squared(&[1.0, 2.0, 3.0, 4.0, 100.0]);
        assert!((v - (1.4826_f64).powi(2)).abs() < 1e-10);
    }

    #[test]
    fn test_trigamma() {
        // trigamma(1) = pi^2 / 6
        let pi2_6 = std::f64::consts::PI.powi(2) / 6.0;
        assert!((trigamma(1.0) - pi2_6).abs() < 1e-8);
        // trigamma(x + 1) = trigamma(x) - 1 / x^2
        assert!((trigamma(3.5) - (trigamma(2.5) - 1.0 / 6.25)).abs() < 1e-10);
    }

    #[test]
    fn test_pearson() {
        assert!((pearson(&[1.0, 2.0, 3.0], &[2.0, 4.0, 6.0]) - 1.0).abs() < 1e-12);
        assert!((pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]) + 1.0).abs() < 1e-12);
        assert!(pearson(&[1.0, 1.0, 1.0], &[1.0, 2.0, 3.0]).is_nan());
    }

    #[test]
    fn test_weighted_quantile_uniform() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!((weighted_quantile(&x, &[1.0; 5], 0.5) - 3.0).abs() < 1e-10);
        assert!((weighted_quantile(&x, &[1.0; 5], 1.0) - 5.0).abs() < 1e-10);
    }

    #[test]
    fn test_weighted_quantile_skewed() {
        let x = [1.0, 2.0, 3.0, 4.0, 5.0];
        let q = weighted_quantile(&x, &[1.0, 1.0, 1.0, 1.0, 100.0], 0.5);
        assert!(q >= 4.0);
    }

    #[test]
    fn test_upper_quantile_variance_positive() {
        let x = [0.1, -0.2, 0.3, -0.1, 0.5, -0.3, 0.2, -0.4, 0.15, -0.25];
        let var = match_weighted_upper_quantile_for_variance(&x, &[1.0; 10], 0.05);
        assert!(var > 0.0 && var.is_finite());
        assert_eq!(match_weighted_upper_quantile_for_variance(&[0.0, 0.0], &[1.0, 1.0], 0.05), 1e-6);
    }
}
