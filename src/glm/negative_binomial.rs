//! Negative binomial helpers shared by the GLM, dispersion and rlog fits

use statrs::function::gamma::ln_gamma;

/// Floor applied to fitted means before weights are computed
pub const MIN_MU: f64 = 0.5;

/// IRLS stops once any coefficient exceeds this magnitude
pub const MAX_LFC_BETA: f64 = 30.0;

/// Cap on the linear predictor to keep `exp` finite
pub const MAX_ETA: f64 = 700.0;

/// mu = size_factor * exp(eta)
pub fn nb_mean(eta: f64, size_factor: f64) -> f64 {
    size_factor * eta.clamp(-MAX_ETA, MAX_ETA).exp()
}

/// Var(Y) = mu + alpha * mu^2
pub fn nb_variance(mu: f64, alpha: f64) -> f64 {
    mu + alpha * mu * mu
}

/// Log density of `y` under NB(mean = mu, dispersion = alpha)
pub fn nb_log_likelihood(y: f64, mu: f64, alpha: f64) -> f64 {
    if mu <= 0.0 || alpha <= 0.0 {
        return f64::NEG_INFINITY;
    }
    let size = 1.0 / alpha;
    let prob = size / (size + mu);
    ln_gamma(y + size) - ln_gamma(size) - ln_gamma(y + 1.0) + size * prob.ln() + y * (1.0 - prob).ln()
}

/// IRLS working weight, W = mu / (1 + alpha * mu)
pub fn nb_weight(mu: f64, alpha: f64) -> f64 {
    mu / (1.0 + alpha * mu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_variance() {
        assert!((nb_mean(2.0, 1.5) - 1.5 * 2.0_f64.exp()).abs() < 1e-10);
        assert!((nb_variance(10.0, 0.1) - 20.0).abs() < 1e-10);
        assert!(nb_mean(1e6, 1.0).is_finite());
    }

    #[test]
    fn test_log_likelihood_near_poisson() {
        // small alpha approaches Poisson(5) at y = 5
        let poisson = 5.0 * 5.0_f64.ln() - 5.0 - ln_gamma(6.0);
        let ll = nb_log_likelihood(5.0, 5.0, 1e-8);
        assert!((ll - poisson).abs() < 1e-4);
        assert_eq!(nb_log_likelihood(1.0, 0.0, 0.1), f64::NEG_INFINITY);
    }

    #[test]
    fn test_weight() {
        assert!((nb_weight(10.0, 0.1) - 5.0).abs() < 1e-10);
    }
}
