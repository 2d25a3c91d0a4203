use crate::utils::{mean, sample_variance, split_chains, trim_chains};
use crate::{Sequence, Sequences};
use anyhow::{anyhow, Error, Result};
use arima::acf;

/// Computes the effective sample size (ESS) for the specified
/// parameter across all kept samples, combining the per-chain
/// autocovariances with Geyer's initial monotone sequence.
///
/// The value returned lies in `(0, number_total_draws]`.  Chains whose
/// draws are all identical carry no autocorrelation and report every
/// draw as effective.  Note that the effective sample size can not be
/// estimated with fewer than four draws per chain.
///
/// See more details in Stan reference manual section
/// ["Effective Sample Size"](http://mc-stan.org/users/documentation)
///
/// Based on reference implementation in Stan v2.4.0 at
/// [https://github.com/stan-dev/stan/blob/v2.24.0/src/stan/analyze/mcmc/compute_effective_sample_size.hpp#L32-L138]()
///
///
/// # Arguments
/// * `chains` - Reference to chains of equal length, each of which is a vector of
///              samples for the same parameter
pub fn compute_effective_sample_size(chains: &[Vec<f64>]) -> Result<f64, Error> {
    let num_chains = chains.len();
    let num_draws = chains
        .iter()
        .map(|c| c.len())
        .min()
        .ok_or_else(|| anyhow!("No chains given"))?;

    if num_draws < 4 {
        return Err(anyhow!("Must have at least 4 samples to compute ESS"));
    }
    let num_total_draws = num_chains as f64 * num_draws as f64;

    let first = chains[0][0];
    let mut all_same = true;
    for chain in chains.iter() {
        for &value in chain[..num_draws].iter() {
            if !value.is_finite() {
                return Err(anyhow!("All values must be finite to compute ESS"));
            }
            all_same &= (value - first).abs() < 1e-10;
        }
    }
    if all_same {
        return Ok(num_total_draws);
    }

    let mut chain_acov: Sequences = Vec::with_capacity(num_chains);
    let mut chain_mean: Sequence = Vec::with_capacity(num_chains);
    let mut chain_var: Sequence = Vec::with_capacity(num_chains);
    for chain in chains.iter() {
        let chain = &chain[..num_draws];
        let acov = acf::acf(chain, None, true)
            .map_err(|_| anyhow!("Failed to compute autocovariance"))?;
        if acov.len() < num_draws {
            return Err(anyhow!(
                "Autocovariance has {} lags, expected {}",
                acov.len(),
                num_draws
            ));
        }
        chain_mean.push(mean(chain)?);
        chain_var.push(acov[0] * num_draws as f64 / (num_draws as f64 - 1.0));
        chain_acov.push(acov);
    }

    let mean_var = mean(&chain_var)?;
    let mut var_plus = mean_var * (num_draws as f64 - 1.0) / num_draws as f64;
    if num_chains > 1 {
        var_plus += sample_variance(&chain_mean)?;
    }

    let mut rho_hat_s: Sequence = vec![0.0; num_draws];
    let mut acov_s: Sequence = chain_acov.iter().map(|acov| acov[1]).collect();
    let mut rho_hat_even = 1.0;
    rho_hat_s[0] = rho_hat_even;
    let mut rho_hat_odd = 1.0 - (mean_var - mean(&acov_s)?) / var_plus;
    rho_hat_s[1] = rho_hat_odd;

    // Convert raw autocovariance estimators into Geyer's initial
    // positive sequence. Loop only until num_draws - 4 to
    // leave the last pair of autocorrelations as a bias term that
    // reduces variance in the case of antithetical chains.
    let mut s = 1;
    while s < (num_draws - 4) && (rho_hat_even + rho_hat_odd) > 0.0 {
        for (c, acov) in chain_acov.iter().enumerate() {
            acov_s[c] = acov[s + 1];
        }
        rho_hat_even = 1.0 - (mean_var - mean(&acov_s)?) / var_plus;
        for (c, acov) in chain_acov.iter().enumerate() {
            acov_s[c] = acov[s + 2];
        }
        rho_hat_odd = 1.0 - (mean_var - mean(&acov_s)?) / var_plus;
        if (rho_hat_even + rho_hat_odd) >= 0.0 {
            rho_hat_s[s + 1] = rho_hat_even;
            rho_hat_s[s + 2] = rho_hat_odd;
        }
        s += 2;
    }

    let max_s = s;
    // this is used in the improved estimate, which reduces variance
    // in antithetic case -- see tau_hat below
    if rho_hat_even > 0.0 {
        rho_hat_s[max_s + 1] = rho_hat_even;
    }

    // Convert Geyer's initial positive sequence into an initial
    // monotone sequence
    let mut s = 1;
    while max_s >= 3 && s <= (max_s - 3) {
        if (rho_hat_s[s + 1] + rho_hat_s[s + 2]) > (rho_hat_s[s - 1] + rho_hat_s[s]) {
            rho_hat_s[s + 1] = (rho_hat_s[s - 1] + rho_hat_s[s]) / 2.0;
            rho_hat_s[s + 2] = rho_hat_s[s + 1];
        };
        s += 2;
    }

    // Geyer's truncated estimator for the asymptotic variance
    // Improved estimate reduces variance in antithetic case
    let tau_hat: f64 =
        -1.0 + 2.0 * rho_hat_s.iter().take(max_s).sum::<f64>() + rho_hat_s[max_s + 1];
    if !(tau_hat.is_finite() && tau_hat > 0.0) {
        return Ok(num_total_draws);
    }
    Ok((num_total_draws / tau_hat).min(num_total_draws))
}

/// Computes the split effective sample size (ESS) for the specified
/// parameter across all kept samples.  When the number of total draws
/// N is odd, the (N+1)/2th draw is ignored.
///
/// Chains are trimmed from the back to match the length of the
/// shortest chain, so at least eight draws per chain are needed.
///
/// See more details in Stan reference manual section
/// ["Effective Sample Size"](http://mc-stan.org/users/documentation)
///
/// Based on reference implementation in Stan v2.4.0 at
/// [https://github.com/stan-dev/stan/blob/v2.24.0/src/stan/analyze/mcmc/compute_effective_sample_size.hpp#L185-L199]()
pub fn compute_split_effective_sample_size(chains: &[Vec<f64>]) -> Result<f64, Error> {
    let split = split_chains(trim_chains(chains)?)?;
    compute_effective_sample_size(&split)
}
