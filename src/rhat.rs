use crate::utils::{mean, sample_variance, split_chains, trim_chains};
use anyhow::{bail, Error, Result};

/// Computes the split potential scale reduction (Rhat) for the
/// specified parameter across all kept samples.  When the number of
/// total draws N is odd, the (N+1)/2th draw is ignored.
///
/// Chains are trimmed from the back to match the length of the
/// shortest chain, then each chain is split into two halves which are
/// treated as independent sequences.  With `W` the mean within-sequence
/// variance, `B` the between-sequence variance and `n` draws per half,
/// the statistic is `sqrt((W + B / n) / W)`.
///
/// Halves that are all constant yield exactly 1.0 when they share one
/// value and infinity otherwise.
///
/// See more details in Stan reference manual section
/// ["Potential Scale Reduction"](https://mc-stan.org/docs/2_24/reference-manual/notation-for-samples-chains-and-draws.html#potential-scale-reduction)
pub fn split_potential_scale_reduction_factor(chains: &[Vec<f64>]) -> Result<f64, Error> {
    let split = split_chains(trim_chains(chains)?)?;
    let n = split.iter().map(|c| c.len()).min().unwrap_or(0);
    if n < 2 {
        bail!("Must have at least 4 samples per chain to compute split Rhat");
    }

    // every half constant: rounding in the means must not leak into W
    let constant = |c: &Vec<f64>| c.iter().all(|&v| (v - c[0]).abs() < 1e-10);
    if split.iter().all(constant) {
        let first = split[0][0];
        let same = split.iter().all(|c| (c[0] - first).abs() < 1e-10);
        return Ok(if same { 1.0 } else { f64::INFINITY });
    }

    let mut split_chain_mean = Vec::with_capacity(split.len());
    let mut split_chain_var = Vec::with_capacity(split.len());
    for chain in split.iter() {
        split_chain_mean.push(mean(chain)?);
        split_chain_var.push(sample_variance(chain)?);
    }

    let n = n as f64;
    let var_between = n * sample_variance(&split_chain_mean)?;
    let var_within = mean(&split_chain_var)?;
    Ok(((var_within + var_between / n) / var_within).sqrt())
}
