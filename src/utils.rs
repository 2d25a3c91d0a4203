use crate::Sequences;
use anyhow::{anyhow, bail, Error, Result};

/// Compute the arithmetic mean of an array.
pub fn mean(arr: &[f64]) -> Result<f64, Error> {
    if arr.is_empty() {
        return Err(anyhow!("Can't take mean of empty array"));
    }
    let sum = arr.iter().sum::<f64>();
    let count = arr.len() as f64;
    Ok(sum / count)
}

/// Compute the sample variance of an array using Bessel's correction.
pub fn sample_variance(arr: &[f64]) -> Result<f64, Error> {
    if arr.len() < 2 {
        bail!("Sample variance needs at least 2 values, got {}", arr.len());
    }
    let xbar = mean(arr)?;
    Ok(arr.iter().map(|x| (x - xbar).powi(2)).sum::<f64>() / (arr.len() as f64 - 1.0))
}

/// Trims every chain to the length of the shortest one.
pub fn trim_chains(chains: &[Vec<f64>]) -> Result<Sequences, Error> {
    let num_draws = chains
        .iter()
        .map(|c| c.len())
        .min()
        .ok_or_else(|| anyhow!("No chains given"))?;
    Ok(chains.iter().map(|c| c[..num_draws].to_vec()).collect())
}

/// Splits each chain into two chains of equal length.  When the
/// number of total draws N is odd, the (N+1)/2th draw is ignored.
///
/// See more details in Stan reference manual section
/// ["Effective Sample Size"](http://mc-stan.org/users/documentation).
///
/// Chains are assumed to be of equal size; see [`trim_chains`].
pub fn split_chains(chains: Sequences) -> Result<Sequences, Error> {
    let num_draws = chains
        .iter()
        .map(|c| c.len())
        .min()
        .ok_or_else(|| anyhow!("Can't split empty array of chains"))?;
    if num_draws < 1 {
        return Err(anyhow!("No samples to split"));
    }
    let (half, offset) = if num_draws % 2 == 0 {
        (num_draws / 2, 0)
    } else {
        ((num_draws - 1) / 2, 1)
    };
    let mut split_draws = Vec::with_capacity(chains.len() * 2);
    for chain in chains {
        split_draws.push(chain[..half].to_vec());
        split_draws.push(chain[(half + offset)..].to_vec());
    }
    Ok(split_draws)
}

/// Quantile of already sorted values, interpolating linearly between
/// the two closest ranks.
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return f64::NAN;
    }
    let q = q.clamp(0.0, 1.0);
    let pos = q * (sorted.len() as f64 - 1.0);
    let i0 = pos.floor() as usize;
    let i1 = pos.ceil() as usize;
    if i0 == i1 {
        return sorted[i0];
    }
    let f = pos - i0 as f64;
    sorted[i0] * (1.0 - f) + sorted[i1] * f
}
