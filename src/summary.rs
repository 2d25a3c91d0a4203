//! Descriptive statistics and convergence estimates per column.
use std::fmt;
use std::time::Duration;

use average::Variance;
use rayon::prelude::*;

use crate::config::Context;
use crate::draws::DrawArray;
use crate::error::{Error, Result};
use crate::ess::compute_split_effective_sample_size;
use crate::rhat::split_potential_scale_reduction_factor;
use crate::utils::quantile_sorted;

/// Fewest draws per chain for which split ESS and split R hat are
/// defined: four per half chain.
pub const MIN_DRAWS_PER_CHAIN: usize = 8;

/// Statistics for one column, pooled over all chains.
#[derive(Debug, Clone, PartialEq)]
pub struct SummaryStat {
    pub name: String,
    pub mean: f64,
    /// Monte Carlo standard error, `sd / sqrt(n_eff)`.
    pub mcse: f64,
    pub sd: f64,
    /// `(level, value)` pairs in the order of [`Context::quantiles`].
    pub quantiles: Vec<(f64, f64)>,
    pub n_eff: f64,
    /// `None` when the run's elapsed time is unknown.
    pub n_eff_per_sec: Option<f64>,
    pub r_hat: f64,
}

impl SummaryStat {
    /// Value of the quantile at `level`, if it was computed.
    pub fn quantile(&self, level: f64) -> Option<f64> {
        self.quantiles
            .iter()
            .find(|(l, _)| (l - level).abs() < 1e-12)
            .map(|&(_, v)| v)
    }
}

/// Summary table over a selection of columns.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub levels: Vec<f64>,
    pub rows: Vec<SummaryStat>,
}

impl Summary {
    /// Row of the column called `name`.
    pub fn get(&self, name: &str) -> Option<&SummaryStat> {
        self.rows.iter().find(|r| r.name == name)
    }
}

/// Summary of the column at `position`.
pub fn summarize_column(
    draws: &DrawArray,
    position: usize,
    elapsed: Option<Duration>,
    ctx: &Context,
) -> Result<SummaryStat> {
    let name = draws.schema().names()[position].clone();
    let numeric = |source: anyhow::Error| Error::Numeric {
        column: name.clone(),
        source,
    };

    let column = draws.column(position);
    if let Some(bad) = column.iter().find(|v| !v.is_finite()) {
        return Err(numeric(anyhow::anyhow!("non-finite draw {}", bad)));
    }

    if draws.num_draws() < MIN_DRAWS_PER_CHAIN {
        return Err(Error::InsufficientDraws {
            column: name.clone(),
            draws: draws.num_draws(),
            required: MIN_DRAWS_PER_CHAIN,
        });
    }

    let stats: Variance = column.iter().copied().collect();
    let mean = stats.mean();
    let sd = stats.sample_variance().sqrt();

    let mut sorted: Vec<f64> = column.iter().copied().collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let quantiles = ctx
        .quantiles
        .iter()
        .map(|&q| (q, quantile_sorted(&sorted, q)))
        .collect();

    let chains = draws.chain_sequences(position);
    let n_eff = compute_split_effective_sample_size(&chains).map_err(&numeric)?;
    let r_hat = split_potential_scale_reduction_factor(&chains).map_err(&numeric)?;
    let n_eff_per_sec = elapsed
        .map(|d| d.as_secs_f64())
        .filter(|&secs| secs > 0.0)
        .map(|secs| n_eff / secs);

    Ok(SummaryStat {
        name,
        mean,
        mcse: sd / n_eff.sqrt(),
        sd,
        quantiles,
        n_eff,
        n_eff_per_sec,
        r_hat,
    })
}

/// Column positions selected by `names`.  A name may be a single
/// column (`theta.2`) or a parameter (`theta`), which selects all of
/// its columns.
fn select(draws: &DrawArray, names: &[&str]) -> Result<Vec<usize>> {
    let index = draws.index();
    let mut positions = Vec::new();
    for name in names {
        if let Some(p) = index.column(name) {
            positions.push(p);
        } else {
            positions.extend(index.columns_of(name)?);
        }
    }
    Ok(positions)
}

/// Summarizes the selected columns, or every column when `columns`
/// is `None`.
pub fn summarize(
    draws: &DrawArray,
    columns: Option<&[&str]>,
    elapsed: Option<Duration>,
    ctx: &Context,
) -> Result<Summary> {
    let positions = match columns {
        Some(names) => select(draws, names)?,
        None => (0..draws.num_columns()).collect(),
    };
    let rows = positions
        .par_iter()
        .map(|&p| summarize_column(draws, p, elapsed, ctx))
        .collect::<Result<Vec<_>>>()?;
    Ok(Summary {
        levels: ctx.quantiles.clone(),
        rows,
    })
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let width = self
            .rows
            .iter()
            .map(|r| r.name.len())
            .max()
            .unwrap_or(0)
            .max(4);
        write!(f, "{:<width$} {:>10} {:>10} {:>10}", "name", "Mean", "MCSE", "StdDev", width = width)?;
        for level in &self.levels {
            write!(f, " {:>10}", format!("{}%", level * 100.0))?;
        }
        writeln!(f, " {:>10} {:>10} {:>10}", "N_Eff", "N_Eff/s", "R_hat")?;
        for row in &self.rows {
            write!(
                f,
                "{:<width$} {:>10.4} {:>10.4} {:>10.4}",
                row.name,
                row.mean,
                row.mcse,
                row.sd,
                width = width
            )?;
            for (_, value) in &row.quantiles {
                write!(f, " {:>10.4}", value)?;
            }
            let per_sec = match row.n_eff_per_sec {
                Some(v) => format!("{:.1}", v),
                None => "n/a".to_string(),
            };
            writeln!(f, " {:>10.1} {:>10} {:>10.4}", row.n_eff, per_sec, row.r_hat)?;
        }
        Ok(())
    }
}
