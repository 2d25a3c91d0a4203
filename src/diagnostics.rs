//! Threshold checks over sampler-internal columns and summary output.
//!
//! Nothing here fails: every problem found becomes an entry in the
//! [`DiagnosticReport`] and a `warn!` log line.
use std::fmt;

use log::{debug, warn};
use rayon::prelude::*;

use crate::config::{Context, Thresholds};
use crate::draws::DrawArray;
use crate::summary::summarize_column;

/// Nonzero when a transition diverged.
pub const DIVERGENT_COLUMN: &str = "divergent__";
/// Tree depth reached by each transition.
pub const TREEDEPTH_COLUMN: &str = "treedepth__";
/// Hamiltonian energy at each transition.
pub const ENERGY_COLUMN: &str = "energy__";

/// E-BFMI of one chain, flagged when below the threshold.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChainEbfmi {
    pub chain: usize,
    pub value: f64,
    pub low: bool,
}

/// Findings of [`diagnose`].
#[derive(Debug, Clone, PartialEq)]
pub struct DiagnosticReport {
    pub thresholds: Thresholds,
    pub total_draws: usize,
    pub num_divergent: usize,
    pub num_max_treedepth: usize,
    /// Empty when the run has no energy column.
    pub ebfmi: Vec<ChainEbfmi>,
    /// Columns whose N_eff / total draws is below the threshold.
    pub low_neff: Vec<String>,
    /// Columns whose split R hat is above the threshold.
    pub high_rhat: Vec<String>,
    /// Columns that could not be summarized, with the reason.
    pub skipped: Vec<(String, String)>,
}

impl DiagnosticReport {
    /// Ids of the chains whose E-BFMI is below the threshold.
    pub fn low_ebfmi_chains(&self) -> Vec<usize> {
        self.ebfmi.iter().filter(|e| e.low).map(|e| e.chain).collect()
    }

    /// True when no check found a problem.
    pub fn is_ok(&self) -> bool {
        self.num_divergent == 0
            && self.num_max_treedepth == 0
            && self.ebfmi.iter().all(|e| !e.low)
            && self.low_neff.is_empty()
            && self.high_rhat.is_empty()
    }
}

/// E-BFMI of an energy trace, `mean((E_t - E_{t-1})^2) / var(E)`.
/// NaN when there are fewer than four draws or no variance.
pub fn ebfmi(energies: &[f64]) -> f64 {
    let n = energies.len();
    if n < 4 {
        return f64::NAN;
    }
    let mean: f64 = energies.iter().sum::<f64>() / n as f64;
    let var: f64 = energies.iter().map(|&e| (e - mean).powi(2)).sum::<f64>() / (n as f64 - 1.0);
    if var < 1e-30 {
        return f64::NAN;
    }
    let msd = energies
        .windows(2)
        .map(|w| (w[1] - w[0]).powi(2))
        .sum::<f64>()
        / (n as f64 - 1.0);
    msd / var
}

fn count_divergent(draws: &DrawArray) -> usize {
    match draws.column_by_name(DIVERGENT_COLUMN) {
        Some(column) => column.iter().filter(|&&v| v != 0.0).count(),
        None => {
            debug!("no {} column, skipping divergence check", DIVERGENT_COLUMN);
            0
        }
    }
}

fn count_max_treedepth(draws: &DrawArray, thresholds: &Thresholds) -> usize {
    let column = match draws.column_by_name(TREEDEPTH_COLUMN) {
        Some(column) => column,
        None => {
            debug!("no {} column, skipping treedepth check", TREEDEPTH_COLUMN);
            return 0;
        }
    };
    (0..draws.num_chains())
        .map(|c| {
            let max_depth = draws
                .configs()
                .get(c)
                .and_then(|cfg| cfg.max_depth)
                .unwrap_or(thresholds.max_treedepth_default) as f64;
            column.column(c).iter().filter(|&&v| v == max_depth).count()
        })
        .sum()
}

/// Runs every check over `draws`.
pub fn diagnose(draws: &DrawArray, ctx: &Context) -> DiagnosticReport {
    let thresholds = &ctx.thresholds;
    let total_draws = draws.num_draws() * draws.num_chains();

    let num_divergent = count_divergent(draws);
    let num_max_treedepth = count_max_treedepth(draws, thresholds);

    let per_chain: Vec<ChainEbfmi> = match draws.column_by_name(ENERGY_COLUMN) {
        Some(column) => (0..draws.num_chains())
            .map(|c| {
                let value = ebfmi(&column.column(c).to_vec());
                ChainEbfmi {
                    chain: c,
                    value,
                    low: value < thresholds.min_ebfmi,
                }
            })
            .collect(),
        None => Vec::new(),
    };

    let positions: Vec<usize> = draws
        .index()
        .parameters()
        .flat_map(|p| p.columns.clone())
        .collect();
    let results: Vec<_> = positions
        .par_iter()
        .map(|&p| summarize_column(draws, p, None, ctx))
        .collect();

    let mut low_neff = Vec::new();
    let mut high_rhat = Vec::new();
    let mut skipped = Vec::new();
    for (&p, result) in positions.iter().zip(results) {
        match result {
            Ok(stat) => {
                if total_draws > 0 && stat.n_eff / (total_draws as f64) < thresholds.min_neff_ratio {
                    low_neff.push(stat.name.clone());
                }
                if stat.r_hat > thresholds.max_rhat {
                    high_rhat.push(stat.name);
                }
            }
            Err(e) => {
                let name = draws.schema().names()[p].clone();
                skipped.push((name, e.to_string()));
            }
        }
    }

    let report = DiagnosticReport {
        thresholds: thresholds.clone(),
        total_draws,
        num_divergent,
        num_max_treedepth,
        ebfmi: per_chain,
        low_neff,
        high_rhat,
        skipped,
    };
    report.log_warnings();
    report
}

impl DiagnosticReport {
    fn log_warnings(&self) {
        if self.num_divergent > 0 {
            warn!(
                "{} of {} transitions ended with a divergence",
                self.num_divergent, self.total_draws
            );
        }
        if self.num_max_treedepth > 0 {
            warn!(
                "{} of {} transitions hit the maximum treedepth",
                self.num_max_treedepth, self.total_draws
            );
        }
        for e in self.ebfmi.iter().filter(|e| e.low) {
            warn!("chain {}: E-BFMI {:.3} is below {}", e.chain, e.value, self.thresholds.min_ebfmi);
        }
        if !self.low_neff.is_empty() {
            warn!("low effective sample size: {}", self.low_neff.join(", "));
        }
        if !self.high_rhat.is_empty() {
            warn!("split R-hat above {}: {}", self.thresholds.max_rhat, self.high_rhat.join(", "));
        }
        for (name, reason) in &self.skipped {
            warn!("{} was not checked: {}", name, reason);
        }
    }
}

fn percent(n: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        100.0 * n as f64 / total as f64
    }
}

impl fmt::Display for DiagnosticReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Checking sampler transitions for divergences.")?;
        if self.num_divergent > 0 {
            writeln!(
                f,
                "{} of {} ({:.2}%) transitions ended with a divergence.",
                self.num_divergent,
                self.total_draws,
                percent(self.num_divergent, self.total_draws)
            )?;
            writeln!(
                f,
                "Try increasing the adapt_delta target or reparameterizing the model."
            )?;
        } else {
            writeln!(f, "No divergent transitions found.")?;
        }

        writeln!(f, "\nChecking sampler transitions treedepth.")?;
        if self.num_max_treedepth > 0 {
            writeln!(
                f,
                "{} of {} ({:.2}%) transitions hit the maximum treedepth limit.",
                self.num_max_treedepth,
                self.total_draws,
                percent(self.num_max_treedepth, self.total_draws)
            )?;
            writeln!(f, "Try increasing the max_depth sampler setting.")?;
        } else {
            writeln!(f, "Treedepth satisfactory for all transitions.")?;
        }

        writeln!(f, "\nChecking E-BFMI - sampler transitions HMC potential energy.")?;
        let low: Vec<&ChainEbfmi> = self.ebfmi.iter().filter(|e| e.low).collect();
        if self.ebfmi.is_empty() {
            writeln!(f, "No energy column, E-BFMI not checked.")?;
        } else if low.is_empty() {
            writeln!(f, "E-BFMI satisfactory for all chains.")?;
        } else {
            for e in low {
                writeln!(
                    f,
                    "Chain {}: E-BFMI = {:.3}, below the threshold of {}.",
                    e.chain, e.value, self.thresholds.min_ebfmi
                )?;
            }
        }

        writeln!(f, "\nEffective sample size:")?;
        if self.low_neff.is_empty() {
            writeln!(f, "Effective sample size satisfactory.")?;
        } else {
            writeln!(
                f,
                "The following parameters had fewer than {} effective draws per transition:",
                self.thresholds.min_neff_ratio
            )?;
            writeln!(f, "  {}", self.low_neff.join(", "))?;
        }

        writeln!(f, "\nSplit R-hat values:")?;
        if self.high_rhat.is_empty() {
            writeln!(f, "Split R-hat values satisfactory for all parameters.")?;
        } else {
            writeln!(
                f,
                "The following parameters had split R-hat greater than {}:",
                self.thresholds.max_rhat
            )?;
            writeln!(f, "  {}", self.high_rhat.join(", "))?;
        }

        if !self.skipped.is_empty() {
            writeln!(f, "\nNot checked:")?;
            for (name, reason) in &self.skipped {
                writeln!(f, "  {}: {}", name, reason)?;
            }
        }
        Ok(())
    }
}
