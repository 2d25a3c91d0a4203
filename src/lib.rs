//! Turns the per-chain CSV output of a posterior sampling engine into
//! one validated `(draw, chain, column)` array, then summarizes it and
//! checks it for convergence problems (split R hat, effective sample
//! size, divergences, treedepth saturation and E-BFMI).
//!
//! A [`Run`] owns the chain files.  The array is parsed lazily on first
//! access, cached for the lifetime of the run and shared read-only with
//! the [`summary`] and [`diagnostics`] engines.
#[cfg_attr(test, macro_use)]
extern crate approx;

/// Column names, parameter shapes and the parameter -> column mapping
pub mod columns;
/// Settings shared by all stages
pub mod config;
/// Threshold checks and the diagnose report
pub mod diagnostics;
/// Row parsing and the assembled draw array
pub mod draws;
/// Error type shared by every stage
pub mod error;
/// Effective Sample Size (ESS)
pub mod ess;
/// Chain preamble and header parsing
pub mod header;
/// Gelman-Rubin split potential scale reducation (Rhat)
pub mod rhat;
/// Chains, run lifecycle and the build-once draw cache
pub mod run;
/// Per-column summary statistics
pub mod summary;
/// Convenience utilities like chain splitting and basic statistics
pub mod utils;
/// Cross-chain consistency checks
pub mod validate;

pub use columns::{ColumnIndex, ColumnSchema, Parameter, ParameterShape};
pub use config::{Context, IndexOrder, Thresholds};
pub use diagnostics::DiagnosticReport;
pub use draws::DrawArray;
pub use error::{Error, Result};
pub use header::{ChainConfig, Header, MassMatrix, Metric};
pub use run::{Chain, ChainState, Run};
pub use summary::{Summary, SummaryStat};

/// Draws of one parameter from one chain
pub type Sequence = Vec<f64>;
/// Draws of one parameter from several chains
pub type Sequences = Vec<Sequence>;
