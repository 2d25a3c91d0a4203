//! Parser for the comment preamble, header row and adaptation block
//! at the top of one chain's output.
use std::collections::HashMap;
use std::io::BufRead;
use std::sync::Arc;

use log::debug;
use ndarray::Array2;

use crate::columns::{ColumnIndex, ColumnSchema};
use crate::config::Context;
use crate::error::{Error, Result};

/// Metric (inverse mass matrix) type used by the sampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Identity,
    Diagonal,
    Dense,
}

impl Metric {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "unit_e" | "unit" | "identity" => Some(Metric::Identity),
            "diag_e" | "diag" | "diagonal" => Some(Metric::Diagonal),
            "dense_e" | "dense" => Some(Metric::Dense),
            _ => None,
        }
    }
}

/// Adapted inverse mass matrix reported after warmup.
#[derive(Debug, Clone, PartialEq)]
pub enum MassMatrix {
    Diagonal(Vec<f64>),
    Dense(Array2<f64>),
}

/// Sampler configuration recorded in a chain's preamble.
#[derive(Debug, Clone, PartialEq)]
pub struct ChainConfig {
    pub id: Option<usize>,
    pub num_samples: usize,
    pub num_warmup: usize,
    pub save_warmup: bool,
    pub thin: usize,
    pub max_depth: Option<u32>,
    pub metric: Metric,
    pub stepsize: Option<f64>,
    pub mass_matrix: Option<MassMatrix>,
}

impl ChainConfig {
    /// Number of warmup rows present in the file.
    pub fn warmup_rows(&self) -> usize {
        if self.save_warmup {
            (self.num_warmup + self.thin - 1) / self.thin
        } else {
            0
        }
    }

    /// Number of sampling rows the file must hold.
    pub fn sampling_rows(&self) -> usize {
        (self.num_samples + self.thin - 1) / self.thin
    }

    /// Number of data rows the file must hold.
    pub fn expected_rows(&self) -> usize {
        self.warmup_rows() + self.sampling_rows()
    }
}

/// Result of parsing one chain's header.
#[derive(Debug, Clone)]
pub struct Header {
    pub config: ChainConfig,
    pub schema: Arc<ColumnSchema>,
    pub index: ColumnIndex,
    /// 1-based line number of the header row.
    pub header_line: usize,
}

/// `"1000 (Default)"` -> `"1000"`
fn strip_default(value: &str) -> &str {
    value.trim_end_matches("(Default)").trim()
}

fn parse_count(chain: usize, line: usize, key: &str, value: &str, positive: bool) -> Result<usize> {
    let n: i64 = value
        .parse()
        .map_err(|_| Error::parse(chain, line, format!("{} = '{}' is not an integer", key, value)))?;
    if n < 0 || (positive && n == 0) {
        return Err(Error::parse(
            chain,
            line,
            format!("{} must be positive, found {}", key, n),
        ));
    }
    Ok(n as usize)
}

fn parse_numbers(text: &str, delimiter: char) -> Option<Vec<f64>> {
    text.split(delimiter)
        .map(|f| f.trim().parse::<f64>().ok())
        .collect()
}

#[derive(Clone, Copy, PartialEq)]
enum Block {
    None,
    Diagonal,
    Dense,
}

/// Reads the configuration comments, the column header and the
/// adaptation comments that follow it.  Stops at the first data row
/// without consuming it.
pub fn parse_header<R: BufRead>(chain: usize, reader: R, ctx: &Context) -> Result<Header> {
    let prefix = ctx.comment_prefix;
    let mut settings: HashMap<String, (usize, String)> = HashMap::new();
    let mut names: Option<(usize, Vec<String>)> = None;
    let mut adapted_stepsize = None;
    let mut block = Block::None;
    let mut rows: Vec<Vec<f64>> = Vec::new();
    // With saved warmup the adaptation block sits after the warmup rows.
    let mut skip_warmup_rows = false;

    for (i, line) in reader.lines().enumerate() {
        let lineno = i + 1;
        let line = line.map_err(|e| Error::parse(chain, lineno, e.to_string()))?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let comment = match trimmed.strip_prefix(prefix) {
            Some(rest) => rest.trim(),
            None if names.is_none() => {
                let cols = trimmed
                    .split(ctx.delimiter)
                    .map(|s| s.trim().to_string())
                    .collect();
                names = Some((lineno, cols));
                let setting = |key: &str| settings.get(key).map(|(_, v)| v.as_str());
                skip_warmup_rows = matches!(setting("save_warmup"), Some("1" | "true"))
                    && !matches!(setting("num_warmup"), Some("0"));
                continue;
            }
            None if skip_warmup_rows => continue,
            None => break,
        };
        skip_warmup_rows = false;

        if names.is_none() {
            if let Some((key, value)) = comment.split_once('=') {
                settings.insert(
                    key.trim().to_string(),
                    (lineno, strip_default(value.trim()).to_string()),
                );
            }
            continue;
        }

        if let Some(value) = comment.strip_prefix("Step size =") {
            let value = value.trim();
            let step = value
                .parse::<f64>()
                .map_err(|_| Error::parse(chain, lineno, format!("invalid step size '{}'", value)))?;
            adapted_stepsize = Some(step);
            block = Block::None;
        } else if comment.starts_with("Diagonal elements of inverse mass matrix") {
            block = Block::Diagonal;
        } else if comment.starts_with("Elements of inverse mass matrix") {
            block = Block::Dense;
        } else if block != Block::None {
            match parse_numbers(comment, ctx.delimiter) {
                Some(row) => rows.push(row),
                None => block = Block::None,
            }
        }
    }

    let (header_line, cols) = names.ok_or_else(|| Error::parse(chain, 0, "no header row found"))?;
    if cols.iter().any(|c| c.is_empty()) {
        return Err(Error::parse(chain, header_line, "empty column name in header"));
    }

    let get = |key: &str| settings.get(key).map(|(l, v)| (*l, v.as_str()));
    let num_samples = match get("num_samples") {
        Some((l, v)) => parse_count(chain, l, "num_samples", v, true)?,
        None => return Err(Error::parse(chain, header_line, "num_samples is not declared")),
    };
    let num_warmup = match get("num_warmup") {
        Some((l, v)) => parse_count(chain, l, "num_warmup", v, false)?,
        None => 0,
    };
    let save_warmup = match get("save_warmup") {
        Some((_, v)) => matches!(v, "1" | "true"),
        None => false,
    };
    let thin = match get("thin") {
        Some((l, v)) => parse_count(chain, l, "thin", v, true)?,
        None => 1,
    };
    let max_depth = match get("max_depth") {
        Some((l, v)) => Some(parse_count(chain, l, "max_depth", v, true)? as u32),
        None => None,
    };
    let metric = match get("metric") {
        Some((l, v)) => Metric::parse(v)
            .ok_or_else(|| Error::parse(chain, l, format!("unknown metric '{}'", v)))?,
        None => Metric::Diagonal,
    };
    let id = get("id").and_then(|(_, v)| v.parse().ok());
    let stepsize = adapted_stepsize.or_else(|| get("stepsize").and_then(|(_, v)| v.parse().ok()));

    let mass_matrix = match (metric, rows.is_empty()) {
        (Metric::Identity, _) | (_, true) => None,
        (Metric::Diagonal, false) => {
            if rows.len() != 1 {
                return Err(Error::parse(
                    chain,
                    header_line,
                    format!("diagonal mass matrix spans {} rows", rows.len()),
                ));
            }
            rows.pop().map(MassMatrix::Diagonal)
        }
        (Metric::Dense, false) => {
            let k = rows.len();
            if rows.iter().any(|r| r.len() != k) {
                return Err(Error::parse(
                    chain,
                    header_line,
                    format!("dense mass matrix is not {}x{}", k, k),
                ));
            }
            let flat: Vec<f64> = rows.into_iter().flatten().collect();
            let m = Array2::from_shape_vec((k, k), flat)
                .map_err(|e| Error::parse(chain, header_line, e.to_string()))?;
            Some(MassMatrix::Dense(m))
        }
    };

    let schema = Arc::new(ColumnSchema::new(cols));
    let index = ColumnIndex::new(schema.clone(), ctx.index_order)
        .map_err(|e| Error::parse(chain, header_line, e.to_string()))?;

    debug!(
        "chain {}: {} columns, {} sampling draws, metric {:?}",
        chain,
        schema.len(),
        num_samples,
        metric
    );

    Ok(Header {
        config: ChainConfig {
            id,
            num_samples,
            num_warmup,
            save_warmup,
            thin,
            max_depth,
            metric,
            stepsize,
            mass_matrix,
        },
        schema,
        index,
        header_line,
    })
}
