//! Parsing of data rows and the assembled `(draw, chain, column)` array.
use std::io::BufRead;
use std::sync::Arc;

use ndarray::{s, Array2, Array3, ArrayD, ArrayView2, Axis, IxDyn};

use crate::columns::{ColumnIndex, ColumnSchema};
use crate::config::Context;
use crate::error::{Error, Result};
use crate::header::{ChainConfig, Header};
use crate::Sequences;

/// Data rows of one chain, warmup removed.
#[derive(Debug, Clone)]
pub struct ChainDraws {
    /// Data rows found in the file, warmup included.
    pub rows: usize,
    /// `(draw, column)` values of the sampling rows.
    pub draws: Array2<f64>,
}

/// Reads every data row that follows the header of `header`.  Comment
/// lines are skipped wherever they appear.
pub fn parse_draws<R: BufRead>(
    chain: usize,
    reader: R,
    header: &Header,
    ctx: &Context,
) -> Result<ChainDraws> {
    let ncols = header.schema.len();
    let mut values: Vec<f64> = Vec::with_capacity(header.config.expected_rows() * ncols);
    let mut rows = 0;

    for (i, line) in reader.lines().enumerate() {
        let lineno = i + 1;
        let line = line.map_err(|e| Error::parse(chain, lineno, e.to_string()))?;
        let trimmed = line.trim();
        if lineno <= header.header_line
            || trimmed.is_empty()
            || trimmed.starts_with(ctx.comment_prefix)
        {
            continue;
        }

        let mut fields = 0;
        for (f, field) in trimmed.split(ctx.delimiter).enumerate() {
            if f >= ncols {
                fields = f + 1;
                break;
            }
            let field = field.trim();
            let value = field.parse::<f64>().map_err(|_| Error::Parse {
                chain,
                line: lineno,
                field: Some(f + 1),
                message: format!("draw {}: '{}' is not a number", rows + 1, field),
            })?;
            values.push(value);
            fields = f + 1;
        }
        if fields != ncols {
            return Err(Error::Parse {
                chain,
                line: lineno,
                field: None,
                message: format!(
                    "draw {}: expected {} fields, found {}{}",
                    rows + 1,
                    ncols,
                    fields,
                    if fields > ncols { " or more" } else { "" }
                ),
            });
        }
        rows += 1;
    }

    let warmup = header.config.warmup_rows().min(rows);
    let kept = values.split_off(warmup * ncols);
    let draws = Array2::from_shape_vec((rows - warmup, ncols), kept)
        .map_err(|e| Error::parse(chain, header.header_line, e.to_string()))?;
    Ok(ChainDraws { rows, draws })
}

/// Immutable `(draw, chain, column)` array of a validated run.
#[derive(Debug, Clone)]
pub struct DrawArray {
    values: Array3<f64>,
    index: ColumnIndex,
    configs: Vec<ChainConfig>,
}

impl DrawArray {
    /// Stacks per-chain `(draw, column)` blocks along the chain axis.
    /// Blocks whose shape differs from the first one, or whose width
    /// differs from the index, are a consistency error for that chain.
    pub fn from_chains(
        index: ColumnIndex,
        configs: Vec<ChainConfig>,
        chains: &[Array2<f64>],
    ) -> Result<Self> {
        let (num_draws, num_columns) = chains.first().map(|c| c.dim()).unwrap_or((0, index.len()));
        let mut values = Array3::zeros((num_draws, chains.len(), num_columns));
        for (c, block) in chains.iter().enumerate() {
            if block.dim() != (num_draws, index.len()) {
                let (d, k) = block.dim();
                return Err(Error::Consistency {
                    chain: c,
                    message: format!(
                        "block is {} draws x {} columns, expected {} x {}",
                        d,
                        k,
                        num_draws,
                        index.len()
                    ),
                });
            }
            values.slice_mut(s![.., c, ..]).assign(block);
        }
        Ok(DrawArray {
            values,
            index,
            configs,
        })
    }

    /// The whole `(draw, chain, column)` array.
    pub fn values(&self) -> &Array3<f64> {
        &self.values
    }

    /// `(draws, chains, columns)`
    pub fn shape(&self) -> (usize, usize, usize) {
        self.values.dim()
    }

    /// Sampling draws per chain.
    pub fn num_draws(&self) -> usize {
        self.values.len_of(Axis(0))
    }

    /// Number of chains.
    pub fn num_chains(&self) -> usize {
        self.values.len_of(Axis(1))
    }

    /// Number of columns.
    pub fn num_columns(&self) -> usize {
        self.values.len_of(Axis(2))
    }

    /// Parameter to column mapping.
    pub fn index(&self) -> &ColumnIndex {
        &self.index
    }

    /// Column names shared by every chain.
    pub fn schema(&self) -> &Arc<ColumnSchema> {
        self.index.schema()
    }

    /// Per-chain configuration, in chain order.
    pub fn configs(&self) -> &[ChainConfig] {
        &self.configs
    }

    /// `(draw, chain)` view of one column.
    pub fn column(&self, position: usize) -> ArrayView2<'_, f64> {
        self.values.index_axis(Axis(2), position)
    }

    /// `(draw, chain)` view of the column called `column_name`.
    pub fn column_by_name(&self, column_name: &str) -> Option<ArrayView2<'_, f64>> {
        self.index.column(column_name).map(|p| self.column(p))
    }

    /// Draws of one column, one vector per chain.
    pub fn chain_sequences(&self, position: usize) -> Sequences {
        self.column(position)
            .axis_iter(Axis(1))
            .map(|chain| chain.to_vec())
            .collect()
    }

    /// Reassembles parameter `name` from its flattened columns into an
    /// array of shape `[draws, chains, extents...]`.
    pub fn variable(&self, name: &str) -> Result<ArrayD<f64>> {
        let param = self
            .index
            .get(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        let dims = param.shape.dims();
        let (num_draws, num_chains, _) = self.shape();
        let mut shape = vec![num_draws, num_chains];
        shape.extend_from_slice(&dims);

        let mut out = ArrayD::zeros(IxDyn(&shape));
        for (k, position) in param.columns.clone().enumerate() {
            let element = self.index.order().unflatten(k, &dims);
            let mut lane = out.view_mut();
            for &i in element.iter().rev() {
                let last = Axis(lane.ndim() - 1);
                lane = lane.index_axis_move(last, i - 1);
            }
            lane.assign(&self.column(position));
        }
        Ok(out)
    }
}
