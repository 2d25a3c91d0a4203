use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Order in which the engine flattens multi-index parameters into
/// columns.  `ColumnMajor` means the first index varies fastest
/// (`m.1.1, m.2.1, m.1.2, m.2.2`), which is what current engine
/// releases write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum IndexOrder {
    #[default]
    ColumnMajor,
    RowMajor,
}

impl IndexOrder {
    /// Multi-index (1-based) of the `position`-th element of a parameter
    /// with the given extents.
    pub fn unflatten(self, position: usize, extents: &[usize]) -> Vec<usize> {
        let mut index = vec![0; extents.len()];
        let mut rest = position;
        let dims: Box<dyn Iterator<Item = usize>> = match self {
            IndexOrder::ColumnMajor => Box::new(0..extents.len()),
            IndexOrder::RowMajor => Box::new((0..extents.len()).rev()),
        };
        for d in dims {
            index[d] = rest % extents[d] + 1;
            rest /= extents[d];
        }
        index
    }
}

/// Fixed limits applied by the diagnostics engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Used when a chain does not record its own `max_depth`.
    pub max_treedepth_default: u32,
    /// E-BFMI below this value is flagged.
    pub min_ebfmi: f64,
    /// N_eff / total draws below this value is flagged.
    pub min_neff_ratio: f64,
    /// Split R hat above this value is flagged.
    pub max_rhat: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            max_treedepth_default: 10,
            min_ebfmi: 0.3,
            min_neff_ratio: 0.001,
            max_rhat: 1.1,
        }
    }
}

/// Settings shared by every stage.  Passed by reference instead of
/// living in global state so each stage is a function of its inputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Context {
    pub comment_prefix: char,
    pub delimiter: char,
    pub index_order: IndexOrder,
    pub quantiles: Vec<f64>,
    pub thresholds: Thresholds,
}

impl Default for Context {
    fn default() -> Self {
        Self {
            comment_prefix: '#',
            delimiter: ',',
            index_order: IndexOrder::ColumnMajor,
            quantiles: vec![0.05, 0.5, 0.95],
            thresholds: Thresholds::default(),
        }
    }
}

impl Context {
    /// Reads a context from TOML text.  Missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unflatten_column_major() {
        let order = IndexOrder::ColumnMajor;
        let extents = [2, 3];
        assert_eq!(order.unflatten(0, &extents), vec![1, 1]);
        assert_eq!(order.unflatten(1, &extents), vec![2, 1]);
        assert_eq!(order.unflatten(2, &extents), vec![1, 2]);
        assert_eq!(order.unflatten(5, &extents), vec![2, 3]);
    }

    #[test]
    fn test_unflatten_row_major() {
        let order = IndexOrder::RowMajor;
        let extents = [2, 3];
        assert_eq!(order.unflatten(0, &extents), vec![1, 1]);
        assert_eq!(order.unflatten(1, &extents), vec![1, 2]);
        assert_eq!(order.unflatten(3, &extents), vec![2, 1]);
    }

    #[test]
    fn test_context_from_toml() {
        let ctx = Context::from_toml_str(
            r#"
            index_order = "row_major"

            [thresholds]
            max_rhat = 1.05
            "#,
        )
        .unwrap();
        assert_eq!(ctx.index_order, IndexOrder::RowMajor);
        assert_abs_diff_eq!(ctx.thresholds.max_rhat, 1.05);
        assert_abs_diff_eq!(ctx.thresholds.min_ebfmi, 0.3);
        assert_eq!(ctx.quantiles, vec![0.05, 0.5, 0.95]);
        assert_eq!(ctx.comment_prefix, '#');

        assert!(Context::from_toml_str("index_order = 3").is_err());
    }
}
