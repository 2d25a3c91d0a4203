//! Maps logical parameters to the flattened columns that hold them.
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};

use crate::config::IndexOrder;
use crate::error::Error;

/// Ordered list of column names from one chain's header row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ColumnSchema(Vec<String>);

impl ColumnSchema {
    /// Schema over the header names, in file order.
    pub fn new(names: Vec<String>) -> Self {
        ColumnSchema(names)
    }

    /// Column names, in file order.
    pub fn names(&self) -> &[String] {
        &self.0
    }

    /// Number of columns.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the header has no columns.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Position of the column called `name`.
    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|n| n == name)
    }
}

impl fmt::Display for ColumnSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(","))
    }
}

/// Dimensionality of a logical parameter, derived from the largest
/// suffix index seen per dimension.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParameterShape {
    Scalar,
    Vector(usize),
    Matrix(usize, usize),
    Array(Vec<usize>),
}

impl ParameterShape {
    fn from_extents(extents: Vec<usize>) -> Self {
        match extents.as_slice() {
            [] => ParameterShape::Scalar,
            [n] => ParameterShape::Vector(*n),
            [r, c] => ParameterShape::Matrix(*r, *c),
            _ => ParameterShape::Array(extents),
        }
    }

    /// Extents per dimension; empty for scalars.
    pub fn dims(&self) -> Vec<usize> {
        match self {
            ParameterShape::Scalar => vec![],
            ParameterShape::Vector(n) => vec![*n],
            ParameterShape::Matrix(r, c) => vec![*r, *c],
            ParameterShape::Array(extents) => extents.clone(),
        }
    }

    /// Number of flattened columns.
    pub fn len(&self) -> usize {
        self.dims().iter().product()
    }

    /// True for a parameter with no elements.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A parameter and the contiguous run of columns it occupies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub name: String,
    pub shape: ParameterShape,
    pub columns: Range<usize>,
}

impl Parameter {
    /// Engine-internal columns such as `lp__` or `divergent__`.
    pub fn is_sampler_column(&self) -> bool {
        self.name.ends_with("__")
    }
}

/// Splits `theta.2.1` into `("theta", [2, 1])`.
fn split_name(name: &str) -> Result<(&str, Vec<usize>)> {
    let mut parts = name.split('.');
    let base = parts.next().unwrap_or_default();
    if base.is_empty() {
        bail!("column name '{}' has an empty base name", name);
    }
    let suffixes = parts
        .map(|p| match p.parse::<usize>() {
            Ok(i) if i >= 1 => Ok(i),
            _ => Err(anyhow!(
                "column name '{}' has an invalid index '{}' (expected a 1-based integer)",
                name,
                p
            )),
        })
        .collect::<Result<Vec<_>>>()?;
    Ok((base, suffixes))
}

/// Parameter lookup over a validated [`ColumnSchema`].
#[derive(Debug, Clone)]
pub struct ColumnIndex {
    schema: Arc<ColumnSchema>,
    order: IndexOrder,
    parameters: Vec<Parameter>,
    by_name: HashMap<String, usize>,
}

impl ColumnIndex {
    /// Groups the schema's columns into parameters.  Fails when a
    /// parameter's columns are not contiguous, when its suffixes are not
    /// dense, or when they do not appear in `order`.
    pub fn new(schema: Arc<ColumnSchema>, order: IndexOrder) -> Result<Self> {
        let mut parameters: Vec<Parameter> = Vec::new();
        let mut by_name = HashMap::new();
        let mut groups: Vec<(&str, usize, Vec<Vec<usize>>)> = Vec::new();

        for (position, name) in schema.names().iter().enumerate() {
            let (base, suffixes) = split_name(name)?;
            match groups.last_mut() {
                Some((last, _, members)) if *last == base => members.push(suffixes),
                _ => groups.push((base, position, vec![suffixes])),
            }
        }

        for (base, start, members) in groups {
            if by_name.contains_key(base) {
                bail!("columns of '{}' are not contiguous", base);
            }
            let ndim = members[0].len();
            if members.iter().any(|m| m.len() != ndim) {
                bail!("columns of '{}' mix different numbers of indices", base);
            }
            if ndim == 0 && members.len() > 1 {
                bail!("column '{}' appears more than once", base);
            }
            let extents: Vec<usize> = (0..ndim)
                .map(|d| members.iter().map(|m| m[d]).max().unwrap_or(0))
                .collect();
            if extents.iter().product::<usize>() != members.len() {
                bail!(
                    "columns of '{}' do not cover a dense {:?} block ({} columns)",
                    base,
                    extents,
                    members.len()
                );
            }
            for (k, found) in members.iter().enumerate() {
                let expected = order.unflatten(k, &extents);
                if *found != expected {
                    bail!(
                        "column {} of '{}' has index {:?}, expected {:?} for {:?} order",
                        start + k,
                        base,
                        found,
                        expected,
                        order
                    );
                }
            }
            by_name.insert(base.to_string(), parameters.len());
            parameters.push(Parameter {
                name: base.to_string(),
                shape: ParameterShape::from_extents(extents),
                columns: start..start + members.len(),
            });
        }

        Ok(ColumnIndex {
            schema,
            order,
            parameters,
            by_name,
        })
    }

    /// Schema the index was built from.
    pub fn schema(&self) -> &Arc<ColumnSchema> {
        &self.schema
    }

    /// Flattening order the columns were checked against.
    pub fn order(&self) -> IndexOrder {
        self.order
    }

    /// Number of columns covered by the index.
    pub fn len(&self) -> usize {
        self.schema.len()
    }

    /// True when the schema has no columns.
    pub fn is_empty(&self) -> bool {
        self.schema.is_empty()
    }

    /// Parameter `name`, if the schema has one.
    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.by_name.get(name).map(|&i| &self.parameters[i])
    }

    /// Shape of parameter `name`.
    pub fn shape_of(&self, name: &str) -> crate::Result<&ParameterShape> {
        self.get(name)
            .map(|p| &p.shape)
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Column positions of `name`, in flattening order.
    pub fn columns_of(&self, name: &str) -> crate::Result<Vec<usize>> {
        self.get(name)
            .map(|p| p.columns.clone().collect())
            .ok_or_else(|| Error::NotFound(name.to_string()))
    }

    /// Position of a single column, e.g. `m.2.1`.
    pub fn column(&self, column_name: &str) -> Option<usize> {
        self.schema.position(column_name)
    }

    /// Column holding element `index` (1-based) of parameter `name`.
    pub fn element_column(&self, name: &str, index: &[usize]) -> Option<usize> {
        let param = self.get(name)?;
        let dims = param.shape.dims();
        if index.len() != dims.len() || index.iter().zip(&dims).any(|(&i, &d)| i < 1 || i > d) {
            return None;
        }
        let mut offset = 0;
        let mut stride = 1;
        let axes: Vec<usize> = match self.order {
            IndexOrder::ColumnMajor => (0..dims.len()).collect(),
            IndexOrder::RowMajor => (0..dims.len()).rev().collect(),
        };
        for d in axes {
            offset += (index[d] - 1) * stride;
            stride *= dims[d];
        }
        Some(param.columns.start + offset)
    }

    /// Parameters in column order, including sampler columns.
    pub fn all(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Model parameters and generated quantities.
    pub fn parameters(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| !p.is_sampler_column())
    }

    /// Engine-internal columns (`lp__`, `divergent__`, ...).
    pub fn sampler_columns(&self) -> impl Iterator<Item = &Parameter> {
        self.parameters.iter().filter(|p| p.is_sampler_column())
    }
}
