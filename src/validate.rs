use crate::columns::ColumnSchema;
use crate::error::{Error, Result};
use crate::header::ChainConfig;

/// What the validator needs to know about one parsed chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainRecord<'a> {
    pub chain: usize,
    pub schema: &'a ColumnSchema,
    pub config: &'a ChainConfig,
    /// Data rows actually present in the file.
    pub rows: usize,
}

fn describe_mismatch(reference: &ColumnSchema, other: &ColumnSchema) -> String {
    if reference.len() != other.len() {
        return format!(
            "has {} columns, expected {}",
            other.len(),
            reference.len()
        );
    }
    match reference
        .names()
        .iter()
        .zip(other.names())
        .position(|(a, b)| a != b)
    {
        Some(i) => format!(
            "column {} is '{}', expected '{}'",
            i, other.names()[i], reference.names()[i]
        ),
        None => "columns differ".to_string(),
    }
}

/// Checks that every chain has the same columns in the same order, the
/// same number of sampling draws, and as many rows as it declares.
/// The first chain is the reference.
pub fn validate(records: &[ChainRecord<'_>]) -> Result<()> {
    let reference = match records.first() {
        Some(r) => r,
        None => return Ok(()),
    };

    for record in records {
        if record.schema != reference.schema {
            return Err(Error::Consistency {
                chain: record.chain,
                message: describe_mismatch(reference.schema, record.schema),
            });
        }
        let draws = record.config.sampling_rows();
        let expected_draws = reference.config.sampling_rows();
        if draws != expected_draws {
            return Err(Error::Consistency {
                chain: record.chain,
                message: format!(
                    "declares {} sampling draws, chain {} declares {}",
                    draws, reference.chain, expected_draws
                ),
            });
        }
    }

    for record in records {
        let expected = record.config.expected_rows();
        if record.rows != expected {
            return Err(Error::Consistency {
                chain: record.chain,
                message: format!(
                    "has {} draw rows but declares {}",
                    record.rows, expected
                ),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::Metric;

    fn schema(names: &[&str]) -> ColumnSchema {
        ColumnSchema::new(names.iter().map(|s| s.to_string()).collect())
    }

    fn config(num_samples: usize) -> ChainConfig {
        ChainConfig {
            id: None,
            num_samples,
            num_warmup: 1000,
            save_warmup: false,
            thin: 1,
            max_depth: None,
            metric: Metric::Diagonal,
            stepsize: None,
            mass_matrix: None,
        }
    }

    #[test]
    fn test_consistent_chains() {
        let s = schema(&["lp__", "theta"]);
        let c = config(1000);
        let records: Vec<ChainRecord> = (0..4)
            .map(|chain| ChainRecord {
                chain,
                schema: &s,
                config: &c,
                rows: 1000,
            })
            .collect();
        assert!(validate(&records).is_ok());
        assert!(validate(&[]).is_ok());
    }

    #[test]
    fn test_schema_mismatch() {
        let a = schema(&["lp__", "theta", "mu"]);
        let b = schema(&["lp__", "theta"]);
        let c = schema(&["lp__", "mu", "theta"]);
        let cfg = config(10);
        let record = |chain, schema| ChainRecord {
            chain,
            schema,
            config: &cfg,
            rows: 10,
        };

        let err = validate(&[record(0, &a), record(1, &b)]).unwrap_err();
        assert!(matches!(err, Error::Consistency { chain: 1, .. }));

        let err = validate(&[record(0, &a), record(1, &a), record(2, &c)]).unwrap_err();
        assert!(matches!(err, Error::Consistency { chain: 2, .. }));
        assert!(err.to_string().contains("column 1 is 'mu'"));
    }

    #[test]
    fn test_draw_count_mismatch() {
        let s = schema(&["lp__"]);
        let (a, b) = (config(1000), config(900));
        let err = validate(&[
            ChainRecord {
                chain: 0,
                schema: &s,
                config: &a,
                rows: 1000,
            },
            ChainRecord {
                chain: 1,
                schema: &s,
                config: &b,
                rows: 900,
            },
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Consistency { chain: 1, .. }));
    }

    #[test]
    fn test_truncated_chain() {
        let s = schema(&["lp__"]);
        let c = config(1000);
        let err = validate(&[
            ChainRecord {
                chain: 0,
                schema: &s,
                config: &c,
                rows: 1000,
            },
            ChainRecord {
                chain: 1,
                schema: &s,
                config: &c,
                rows: 900,
            },
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Consistency { chain: 1, .. }));
        assert!(err.to_string().contains("900"));
    }
}
