use std::path::PathBuf;

use thiserror::Error;

use crate::run::ChainState;

/// Errors raised while turning chain output into a draw array or
/// while summarizing it.  Diagnostic threshold violations are never
/// errors; see [`crate::diagnostics::DiagnosticReport`].
#[derive(Error, Debug)]
pub enum Error {
    #[error("chain {chain}, line {line}{}: {message}", field_suffix(.field))]
    Parse {
        chain: usize,
        line: usize,
        field: Option<usize>,
        message: String,
    },
    #[error("chain {chain} is inconsistent with the run: {message}")]
    Consistency { chain: usize, message: String },
    #[error("chain {chain} is incomplete: {message}")]
    IncompleteRun { chain: usize, message: String },
    #[error("column '{column}': {source}")]
    Numeric {
        column: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("column '{column}': {draws} draws per chain, at least {required} needed")]
    InsufficientDraws {
        column: String,
        draws: usize,
        required: usize,
    },
    #[error("chain {chain}: failed to read {}: {source}", .path.display())]
    Io {
        chain: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Config(#[from] toml::de::Error),
    #[error("chain {chain} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        chain: usize,
        from: ChainState,
        to: ChainState,
    },
    #[error("'{0}' not found")]
    NotFound(String),
}

fn field_suffix(field: &Option<usize>) -> String {
    match field {
        Some(f) => format!(", field {}", f),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn parse(chain: usize, line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            chain,
            line,
            field: None,
            message: message.into(),
        }
    }

    /// Chain the error refers to, if any.
    pub fn chain(&self) -> Option<usize> {
        match self {
            Error::Parse { chain, .. }
            | Error::Consistency { chain, .. }
            | Error::IncompleteRun { chain, .. }
            | Error::Io { chain, .. }
            | Error::InvalidTransition { chain, .. } => Some(*chain),
            _ => None,
        }
    }
}

/// A failed build hands its error to every caller that waited on it.
/// Io, numeric and configuration sources are rebuilt from their text.
impl Clone for Error {
    fn clone(&self) -> Self {
        match self {
            Error::Parse {
                chain,
                line,
                field,
                message,
            } => Error::Parse {
                chain: *chain,
                line: *line,
                field: *field,
                message: message.clone(),
            },
            Error::Consistency { chain, message } => Error::Consistency {
                chain: *chain,
                message: message.clone(),
            },
            Error::IncompleteRun { chain, message } => Error::IncompleteRun {
                chain: *chain,
                message: message.clone(),
            },
            Error::Numeric { column, source } => Error::Numeric {
                column: column.clone(),
                source: anyhow::anyhow!("{:#}", source),
            },
            Error::InsufficientDraws {
                column,
                draws,
                required,
            } => Error::InsufficientDraws {
                column: column.clone(),
                draws: *draws,
                required: *required,
            },
            Error::Io {
                chain,
                path,
                source,
            } => Error::Io {
                chain: *chain,
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Error::Config(e) => Error::Config(serde::de::Error::custom(e.to_string())),
            Error::InvalidTransition { chain, from, to } => Error::InvalidTransition {
                chain: *chain,
                from: *from,
                to: *to,
            },
            Error::NotFound(name) => Error::NotFound(name.clone()),
        }
    }
}

/// Result type used across the crate.
pub type Result<T> = std::result::Result<T, Error>;
