use thiserror::Error;

/// Unified error type for Shardgate crates.
use sqlparser::parser::ParserError;

/// The pipeline stage an error originated from.
///
/// Callers use this to tell a statement the router refused apart from a
/// response the merge engine could not combine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Config,
    Routing,
    Merge,
    Upstream,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Sharding catalog error: {0}")]
    Catalog(String),
    #[error("SQL parsing error: {0}")]
    SqlParser(#[from] ParserError),
    #[error("Operation not supported: {0}")]
    NotSupported(String),
    /// The statement cannot be routed safely.
    #[error("{0}")]
    Unparsable(String),
    #[error("Merge error: {0}")]
    Merge(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn unparsable(msg: impl Into<String>) -> Self {
        Error::Unparsable(msg.into())
    }

    pub fn stage(&self) -> Stage {
        match self {
            Error::Config(_) | Error::Catalog(_) | Error::Json(_) | Error::Io(_) => Stage::Config,
            Error::SqlParser(_) | Error::NotSupported(_) | Error::Unparsable(_) => Stage::Routing,
            Error::Merge(_) => Stage::Merge,
        }
    }
}
