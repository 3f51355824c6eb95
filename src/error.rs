use thiserror::Error;

/// Failure talking to a ledger store.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("DataFrame error: {0}")]
    Frame(#[from] polars::prelude::PolarsError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Malformed ledger data: {0}")]
    Malformed(String),
}

/// Failure turning a stored timestamp into a date.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TimestampError {
    #[error("unrecognized timestamp format: {0:?}")]
    Unrecognized(String),

    /// The value matched an accepted format but names no real instant.
    #[error("timestamp out of range: {0:?}")]
    OutOfRange(String),
}

/// Why a single transaction could not be expanded. Never escapes the traversal.
#[derive(Error, Debug)]
pub enum ExpandError {
    #[error("query failed: {0}")]
    Query(#[from] LedgerError),

    #[error("bad date: {0}")]
    Timestamp(#[from] TimestampError),
}

/// Errors that abort a whole build.
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Invalid seed {seed:?}: {reason}")]
    InvalidSeed { seed: String, reason: String },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub type Result<T> = std::result::Result<T, GraphError>;
