//! ORM Error Types
//!
//! This module provides structured errors using `exn` for automatic location
//! tracking and error tree construction. Variants are grouped by what the
//! caller is expected to do about them: fix configuration, fix the calling
//! code, retry the statement, or treat the outcome as a normal empty result.

use derive_more::{Display, Error};

/// An ORM error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for ORM operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// These describe what the caller should *do*, not what went wrong internally.
#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    // Configuration: fatal at start-up.
    #[display("unknown database dialect: {_0}")]
    UnknownDialect(#[error(not(source))] String),
    #[display("malformed DSN: {_0}")]
    MalformedDsn(#[error(not(source))] String),

    // Registry.
    #[display("database already registered: {_0}")]
    AlreadyRegistered(#[error(not(source))] String),
    #[display("unknown database: {_0}")]
    UnknownDatabase(#[error(not(source))] String),

    // Builder misuse: programmer errors, surfaced before anything is sent.
    #[display("no table bound to query")]
    NoTable,
    #[display("refusing to update or delete without a WHERE clause")]
    MissingWhere,
    #[display("{columns} columns given but {values} values")]
    LengthMismatch { columns: usize, values: usize },

    // Dispatch.
    /// The driver rejected the statement; carries the dialect's own message.
    #[display("{_0}")]
    Driver(#[error(not(source))] String),
    #[display("statement cancelled")]
    Cancelled,
    #[display("statement timed out")]
    Timeout,

    // Result.
    #[display("no rows found")]
    NotFound,
    /// A driver value could not be coerced into the requested field type.
    #[display("cannot convert value: {_0}")]
    Conversion(#[error(not(source))] String),

    // Migration.
    #[display("schema drift refused by migration policy: {_0}")]
    SchemaDrift(#[error(not(source))] String),
    #[display("operator prompt could not be answered")]
    Prompt,

    // Administration.
    #[display("password could not be hashed")]
    Hash,
    #[display("no core installed")]
    NotInstalled,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Driver(_) | Self::Timeout)
    }

    /// Returns `true` for the benign "nothing matched" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }

    /// Wrap a driver error, keeping its message verbatim and the original
    /// error as a child frame in the error tree.
    #[track_caller]
    pub fn driver(err: sqlx::Error) -> Error {
        let message = match &err {
            sqlx::Error::Database(db) => db.message().to_string(),
            other => other.to_string(),
        };
        exn::Exn::new(err).raise(Self::Driver(message))
    }
}
