//! Configuration Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("configuration could not be loaded")]
    Load,
    #[display("unknown database type: {_0}")]
    UnknownDialect(#[error(not(source))] String),
    #[display("malformed DSN: {_0}")]
    MalformedDsn(#[error(not(source))] String),
    #[display("could not connect to the configured database")]
    Connect,
}

impl ErrorKind {
    /// Only connecting can succeed on a later attempt; everything else needs
    /// the configuration fixed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connect)
    }
}
