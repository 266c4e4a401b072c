//! CLI Error Types

use derive_more::{Display, Error};

pub type Error = exn::Exn<ErrorKind>;
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    #[display("configuration error")]
    Config,
    #[display("database operation failed")]
    Database,
    #[display("could not read from the terminal")]
    Terminal,
}

impl ErrorKind {
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Config => 2,
            Self::Database => 1,
            Self::Terminal => 3,
        }
    }
}
