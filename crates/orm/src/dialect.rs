//! SQL dialects and the dialect-specific parts of statement text.

use crate::error::{Error, ErrorKind};
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::str::FromStr;

/// The SQL flavour of a backing store.
#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[display("sqlite")]
    Sqlite,
    #[display("postgres")]
    Postgres,
    #[display("cockroach")]
    Cockroach,
    #[display("mysql")]
    MySql,
    #[display("maria")]
    Maria,
}

impl FromStr for Dialect {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Self::Sqlite,
            "postgres" | "postgresql" | "pg" => Self::Postgres,
            "cockroach" | "cockroachdb" => Self::Cockroach,
            "mysql" => Self::MySql,
            "maria" | "mariadb" => Self::Maria,
            other => exn::bail!(ErrorKind::UnknownDialect(other.to_string())),
        })
    }
}

impl Dialect {
    /// PostgreSQL wire-compatible family.
    pub fn is_postgres_family(self) -> bool {
        matches!(self, Self::Postgres | Self::Cockroach)
    }

    /// MySQL wire-compatible family.
    pub fn is_mysql_family(self) -> bool {
        matches!(self, Self::MySql | Self::Maria)
    }

    /// Whether `?` placeholders are rewritten to `$n` before dispatch.
    pub fn numbers_placeholders(self) -> bool {
        !self.is_mysql_family()
    }

    /// Rewrite the builder's internal `?` placeholders for this dialect.
    ///
    /// For SQLite and the PostgreSQL family the i-th `?` (left to right,
    /// 1-indexed) becomes `$i`; MySQL-family statements are returned
    /// untouched. Question marks inside single-quoted string literals are
    /// not placeholders and are left alone.
    pub fn adapt_placeholders(self, sql: &str) -> Cow<'_, str> {
        if !self.numbers_placeholders() || !sql.contains('?') {
            return Cow::Borrowed(sql);
        }
        let mut out = String::with_capacity(sql.len() + 8);
        let mut index = 0usize;
        let mut quoted = false;
        for c in sql.chars() {
            match c {
                '\'' => {
                    quoted = !quoted;
                    out.push(c);
                },
                '?' if !quoted => {
                    index += 1;
                    out.push('$');
                    out.push_str(&index.to_string());
                },
                _ => out.push(c),
            }
        }
        Cow::Owned(out)
    }

    /// Column type holding every value of a `bytes`-wide integer.
    ///
    /// SQLite integers are always 8 bytes. The PostgreSQL family has no
    /// unsigned types, so unsigned values take the next wider signed type.
    pub(crate) fn integer_type(self, bytes: u8, unsigned: bool) -> &'static str {
        match self {
            Self::Sqlite => "INTEGER",
            Self::Postgres | Self::Cockroach => match (bytes, unsigned) {
                (..=1, _) | (2, false) => "SMALLINT",
                (2, true) | (3..=4, false) => "INTEGER",
                _ => "BIGINT",
            },
            Self::MySql | Self::Maria => match (bytes, unsigned) {
                (..=1, false) => "TINYINT",
                (..=1, true) => "TINYINT UNSIGNED",
                (2, false) => "SMALLINT",
                (2, true) => "SMALLINT UNSIGNED",
                (3..=4, false) => "INTEGER",
                (3..=4, true) => "INTEGER UNSIGNED",
                (_, false) => "BIGINT",
                (_, true) => "BIGINT UNSIGNED",
            },
        }
    }

    /// Auto-incrementing primary key clause for a `bytes`-wide integer.
    pub(crate) fn autoincrement(self, bytes: u8, unsigned: bool) -> String {
        match self {
            Self::Sqlite => "INTEGER PRIMARY KEY AUTOINCREMENT".to_string(),
            Self::Postgres | Self::Cockroach => {
                let serial = match self.integer_type(bytes, unsigned) {
                    "SMALLINT" => "SMALLSERIAL",
                    "INTEGER" => "SERIAL",
                    _ => "BIGSERIAL",
                };
                format!("{serial} PRIMARY KEY")
            },
            Self::MySql | Self::Maria => format!("{} PRIMARY KEY AUTO_INCREMENT", self.integer_type(bytes, unsigned)),
        }
    }

    pub(crate) fn now_default(self) -> &'static str {
        match self {
            Self::Postgres | Self::Cockroach => "DEFAULT now()",
            Self::Sqlite | Self::MySql | Self::Maria => "DEFAULT CURRENT_TIMESTAMP",
        }
    }

    pub(crate) fn float_type(self) -> &'static str {
        match self {
            Self::Sqlite => "REAL",
            Self::Postgres | Self::Cockroach => "DOUBLE PRECISION",
            Self::MySql | Self::Maria => "DOUBLE",
        }
    }

    pub(crate) fn timestamp_type(self) -> &'static str {
        match self {
            Self::MySql | Self::Maria => "DATETIME",
            Self::Sqlite | Self::Postgres | Self::Cockroach => "TIMESTAMP",
        }
    }

    /// Name of the string-length function used when translating `len(x)` in
    /// `check:` expressions.
    pub(crate) fn length_function(self) -> &'static str {
        match self {
            Self::Sqlite => "length",
            _ => "char_length",
        }
    }
}
