//! The driver seam: the only place SQL leaves the process.
//!
//! Each backing store family has a pooled [`Driver`] built on `sqlx`; the
//! `mock` feature adds [`MockDriver`], which records statements instead of
//! sending them anywhere.

use crate::dialect::Dialect;
use crate::error::{ErrorKind, Result};
use crate::row::Row;
use crate::value::Value;
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

#[cfg(any(test, feature = "mock"))]
mod mock;
#[cfg(feature = "mysql")]
mod mysql;
#[cfg(feature = "postgres")]
mod postgres;
#[cfg(feature = "sqlite")]
mod sqlite;

#[cfg(any(test, feature = "mock"))]
pub use mock::{MockDriver, Statement};
#[cfg(feature = "mysql")]
pub use mysql::MySqlDriver;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteDriver;

/// Outcome of a statement that returns no rows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecResult {
    pub rows_affected: u64,
    /// Row id of the last inserted row, where the dialect reports one.
    pub last_insert_id: Option<i64>,
}

/// A pooled connection to one physical store.
///
/// Statements arrive with placeholders already adapted to [`Driver::dialect`].
#[async_trait]
pub trait Driver: Send + Sync + Debug {
    fn dialect(&self) -> Dialect;

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>>;

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult>;

    /// Close every pooled connection. Further statements fail.
    async fn close(&self);
}

/// Connection pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    pub max_open: u32,
    /// Advisory: `sqlx` pools keep no idle floor beyond `min_connections`,
    /// so this is reported but only `idle_time` bounds idle connections.
    pub max_idle: u32,
    pub max_lifetime: Duration,
    pub idle_time: Duration,
}

impl PoolSettings {
    const LIFETIME: Duration = Duration::from_secs(30 * 60);
    const IDLE_TIME: Duration = Duration::from_secs(10);

    /// Settings for the first (default) database.
    pub fn primary() -> Self {
        Self::with_max_open(5)
    }

    /// Settings for every database registered after the first.
    pub fn secondary() -> Self {
        Self::with_max_open(10)
    }

    /// `primary()` for the first registration, `secondary()` otherwise.
    pub fn for_position(index: usize) -> Self {
        if index == 0 { Self::primary() } else { Self::secondary() }
    }

    pub fn with_max_open(max_open: u32) -> Self {
        Self {
            max_open,
            max_idle: max_open / 2,
            max_lifetime: Self::LIFETIME,
            idle_time: Self::IDLE_TIME,
        }
    }

    #[cfg(any(feature = "sqlite", feature = "postgres", feature = "mysql"))]
    pub(crate) fn pool_options<DB: sqlx::Database>(&self) -> sqlx::pool::PoolOptions<DB> {
        sqlx::pool::PoolOptions::new()
            .max_connections(self.max_open)
            .min_connections(0)
            .max_lifetime(self.max_lifetime)
            .idle_timeout(self.idle_time)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self::primary()
    }
}

/// Open a pooled connection for `dialect` at `url`.
///
/// Fails with [`ErrorKind::UnknownDialect`] when support for the dialect's
/// family was not compiled in.
#[allow(unused_variables)]
pub async fn connect(dialect: Dialect, url: &str, settings: PoolSettings) -> Result<Arc<dyn Driver>> {
    match dialect {
        #[cfg(feature = "sqlite")]
        Dialect::Sqlite => Ok(Arc::new(SqliteDriver::connect(url, settings).await?)),
        #[cfg(feature = "postgres")]
        Dialect::Postgres | Dialect::Cockroach => Ok(Arc::new(PostgresDriver::connect(dialect, url, settings).await?)),
        #[cfg(feature = "mysql")]
        Dialect::MySql | Dialect::Maria => Ok(Arc::new(MySqlDriver::connect(dialect, url, settings).await?)),
        #[allow(unreachable_patterns)]
        other => exn::bail!(ErrorKind::UnknownDialect(format!("{other} (support not compiled in)"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_settings() {
        let first = PoolSettings::for_position(0);
        assert_eq!(first.max_open, 5);
        assert_eq!(first.max_idle, 2);
        assert_eq!(first.max_lifetime, Duration::from_secs(1800));
        assert_eq!(first.idle_time, Duration::from_secs(10));
        let later = PoolSettings::for_position(3);
        assert_eq!(later.max_open, 10);
        assert_eq!(later.max_idle, 5);
    }
}
