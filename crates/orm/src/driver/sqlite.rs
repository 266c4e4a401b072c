use super::{Driver, ExecResult, PoolSettings};
use crate::dialect::Dialect;
use crate::error::{ErrorKind, Result};
use crate::row::Row;
use crate::value::Value;
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::query::Query;
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteRow, SqliteValueRef};
use sqlx::{Column, Row as _, Sqlite, TypeInfo, Value as _, ValueRef};
use std::str::FromStr;
use std::time::Duration;
use tracing::instrument;

/// SQLite, pooled through `sqlx`.
#[derive(Debug, Clone)]
pub struct SqliteDriver {
    pool: SqlitePool,
}

impl SqliteDriver {
    /// Connect to `url` (`sqlite://path?mode=rwc`, `sqlite::memory:`).
    ///
    /// In-memory databases live and die with their connection, so they get
    /// a single connection that is never retired.
    #[instrument(skip(settings))]
    pub async fn connect(url: &str, settings: PoolSettings) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .or_raise(|| ErrorKind::MalformedDsn(url.to_string()))?
            .foreign_keys(true)
            .busy_timeout(Duration::from_millis(1500));
        let pool = if is_in_memory(url) {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await
        } else {
            settings
                .pool_options::<Sqlite>()
                .connect_with(options.journal_mode(SqliteJournalMode::Wal))
                .await
        };
        Ok(Self { pool: pool.map_err(ErrorKind::driver)? })
    }

    /// A private in-memory database.
    pub async fn connect_in_memory() -> Result<Self> {
        Self::connect("sqlite::memory:", PoolSettings::primary()).await
    }
}

fn is_in_memory(url: &str) -> bool {
    url.contains(":memory:") || url.contains("mode=memory")
}

#[async_trait]
impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        let rows = bind(sqlx::query(sql), args)?.fetch_all(&self.pool).await.map_err(ErrorKind::driver)?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        let result = bind(sqlx::query(sql), args)?.execute(&self.pool).await.map_err(ErrorKind::driver)?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: Some(result.last_insert_rowid()),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind<'q>(
    mut query: Query<'q, Sqlite, SqliteArguments<'q>>,
    args: &'q [Value],
) -> Result<Query<'q, Sqlite, SqliteArguments<'q>>> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(i64::from(*v)),
            Value::Int(v) => query.bind(*v),
            Value::UInt(v) => query.bind(
                i64::try_from(*v).or_raise(|| ErrorKind::Conversion(format!("{v} does not fit a signed 64-bit column")))?,
            ),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Bytes(v) => query.bind(v.as_slice()),
            // Same textual form as CURRENT_TIMESTAMP, so comparisons line up.
            Value::Timestamp(v) => query.bind(v.to_sql_string()),
        };
    }
    Ok(query)
}

fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let raw = row.try_get_raw(column.ordinal()).map_err(ErrorKind::driver)?;
        out.push(column.name(), decode_value(raw).map_err(ErrorKind::driver)?);
    }
    Ok(out)
}

fn decode_value(raw: SqliteValueRef<'_>) -> std::result::Result<Value, sqlx::Error> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    let owned = ValueRef::to_owned(&raw);
    Ok(match type_name.as_str() {
        "INTEGER" | "INT" | "INT4" | "INT8" | "BIGINT" | "BOOLEAN" | "BOOL" => Value::Int(owned.try_decode_unchecked()?),
        "REAL" | "FLOAT" | "DOUBLE" | "NUMERIC" => Value::Real(owned.try_decode_unchecked()?),
        "BLOB" => Value::Bytes(owned.try_decode_unchecked()?),
        _ => Value::Text(owned.try_decode_unchecked()?),
    })
}
