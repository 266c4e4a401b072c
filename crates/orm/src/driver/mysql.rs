use super::{Driver, ExecResult, PoolSettings};
use crate::dialect::Dialect;
use crate::error::{ErrorKind, Result};
use crate::mapper::bytes_to_text;
use crate::row::Row;
use crate::value::{Timestamp, Value};
use async_trait::async_trait;
use sqlx::mysql::{MySqlArguments, MySqlPool, MySqlRow, MySqlValueRef};
use sqlx::query::Query;
use sqlx::{Column, MySql, Row as _, TypeInfo, Value as _, ValueRef};
use time::{Date, PrimitiveDateTime, Time};
use tracing::instrument;

/// MySQL and MariaDB, pooled through `sqlx`.
#[derive(Debug, Clone)]
pub struct MySqlDriver {
    dialect: Dialect,
    pool: MySqlPool,
}

impl MySqlDriver {
    #[instrument(skip(url, settings))]
    pub async fn connect(dialect: Dialect, url: &str, settings: PoolSettings) -> Result<Self> {
        let pool = settings.pool_options::<MySql>().connect(url).await.map_err(ErrorKind::driver)?;
        Ok(Self { dialect, pool })
    }
}

#[async_trait]
impl Driver for MySqlDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        let rows = bind(sqlx::query(sql), args).fetch_all(&self.pool).await.map_err(ErrorKind::driver)?;
        rows.iter().map(|row| decode_row(row).map(bytes_to_text)).collect()
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        let result = bind(sqlx::query(sql), args).execute(&self.pool).await.map_err(ErrorKind::driver)?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: i64::try_from(result.last_insert_id()).ok().filter(|id| *id != 0),
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

fn bind<'q>(mut query: Query<'q, MySql, MySqlArguments>, args: &'q [Value]) -> Query<'q, MySql, MySqlArguments> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(None::<String>),
            Value::Bool(v) => query.bind(i64::from(*v)),
            Value::Int(v) => query.bind(*v),
            Value::UInt(v) => query.bind(*v),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Bytes(v) => query.bind(v.as_slice()),
            Value::Timestamp(v) => query.bind(v.0),
        };
    }
    query
}

fn decode_row(row: &MySqlRow) -> Result<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let raw = row.try_get_raw(column.ordinal()).map_err(ErrorKind::driver)?;
        out.push(column.name(), decode_value(raw).map_err(ErrorKind::driver)?);
    }
    Ok(out)
}

fn decode_value(raw: MySqlValueRef<'_>) -> std::result::Result<Value, sqlx::Error> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    let owned = ValueRef::to_owned(&raw);
    Ok(match type_name.as_str() {
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" | "YEAR" => {
            Value::Int(owned.try_decode_unchecked()?)
        },
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED" | "BIGINT UNSIGNED" => {
            Value::UInt(owned.try_decode_unchecked()?)
        },
        "FLOAT" => Value::Real(f64::from(owned.try_decode_unchecked::<f32>()?)),
        "DOUBLE" => Value::Real(owned.try_decode_unchecked()?),
        "DATETIME" | "TIMESTAMP" => Value::Timestamp(Timestamp(owned.try_decode_unchecked::<PrimitiveDateTime>()?)),
        "DATE" => Value::Timestamp(Timestamp(PrimitiveDateTime::new(owned.try_decode_unchecked::<Date>()?, Time::MIDNIGHT))),
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" => {
            Value::Bytes(owned.try_decode_unchecked()?)
        },
        // DECIMAL and the character types arrive as text on the wire.
        _ => Value::Bytes(owned.try_decode_unchecked()?),
    })
}
