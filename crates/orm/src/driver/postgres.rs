use super::{Driver, ExecResult, PoolSettings};
use crate::dialect::Dialect;
use crate::error::{ErrorKind, Result};
use crate::row::Row;
use crate::value::{Timestamp, Value};
use async_trait::async_trait;
use exn::ResultExt;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::postgres::types::Oid;
use sqlx::postgres::{PgArgumentBuffer, PgArguments, PgPool, PgRow, PgTypeInfo, PgValueRef};
use sqlx::query::Query;
use sqlx::{Column, Encode, Postgres, Row as _, Type, TypeInfo, Value as _, ValueRef};
use time::{OffsetDateTime, PrimitiveDateTime, UtcOffset};
use tracing::instrument;

/// PostgreSQL and CockroachDB, pooled through `sqlx`.
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    dialect: Dialect,
    pool: PgPool,
}

impl PostgresDriver {
    #[instrument(skip(url, settings))]
    pub async fn connect(dialect: Dialect, url: &str, settings: PoolSettings) -> Result<Self> {
        let pool = settings.pool_options::<Postgres>().connect(url).await.map_err(ErrorKind::driver)?;
        Ok(Self { dialect, pool })
    }
}

#[async_trait]
impl Driver for PostgresDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        let rows = bind(statement(sql, args), args)?.fetch_all(&self.pool).await.map_err(ErrorKind::driver)?;
        rows.iter().map(decode_row).collect()
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        let result = bind(statement(sql, args), args)?.execute(&self.pool).await.map_err(ErrorKind::driver)?;
        Ok(ExecResult {
            rows_affected: result.rows_affected(),
            last_insert_id: None,
        })
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// NULL declared with OID 0, leaving the server to infer the parameter's
/// type from the statement, as it does for an untyped `NULL` literal.
#[derive(Debug, Clone, Copy)]
struct UntypedNull;

impl Type<Postgres> for UntypedNull {
    fn type_info() -> PgTypeInfo {
        PgTypeInfo::with_oid(Oid(0))
    }
}

impl Encode<'_, Postgres> for UntypedNull {
    fn encode_by_ref(&self, _buf: &mut PgArgumentBuffer) -> std::result::Result<IsNull, BoxDynError> {
        Ok(IsNull::Yes)
    }
}

/// Statements binding NULL are prepared unnamed: the parameter types the
/// server inferred for them must not be reused for later, typed bindings.
fn is_cacheable(args: &[Value]) -> bool {
    !args.iter().any(|arg| matches!(arg, Value::Null))
}

fn statement<'q>(sql: &'q str, args: &[Value]) -> Query<'q, Postgres, PgArguments> {
    sqlx::query(sql).persistent(is_cacheable(args))
}

fn bind<'q>(mut query: Query<'q, Postgres, PgArguments>, args: &'q [Value]) -> Result<Query<'q, Postgres, PgArguments>> {
    for arg in args {
        query = match arg {
            Value::Null => query.bind(UntypedNull),
            // Booleans are stored as 0/1 integers.
            Value::Bool(v) => query.bind(i64::from(*v)),
            Value::Int(v) => query.bind(*v),
            Value::UInt(v) => query.bind(
                i64::try_from(*v).or_raise(|| ErrorKind::Conversion(format!("{v} does not fit a signed 64-bit column")))?,
            ),
            Value::Real(v) => query.bind(*v),
            Value::Text(v) => query.bind(v.as_str()),
            Value::Bytes(v) => query.bind(v.as_slice()),
            Value::Timestamp(v) => query.bind(v.0),
        };
    }
    Ok(query)
}

fn decode_row(row: &PgRow) -> Result<Row> {
    let mut out = Row::new();
    for column in row.columns() {
        let raw = row.try_get_raw(column.ordinal()).map_err(ErrorKind::driver)?;
        out.push(column.name(), decode_value(raw).map_err(ErrorKind::driver)?);
    }
    Ok(out)
}

// Binary wire format: each type must be decoded at its exact width.
fn decode_value(raw: PgValueRef<'_>) -> std::result::Result<Value, sqlx::Error> {
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_ascii_uppercase();
    let owned = ValueRef::to_owned(&raw);
    Ok(match type_name.as_str() {
        "BOOL" => Value::Bool(owned.try_decode()?),
        "INT2" => Value::Int(i64::from(owned.try_decode::<i16>()?)),
        "INT4" => Value::Int(i64::from(owned.try_decode::<i32>()?)),
        "INT8" => Value::Int(owned.try_decode()?),
        "FLOAT4" => Value::Real(f64::from(owned.try_decode::<f32>()?)),
        "FLOAT8" => Value::Real(owned.try_decode()?),
        "BYTEA" => Value::Bytes(owned.try_decode()?),
        "TIMESTAMP" => Value::Timestamp(Timestamp(owned.try_decode::<PrimitiveDateTime>()?)),
        "TIMESTAMPTZ" => {
            let at = owned.try_decode::<OffsetDateTime>()?.to_offset(UtcOffset::UTC);
            Value::Timestamp(Timestamp(PrimitiveDateTime::new(at.date(), at.time())))
        },
        _ => Value::Text(owned.try_decode_unchecked()?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Core, Policy};

    crate::entity! {
        #[derive(Debug, Clone, Default, PartialEq)]
        struct Gadget {
            #[orm("pk;autoinc")]
            id: i64,
            name: String,
            hits: u32,
            score: Option<i64>,
            ratio: Option<f64>,
            seen_at: Option<Timestamp>,
        }
    }

    /// Connection URL of a disposable PostgreSQL server, when one is available.
    fn server() -> Option<String> {
        std::env::var("KILN_TEST_POSTGRES_URL").ok().filter(|url| !url.is_empty())
    }

    #[test]
    fn test_null_statements_are_not_cached() {
        assert!(is_cacheable(&[Value::Int(1), Value::from("a")]));
        assert!(!is_cacheable(&[Value::Int(1), Value::Null]));
        assert!(is_cacheable(&[]));
    }

    #[tokio::test]
    async fn test_nulls_and_wide_integers_round_trip() {
        let Some(url) = server() else {
            return;
        };
        let core = Core::new();
        core.connect("pg", Dialect::Postgres, &url).await.unwrap();
        core.table("gadgets").database("pg").drop_table().await.ok();
        core.migrate::<Gadget>("pg", Policy::Fail).await.unwrap();

        let empty = Gadget { name: "empty".into(), ..Gadget::default() };
        let id = core.model::<Gadget>().insert(&empty).await.unwrap();
        let read = core.model::<Gadget>().filter("id = ?", crate::args![id]).one().await.unwrap();
        assert_eq!(read, Gadget { id, ..empty });

        let full = Gadget {
            id: 0,
            name: "full".into(),
            hits: 4_000_000_000,
            score: Some(5_000_000_000),
            ratio: Some(0.5),
            seen_at: Some(Timestamp::parse("2024-02-29 13:45:07").unwrap()),
        };
        let id = core.model::<Gadget>().insert(&full).await.unwrap();
        let updated = core
            .table("gadgets")
            .database("pg")
            .filter("id = ?", crate::args![id])
            .set("score = ?, seen_at = ?", vec![Value::Null, Value::Null])
            .await
            .unwrap();
        assert_eq!(updated, 1);
        let read = core.model::<Gadget>().filter("id = ?", crate::args![id]).one().await.unwrap();
        assert_eq!(read, Gadget { id, score: None, seen_at: None, ..full });

        core.table("gadgets").database("pg").drop_table().await.unwrap();
        core.shutdown(&[]).await.unwrap();
    }
}
