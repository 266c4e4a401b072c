//! Schema discovery through each dialect's catalog.
//!
//! These functions always hit the store; [`Core`](crate::Core) memoises
//! their results in the result cache.

use crate::dialect::Dialect;
use crate::driver::Driver;
use crate::error::Result;
use crate::row::Row;
use crate::value::Value;
use tracing::instrument;

const PG_INTERNAL_SCHEMAS: &str = "('pg_catalog', 'information_schema', 'crdb_internal', 'pg_extension')";

/// Catalog query for the columns of `table`, with its arguments.
pub(crate) fn columns_query(dialect: Dialect, table: &str) -> (String, Vec<Value>) {
    match dialect {
        // PRAGMA arguments cannot be bound.
        Dialect::Sqlite => (format!("PRAGMA table_info(\"{}\")", table.replace('"', "\"\"")), Vec::new()),
        Dialect::Postgres | Dialect::Cockroach => (
            format!(
                "SELECT column_name::text AS column_name, data_type::text AS data_type \
                 FROM information_schema.columns \
                 WHERE table_name = ? AND table_schema NOT IN {PG_INTERNAL_SCHEMAS} \
                 ORDER BY ordinal_position"
            ),
            vec![Value::from(table)],
        ),
        Dialect::MySql | Dialect::Maria => (
            "SELECT CAST(column_name AS CHAR(255)) AS column_name, CAST(column_type AS CHAR(255)) AS data_type \
             FROM information_schema.columns \
             WHERE table_name = ? AND table_schema = DATABASE() \
             ORDER BY ordinal_position"
                .to_string(),
            vec![Value::from(table)],
        ),
    }
}

/// Catalog query listing user tables.
pub(crate) fn tables_query(dialect: Dialect) -> String {
    match dialect {
        Dialect::Sqlite => {
            "SELECT name FROM sqlite_schema WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name".to_string()
        },
        Dialect::Postgres | Dialect::Cockroach => format!(
            "SELECT tablename::text AS name FROM pg_tables WHERE schemaname NOT IN {PG_INTERNAL_SCHEMAS} ORDER BY tablename"
        ),
        Dialect::MySql | Dialect::Maria => "SELECT CAST(table_name AS CHAR(255)) AS name \
             FROM information_schema.tables \
             WHERE table_schema = DATABASE() AND table_type = 'BASE TABLE' \
             ORDER BY table_name"
            .to_string(),
    }
}

fn text_at(row: &Row, index: usize) -> Option<String> {
    match row.at(index)? {
        Value::Text(text) => Some(text.clone()),
        Value::Bytes(bytes) => String::from_utf8(bytes.clone()).ok(),
        _ => None,
    }
}

/// Column name to dialect type, in table order. Empty when the table does
/// not exist.
#[instrument(skip(driver), fields(dialect = %driver.dialect()))]
pub async fn columns(driver: &dyn Driver, table: &str) -> Result<Vec<(String, String)>> {
    let dialect = driver.dialect();
    let (sql, args) = columns_query(dialect, table);
    let rows = driver.query(&dialect.adapt_placeholders(&sql), &args).await?;
    // PRAGMA table_info: cid, name, type, notnull, dflt_value, pk
    let (name_at, type_at) = if dialect == Dialect::Sqlite { (1, 2) } else { (0, 1) };
    let columns = rows
        .iter()
        .filter_map(|row| Some((text_at(row, name_at)?, text_at(row, type_at).unwrap_or_default())))
        .collect::<Vec<_>>();
    tracing::debug!(table, count = columns.len(), "Introspected columns");
    Ok(columns)
}

/// Names of the user tables in the store.
#[instrument(skip(driver), fields(dialect = %driver.dialect()))]
pub async fn tables(driver: &dyn Driver) -> Result<Vec<String>> {
    let rows = driver.query(&tables_query(driver.dialect()), &[]).await?;
    Ok(rows.iter().filter_map(|row| text_at(row, 0)).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, SqliteDriver};

    #[tokio::test]
    async fn test_sqlite_columns_and_tables() {
        let driver = SqliteDriver::connect_in_memory().await.unwrap();
        driver.execute("CREATE TABLE users (id INTEGER PRIMARY KEY, email VARCHAR(50))", &[]).await.unwrap();
        driver.execute("CREATE TABLE posts (id INTEGER PRIMARY KEY)", &[]).await.unwrap();

        let columns = columns(&driver, "users").await.unwrap();
        assert_eq!(
            columns,
            vec![("id".to_string(), "INTEGER".to_string()), ("email".to_string(), "VARCHAR(50)".to_string())]
        );
        assert!(super::columns(&driver, "missing").await.unwrap().is_empty());
        assert_eq!(tables(&driver).await.unwrap(), vec!["posts", "users"]);
    }

    #[tokio::test]
    async fn test_postgres_catalog_query() {
        let driver = MockDriver::new(Dialect::Postgres);
        driver.push_rows(vec![[("column_name", "id"), ("data_type", "integer")].into_iter().collect()]);
        let columns = columns(&driver, "users").await.unwrap();
        assert_eq!(columns, vec![("id".to_string(), "integer".to_string())]);

        let statement = &driver.statements()[0];
        assert!(statement.sql.contains("information_schema.columns"));
        assert!(statement.sql.contains("table_name = $1"));
        assert!(statement.sql.contains("'pg_catalog'"));
        assert_eq!(statement.args, vec![Value::from("users")]);
    }

    #[tokio::test]
    async fn test_mysql_catalog_query_keeps_question_marks() {
        let driver = MockDriver::new(Dialect::MySql);
        columns(&driver, "users").await.unwrap();
        tables(&driver).await.unwrap();
        let sql = driver.sql();
        assert!(sql[0].contains("table_name = ? AND table_schema = DATABASE()"));
        assert!(sql[1].contains("information_schema.tables"));
    }
}
