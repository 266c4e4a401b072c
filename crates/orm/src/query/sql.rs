//! Statement text for the builder terminals.
//!
//! Everything here writes `?` placeholders; dialect adaptation happens just
//! before dispatch.

use crate::dialect::Dialect;

/// Parts of a generated `SELECT`.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Select<'a> {
    pub table: &'a str,
    pub projection: &'a [String],
    pub filter: Option<&'a str>,
    pub order: &'a [String],
    pub limit: Option<u64>,
    pub page: Option<u64>,
}

impl Select<'_> {
    pub fn render(&self) -> String {
        let columns = if self.projection.is_empty() { "*".to_string() } else { self.projection.join(", ") };
        let mut sql = format!("SELECT {columns} FROM {}", self.table);
        if let Some(filter) = self.filter {
            sql.push_str(" WHERE ");
            sql.push_str(filter);
        }
        let order = order_by(self.order);
        if !order.is_empty() {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {limit}"));
            if let Some(page) = self.page.filter(|p| *p > 1) {
                sql.push_str(&format!(" OFFSET {}", (page - 1).saturating_mul(limit)));
            }
        }
        sql
    }
}

/// `+x` is ascending, `-x` descending, bare names ascending. Entries with no
/// column name are dropped.
pub(crate) fn order_by(columns: &[String]) -> String {
    columns
        .iter()
        .map(|column| {
            let column = column.trim();
            match column.strip_prefix('-') {
                Some(name) => (name.trim(), "DESC"),
                None => (column.strip_prefix('+').unwrap_or(column).trim(), "ASC"),
            }
        })
        .filter(|(name, _)| !name.is_empty())
        .map(|(name, direction)| format!("{name} {direction}"))
        .collect::<Vec<_>>()
        .join(",")
}

pub(crate) fn insert(table: &str, columns: &[String], dialect: Dialect) -> String {
    if columns.is_empty() {
        return if dialect.is_mysql_family() {
            format!("INSERT INTO {table} () VALUES ()")
        } else {
            format!("INSERT INTO {table} DEFAULT VALUES")
        };
    }
    let placeholders = vec!["?"; columns.len()].join(", ");
    format!("INSERT INTO {table} ({}) VALUES ({placeholders})", columns.join(", "))
}

pub(crate) fn update(table: &str, assignments: &str, filter: &str) -> String {
    format!("UPDATE {table} SET {assignments} WHERE {filter}")
}

pub(crate) fn delete(table: &str, filter: &str) -> String {
    format!("DELETE FROM {table} WHERE {filter}")
}

pub(crate) fn drop_table(table: &str) -> String {
    format!("DROP TABLE IF EXISTS {table}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_order_by_grammar() {
        assert_eq!(order_by(&strings(&["+x", "-y", "z"])), "x ASC,y DESC,z ASC");
        assert_eq!(order_by(&strings(&[" - created_at ", ""])), "created_at DESC");
    }

    #[rstest]
    #[case(&["-"], "")]
    #[case(&["+", " - ", "name"], "name ASC")]
    #[case(&["-id", "+"], "id DESC")]
    fn test_order_by_drops_bare_signs(#[case] columns: &[&str], #[case] expected: &str) {
        assert_eq!(order_by(&strings(columns)), expected);
    }

    #[rstest]
    #[case(Some(10), None, "SELECT * FROM users LIMIT 10")]
    #[case(Some(10), Some(0), "SELECT * FROM users LIMIT 10")]
    #[case(Some(10), Some(1), "SELECT * FROM users LIMIT 10")]
    #[case(Some(10), Some(2), "SELECT * FROM users LIMIT 10 OFFSET 10")]
    #[case(Some(25), Some(4), "SELECT * FROM users LIMIT 25 OFFSET 75")]
    #[case(None, Some(3), "SELECT * FROM users")]
    fn test_pagination(#[case] limit: Option<u64>, #[case] page: Option<u64>, #[case] expected: &str) {
        let select = Select { table: "users", limit, page, ..Select::default() };
        assert_eq!(select.render(), expected);
    }

    #[test]
    fn test_signs_alone_emit_no_order() {
        let order = strings(&["-", "+"]);
        let select = Select { table: "users", order: &order, ..Select::default() };
        assert_eq!(select.render(), "SELECT * FROM users");
    }

    #[test]
    fn test_full_select() {
        let projection = strings(&["id", "email"]);
        let order = strings(&["-id"]);
        let select = Select {
            table: "users",
            projection: &projection,
            filter: Some("is_admin = ? AND email LIKE ?"),
            order: &order,
            limit: Some(5),
            page: Some(3),
        };
        assert_eq!(
            select.render(),
            "SELECT id, email FROM users WHERE is_admin = ? AND email LIKE ? ORDER BY id DESC LIMIT 5 OFFSET 10"
        );
    }

    #[test]
    fn test_mutations() {
        assert_eq!(
            insert("users", &strings(&["email", "is_admin"]), Dialect::Sqlite),
            "INSERT INTO users (email, is_admin) VALUES (?, ?)"
        );
        assert_eq!(insert("users", &[], Dialect::Postgres), "INSERT INTO users DEFAULT VALUES");
        assert_eq!(insert("users", &[], Dialect::MySql), "INSERT INTO users () VALUES ()");
        assert_eq!(update("users", "is_admin = ?", "email = ?"), "UPDATE users SET is_admin = ? WHERE email = ?");
        assert_eq!(delete("users", "id = ?"), "DELETE FROM users WHERE id = ?");
        assert_eq!(drop_table("users"), "DROP TABLE IF EXISTS users");
    }
}
