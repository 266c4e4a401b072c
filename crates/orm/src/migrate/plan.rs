//! Pure DDL planning: entity fields in, statements out.

use crate::dialect::Dialect;
use crate::entity::Field;
use crate::mapper::FieldKind;
use crate::tags::{FkAction, ForeignKey};
use derive_more::Display;

/// Statements that bring a table into existence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatePlan {
    /// `CREATE TABLE IF NOT EXISTS ...`
    pub create_table: String,
    /// Statements run after the table exists (case-insensitive unique indexes).
    pub post_statements: Vec<String>,
    /// Column to emitted dialect type, in declared order.
    pub column_types: Vec<(String, String)>,
}

/// One planned change reconciling a live table with its entity.
#[derive(Debug, Display, Clone, PartialEq, Eq)]
pub enum Alteration {
    /// The entity declares a column the table lacks.
    #[display("{sql}")]
    AddColumn {
        column: String,
        sql: String,
        follow_up: Option<String>,
    },
    /// The table has a column the entity no longer declares.
    #[display("{sql}")]
    DropColumn { column: String, sql: String },
}

impl Alteration {
    pub fn column(&self) -> &str {
        match self {
            Self::AddColumn { column, .. } | Self::DropColumn { column, .. } => column,
        }
    }

    /// Every statement this alteration runs, in order.
    pub fn statements(&self) -> Vec<&str> {
        match self {
            Self::AddColumn { sql, follow_up, .. } => std::iter::once(sql.as_str()).chain(follow_up.as_deref()).collect(),
            Self::DropColumn { sql, .. } => vec![sql.as_str()],
        }
    }

    /// Operator-facing question for this alteration.
    pub fn question(&self, table: &str) -> String {
        match self {
            Self::AddColumn { column, .. } => {
                format!("Column {column} is declared but missing from table {table}. Add it?")
            },
            Self::DropColumn { column, .. } => {
                format!("Column {column} exists in table {table} but is no longer declared. Drop it?")
            },
        }
    }
}

/// The column clause for one field, plus what it needs outside the clause.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Fragment {
    clause: String,
    column_type: String,
    foreign_key: Option<String>,
    post_statement: Option<String>,
}

/// Plan `CREATE TABLE IF NOT EXISTS` for `fields`.
///
/// Column clauses keep declared order; foreign key clauses follow them.
pub fn plan_create(fields: &[Field], table: &str, dialect: Dialect) -> CreatePlan {
    let fragments = fields.iter().map(|field| fragment(field, table, dialect)).collect::<Vec<_>>();
    let clauses = fragments
        .iter()
        .map(|f| f.clause.clone())
        .chain(fragments.iter().filter_map(|f| f.foreign_key.clone()))
        .collect::<Vec<_>>();
    CreatePlan {
        create_table: format!("CREATE TABLE IF NOT EXISTS {table} ({})", clauses.join(", ")),
        post_statements: fragments.iter().filter_map(|f| f.post_statement.clone()).collect(),
        column_types: fields
            .iter()
            .zip(&fragments)
            .map(|(field, f)| (field.column.clone(), f.column_type.clone()))
            .collect(),
    }
}

/// Plan the alterations that reconcile `live_columns` with `fields`.
///
/// Missing columns come first, in declared order, then extra columns in
/// table order. Column names compare case-insensitively.
pub fn plan_reconcile(fields: &[Field], table: &str, dialect: Dialect, live_columns: &[String]) -> Vec<Alteration> {
    let missing = fields
        .iter()
        .filter(|field| !live_columns.iter().any(|c| c.eq_ignore_ascii_case(&field.column)))
        .map(|field| {
            let fragment = fragment(field, table, dialect);
            let mut clause = fragment.clause;
            if let Some(fk) = &field.tags.fk {
                clause.push(' ');
                clause.push_str(&references(fk, dialect));
            }
            Alteration::AddColumn {
                column: field.column.clone(),
                sql: format!("ALTER TABLE {table} ADD {clause}"),
                follow_up: fragment.post_statement,
            }
        });
    let extra = live_columns
        .iter()
        .filter(|column| !fields.iter().any(|field| field.column.eq_ignore_ascii_case(column)))
        .map(|column| Alteration::DropColumn {
            column: column.clone(),
            sql: format!("ALTER TABLE {table} DROP COLUMN {column}"),
        });
    missing.chain(extra).collect()
}

fn fragment(field: &Field, table: &str, dialect: Dialect) -> Fragment {
    let column = &field.column;
    let tags = &field.tags;
    let mut clause = format!("{column} ");
    let mut post_statement = None;

    let column_type = match field.kind {
        FieldKind::Integer | FieldKind::Unsigned if tags.autoinc => {
            let unsigned = field.kind == FieldKind::Unsigned;
            clause.push_str(&dialect.autoincrement(field.bytes, unsigned));
            dialect.integer_type(field.bytes, unsigned).to_string()
        },
        FieldKind::Integer | FieldKind::Unsigned => {
            let kind = dialect.integer_type(field.bytes, field.kind == FieldKind::Unsigned);
            clause.push_str(kind);
            common_modifiers(&mut clause, field, dialect, table, &mut post_statement);
            kind.to_string()
        },
        FieldKind::Boolean => {
            clause.push_str("INTEGER");
            if !field.nullable {
                clause.push_str(" NOT NULL");
            }
            clause.push_str(&format!(" CHECK ({column} IN (0,1))"));
            if tags.pk {
                clause.push_str(" PRIMARY KEY");
            }
            if let Some(default) = &tags.default {
                let default = match default.trim().to_ascii_lowercase().as_str() {
                    "true" => "1".to_string(),
                    "false" => "0".to_string(),
                    _ => default.clone(),
                };
                clause.push_str(&format!(" DEFAULT {default}"));
            }
            "INTEGER".to_string()
        },
        FieldKind::String | FieldKind::StringList => {
            let kind = if tags.text { "TEXT".to_string() } else { format!("VARCHAR({})", tags.size.unwrap_or(255)) };
            clause.push_str(&kind);
            common_modifiers(&mut clause, field, dialect, table, &mut post_statement);
            kind
        },
        FieldKind::Float => {
            clause.push_str(dialect.float_type());
            common_modifiers(&mut clause, field, dialect, table, &mut post_statement);
            dialect.float_type().to_string()
        },
        FieldKind::Timestamp => {
            clause.push_str(dialect.timestamp_type());
            if tags.now {
                clause.push_str(" NOT NULL ");
                clause.push_str(dialect.now_default());
            }
            common_modifiers(&mut clause, field, dialect, table, &mut post_statement);
            dialect.timestamp_type().to_string()
        },
    };

    Fragment {
        clause,
        column_type,
        foreign_key: tags
            .fk
            .as_ref()
            .map(|fk| format!("FOREIGN KEY ({column}) {}", references(fk, dialect))),
        post_statement,
    }
}

/// `PRIMARY KEY`, `NOT NULL`, `UNIQUE`, `DEFAULT` and `CHECK`, in that order.
fn common_modifiers(clause: &mut String, field: &Field, dialect: Dialect, table: &str, post: &mut Option<String>) {
    let tags = &field.tags;
    if tags.pk {
        clause.push_str(" PRIMARY KEY");
    }
    if tags.notnull && !(tags.now && field.kind == FieldKind::Timestamp) {
        clause.push_str(" NOT NULL");
    }
    if tags.iunique {
        match dialect {
            Dialect::Sqlite => clause.push_str(" COLLATE NOCASE UNIQUE"),
            Dialect::Postgres | Dialect::Cockroach => {
                *post = Some(format!(
                    "CREATE UNIQUE INDEX IF NOT EXISTS {table}_{column}_iunique ON {table} (lower({column}))",
                    column = field.column
                ));
            },
            Dialect::MySql | Dialect::Maria => clause.push_str(" UNIQUE"),
        }
    } else if tags.unique {
        clause.push_str(" UNIQUE");
    }
    if let Some(default) = &tags.default
        && !(tags.now && field.kind == FieldKind::Timestamp)
    {
        clause.push_str(&format!(" DEFAULT {default}"));
    }
    if let Some(check) = &tags.check {
        clause.push_str(&format!(" CHECK ({})", translate_len(check, dialect)));
    }
}

fn references(fk: &ForeignKey, dialect: Dialect) -> String {
    let mut out = format!("REFERENCES {}({})", fk.table, fk.column);
    if let Some(action) = fk.on_delete {
        out.push_str(&format!(" ON DELETE {}", fk_action(action, dialect)));
    }
    if let Some(action) = fk.on_update {
        out.push_str(&format!(" ON UPDATE {}", fk_action(action, dialect)));
    }
    out
}

fn fk_action(action: FkAction, dialect: Dialect) -> FkAction {
    if action == FkAction::SetDefault && dialect.is_mysql_family() {
        tracing::warn!(%dialect, "SET DEFAULT is not supported by InnoDB; using NO ACTION");
        return FkAction::NoAction;
    }
    action
}

/// Rewrite `len(x)` to the dialect's string length function.
fn translate_len(expr: &str, dialect: Dialect) -> String {
    let function = dialect.length_function();
    let mut out = String::with_capacity(expr.len() + 8);
    let mut rest = expr;
    while let Some(at) = rest.find("len(") {
        let standalone = rest[..at]
            .chars()
            .next_back()
            .is_none_or(|c| !(c.is_alphanumeric() || c == '_'));
        out.push_str(&rest[..at]);
        out.push_str(if standalone { function } else { "len" });
        out.push('(');
        rest = &rest[at + 4..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entity::Entity;
    use crate::value::Timestamp;
    use rstest::rstest;

    crate::entity! {
        #[derive(Debug, Clone, Default)]
        struct User {
            #[orm("pk;autoinc")]
            id: i64,
            #[orm("unique;size:50")]
            email: String,
            #[orm("default:false")]
            is_admin: bool,
            #[orm("now")]
            created_at: Timestamp,
        }
    }

    crate::entity! {
        #[derive(Debug, Clone, Default)]
        struct Post {
            #[orm("pk;autoinc")]
            id: i64,
            #[orm("fk:users.id:cascade")]
            user_id: i64,
            #[orm("text;notnull;check:len(body) > 0")]
            body: String,
            score: f64,
            #[orm("iunique")]
            slug: String,
        }
    }

    #[test]
    fn test_sqlite_user_table() {
        let plan = plan_create(User::fields(), "users", Dialect::Sqlite);
        assert_eq!(
            plan.create_table,
            "CREATE TABLE IF NOT EXISTS users (\
             id INTEGER PRIMARY KEY AUTOINCREMENT, \
             email VARCHAR(50) UNIQUE, \
             is_admin INTEGER NOT NULL CHECK (is_admin IN (0,1)) DEFAULT 0, \
             created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP)"
        );
        assert!(plan.post_statements.is_empty());
        assert_eq!(plan.column_types[1], ("email".to_string(), "VARCHAR(50)".to_string()));
    }

    #[rstest]
    #[case(Dialect::Sqlite, "id INTEGER PRIMARY KEY AUTOINCREMENT", "created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP")]
    #[case(Dialect::Postgres, "id BIGSERIAL PRIMARY KEY", "created_at TIMESTAMP NOT NULL DEFAULT now()")]
    #[case(Dialect::MySql, "id BIGINT PRIMARY KEY AUTO_INCREMENT", "created_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP")]
    fn test_dialect_fragments(#[case] dialect: Dialect, #[case] id: &str, #[case] created_at: &str) {
        let plan = plan_create(User::fields(), "users", dialect);
        assert!(plan.create_table.contains(id), "{}", plan.create_table);
        assert!(plan.create_table.contains(created_at), "{}", plan.create_table);
    }

    crate::entity! {
        #[derive(Debug, Clone, Default)]
        struct Counter {
            #[orm("pk;autoinc")]
            id: i32,
            tiny: i8,
            small: i16,
            medium: i32,
            large: i64,
            hits: u32,
            total: Option<u64>,
        }
    }

    fn column_type(plan: &CreatePlan, column: &str) -> String {
        plan.column_types.iter().find(|(c, _)| c == column).map(|(_, t)| t.clone()).unwrap()
    }

    #[rstest]
    #[case(Dialect::Sqlite, "INTEGER", ["INTEGER", "INTEGER", "INTEGER", "INTEGER", "INTEGER", "INTEGER"])]
    #[case(Dialect::Postgres, "SERIAL", ["SMALLINT", "SMALLINT", "INTEGER", "BIGINT", "BIGINT", "BIGINT"])]
    #[case(Dialect::Cockroach, "SERIAL", ["SMALLINT", "SMALLINT", "INTEGER", "BIGINT", "BIGINT", "BIGINT"])]
    #[case(Dialect::MySql, "INTEGER", ["TINYINT", "SMALLINT", "INTEGER", "BIGINT", "INTEGER UNSIGNED", "BIGINT UNSIGNED"])]
    fn test_integer_widths(#[case] dialect: Dialect, #[case] id: &str, #[case] expected: [&str; 6]) {
        let plan = plan_create(Counter::fields(), "counters", dialect);
        assert!(plan.create_table.contains(&format!("id {id} PRIMARY KEY")), "{}", plan.create_table);
        let columns = ["tiny", "small", "medium", "large", "hits", "total"];
        for (column, kind) in columns.iter().zip(expected) {
            assert_eq!(column_type(&plan, column), kind, "{column} on {dialect}");
            assert!(plan.create_table.contains(&format!("{column} {kind}")), "{}", plan.create_table);
        }
    }

    #[test]
    fn test_wide_autoinc_keys() {
        let plan = plan_create(User::fields(), "users", Dialect::Postgres);
        assert_eq!(column_type(&plan, "id"), "BIGINT");
        let plan = plan_create(User::fields(), "users", Dialect::Maria);
        assert!(plan.create_table.starts_with("CREATE TABLE IF NOT EXISTS users (id BIGINT PRIMARY KEY AUTO_INCREMENT,"));
    }

    #[test]
    fn test_foreign_key_trails_columns() {
        let plan = plan_create(Post::fields(), "posts", Dialect::Sqlite);
        assert!(
            plan.create_table
                .ends_with(", FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE)")
        );
        assert!(plan.create_table.contains("body TEXT NOT NULL CHECK (length(body) > 0)"));
        assert!(plan.create_table.contains("score REAL"));
        assert!(plan.create_table.contains("slug VARCHAR(255) COLLATE NOCASE UNIQUE"));
    }

    #[test]
    fn test_postgres_iunique_index_and_check() {
        let plan = plan_create(Post::fields(), "posts", Dialect::Postgres);
        assert!(plan.create_table.contains("CHECK (char_length(body) > 0)"));
        assert!(plan.create_table.contains("score DOUBLE PRECISION"));
        assert!(plan.create_table.contains("slug VARCHAR(255),"));
        assert_eq!(
            plan.post_statements,
            vec!["CREATE UNIQUE INDEX IF NOT EXISTS posts_slug_iunique ON posts (lower(slug))"]
        );
    }

    #[test]
    fn test_mysql_set_default_becomes_no_action() {
        let mut fields = Post::fields().to_vec();
        fields[1].tags.fk.as_mut().unwrap().on_delete = Some(FkAction::SetDefault);
        fields[1].tags.fk.as_mut().unwrap().on_update = Some(FkAction::SetNull);
        let plan = plan_create(&fields, "posts", Dialect::Maria);
        assert!(plan.create_table.contains("REFERENCES users(id) ON DELETE NO ACTION ON UPDATE SET NULL"));
    }

    #[rstest]
    #[case("len(name) > 3", "length(name) > 3")]
    #[case("len(a) < len(b)", "length(a) < length(b)")]
    #[case("strlen(a) > 1", "strlen(a) > 1")]
    #[case("price > 0", "price > 0")]
    fn test_translate_len(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(translate_len(input, Dialect::Sqlite), expected);
    }

    #[test]
    fn test_reconcile() {
        let live = ["id", "EMAIL", "legacy", "created_at"].map(String::from);
        let plan = plan_reconcile(User::fields(), "users", Dialect::Sqlite, &live);
        assert_eq!(
            plan,
            vec![
                Alteration::AddColumn {
                    column: "is_admin".to_string(),
                    sql: "ALTER TABLE users ADD is_admin INTEGER NOT NULL CHECK (is_admin IN (0,1)) DEFAULT 0".to_string(),
                    follow_up: None,
                },
                Alteration::DropColumn {
                    column: "legacy".to_string(),
                    sql: "ALTER TABLE users DROP COLUMN legacy".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_reconcile_unchanged_is_empty() {
        let live = User::fields().iter().map(|f| f.column.clone()).collect::<Vec<_>>();
        assert!(plan_reconcile(User::fields(), "users", Dialect::Postgres, &live).is_empty());
    }

    #[test]
    fn test_added_foreign_key_is_inline() {
        let live = ["id", "body", "score", "slug"].map(String::from);
        let plan = plan_reconcile(Post::fields(), "posts", Dialect::Sqlite, &live);
        assert_eq!(plan[0].statements(), vec!["ALTER TABLE posts ADD user_id INTEGER REFERENCES users(id) ON DELETE CASCADE"]);
    }
}
