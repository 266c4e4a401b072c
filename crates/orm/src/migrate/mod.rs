//! Schema migration from entity declarations.
//!
//! Planning ([`plan_create`], [`plan_reconcile`]) is pure. The [`Migrator`]
//! runs a plan against a database: it creates the table, introspects it, and
//! then applies, refuses or asks about each reconciling alteration according
//! to its [`Policy`].

mod plan;

pub use plan::{Alteration, CreatePlan, plan_create, plan_reconcile};

use crate::entity::Field;
use crate::error::{ErrorKind, Result};
use crate::introspect;
use crate::registry::{Database, Table};
use async_trait::async_trait;
use exn::ResultExt;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::instrument;

/// Fixed timeout for each DDL statement.
pub const DDL_TIMEOUT: Duration = Duration::from_secs(3);

/// Answers the operator-facing question for one alteration.
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, table: &str, alteration: &Alteration) -> Result<bool>;
}

#[async_trait]
impl<F> Confirm for F
where
    F: Fn(&str, &Alteration) -> bool + Send + Sync,
{
    async fn confirm(&self, table: &str, alteration: &Alteration) -> Result<bool> {
        Ok(self(table, alteration))
    }
}

/// Asks on the terminal: the question goes to stderr, the answer is read
/// from stdin. `y`/`yes` confirms; anything else declines. A closed stdin
/// cannot answer and fails with [`ErrorKind::Prompt`].
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

#[async_trait]
impl Confirm for StdinConfirm {
    async fn confirm(&self, table: &str, alteration: &Alteration) -> Result<bool> {
        let mut stderr = tokio::io::stderr();
        let question = format!("{}\n  {alteration}\n[y/N] ", alteration.question(table));
        stderr.write_all(question.as_bytes()).await.or_raise(|| ErrorKind::Prompt)?;
        stderr.flush().await.or_raise(|| ErrorKind::Prompt)?;

        let mut answer = String::new();
        let read = BufReader::new(tokio::io::stdin())
            .read_line(&mut answer)
            .await
            .or_raise(|| ErrorKind::Prompt)?;
        if read == 0 {
            exn::bail!(ErrorKind::Prompt);
        }
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

/// What to do with schema drift found after `CREATE TABLE IF NOT EXISTS`.
pub enum Policy {
    /// Refuse: any alteration fails the migration with [`ErrorKind::SchemaDrift`].
    Fail,
    /// Apply every alteration.
    Apply,
    /// Ask about each alteration.
    Prompt(Box<dyn Confirm>),
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Fail => f.write_str("Fail"),
            Self::Apply => f.write_str("Apply"),
            Self::Prompt(_) => f.write_str("Prompt"),
        }
    }
}

/// Outcome of migrating one table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub table: String,
    pub plan: CreatePlan,
    pub applied: Vec<Alteration>,
    pub declined: Vec<Alteration>,
}

/// Executes migration plans against one database.
#[derive(Debug)]
pub struct Migrator {
    database: Arc<Database>,
    policy: Policy,
    timeout: Duration,
}

impl Migrator {
    pub fn new(database: Arc<Database>, policy: Policy) -> Self {
        Self { database, policy, timeout: DDL_TIMEOUT }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Create `table` from `fields` and reconcile any pre-existing table.
    ///
    /// The first failing DDL statement aborts the migration of this table.
    /// On success the declared table is recorded against the database.
    #[instrument(skip_all, fields(table = table, database = self.database.name()))]
    pub async fn migrate(&self, fields: &[Field], table: &str) -> Result<Report> {
        let dialect = self.database.dialect();
        let plan = plan_create(fields, table, dialect);
        self.run(&plan.create_table).await?;
        for statement in &plan.post_statements {
            self.run(statement).await?;
        }

        let live = introspect::columns(self.database.driver().as_ref(), table).await?;
        let alterations = if live.is_empty() {
            tracing::warn!(table, "Table not visible to introspection after creation; skipping reconciliation");
            Vec::new()
        } else {
            let names = live.iter().map(|(name, _)| name.clone()).collect::<Vec<_>>();
            plan_reconcile(fields, table, dialect, &names)
        };

        let mut applied = Vec::new();
        let mut declined = Vec::new();
        if !alterations.is_empty() {
            if matches!(self.policy, Policy::Fail) {
                let drift = alterations.iter().map(Alteration::column).collect::<Vec<_>>().join(", ");
                exn::bail!(ErrorKind::SchemaDrift(format!("{table}: {drift}")));
            }
            for alteration in alterations {
                let accepted = match &self.policy {
                    Policy::Prompt(confirm) => confirm.confirm(table, &alteration).await?,
                    Policy::Apply | Policy::Fail => true,
                };
                if accepted {
                    for statement in alteration.statements() {
                        self.run(statement).await?;
                    }
                    tracing::info!(table, column = alteration.column(), "Applied alteration");
                    applied.push(alteration);
                } else {
                    tracing::info!(table, column = alteration.column(), "Declined alteration");
                    declined.push(alteration);
                }
            }
        }

        let mut declared = Table::declared(table, fields, &plan.column_types);
        for (column, kind) in live {
            let dropped = applied
                .iter()
                .any(|a| matches!(a, Alteration::DropColumn { .. }) && a.column() == column);
            if !dropped && declared.columns.iter().any(|c| c.eq_ignore_ascii_case(&column)) {
                declared.column_types.insert(column, kind);
            } else if !dropped {
                declared.merge(Table::discovered(table, &[(column, kind)]));
            }
        }
        self.database.forget_table(table);
        self.database.learn_table(declared);
        tracing::info!(table, applied = applied.len(), declined = declined.len(), "Migrated table");
        Ok(Report { table: table.to_string(), plan, applied, declined })
    }

    async fn run(&self, sql: &str) -> Result<()> {
        tracing::debug!(sql, "Executing DDL");
        tokio::time::timeout(self.timeout, self.database.driver().execute(sql, &[]))
            .await
            .or_raise(|| ErrorKind::Timeout)??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dialect::Dialect;
    use crate::driver::{Driver, MockDriver, SqliteDriver};
    use crate::entity::Entity;
    use crate::registry::Registry;
    use crate::value::Timestamp;

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

    async fn sqlite() -> (Registry, Arc<Database>) {
        let registry = Registry::new();
        let driver: Arc<dyn Driver> = Arc::new(SqliteDriver::connect_in_memory().await.unwrap());
        let database = registry.register("main", driver).unwrap();
        (registry, database)
    }

    #[tokio::test]
    async fn test_migrate_is_idempotent() {
        let (_registry, database) = sqlite().await;
        let migrator = Migrator::new(Arc::clone(&database), Policy::Fail);
        let first = migrator.migrate(User::fields(), "users").await.unwrap();
        let second = migrator.migrate(User::fields(), "users").await.unwrap();
        assert!(first.applied.is_empty());
        assert!(second.applied.is_empty() && second.declined.is_empty());

        let tables = introspect::tables(database.driver().as_ref()).await.unwrap();
        assert_eq!(tables, vec!["users"]);
        let table = database.table("users").unwrap();
        assert_eq!(table.primary_key.as_deref(), Some("id"));
        assert_eq!(table.columns, vec!["id", "email", "is_admin", "created_at"]);
    }

    #[tokio::test]
    async fn test_drift_under_each_policy() {
        let (_registry, database) = sqlite().await;
        database
            .driver()
            .execute("CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email VARCHAR(50), legacy TEXT)", &[])
            .await
            .unwrap();

        let err = Migrator::new(Arc::clone(&database), Policy::Fail)
            .migrate(User::fields(), "users")
            .await
            .unwrap_err();
        assert!(matches!(&*err, ErrorKind::SchemaDrift(message) if message.contains("legacy")));

        let only_adds = |_: &str, alteration: &Alteration| matches!(alteration, Alteration::AddColumn { .. });
        // is_admin is added, then SQLite refuses created_at's non-constant default.
        let report = Migrator::new(Arc::clone(&database), Policy::Prompt(Box::new(only_adds)))
            .migrate(User::fields(), "users")
            .await;
        assert!(matches!(&*report.unwrap_err(), ErrorKind::Driver(_)));

        let report = Migrator::new(Arc::clone(&database), Policy::Prompt(Box::new(|_: &str, a: &Alteration| a.column() == "legacy")))
            .migrate(User::fields(), "users")
            .await
            .unwrap();
        assert_eq!(report.applied.len(), 1);
        assert_eq!(report.applied[0].column(), "legacy");
        assert_eq!(report.declined.len(), 1);
        assert_eq!(report.declined[0].column(), "created_at");
        let live = introspect::columns(database.driver().as_ref(), "users").await.unwrap();
        assert!(live.iter().all(|(name, _)| name != "legacy"));
    }

    #[tokio::test]
    async fn test_apply_adds_missing_column() {
        let (_registry, database) = sqlite().await;
        database
            .driver()
            .execute(
                "CREATE TABLE users (id INTEGER PRIMARY KEY AUTOINCREMENT, email VARCHAR(50), created_at TIMESTAMP)",
                &[],
            )
            .await
            .unwrap();
        let report = Migrator::new(Arc::clone(&database), Policy::Apply)
            .migrate(User::fields(), "users")
            .await
            .unwrap();
        assert_eq!(report.applied.len(), 1);
        let live = introspect::columns(database.driver().as_ref(), "users").await.unwrap();
        assert!(live.iter().any(|(name, _)| name == "is_admin"));
    }

    #[tokio::test]
    async fn test_ddl_timeout() {
        let registry = Registry::new();
        let mock = Arc::new(MockDriver::new(Dialect::Postgres));
        mock.set_latency(Duration::from_millis(200));
        let database = registry.register("main", mock.clone()).unwrap();
        let err = Migrator::new(database, Policy::Fail)
            .with_timeout(Duration::from_millis(10))
            .migrate(User::fields(), "users")
            .await
            .unwrap_err();
        assert_eq!(*err, ErrorKind::Timeout);
    }

    #[tokio::test]
    async fn test_driver_error_aborts() {
        let registry = Registry::new();
        let mock = Arc::new(MockDriver::new(Dialect::Postgres));
        mock.fail_next("permission denied for schema public");
        let database = registry.register("main", mock.clone()).unwrap();
        let err = Migrator::new(Arc::clone(&database), Policy::Fail)
            .migrate(User::fields(), "users")
            .await
            .unwrap_err();
        assert_eq!(*err, ErrorKind::Driver("permission denied for schema public".to_string()));
        assert_eq!(mock.sql().len(), 1);
        assert!(database.table("users").is_none());
    }
}
