//! Registered logical databases and the table metadata known about each.

use crate::dialect::Dialect;
use crate::driver::{self, Driver, PoolSettings};
use crate::entity::Field;
use crate::error::{ErrorKind, Result};
use crate::mapper::FieldKind;
use crate::tags::{ForeignKey, Tags};
use exn::OptionExt;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::instrument;

/// Name that always resolves to the first registered database.
pub const DEFAULT: &str = "default";

pub(crate) fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

/// Metadata for one table, either introspected or declared by migration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    pub name: String,
    /// Columns in table order.
    pub columns: Vec<String>,
    /// Column to dialect type, as reported by the store or emitted by DDL.
    pub column_types: HashMap<String, String>,
    /// Column to entity field family, for declared tables.
    pub field_kinds: HashMap<String, FieldKind>,
    pub tags: HashMap<String, Tags>,
    pub primary_key: Option<String>,
    /// `(column, target)` pairs.
    pub foreign_keys: Vec<(String, ForeignKey)>,
}

impl Table {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    /// Table metadata as declared by an entity's fields.
    pub fn declared(name: impl Into<String>, fields: &[Field], column_types: &[(String, String)]) -> Self {
        let mut table = Self::new(name);
        for field in fields {
            table.columns.push(field.column.clone());
            table.field_kinds.insert(field.column.clone(), field.kind);
            table.tags.insert(field.column.clone(), field.tags.clone());
            if field.tags.is_primary() && table.primary_key.is_none() {
                table.primary_key = Some(field.column.clone());
            }
            if let Some(fk) = &field.tags.fk {
                table.foreign_keys.push((field.column.clone(), fk.clone()));
            }
        }
        table.column_types.extend(column_types.iter().cloned());
        table
    }

    /// Table metadata as discovered by introspection.
    pub fn discovered(name: impl Into<String>, columns: &[(String, String)]) -> Self {
        let mut table = Self::new(name);
        for (column, kind) in columns {
            table.columns.push(column.clone());
            table.column_types.insert(column.clone(), kind.clone());
        }
        table
    }

    /// Fold `other` into `self`. Facts already known are kept; columns and
    /// facts only `other` has are appended.
    pub fn merge(&mut self, other: Table) {
        for column in other.columns {
            if !self.columns.contains(&column) {
                self.columns.push(column);
            }
        }
        for (column, kind) in other.column_types {
            self.column_types.entry(column).or_insert(kind);
        }
        for (column, kind) in other.field_kinds {
            self.field_kinds.entry(column).or_insert(kind);
        }
        for (column, tags) in other.tags {
            self.tags.entry(column).or_insert(tags);
        }
        if self.primary_key.is_none() {
            self.primary_key = other.primary_key;
        }
        for fk in other.foreign_keys {
            if !self.foreign_keys.contains(&fk) {
                self.foreign_keys.push(fk);
            }
        }
    }
}

/// A named handle to one physical store.
#[derive(Debug)]
pub struct Database {
    name: String,
    driver: Arc<dyn Driver>,
    settings: PoolSettings,
    tables: RwLock<Vec<Table>>,
}

impl Database {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }

    pub fn pool_settings(&self) -> PoolSettings {
        self.settings
    }

    /// Known tables, in the order they were learnt.
    pub fn tables(&self) -> Vec<Table> {
        read(&self.tables).clone()
    }

    pub fn table(&self, name: &str) -> Option<Table> {
        read(&self.tables).iter().find(|t| t.name == name).cloned()
    }

    /// Record (or merge into) the metadata for `table.name`.
    pub fn learn_table(&self, table: Table) {
        let mut tables = write(&self.tables);
        match tables.iter_mut().find(|t| t.name == table.name) {
            Some(existing) => existing.merge(table),
            None => tables.push(table),
        }
    }

    /// Forget a table, returning whether it was known.
    pub fn forget_table(&self, name: &str) -> bool {
        let mut tables = write(&self.tables);
        let before = tables.len();
        tables.retain(|t| t.name != name);
        tables.len() != before
    }
}

/// Lock-protected mapping of database name to [`Database`].
///
/// The first registration becomes the default database.
#[derive(Debug, Default)]
pub struct Registry {
    databases: RwLock<Vec<Arc<Database>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an already-connected driver under `name`.
    #[instrument(skip(self, driver), fields(dialect = %driver.dialect()))]
    pub fn register(&self, name: &str, driver: Arc<dyn Driver>) -> Result<Arc<Database>> {
        let mut databases = write(&self.databases);
        if name.is_empty() || name == DEFAULT || databases.iter().any(|db| db.name == name) {
            exn::bail!(ErrorKind::AlreadyRegistered(name.to_string()));
        }
        let database = Arc::new(Database {
            name: name.to_string(),
            driver,
            settings: PoolSettings::for_position(databases.len()),
            tables: RwLock::default(),
        });
        databases.push(Arc::clone(&database));
        tracing::info!(database = name, position = databases.len(), "Registered database");
        Ok(database)
    }

    /// Open a pool for `url` with the default settings for the next
    /// registration slot, then register it.
    #[instrument(skip(self, url))]
    pub async fn connect(&self, name: &str, dialect: Dialect, url: &str) -> Result<Arc<Database>> {
        let position = {
            let databases = read(&self.databases);
            if databases.iter().any(|db| db.name == name) {
                exn::bail!(ErrorKind::AlreadyRegistered(name.to_string()));
            }
            databases.len()
        };
        let driver = driver::connect(dialect, url, PoolSettings::for_position(position)).await?;
        self.register(name, driver)
    }

    /// `""` and `"default"` resolve to the first registered database.
    pub fn lookup(&self, name: &str) -> Result<Arc<Database>> {
        let databases = read(&self.databases);
        let found = if name.is_empty() || name == DEFAULT {
            databases.first()
        } else {
            databases.iter().find(|db| db.name == name)
        };
        found.cloned().ok_or_raise(|| ErrorKind::UnknownDatabase(name.to_string()))
    }

    pub fn list_databases(&self) -> Vec<String> {
        read(&self.databases).iter().map(|db| db.name.clone()).collect()
    }

    /// Tables known to the registry for `database` (no introspection).
    pub fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        Ok(self.lookup(database)?.tables().into_iter().map(|t| t.name).collect())
    }

    pub fn lookup_table(&self, table: &str, database: &str) -> Result<Option<Table>> {
        Ok(self.lookup(database)?.table(table))
    }

    /// Close the named databases in registration order and remove them;
    /// with no names, close everything.
    #[instrument(skip(self))]
    pub async fn shutdown(&self, names: &[&str]) -> Result<()> {
        let closing = {
            let mut databases = write(&self.databases);
            if let Some(unknown) = names.iter().find(|n| !databases.iter().any(|db| db.name == **n)) {
                exn::bail!(ErrorKind::UnknownDatabase(unknown.to_string()));
            }
            let (closing, keep) = databases
                .drain(..)
                .partition::<Vec<_>, _>(|db| names.is_empty() || names.contains(&db.name.as_str()));
            *databases = keep;
            closing
        };
        for database in closing {
            database.driver.close().await;
            tracing::info!(database = %database.name, "Closed database");
        }
        Ok(())
    }
}
