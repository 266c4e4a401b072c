//! Administrative surface: catalog listings and user provisioning.

use crate::context::Core;
use crate::error::{ErrorKind, Result};
use crate::introspect;
use crate::migrate::{Alteration, Policy};
use crate::value::Timestamp;
use exn::ResultExt;
use std::sync::Arc;
use tracing::instrument;

/// Table holding the built-in [`AdminUser`] records.
pub const USERS_TABLE: &str = "users";

crate::entity! {
    /// Operator account created through [`Core::create_user`].
    #[derive(Debug, Clone, Default, PartialEq)]
    pub struct AdminUser {
        #[orm("pk;autoinc")]
        pub id: i64,
        #[orm("unique;size:50")]
        pub email: String,
        #[orm("size:60;notnull")]
        pub password: String,
        #[orm("default:false")]
        pub is_admin: bool,
        #[orm("now")]
        pub created_at: Timestamp,
    }
}

impl Core {
    /// Names of every registered database, in registration order.
    pub fn list_databases(&self) -> Vec<String> {
        self.registry().list_databases()
    }

    /// User tables in `database`, read through the cache.
    #[instrument(skip(self))]
    pub async fn list_tables(&self, database: &str) -> Result<Vec<String>> {
        let target = self.registry().lookup(database)?;
        if let Some(tables) = self.cache().tables(target.name()) {
            return Ok(tables.as_ref().clone());
        }
        let seen = self.cache().generation();
        let tables = introspect::tables(target.driver().as_ref()).await?;
        self.cache().put_tables_since(target.name(), Arc::new(tables.clone()), seen);
        Ok(tables)
    }

    /// Column name to dialect type for `table`, read through the cache.
    #[instrument(skip(self))]
    pub async fn list_columns(&self, table: &str, database: &str) -> Result<Vec<(String, String)>> {
        let target = self.registry().lookup(database)?;
        if let Some(columns) = self.cache().columns(target.name(), table) {
            return Ok(columns.as_ref().clone());
        }
        let seen = self.cache().generation();
        let columns = introspect::columns(target.driver().as_ref(), table).await?;
        self.cache().put_columns_since(target.name(), table, Arc::new(columns.clone()), seen);
        Ok(columns)
    }

    /// Create an operator account in `database` and return its id.
    ///
    /// Unless this core already migrated [`AdminUser`] into `users` there,
    /// the table is created if needed: missing columns are added and surplus
    /// ones are left alone.
    pub async fn create_user(&self, email: &str, password: &str, is_admin: bool, database: &str) -> Result<i64> {
        self.create_user_with_cost(email, password, is_admin, database, bcrypt::DEFAULT_COST)
            .await
    }

    #[instrument(skip(self, password, cost))]
    pub(crate) async fn create_user_with_cost(
        &self,
        email: &str,
        password: &str,
        is_admin: bool,
        database: &str,
        cost: u32,
    ) -> Result<i64> {
        let target = self.registry().lookup(database)?;
        let migrated = self
            .binding::<AdminUser>()
            .is_some_and(|b| b.database == target.name() && b.table == USERS_TABLE);
        if !migrated {
            let additive = |_: &str, alteration: &Alteration| matches!(alteration, Alteration::AddColumn { .. });
            self.migrate_into::<AdminUser>(target.name(), USERS_TABLE, Policy::Prompt(Box::new(additive)))
                .await?;
        }

        let password = password.to_string();
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .or_raise(|| ErrorKind::Hash)?
            .or_raise(|| ErrorKind::Hash)?;

        let user = AdminUser {
            email: email.to_string(),
            password: hashed,
            is_admin,
            ..AdminUser::default()
        };
        let id = self.model::<AdminUser>().insert(&user).await?;
        tracing::info!(id, email, is_admin, "Created user");
        Ok(id)
    }
}
