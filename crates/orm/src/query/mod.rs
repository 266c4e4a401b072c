//! The fluent query builder.
//!
//! A [`Builder`] is bound to a table (and optionally a database), collects
//! projection, predicate, ordering and paging through chained calls, and is
//! finished by one terminal: [`all`](Builder::all), [`one`](Builder::one),
//! `insert`, [`set`](Builder::set), [`delete`](Builder::delete) or
//! [`drop_table`](Builder::drop_table).
//!
//! The flavour of result is chosen by the [`RowSink`]: [`Rows`] yields
//! generic [`Row`]s, [`Records<T>`] yields entities.
//!
//! Reads go through the result cache. Mutations publish an [`Event`] and
//! wait until every cache subscriber has handled it before returning.

mod sql;

use crate::cache::{CacheKey, Partition};
use crate::context::{Binding, Core};
use crate::entity::Entity;
use crate::error::{ErrorKind, Result};
use crate::event::{Event, EventKind};
use crate::mapper::map_row;
use crate::registry::Database;
use crate::row::Row;
use crate::value::Value;
use exn::OptionExt;
use std::any::TypeId;
use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

/// Turns driver rows into the builder's result items.
pub trait RowSink: Send + Sync + 'static {
    type Item: Clone + Send + Sync + 'static;

    /// Cache partition for single-item reads.
    const ONE: Partition;
    /// Cache partition for sequence reads.
    const MANY: Partition;

    /// Record type identity, part of the cache key for typed reads.
    fn record_type() -> Option<TypeId>;

    /// Where this sink's entity was migrated, if anywhere.
    fn binding(core: &Core) -> Option<Binding>;

    /// Table used when neither the caller nor a binding names one.
    fn default_table() -> Option<String>;

    fn convert(row: Row, projection: &[String]) -> Result<Self::Item>;
}

/// Generic flavour: results are ordered column to value mappings.
#[derive(Debug, Clone, Copy, Default)]
pub struct Rows;

impl RowSink for Rows {
    type Item = Row;

    const ONE: Partition = Partition::RowOne;
    const MANY: Partition = Partition::RowMany;

    fn record_type() -> Option<TypeId> {
        None
    }

    fn binding(_core: &Core) -> Option<Binding> {
        None
    }

    fn default_table() -> Option<String> {
        None
    }

    fn convert(row: Row, _projection: &[String]) -> Result<Row> {
        Ok(row)
    }
}

/// Typed flavour: results are instances of `T`.
pub struct Records<T>(PhantomData<fn() -> T>);

impl<T: Entity> RowSink for Records<T> {
    type Item = T;

    const ONE: Partition = Partition::RecordOne;
    const MANY: Partition = Partition::RecordMany;

    fn record_type() -> Option<TypeId> {
        Some(TypeId::of::<T>())
    }

    fn binding(core: &Core) -> Option<Binding> {
        core.binding::<T>()
    }

    fn default_table() -> Option<String> {
        Some(T::table_name())
    }

    fn convert(row: Row, projection: &[String]) -> Result<T> {
        map_row(row, projection)
    }
}

/// Accumulated query state, consumed by one terminal.
pub struct Builder<'c, S: RowSink> {
    core: &'c Core,
    table: Option<String>,
    database: Option<String>,
    projection: Vec<String>,
    filter: Option<String>,
    filter_args: Vec<Value>,
    raw: Option<String>,
    raw_args: Vec<Value>,
    order: Vec<String>,
    limit: Option<u64>,
    page: Option<u64>,
    debug: bool,
    cancel: Option<CancellationToken>,
    sink: PhantomData<fn() -> S>,
}

impl<S: RowSink> fmt::Debug for Builder<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("table", &self.table)
            .field("database", &self.database)
            .field("projection", &self.projection)
            .field("filter", &self.filter)
            .field("raw", &self.raw)
            .field("order", &self.order)
            .field("limit", &self.limit)
            .field("page", &self.page)
            .finish_non_exhaustive()
    }
}

impl<'c, S: RowSink> Builder<'c, S> {
    pub(crate) fn new(core: &'c Core, table: Option<String>) -> Self {
        let binding = S::binding(core);
        Self {
            core,
            table: table
                .or_else(|| binding.as_ref().map(|b| b.table.clone()))
                .or_else(S::default_table),
            database: binding.map(|b| b.database),
            projection: Vec::new(),
            filter: None,
            filter_args: Vec::new(),
            raw: None,
            raw_args: Vec::new(),
            order: Vec::new(),
            limit: None,
            page: None,
            debug: false,
            cancel: None,
            sink: PhantomData,
        }
    }

    /// Target a database other than the default (or the entity's own).
    pub fn database(mut self, name: impl Into<String>) -> Self {
        self.database = Some(name.into());
        self
    }

    /// Only read these columns. Unlisted record fields keep their zero value.
    pub fn select<C: Into<String>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        self.projection = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a `WHERE` predicate with `?` placeholders. Repeated calls are
    /// combined with `AND`.
    pub fn filter(mut self, predicate: impl Into<String>, args: Vec<Value>) -> Self {
        let predicate = predicate.into();
        self.filter = Some(match self.filter.take() {
            Some(existing) => format!("({existing}) AND ({predicate})"),
            None => predicate,
        });
        self.filter_args.extend(args);
        self
    }

    /// Read with this statement instead of the generated one. Projection,
    /// predicate, ordering and paging no longer apply to reads.
    pub fn raw(mut self, sql: impl Into<String>, args: Vec<Value>) -> Self {
        self.raw = Some(sql.into());
        self.raw_args = args;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    /// 1-indexed page of `limit` rows. Ignored without a limit.
    pub fn page(mut self, page: u64) -> Self {
        self.page = Some(page);
        self
    }

    /// `+col` ascending, `-col` descending, bare names ascending.
    pub fn order_by<C: Into<String>>(mut self, columns: impl IntoIterator<Item = C>) -> Self {
        self.order.extend(columns.into_iter().map(Into::into));
        self
    }

    /// Abort the in-flight statement with [`ErrorKind::Cancelled`] once
    /// `token` is cancelled.
    pub fn context(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    /// Log generated statements at `info` rather than `trace`.
    pub fn debug(mut self) -> Self {
        self.debug = true;
        self
    }

    /// Every matching item. No match is an empty `Vec`.
    #[instrument(skip_all, fields(table = self.table.as_deref(), database = self.database.as_deref()))]
    pub async fn all(&self) -> Result<Vec<S::Item>> {
        let table = self.table_name()?;
        let database = self.target()?;
        let key = self.key(&table, &database, self.limit, self.page);
        if let Some(hit) = self.core.cache().get::<Vec<S::Item>>(S::MANY, &key) {
            tracing::trace!("Cache hit");
            return Ok(hit.as_ref().clone());
        }
        let seen = self.core.cache().generation();
        let (sql, args) = self.read_statement(&table, self.limit, self.page);
        let rows = self.fetch(&database, &sql, &args).await?;
        let items = rows
            .into_iter()
            .map(|row| S::convert(row, &self.projection))
            .collect::<Result<Vec<_>>>()?;
        if !self.core.cache().put_since(S::MANY, key, Arc::new(items.clone()), seen) {
            tracing::trace!("Invalidated while reading; result not cached");
        }
        Ok(items)
    }

    /// The first matching item; [`ErrorKind::NotFound`] when nothing matches.
    ///
    /// The limit defaults to 1 and the page is ignored.
    #[instrument(skip_all, fields(table = self.table.as_deref(), database = self.database.as_deref()))]
    pub async fn one(&self) -> Result<S::Item> {
        let table = self.table_name()?;
        let database = self.target()?;
        let limit = Some(self.limit.unwrap_or(1));
        let key = self.key(&table, &database, limit, None);
        if let Some(hit) = self.core.cache().get::<S::Item>(S::ONE, &key) {
            tracing::trace!("Cache hit");
            return Ok(hit.as_ref().clone());
        }
        let seen = self.core.cache().generation();
        let (sql, args) = self.read_statement(&table, limit, None);
        let row = self
            .fetch(&database, &sql, &args)
            .await?
            .into_iter()
            .next()
            .ok_or_raise(|| ErrorKind::NotFound)?;
        let item = S::convert(row, &self.projection)?;
        if !self.core.cache().put_since(S::ONE, key, Arc::new(item.clone()), seen) {
            tracing::trace!("Invalidated while reading; result not cached");
        }
        Ok(item)
    }

    /// `UPDATE ... SET <assignments> WHERE <filter>`; returns rows affected.
    ///
    /// Assignment arguments bind before the predicate's. Refused with
    /// [`ErrorKind::MissingWhere`] before anything is sent when no
    /// [`filter`](Self::filter) was given.
    #[instrument(skip_all, fields(table = self.table.as_deref(), database = self.database.as_deref()))]
    pub async fn set(&self, assignments: &str, args: Vec<Value>) -> Result<u64> {
        let table = self.table_name()?;
        let filter = self.filter.as_deref().ok_or_raise(|| ErrorKind::MissingWhere)?;
        let database = self.target()?;
        let mut args = args;
        args.extend(self.filter_args.iter().cloned());
        let result = self.exec(&database, &sql::update(&table, assignments, filter), &args).await?;
        self.announce(EventKind::Update, &table, &database).await;
        Ok(result.rows_affected)
    }

    /// `DELETE FROM ... WHERE <filter>`; returns rows affected.
    #[instrument(skip_all, fields(table = self.table.as_deref(), database = self.database.as_deref()))]
    pub async fn delete(&self) -> Result<u64> {
        let table = self.table_name()?;
        let filter = self.filter.as_deref().ok_or_raise(|| ErrorKind::MissingWhere)?;
        let database = self.target()?;
        let result = self.exec(&database, &sql::delete(&table, filter), &self.filter_args).await?;
        self.announce(EventKind::Delete, &table, &database).await;
        Ok(result.rows_affected)
    }

    /// `DROP TABLE IF EXISTS`, forgetting the table's metadata.
    #[instrument(skip_all, fields(table = self.table.as_deref(), database = self.database.as_deref()))]
    pub async fn drop_table(&self) -> Result<()> {
        let table = self.table_name()?;
        let database = self.target()?;
        self.exec(&database, &sql::drop_table(&table), &[]).await?;
        database.forget_table(&table);
        self.announce(EventKind::Drop, &table, &database).await;
        Ok(())
    }

    /// Shared insert path; returns the new row's id where the store reports
    /// one, otherwise the number of rows inserted.
    async fn insert_row(&self, columns: Vec<String>, values: Vec<Value>, primary_key: Option<String>) -> Result<i64> {
        let table = self.table_name()?;
        if columns.len() != values.len() {
            exn::bail!(ErrorKind::LengthMismatch { columns: columns.len(), values: values.len() });
        }
        let database = self.target()?;
        let dialect = database.dialect();
        let mut statement = sql::insert(&table, &columns, dialect);
        let primary_key = primary_key.or_else(|| database.table(&table).and_then(|t| t.primary_key));
        let id = if dialect.is_postgres_family()
            && let Some(primary_key) = primary_key
        {
            statement.push_str(&format!(" RETURNING {primary_key}"));
            let rows = self.fetch(&database, &statement, &values).await?;
            rows.first()
                .and_then(|row| row.at(0))
                .and_then(Value::as_i64)
                .unwrap_or_else(|| i64::try_from(rows.len()).unwrap_or(i64::MAX))
        } else {
            let result = self.exec(&database, &statement, &values).await?;
            result
                .last_insert_id
                .unwrap_or_else(|| i64::try_from(result.rows_affected).unwrap_or(i64::MAX))
        };
        self.announce(EventKind::Create, &table, &database).await;
        Ok(id)
    }

    fn table_name(&self) -> Result<String> {
        self.table.clone().filter(|t| !t.trim().is_empty()).ok_or_raise(|| ErrorKind::NoTable)
    }

    fn target(&self) -> Result<Arc<Database>> {
        self.core.registry().lookup(self.database.as_deref().unwrap_or_default())
    }

    fn key(&self, table: &str, database: &Database, limit: Option<u64>, page: Option<u64>) -> CacheKey {
        CacheKey {
            record: S::record_type(),
            database: database.name().to_string(),
            table: table.to_string(),
            projection: self.projection.clone(),
            order: self.order.clone(),
            filter: self.filter.clone(),
            raw: self.raw.clone(),
            limit,
            page,
            args: self.raw.as_ref().map_or_else(|| self.filter_args.clone(), |_| self.raw_args.clone()),
        }
    }

    fn read_statement(&self, table: &str, limit: Option<u64>, page: Option<u64>) -> (String, Vec<Value>) {
        if let Some(raw) = &self.raw {
            return (raw.clone(), self.raw_args.clone());
        }
        let select = sql::Select {
            table,
            projection: &self.projection,
            filter: self.filter.as_deref(),
            order: &self.order,
            limit,
            page,
        };
        (select.render(), self.filter_args.clone())
    }

    fn log(&self, sql: &str, args: &[Value]) {
        if self.debug {
            tracing::info!(sql, ?args, "Dispatching statement");
        } else {
            tracing::trace!(sql, ?args, "Dispatching statement");
        }
    }

    async fn fetch(&self, database: &Database, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        let sql = database.dialect().adapt_placeholders(sql);
        self.log(&sql, args);
        self.guard(database.driver().query(&sql, args)).await
    }

    async fn exec(&self, database: &Database, sql: &str, args: &[Value]) -> Result<crate::driver::ExecResult> {
        let sql = database.dialect().adapt_placeholders(sql);
        self.log(&sql, args);
        self.guard(database.driver().execute(&sql, args)).await
    }

    async fn guard<T>(&self, statement: impl Future<Output = Result<T>>) -> Result<T> {
        match &self.cancel {
            Some(token) => tokio::select! {
                biased;
                () = token.cancelled() => exn::bail!(ErrorKind::Cancelled),
                result = statement => result,
            },
            None => statement.await,
        }
    }

    async fn announce(&self, kind: EventKind, table: &str, database: &Database) {
        let delivered = self.core.publish(Event::new(kind, table, database.name())).await;
        tracing::debug!(%kind, table, delivered, "Published mutation event");
    }
}

impl Builder<'_, Rows> {
    /// `INSERT INTO ... (columns) VALUES (...)`.
    ///
    /// Fails with [`ErrorKind::LengthMismatch`] when the counts differ.
    #[instrument(skip_all, fields(table = self.table.as_deref(), database = self.database.as_deref()))]
    pub async fn insert<C: Into<String>>(&self, columns: impl IntoIterator<Item = C>, values: Vec<Value>) -> Result<i64> {
        let columns = columns.into_iter().map(Into::into).collect();
        self.insert_row(columns, values, None).await
    }
}

impl<T: Entity> Builder<'_, Records<T>> {
    /// Insert `record`, leaving zero-valued `autoinc`, `now` and `default:`
    /// fields to the store.
    #[instrument(skip_all, fields(table = self.table.as_deref(), database = self.database.as_deref()))]
    pub async fn insert(&self, record: &T) -> Result<i64> {
        let mut columns = Vec::new();
        let mut values = Vec::new();
        for (field, (name, value)) in T::fields().iter().zip(record.values()) {
            let tags = &field.tags;
            if (tags.autoinc || tags.now || tags.default.is_some()) && record.is_zero(name) {
                continue;
            }
            columns.push(field.column.clone());
            values.push(value);
        }
        self.insert_row(columns, values, T::primary_key().map(|f| f.column.clone())).await
    }
}
