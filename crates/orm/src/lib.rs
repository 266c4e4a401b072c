//! Relational mapper over SQLite, the PostgreSQL family and the MySQL family.
//!
//! # Architecture
//! Everything hangs off a [`Core`], an explicitly passed handle that owns:
//! - the **registry** of named databases and the tables known on each,
//! - the **bindings** recording which database and table each entity type
//!   was migrated into,
//! - the **result cache** of earlier reads, and
//! - the **event bus** on which mutations announce themselves so the cache
//!   can evict what they made stale.
//!
//! Entities are declared with [`entity!`], whose `#[orm("...")]` tags drive
//! both the [`migrate`] planner and the row [`mapper`]. Queries are built
//! fluently from [`Core::table`] (generic [`Row`]s) or [`Core::model`]
//! (typed records) and finished by one terminal.
//!
//! SQL leaves the process only through a [`Driver`]; the `sqlite`,
//! `postgres` and `mysql` features enable the sqlx-backed ones, and the
//! `mock` feature a recording driver for tests.

mod admin;
pub mod cache;
mod case;
mod context;
pub mod dialect;
pub mod driver;
pub mod entity;
pub mod error;
pub mod event;
pub mod global;
pub mod introspect;
pub mod mapper;
pub mod migrate;
pub mod query;
pub mod registry;
mod row;
pub mod tags;
mod value;

pub use crate::admin::{AdminUser, USERS_TABLE};
pub use crate::cache::Granularity;
pub use crate::context::{Binding, Core, Options, SWEEP_INTERVAL, Sweeper};
pub use crate::dialect::Dialect;
pub use crate::driver::{Driver, ExecResult, PoolSettings};
pub use crate::entity::{Entity, Field};
pub use crate::error::{Error, ErrorKind, Result};
pub use crate::event::{Event, EventKind};
pub use crate::mapper::{FieldKind, FieldType};
pub use crate::migrate::{Alteration, Confirm, Migrator, Policy, Report, StdinConfirm};
pub use crate::query::{Builder, Records, RowSink, Rows};
pub use crate::registry::{Database, Registry};
pub use crate::row::Row;
pub use crate::value::{Timestamp, Value};
