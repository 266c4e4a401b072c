//! Mutation events published on the bus.

use derive_more::Display;
use serde::{Deserialize, Serialize};

/// Bus topic the result cache listens on.
pub const TOPIC: &str = "cache";

#[derive(Debug, Display, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    #[display("create")]
    Create,
    #[display("update")]
    Update,
    #[display("delete")]
    Delete,
    #[display("drop")]
    Drop,
    /// Flush everything; published by the sweeper.
    #[display("clean")]
    Clean,
}

/// `{type, table, database}` payload describing one mutation.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub table: String,
    pub database: String,
}

impl Event {
    pub fn new(kind: EventKind, table: impl Into<String>, database: impl Into<String>) -> Self {
        Self { kind, table: table.into(), database: database.into() }
    }

    pub fn clean() -> Self {
        Self::new(EventKind::Clean, "", "")
    }
}
