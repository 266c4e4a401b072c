//! Query result cache with event-driven invalidation.
//!
//! Results live in four partitions, one per (single | many) x (row | record)
//! flavour, each keyed by the by-value [`CacheKey`] of the read that produced
//! them. Two lookup memos sit beside them: the table list per database and
//! the column types per table. Entries are immutable snapshots behind `Arc`.
//!
//! Invalidation is coarse by default: any `create`, `update` or `delete`
//! empties all four partitions. [`Granularity::Table`] narrows that to
//! entries read from the mutated table (plus every raw query, whose tables
//! are unknown).
//!
//! Every applied event moves a generation counter. A read snapshots it before
//! going to the store and stores its result with [`ResultCache::put_since`],
//! which drops the result if an event was applied in between.

use crate::event::{Event, EventKind};
use crate::registry::{read, write};
use crate::value::Value;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

/// Identity of one cacheable read.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct CacheKey {
    /// Record type for typed reads; `None` for row reads.
    pub record: Option<TypeId>,
    pub database: String,
    pub table: String,
    pub projection: Vec<String>,
    pub order: Vec<String>,
    pub filter: Option<String>,
    pub raw: Option<String>,
    pub limit: Option<u64>,
    pub page: Option<u64>,
    pub args: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    RecordOne,
    RecordMany,
    RowOne,
    RowMany,
}

impl Partition {
    const ALL: [Self; 4] = [Self::RecordOne, Self::RecordMany, Self::RowOne, Self::RowMany];

    fn index(self) -> usize {
        match self {
            Self::RecordOne => 0,
            Self::RecordMany => 1,
            Self::RowOne => 2,
            Self::RowMany => 3,
        }
    }
}

/// How far a mutation event reaches into the result partitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Granularity {
    #[default]
    Coarse,
    Table,
}

type Entry = Arc<dyn Any + Send + Sync>;

#[derive(Debug, Default)]
pub struct ResultCache {
    granularity: Granularity,
    partitions: [RwLock<HashMap<CacheKey, Entry>>; 4],
    tables: RwLock<HashMap<String, Arc<Vec<String>>>>,
    columns: RwLock<HashMap<(String, String), Arc<Vec<(String, String)>>>>,
    generation: AtomicU64,
}

impl ResultCache {
    pub fn new(granularity: Granularity) -> Self {
        Self { granularity, ..Self::default() }
    }

    pub fn granularity(&self) -> Granularity {
        self.granularity
    }

    /// Cached value for `key`, if present and of type `V`.
    pub fn get<V: Send + Sync + 'static>(&self, partition: Partition, key: &CacheKey) -> Option<Arc<V>> {
        let entry = read(&self.partitions[partition.index()]).get(key).cloned()?;
        entry.downcast::<V>().ok()
    }

    pub fn put<V: Send + Sync + 'static>(&self, partition: Partition, key: CacheKey, value: Arc<V>) {
        write(&self.partitions[partition.index()]).insert(key, value);
    }

    /// Number of events applied so far.
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    /// Store `value` unless an event was applied after `seen` was read from
    /// [`Self::generation`]. Returns whether it was stored.
    ///
    /// The check runs under the partition's write lock, so an event applied
    /// concurrently either stops the store or flushes the stored entry.
    pub fn put_since<V: Send + Sync + 'static>(
        &self,
        partition: Partition,
        key: CacheKey,
        value: Arc<V>,
        seen: u64,
    ) -> bool {
        let mut entries = write(&self.partitions[partition.index()]);
        if self.generation() != seen {
            return false;
        }
        entries.insert(key, value);
        true
    }

    /// Number of entries in one partition.
    pub fn len(&self, partition: Partition) -> usize {
        read(&self.partitions[partition.index()]).len()
    }

    pub fn is_empty(&self) -> bool {
        Partition::ALL.iter().all(|p| self.len(*p) == 0)
    }

    pub fn tables(&self, database: &str) -> Option<Arc<Vec<String>>> {
        read(&self.tables).get(database).cloned()
    }

    pub fn put_tables(&self, database: &str, tables: Arc<Vec<String>>) {
        write(&self.tables).insert(database.to_string(), tables);
    }

    /// [`Self::put_tables`], skipped when an event was applied after `seen`.
    pub fn put_tables_since(&self, database: &str, tables: Arc<Vec<String>>, seen: u64) -> bool {
        let mut memo = write(&self.tables);
        if self.generation() != seen {
            return false;
        }
        memo.insert(database.to_string(), tables);
        true
    }

    pub fn columns(&self, database: &str, table: &str) -> Option<Arc<Vec<(String, String)>>> {
        read(&self.columns).get(&(database.to_string(), table.to_string())).cloned()
    }

    pub fn put_columns(&self, database: &str, table: &str, columns: Arc<Vec<(String, String)>>) {
        write(&self.columns).insert((database.to_string(), table.to_string()), columns);
    }

    /// [`Self::put_columns`], skipped when an event was applied after `seen`.
    pub fn put_columns_since(&self, database: &str, table: &str, columns: Arc<Vec<(String, String)>>, seen: u64) -> bool {
        let mut memo = write(&self.columns);
        if self.generation() != seen {
            return false;
        }
        memo.insert((database.to_string(), table.to_string()), columns);
        true
    }

    pub fn forget_columns(&self, database: &str, table: &str) {
        write(&self.columns).remove(&(database.to_string(), table.to_string()));
    }

    pub fn forget_tables(&self, database: &str) {
        write(&self.tables).remove(database);
    }

    /// Empty all four result partitions.
    pub fn flush_results(&self) {
        for partition in &self.partitions {
            write(partition).clear();
        }
    }

    fn flush_table(&self, database: &str, table: &str) {
        for partition in &self.partitions {
            write(partition).retain(|key, _| key.raw.is_none() && !(key.database == database && key.table == table));
        }
    }

    /// Empty the result partitions and both lookup memos.
    pub fn flush_all(&self) {
        self.flush_results();
        write(&self.tables).clear();
        write(&self.columns).clear();
    }

    /// React to one bus event.
    pub fn apply(&self, event: &Event) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        match event.kind {
            EventKind::Create | EventKind::Update | EventKind::Delete => self.evict(event),
            EventKind::Drop => {
                self.evict(event);
                self.forget_columns(&event.database, &event.table);
                write(&self.tables).clear();
            },
            EventKind::Clean => self.flush_all(),
        }
        tracing::trace!(kind = %event.kind, table = %event.table, database = %event.database, "Cache invalidated");
    }

    fn evict(&self, event: &Event) {
        match self.granularity {
            Granularity::Coarse => self.flush_results(),
            Granularity::Table => self.flush_table(&event.database, &event.table),
        }
    }
}
