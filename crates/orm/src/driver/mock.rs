use super::{Driver, ExecResult};
use crate::dialect::Dialect;
use crate::error::{ErrorKind, Result};
use crate::row::Row;
use crate::value::Value;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// One statement as received by [`MockDriver`], placeholders already adapted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<Value>,
}

/// In-memory driver that records every statement and answers from a script.
///
/// Queries pop the next queued result set (or return no rows); executions
/// report `rows_affected` (1 unless changed) and an increasing insert id.
#[derive(Debug)]
pub struct MockDriver {
    dialect: Dialect,
    statements: Mutex<Vec<Statement>>,
    results: Mutex<VecDeque<Vec<Row>>>,
    failure: Mutex<Option<String>>,
    latency: Mutex<Option<Duration>>,
    rows_affected: AtomicU64,
    next_id: AtomicI64,
    closed: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockDriver {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            statements: Mutex::default(),
            results: Mutex::default(),
            failure: Mutex::default(),
            latency: Mutex::default(),
            rows_affected: AtomicU64::new(1),
            next_id: AtomicI64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Queue the rows returned by the next `query`.
    pub fn push_rows(&self, rows: Vec<Row>) {
        lock(&self.results).push_back(rows);
    }

    /// Make the next statement fail with a driver error carrying `message`.
    pub fn fail_next(&self, message: impl Into<String>) {
        *lock(&self.failure) = Some(message.into());
    }

    /// Delay every statement, so callers can race cancellation against it.
    pub fn set_latency(&self, latency: Duration) {
        *lock(&self.latency) = Some(latency);
    }

    pub fn set_rows_affected(&self, rows: u64) {
        self.rows_affected.store(rows, Ordering::SeqCst);
    }

    pub fn statements(&self) -> Vec<Statement> {
        lock(&self.statements).clone()
    }

    /// SQL text of every statement received so far.
    pub fn sql(&self) -> Vec<String> {
        lock(&self.statements).iter().map(|s| s.sql.clone()).collect()
    }

    pub fn clear(&self) {
        lock(&self.statements).clear();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn receive(&self, sql: &str, args: &[Value]) -> Result<()> {
        let latency = *lock(&self.latency);
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        lock(&self.statements).push(Statement { sql: sql.to_string(), args: args.to_vec() });
        if self.is_closed() {
            exn::bail!(ErrorKind::Driver("pool closed".to_string()));
        }
        if let Some(message) = lock(&self.failure).take() {
            exn::bail!(ErrorKind::Driver(message));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    async fn query(&self, sql: &str, args: &[Value]) -> Result<Vec<Row>> {
        self.receive(sql, args).await?;
        Ok(lock(&self.results).pop_front().unwrap_or_default())
    }

    async fn execute(&self, sql: &str, args: &[Value]) -> Result<ExecResult> {
        self.receive(sql, args).await?;
        Ok(ExecResult {
            rows_affected: self.rows_affected.load(Ordering::SeqCst),
            last_insert_id: Some(self.next_id.fetch_add(1, Ordering::SeqCst)),
        })
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
