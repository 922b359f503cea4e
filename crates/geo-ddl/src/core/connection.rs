//! Database access seam.
//!
//! The DDL machinery only needs to execute statements and read back
//! scalar or single-row results, so the connection trait stays small
//! and driver crates adapt to it from the outside.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::dialects::DialectKind;
use crate::error::Result;

/// A single value read from the database.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlScalar {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

impl SqlScalar {
    /// Loose truthiness used for EXISTS/COUNT style probe queries.
    pub fn is_truthy(&self) -> bool {
        match self {
            SqlScalar::Null => false,
            SqlScalar::Bool(b) => *b,
            SqlScalar::Int(i) => *i != 0,
            SqlScalar::Text(s) => !s.is_empty(),
            SqlScalar::Bytes(b) => !b.is_empty(),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            SqlScalar::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            SqlScalar::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Connection handle used by the spatial DDL machinery.
#[async_trait]
pub trait SpatialConnection: Send + Sync {
    /// Backend family this connection talks to.
    fn dialect(&self) -> DialectKind;

    /// Execute a statement, returning the affected row count.
    async fn execute(&self, sql: &str) -> Result<u64>;

    /// Run a query expected to yield at most one scalar.
    async fn query_scalar(&self, sql: &str) -> Result<Option<SqlScalar>>;

    /// Run a query expected to yield at most one row.
    async fn query_row(&self, sql: &str) -> Result<Option<Vec<SqlScalar>>>;
}

/// In-memory connection that records every statement and replays
/// scripted results. The primary test double for the DDL lifecycle.
pub struct RecordingConnection {
    kind: DialectKind,
    statements: Mutex<Vec<String>>,
    scalar_script: Mutex<VecDeque<Option<SqlScalar>>>,
    row_script: Mutex<VecDeque<Option<Vec<SqlScalar>>>>,
    fail_on: Mutex<Option<String>>,
}

impl RecordingConnection {
    pub fn new(kind: DialectKind) -> Self {
        RecordingConnection {
            kind,
            statements: Mutex::new(Vec::new()),
            scalar_script: Mutex::new(VecDeque::new()),
            row_script: Mutex::new(VecDeque::new()),
            fail_on: Mutex::new(None),
        }
    }

    /// Statements seen so far, in execution order.
    pub fn statements(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    /// Queue the result for the next `query_scalar` call.
    pub fn push_scalar(&self, value: Option<SqlScalar>) {
        self.scalar_script.lock().unwrap().push_back(value);
    }

    /// Queue the result for the next `query_row` call.
    pub fn push_row(&self, value: Option<Vec<SqlScalar>>) {
        self.row_script.lock().unwrap().push_back(value);
    }

    /// Make any statement containing `needle` fail.
    pub fn fail_on(&self, needle: impl Into<String>) {
        *self.fail_on.lock().unwrap() = Some(needle.into());
    }

    fn record(&self, sql: &str) -> Result<()> {
        self.statements.lock().unwrap().push(sql.to_string());
        if let Some(needle) = self.fail_on.lock().unwrap().as_deref() {
            if sql.contains(needle) {
                return Err(crate::error::GeoDdlError::database(format!(
                    "injected failure on statement: {sql}"
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SpatialConnection for RecordingConnection {
    fn dialect(&self) -> DialectKind {
        self.kind
    }

    async fn execute(&self, sql: &str) -> Result<u64> {
        self.record(sql)?;
        Ok(0)
    }

    async fn query_scalar(&self, sql: &str) -> Result<Option<SqlScalar>> {
        self.record(sql)?;
        Ok(self
            .scalar_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(None))
    }

    async fn query_row(&self, sql: &str) -> Result<Option<Vec<SqlScalar>>> {
        self.record(sql)?;
        Ok(self.row_script.lock().unwrap().pop_front().unwrap_or(None))
    }
}
