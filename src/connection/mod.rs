//! The SQL execution seam.
//!
//! Orchestration code only talks to [`SqlExecutor`]; the TDS implementation
//! lives in [`tds`], and tests substitute a recording executor.

mod classify;
pub mod tds;

use std::time::Duration;

pub use classify::{
    classify_connect_error, looks_like_local_instance, ConnectFailure, LOCAL_INSTANCE_HINT,
};
pub use tds::TdsConnection;

use crate::error::SqlOpsError;
use crate::sql::Statement;

/// Settings shared by every statement issued on a connection.
///
/// Passed explicitly when a connection is opened instead of living in
/// process-wide state, so unrelated callers cannot affect each other.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    /// Upper bound for a single statement. `None` waits indefinitely.
    pub command_timeout: Option<Duration>,
}

impl ExecutionContext {
    pub fn with_command_timeout(timeout: Duration) -> Self {
        Self {
            command_timeout: Some(timeout),
        }
    }
}

/// One row of a result set, with every value rendered as text
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultRow {
    columns: Vec<String>,
    values: Vec<Option<String>>,
}

impl ResultRow {
    pub fn new(columns: Vec<String>, values: Vec<Option<String>>) -> Self {
        debug_assert_eq!(columns.len(), values.len());
        Self { columns, values }
    }

    /// Build a row from `(column, value)` pairs.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, Option<V>)>,
        K: Into<String>,
        V: Into<String>,
    {
        let (columns, values) = pairs
            .into_iter()
            .map(|(k, v)| (k.into(), v.map(Into::into)))
            .unzip();
        Self { columns, values }
    }

    /// Value of a column by name, matched case-insensitively. NULL and unknown
    /// columns both give `None`.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))
            .and_then(|idx| self.values[idx].as_deref())
    }
}

/// Executes statements against one open SQL Server connection.
///
/// Calls are blocking and strictly sequential; each statement commits on its
/// own.
pub trait SqlExecutor {
    /// Run a statement for its effect, draining any result sets.
    fn execute(&mut self, statement: &Statement) -> Result<(), SqlOpsError>;

    /// Run a statement and return the rows of its first result set.
    fn query(&mut self, statement: &Statement) -> Result<Vec<ResultRow>, SqlOpsError>;

    /// Run a single-value query and return `column` of the first row.
    ///
    /// An empty result or a NULL value is reported as
    /// [`SqlOpsError::NoMetadataRows`].
    fn query_value(&mut self, statement: &Statement, column: &str) -> Result<String, SqlOpsError> {
        self.query(statement)?
            .first()
            .and_then(|row| row.get(column))
            .map(str::to_string)
            .ok_or_else(|| SqlOpsError::NoMetadataRows {
                query: statement.sql().to_string(),
            })
    }

    /// Make the connection usable again after a statement was abandoned
    /// part-way, e.g. by a command timeout. A no-op when nothing is pending.
    fn recover(&mut self) -> Result<(), SqlOpsError> {
        Ok(())
    }
}

impl<T: SqlExecutor + ?Sized> SqlExecutor for &mut T {
    fn execute(&mut self, statement: &Statement) -> Result<(), SqlOpsError> {
        (**self).execute(statement)
    }

    fn query(&mut self, statement: &Statement) -> Result<Vec<ResultRow>, SqlOpsError> {
        (**self).query(statement)
    }

    fn recover(&mut self) -> Result<(), SqlOpsError> {
        (**self).recover()
    }
}
