//! Query Execution Module
//!
//! Value, row and parameter types plus the statement runner shared by the
//! gateway and pooled sessions. All parameter values reach SQLite through
//! `raw_bind_parameter`; the SQL text is never rewritten.

use crate::core::{GatewayError, Result};
use rusqlite::types::{ToSqlOutput, ValueRef};
use rusqlite::{Connection, ToSql};
use serde::ser::{Serialize, SerializeMap, Serializer};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;
use tracing::debug;

/// A single SQL value, owned.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl Value {
    /// Returns the text if this is a `Text` value
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the integer if this is an `Integer` value
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

impl From<ValueRef<'_>> for Value {
    fn from(value: ValueRef<'_>) -> Self {
        match value {
            ValueRef::Null => Value::Null,
            ValueRef::Integer(i) => Value::Integer(i),
            ValueRef::Real(f) => Value::Real(f),
            ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => Value::Blob(b.to_vec()),
        }
    }
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Integer(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Integer(v.into())
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Real(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Integer(v as i64)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Blob(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// A result row keyed by column name, in select-list order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    entries: Vec<(String, Value)>,
}

impl Row {
    /// Creates an empty row
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a column; a repeated name shadows the earlier one on lookup
    pub fn push(&mut self, column: impl Into<String>, value: Value) {
        self.entries.push((column.into(), value));
    }

    /// Looks up a value by column name
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .rev()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Looks up a text column
    pub fn get_str(&self, column: &str) -> Option<&str> {
        self.get(column).and_then(Value::as_str)
    }

    /// Looks up an integer column
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(Value::as_i64)
    }

    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Serialize for Row {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, value) in &self.entries {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Parameters to bind to a statement's placeholders.
///
/// `Positional` binds to `?` / `?N` placeholders in order. `Named` binds to
/// `:name`, `@name` or `$name` placeholders; names may be given with or
/// without the prefix character.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Params {
    #[default]
    None,
    Positional(Vec<Value>),
    Named(Vec<(String, Value)>),
}

impl Params {
    /// Starts a positional parameter list
    pub fn positional() -> Self {
        Params::Positional(Vec::new())
    }

    /// Starts a named parameter list
    pub fn named() -> Self {
        Params::Named(Vec::new())
    }

    /// Appends a positional value; turns `Params::None` into a positional list
    pub fn bind(self, value: impl Into<Value>) -> Self {
        match self {
            Params::None => Params::Positional(vec![value.into()]),
            Params::Positional(mut values) => {
                values.push(value.into());
                Params::Positional(values)
            }
            Params::Named(mut values) => {
                let index = values.len() + 1;
                values.push((format!("?{index}"), value.into()));
                Params::Named(values)
            }
        }
    }

    /// Appends a named value; turns `Params::None` into a named list
    pub fn with(self, name: &str, value: impl Into<Value>) -> Self {
        let mut values = match self {
            Params::None => Vec::new(),
            Params::Named(values) => values,
            Params::Positional(values) => values
                .into_iter()
                .enumerate()
                .map(|(i, v)| (format!("?{}", i + 1), v))
                .collect(),
        };
        values.push((name.to_string(), value.into()));
        Params::Named(values)
    }

    /// Number of values supplied
    pub fn len(&self) -> usize {
        match self {
            Params::None => 0,
            Params::Positional(values) => values.len(),
            Params::Named(values) => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

/// Builds positional `Params` from a list of values.
///
/// ```
/// use portal_db::params;
/// let p = params!["ada@example.com", 42];
/// assert_eq!(p.len(), 2);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::core::db::query::Params::None
    };
    ($($value:expr),+ $(,)?) => {
        $crate::core::db::query::Params::Positional(vec![
            $($crate::core::db::query::Value::from($value)),+
        ])
    };
}

/// Materialized result of one executed statement
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryOutcome {
    /// Column names from the statement's select list (empty for DML)
    pub columns: Vec<String>,
    /// Rows returned by the statement
    pub rows: Vec<Row>,
    /// Rows selected (statements with a result set) or changed (DML)
    pub rows_affected: u64,
}

impl QueryOutcome {
    /// Consumes the outcome, returning its first row
    pub fn into_first(self) -> Option<Row> {
        self.rows.into_iter().next()
    }
}

/// A canceller that can be used to interrupt the running statement
#[derive(Clone)]
pub struct QueryCanceller {
    interrupt_handle: std::sync::Arc<rusqlite::InterruptHandle>,
}

impl QueryCanceller {
    pub(crate) fn new(interrupt_handle: rusqlite::InterruptHandle) -> Self {
        QueryCanceller {
            interrupt_handle: std::sync::Arc::new(interrupt_handle),
        }
    }

    /// Interrupts whatever statement the connection is running now.
    /// A no-op when the connection is idle.
    pub fn cancel(&self) {
        self.interrupt_handle.interrupt();
    }
}

impl std::fmt::Debug for QueryCanceller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryCanceller").finish_non_exhaustive()
    }
}

/// Interrupts the connection if it is not disarmed before the timeout.
struct Watchdog {
    disarm: Option<mpsc::Sender<()>>,
    thread: Option<thread::JoinHandle<bool>>,
}

impl Watchdog {
    fn arm(canceller: QueryCanceller, timeout: Duration) -> Self {
        let (tx, rx) = mpsc::channel::<()>();
        let thread = thread::spawn(move || match rx.recv_timeout(timeout) {
            Err(RecvTimeoutError::Timeout) => {
                canceller.cancel();
                true
            }
            _ => false,
        });
        Watchdog {
            disarm: Some(tx),
            thread: Some(thread),
        }
    }

    /// Stops the watchdog; returns true if it already fired
    fn disarm(mut self) -> bool {
        self.stop()
    }

    fn stop(&mut self) -> bool {
        if let Some(tx) = self.disarm.take() {
            let _ = tx.send(());
        }
        self.thread
            .take()
            .map(|t| t.join().unwrap_or(false))
            .unwrap_or(false)
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Query execution service that operates on a database connection
pub struct QueryExecutor<'a> {
    connection: &'a Connection,
}

impl<'a> QueryExecutor<'a> {
    /// Creates a new QueryExecutor for the given connection
    pub fn new(connection: &'a Connection) -> Self {
        QueryExecutor { connection }
    }

    /// Prepares, binds and executes one statement, materializing its rows.
    ///
    /// # Errors
    ///
    /// `ParameterCount`, `UnknownParameter` or `DuplicateParameter` when
    /// `params` does not fit the placeholders; `Query` for anything the
    /// driver rejects; `Interrupted` when the statement was cancelled.
    pub fn execute(&self, sql: &str, params: &Params) -> Result<QueryOutcome> {
        let mut stmt = self.connection.prepare(sql)?;
        bind_params(&mut stmt, params)?;

        let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();

        if columns.is_empty() {
            let changed = stmt.raw_execute()?;
            debug!(rows_affected = changed, "statement executed");
            return Ok(QueryOutcome {
                columns,
                rows: Vec::new(),
                rows_affected: changed as u64,
            });
        }

        let mut rows = Vec::new();
        let mut cursor = stmt.raw_query();
        while let Some(row) = cursor.next()? {
            let mut mapped = Row::new();
            for (i, name) in columns.iter().enumerate() {
                mapped.push(name.clone(), Value::from(row.get_ref(i)?));
            }
            rows.push(mapped);
        }
        debug!(rows = rows.len(), "statement returned rows");

        Ok(QueryOutcome {
            rows_affected: rows.len() as u64,
            columns,
            rows,
        })
    }

    /// Same as [`execute`](Self::execute), but interrupts the statement when
    /// `timeout` elapses.
    ///
    /// # Errors
    ///
    /// `TimedOut` when the watchdog fired, otherwise as `execute`.
    pub fn execute_with_deadline(
        &self,
        sql: &str,
        params: &Params,
        timeout: Duration,
    ) -> Result<QueryOutcome> {
        let watchdog = Watchdog::arm(
            QueryCanceller::new(self.connection.get_interrupt_handle()),
            timeout,
        );
        let result = self.execute(sql, params);
        let fired = watchdog.disarm();

        match result {
            Err(GatewayError::Interrupted) if fired => Err(GatewayError::TimedOut(timeout)),
            other => other,
        }
    }
}

/// Binds `params` to the statement's placeholders through the driver.
fn bind_params(stmt: &mut rusqlite::Statement<'_>, params: &Params) -> Result<()> {
    let expected = stmt.parameter_count();
    if params.len() != expected {
        return Err(GatewayError::ParameterCount {
            expected,
            supplied: params.len(),
        });
    }

    match params {
        Params::None => {}
        Params::Positional(values) => {
            for (i, value) in values.iter().enumerate() {
                stmt.raw_bind_parameter(i + 1, value)?;
            }
        }
        Params::Named(values) => {
            let mut bound = vec![false; expected];
            for (name, value) in values {
                let index = named_index(stmt, name)?
                    .ok_or_else(|| GatewayError::UnknownParameter(name.clone()))?;
                if std::mem::replace(&mut bound[index - 1], true) {
                    return Err(GatewayError::DuplicateParameter(name.clone()));
                }
                stmt.raw_bind_parameter(index, value)?;
            }
            // Equal counts and no repeats leave nothing unbound
            debug_assert!(bound.iter().all(|b| *b));
        }
    }
    Ok(())
}

/// Resolves a parameter name, trying each SQLite prefix when none is given.
fn named_index(stmt: &rusqlite::Statement<'_>, name: &str) -> Result<Option<usize>> {
    if name.starts_with([':', '@', '$', '?']) {
        return Ok(stmt.parameter_index(name)?);
    }
    for prefix in [':', '@', '$'] {
        if let Some(index) = stmt.parameter_index(&format!("{prefix}{name}"))? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

/// Convenience function to execute a statement on a connection
pub fn execute_query_on_connection(
    conn: &Connection,
    sql: &str,
    params: &Params,
) -> Result<QueryOutcome> {
    QueryExecutor::new(conn).execute(sql, params)
}
