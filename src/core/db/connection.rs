//! Connection Management Module
//!
//! The `Gateway` owns one connection to the store and exposes the
//! parameterized query primitives. Construction either yields a connected
//! gateway or a failed one carrying the driver's message; that state is
//! fixed for the gateway's lifetime.
//!
//! A `Gateway` is `Send` but not `Sync`: statement execution and the
//! row-count/last-insert-id bookkeeping share state on one connection. Use
//! one gateway per worker, or `GatewayPool` for concurrent callers.

use crate::config::ConnectionConfig;
use crate::core::db::query::{
    execute_query_on_connection, Params, QueryCanceller, QueryExecutor, QueryOutcome, Row,
};
use crate::core::{GatewayError, Result};
use rusqlite::{Connection, OpenFlags};
use std::cell::{Cell, RefCell};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const LOCAL_HOSTS: &[&str] = &["", "localhost", "127.0.0.1", "::1"];

/// Access to the underlying driver connection of a session
pub trait ConnectionRef {
    fn connection(&self) -> &Connection;
}

impl ConnectionRef for Connection {
    fn connection(&self) -> &Connection {
        self
    }
}

/// Maps a configured character set onto a SQLite text encoding.
pub fn sqlite_encoding(charset: &str) -> Result<&'static str> {
    match charset.trim().to_ascii_lowercase().as_str() {
        "" | "utf8" | "utf-8" | "utf8mb4" | "utf8mb3" => Ok("UTF-8"),
        "utf16" | "utf-16" => Ok("UTF-16"),
        "utf16le" | "utf-16le" => Ok("UTF-16le"),
        "utf16be" | "utf-16be" => Ok("UTF-16be"),
        other => Err(GatewayError::Connection(format!(
            "unsupported character set '{}'",
            other
        ))),
    }
}

/// Checks that the configured host refers to this machine.
fn check_host(host: &str) -> Result<()> {
    if LOCAL_HOSTS.contains(&host.trim().to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        Err(GatewayError::Connection(format!(
            "unknown database host '{}': only local databases are reachable",
            host
        )))
    }
}

pub(crate) fn open_flags(config: &ConnectionConfig) -> OpenFlags {
    let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
        | OpenFlags::SQLITE_OPEN_URI
        | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    if config.create_if_missing {
        flags |= OpenFlags::SQLITE_OPEN_CREATE;
    }
    flags
}

/// Applies the session settings every connection gets.
pub(crate) fn configure_session(
    conn: &Connection,
    encoding: &str,
    busy_timeout: Duration,
) -> rusqlite::Result<()> {
    conn.busy_timeout(busy_timeout)?;
    // Only takes effect on a database that has no content yet
    conn.execute_batch(&format!(
        "PRAGMA encoding = '{}';
         PRAGMA foreign_keys = ON;",
        encoding
    ))
}

/// Opens and configures a connection from `config`.
///
/// # Errors
///
/// `GatewayError::Connection` with the driver's message on any failure.
pub fn open_connection(config: &ConnectionConfig) -> Result<Connection> {
    check_host(&config.host)?;
    let encoding = sqlite_encoding(&config.charset)?;
    if config.database.trim().is_empty() {
        return Err(GatewayError::Connection("no database name configured".to_string()));
    }

    let conn = Connection::open_with_flags(&config.database, open_flags(config))
        .map_err(|e| GatewayError::Connection(e.to_string()))?;
    configure_session(&conn, encoding, Duration::from_millis(config.busy_timeout_ms))
        .map_err(|e| GatewayError::Connection(e.to_string()))?;

    Ok(conn)
}

/// Query primitives over one exclusively held connection.
///
/// Shared by `Gateway` and by pooled checkouts.
pub struct Session<C: ConnectionRef> {
    conn: C,
    statement_timeout: Option<Duration>,
    last_row_count: Cell<u64>,
    last_query_error: RefCell<Option<String>>,
}

impl<C: ConnectionRef> Session<C> {
    pub fn new(conn: C, statement_timeout: Option<Duration>) -> Self {
        Session {
            conn,
            statement_timeout,
            last_row_count: Cell::new(0),
            last_query_error: RefCell::new(None),
        }
    }

    /// Prepares `sql`, binds `params` through the driver and executes it.
    ///
    /// Failures are logged with a `Query Error` prefix, remembered for
    /// [`last_query_error`](Self::last_query_error), and returned.
    pub fn query(&self, sql: &str, params: Params) -> Result<QueryOutcome> {
        match self.statement_timeout {
            Some(timeout) => self.query_with_deadline(sql, params, timeout),
            None => self.record(execute_query_on_connection(self.conn.connection(), sql, &params)),
        }
    }

    /// Like `query`, but interrupts the statement once `timeout` elapses.
    pub fn query_with_deadline(
        &self,
        sql: &str,
        params: Params,
        timeout: Duration,
    ) -> Result<QueryOutcome> {
        self.record(
            QueryExecutor::new(self.conn.connection()).execute_with_deadline(sql, &params, timeout),
        )
    }

    /// First row of the result, `None` when the statement matched nothing.
    pub fn single(&self, sql: &str, params: Params) -> Result<Option<Row>> {
        Ok(self.query(sql, params)?.into_first())
    }

    /// All rows of the result; empty when the statement matched nothing.
    pub fn result_set(&self, sql: &str, params: Params) -> Result<Vec<Row>> {
        Ok(self.query(sql, params)?.rows)
    }

    /// Runs a statement for its effect and returns the rows affected.
    pub fn execute(&self, sql: &str, params: Params) -> Result<u64> {
        Ok(self.query(sql, params)?.rows_affected)
    }

    /// Rows affected or selected by the most recent successful statement
    pub fn row_count(&self) -> u64 {
        self.last_row_count.get()
    }

    /// Row id generated by the most recent insert on this connection
    pub fn last_insert_id(&self) -> i64 {
        self.conn.connection().last_insert_rowid()
    }

    /// Message of the most recent failed statement, cleared on success
    pub fn last_query_error(&self) -> Option<String> {
        self.last_query_error.borrow().clone()
    }

    /// A handle that interrupts the statement this session is running
    pub fn canceller(&self) -> QueryCanceller {
        QueryCanceller::new(self.conn.connection().get_interrupt_handle())
    }

    /// The underlying driver connection
    pub fn connection(&self) -> &Connection {
        self.conn.connection()
    }

    fn record(&self, result: Result<QueryOutcome>) -> Result<QueryOutcome> {
        match &result {
            Ok(outcome) => {
                self.last_row_count.set(outcome.rows_affected);
                *self.last_query_error.borrow_mut() = None;
            }
            Err(e) => {
                error!("Query Error: {}", e);
                *self.last_query_error.borrow_mut() = Some(e.to_string());
            }
        }
        result
    }
}

impl<C: ConnectionRef> std::fmt::Debug for Session<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("statement_timeout", &self.statement_timeout)
            .field("last_row_count", &self.last_row_count.get())
            .field("last_query_error", &self.last_query_error.borrow())
            .finish_non_exhaustive()
    }
}

enum GatewayState {
    Connected(Session<Connection>),
    Failed(String),
}

/// The data access gateway: one connection plus query primitives.
///
/// ```
/// use portal_db::{params, ConnectionConfig, Gateway};
///
/// let gateway = Gateway::connect(ConnectionConfig::in_memory());
/// assert!(gateway.error().is_none());
/// let row = gateway.single("SELECT ? AS greeting", params!["hello"]).unwrap();
/// assert_eq!(row.unwrap().get_str("greeting"), Some("hello"));
/// ```
pub struct Gateway {
    config: ConnectionConfig,
    state: GatewayState,
}

impl Gateway {
    /// Connects using `config`, capturing any failure into the gateway.
    ///
    /// Never panics and never returns an error: check [`error`](Self::error)
    /// or [`is_connected`](Self::is_connected) before relying on it. Every
    /// operation on a failed gateway returns `GatewayError::NotConnected`.
    pub fn connect(config: ConnectionConfig) -> Self {
        info!(
            host = %config.host,
            database = %config.database,
            user = %config.username,
            "Connecting to database"
        );
        let state = match open_connection(&config) {
            Ok(conn) => {
                debug!("Database connection established");
                let timeout = config.statement_timeout_ms.map(Duration::from_millis);
                GatewayState::Connected(Session::new(conn, timeout))
            }
            Err(e) => {
                let message = match e {
                    GatewayError::Connection(msg) => msg,
                    other => other.to_string(),
                };
                error!("Database Connection Error: {}", message);
                GatewayState::Failed(message)
            }
        };
        Gateway { config, state }
    }

    /// Connects using `config`, returning the failure instead of a failed
    /// gateway so the caller decides between exiting and degrading.
    pub fn try_connect(config: ConnectionConfig) -> Result<Self> {
        let gateway = Self::connect(config);
        match gateway.state {
            GatewayState::Failed(message) => Err(GatewayError::Connection(message)),
            GatewayState::Connected(_) => Ok(gateway),
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state, GatewayState::Connected(_))
    }

    /// The connection failure message, `None` when connected
    pub fn error(&self) -> Option<&str> {
        match &self.state {
            GatewayState::Connected(_) => None,
            GatewayState::Failed(message) => Some(message),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// The live session, or `NotConnected` for a failed gateway
    pub fn session(&self) -> Result<&Session<Connection>> {
        match &self.state {
            GatewayState::Connected(session) => Ok(session),
            GatewayState::Failed(_) => Err(GatewayError::NotConnected),
        }
    }

    fn live_session(&self) -> Result<&Session<Connection>> {
        self.session().map_err(|e| {
            warn!("Query Error: {}", e);
            e
        })
    }

    /// See [`Session::query`]
    pub fn query(&self, sql: &str, params: Params) -> Result<QueryOutcome> {
        self.live_session()?.query(sql, params)
    }

    /// See [`Session::query_with_deadline`]
    pub fn query_with_deadline(
        &self,
        sql: &str,
        params: Params,
        timeout: Duration,
    ) -> Result<QueryOutcome> {
        self.live_session()?.query_with_deadline(sql, params, timeout)
    }

    /// See [`Session::single`]
    pub fn single(&self, sql: &str, params: Params) -> Result<Option<Row>> {
        self.live_session()?.single(sql, params)
    }

    /// See [`Session::result_set`]
    pub fn result_set(&self, sql: &str, params: Params) -> Result<Vec<Row>> {
        self.live_session()?.result_set(sql, params)
    }

    /// See [`Session::execute`]
    pub fn execute(&self, sql: &str, params: Params) -> Result<u64> {
        self.live_session()?.execute(sql, params)
    }

    /// Rows affected or selected by the most recent statement.
    ///
    /// # Errors
    ///
    /// `NotConnected` on a failed gateway; never a silent zero.
    pub fn row_count(&self) -> Result<u64> {
        Ok(self.session()?.row_count())
    }

    /// Row id generated by the most recent insert.
    ///
    /// # Errors
    ///
    /// `NotConnected` on a failed gateway.
    pub fn last_insert_id(&self) -> Result<i64> {
        Ok(self.session()?.last_insert_id())
    }

    /// Message of the most recent failed statement
    pub fn last_query_error(&self) -> Option<String> {
        match &self.state {
            GatewayState::Connected(session) => session.last_query_error(),
            GatewayState::Failed(_) => None,
        }
    }

    /// A handle that interrupts the running statement from another thread
    pub fn canceller(&self) -> Result<QueryCanceller> {
        Ok(self.session()?.canceller())
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("config", &self.config)
            .field("connected", &self.is_connected())
            .field("error", &self.error())
            .finish()
    }
}
