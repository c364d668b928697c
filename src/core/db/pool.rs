//! Connection pool for concurrent callers.
//!
//! Each checkout hands out a `Session` with exclusive use of one pooled
//! connection; dropping the session checks the connection back in.

use crate::config::{ConnectionConfig, PoolSettings};
use crate::core::db::connection::{
    configure_session, open_connection, sqlite_encoding, ConnectionRef, Session,
};
use crate::core::{GatewayError, Result};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use std::time::Duration;
use tracing::{debug, error, info};

/// A pooled connection as handed out by `GatewayPool`.
pub type PooledSqlite = PooledConnection<SqliteConnectionManager>;

/// A checked-out session; the connection returns to the pool on drop.
pub type PooledSession = Session<PooledSqlite>;

impl ConnectionRef for PooledSqlite {
    fn connection(&self) -> &Connection {
        &**self
    }
}

/// Bounded pool of configured connections.
///
/// Note that `:memory:` gives every pooled connection its own private
/// database; use a file or a `file:name?mode=memory&cache=shared` URI to
/// share one.
#[derive(Clone)]
pub struct GatewayPool {
    pool: Pool<SqliteConnectionManager>,
    statement_timeout: Option<Duration>,
}

impl GatewayPool {
    /// Builds the pool and opens its connections.
    ///
    /// # Errors
    ///
    /// `Connection` for an unreachable host, an unsupported charset or a
    /// database that cannot be opened; `Pool` if the pool cannot fill.
    pub fn new(config: &ConnectionConfig, settings: PoolSettings) -> Result<Self> {
        if settings.max_size == 0 || settings.connection_timeout_ms == 0 {
            return Err(GatewayError::Config(
                "pool max_size and connection_timeout_ms must be positive".to_string(),
            ));
        }
        // r2d2 keeps retrying an unopenable database until the checkout timeout
        drop(open_connection(config).map_err(|e| {
            error!(error = %e, "Database Connection Error");
            e
        })?);
        let encoding = sqlite_encoding(&config.charset)?;
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);

        let mut flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
        if config.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }

        let manager = SqliteConnectionManager::file(&config.database)
            .with_flags(flags)
            .with_init(move |conn| configure_session(conn, encoding, busy_timeout));

        let pool = Pool::builder()
            .max_size(settings.max_size)
            .connection_timeout(Duration::from_millis(settings.connection_timeout_ms))
            .build(manager)
            .map_err(|e| {
                error!("Database Connection Error: {}", e);
                GatewayError::from(e)
            })?;

        info!(
            database = %config.database,
            max_size = settings.max_size,
            "Connection pool ready"
        );

        Ok(GatewayPool {
            pool,
            statement_timeout: config.statement_timeout_ms.map(Duration::from_millis),
        })
    }

    /// Checks out a connection for exclusive use.
    ///
    /// # Errors
    ///
    /// `Pool` if no connection frees up within the configured timeout.
    pub fn checkout(&self) -> Result<PooledSession> {
        let conn = self.pool.get()?;
        debug!(idle = self.pool.state().idle_connections, "connection checked out");
        Ok(Session::new(conn, self.statement_timeout))
    }

    pub fn max_size(&self) -> u32 {
        self.pool.max_size()
    }

    /// Connections currently idle in the pool
    pub fn idle_connections(&self) -> u32 {
        self.pool.state().idle_connections
    }
}

impl std::fmt::Debug for GatewayPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayPool")
            .field("max_size", &self.pool.max_size())
            .field("statement_timeout", &self.statement_timeout)
            .finish()
    }
}
