/// Core Module for portal-db
///
/// The gateway, its query primitives and the shared error type. Everything
/// that talks to the database lives under `db`.

pub mod db;
pub mod error;

// Re-export commonly used types for convenience
pub use error::{GatewayError, Result};
