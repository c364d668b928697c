// Core infrastructure modules
pub mod core;

// Feature-specific modules
pub mod config;
pub mod users;

#[cfg(test)]
mod test_utils;

pub use crate::config::{ConnectionConfig, PoolSettings};
pub use crate::core::db::{Gateway, GatewayPool, Params, QueryOutcome, Row, Session, Value};
pub use crate::core::{GatewayError, Result};
