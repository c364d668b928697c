/// Database Module
///
/// ## Architecture
///
/// - **Connection Management** (`connection.rs`): the `Gateway`, its
///   connected/failed state, and the `Session` primitives
/// - **Query Execution** (`query.rs`): values, rows, parameter binding and statement execution
/// - **Pooling** (`pool.rs`): bounded checkout/checkin for concurrent callers
/// - **Schema** (`schema.rs`): the users table contract and introspection
///
/// ## Error Handling
///
/// All operations return the shared `GatewayError`; nothing collapses a
/// failure into an empty result.
pub mod connection;
pub mod pool;
pub mod query;
pub mod schema;

pub use connection::*;
pub use pool::*;
pub use query::*;
