//! # Test Utilities Module
//!
//! Fixtures shared by the unit tests: gateways over private in-memory
//! databases with the users schema provisioned, plus a few error
//! assertions.

use crate::config::ConnectionConfig;
use crate::core::db::connection::Gateway;
use crate::core::db::schema;
use crate::users::{NewUser, UserStore};

/// A connected in-memory gateway with the users schema provisioned
pub fn provisioned_gateway() -> Gateway {
    let gateway = Gateway::connect(ConnectionConfig::in_memory());
    assert!(gateway.is_connected(), "in-memory gateway should connect");
    schema::provision(&gateway).expect("users schema should provision");
    gateway
}

/// Populate with realistic sample users, returning their ids in order
pub fn seed_users(gateway: &Gateway) -> Vec<i64> {
    let store = UserStore::new(gateway);
    [
        ("Alice Liddell", "alice@example.com"),
        ("Bob Marley", "bob@example.com"),
        ("Charlie Parker", "charlie@example.com"),
    ]
    .iter()
    .map(|(name, email)| {
        store
            .create(&NewUser::new(*name, *email, format!("hash-of-{email}")))
            .expect("seed user should insert")
    })
    .collect()
}

/// Error testing utilities
pub mod error_testing {
    /// Verify error message quality (contains helpful information)
    pub fn verify_error_message_quality<T, E>(result: &std::result::Result<T, E>, context: &str)
    where
        T: std::fmt::Debug,
        E: std::fmt::Display,
    {
        match result {
            Ok(value) => panic!("Expected an error in {} but got Ok({:?})", context, value),
            Err(error) => {
                let error_str = error.to_string().to_lowercase();
                assert!(error_str.len() > 10, "Error message should be descriptive in {}", context);
                assert!(
                    ["error", "failed", "unable"].iter().any(|w| error_str.contains(w)),
                    "Error should indicate what operation failed: '{}' in {}",
                    error_str,
                    context
                );
            }
        }
    }
}

#[macro_export]
macro_rules! assert_gateway_error {
    ($result:expr, $pattern:pat, $context:expr) => {
        match $result {
            Err($pattern) => {}
            Ok(_) => panic!("Expected {} but got Ok in {}", stringify!($pattern), $context),
            Err(other) => panic!(
                "Expected {} but got {:?} in {}",
                stringify!($pattern),
                other,
                $context
            ),
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::db::query::Params;
    use crate::core::GatewayError;

    #[test]
    fn test_seed_users() {
        let gateway = provisioned_gateway();
        let ids = seed_users(&gateway);
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn test_error_assertion_macro() {
        let gateway = Gateway::connect(ConnectionConfig::new("/nonexistent/dir/app.db"));
        assert_gateway_error!(gateway.row_count(), GatewayError::NotConnected, "failed gateway");
    }

    #[test]
    fn test_error_message_quality() {
        let gateway = provisioned_gateway();
        let result = gateway.single("SELEC * FROM users", Params::None);
        error_testing::verify_error_message_quality(&result, "syntax error");
    }
}
