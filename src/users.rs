//! User accounts for the login and signup forms.
//!
//! `UserStore` is a thin caller of the gateway: every value a form submits
//! travels as a bound parameter. Password hashing happens before a
//! `NewUser` is built; this module stores whatever hash it is given.

use crate::core::db::connection::Gateway;
use crate::core::db::query::{Params, Row};
use crate::core::{GatewayError, Result};
use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

const SQLITE_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S";

const SELECT_USER: &str =
    "SELECT id, full_name, email, password_hash, created_at, updated_at FROM users";

/// A stored user account
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct User {
    pub id: i64,
    pub full_name: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl User {
    fn from_row(row: &Row) -> Result<Self> {
        let text = |name: &str| {
            row.get_str(name)
                .map(str::to_string)
                .ok_or_else(|| GatewayError::Query(format!("users row is missing '{}'", name)))
        };
        let timestamp = |name: &str| {
            let raw = text(name)?;
            NaiveDateTime::parse_from_str(&raw, SQLITE_TIMESTAMP)
                .map_err(|e| GatewayError::Query(format!("bad {} '{}': {}", name, raw, e)))
        };

        Ok(User {
            id: row
                .get_i64("id")
                .ok_or_else(|| GatewayError::Query("users row is missing 'id'".to_string()))?,
            full_name: text("full_name")?,
            email: text("email")?,
            password_hash: text("password_hash")?,
            created_at: timestamp("created_at")?,
            updated_at: timestamp("updated_at")?,
        })
    }
}

/// Signup data for a new account
#[derive(Debug, Clone)]
pub struct NewUser {
    pub full_name: String,
    pub email: String,
    pub password_hash: String,
}

impl NewUser {
    pub fn new(
        full_name: impl Into<String>,
        email: impl Into<String>,
        password_hash: impl Into<String>,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            email: email.into(),
            password_hash: password_hash.into(),
        }
    }
}

/// User queries over a borrowed gateway
pub struct UserStore<'g> {
    gateway: &'g Gateway,
}

impl<'g> UserStore<'g> {
    pub fn new(gateway: &'g Gateway) -> Self {
        Self { gateway }
    }

    /// Inserts the user and returns its id.
    ///
    /// A taken email surfaces as `GatewayError::Query` with the UNIQUE
    /// constraint message.
    pub fn create(&self, user: &NewUser) -> Result<i64> {
        self.gateway.execute(
            "INSERT INTO users (full_name, email, password_hash) \
             VALUES (:full_name, :email, :password_hash)",
            Params::named()
                .with("full_name", user.full_name.as_str())
                .with("email", user.email.as_str())
                .with("password_hash", user.password_hash.as_str()),
        )?;
        let id = self.gateway.last_insert_id()?;
        debug!(id, "user created");
        Ok(id)
    }

    pub fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        self.gateway
            .single(&format!("{SELECT_USER} WHERE email = ?"), Params::None.bind(email))?
            .as_ref()
            .map(User::from_row)
            .transpose()
    }

    pub fn find_by_id(&self, id: i64) -> Result<Option<User>> {
        self.gateway
            .single(&format!("{SELECT_USER} WHERE id = ?"), Params::None.bind(id))?
            .as_ref()
            .map(User::from_row)
            .transpose()
    }

    /// All users, oldest first
    pub fn list(&self) -> Result<Vec<User>> {
        self.gateway
            .result_set(&format!("{SELECT_USER} ORDER BY id"), Params::None)?
            .iter()
            .map(User::from_row)
            .collect()
    }
}
