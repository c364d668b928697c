//! End-to-end checks of the gateway against a file-backed database with
//! the users schema provisioned.

use portal_db::core::db::schema;
use portal_db::users::{NewUser, UserStore};
use portal_db::{params, ConnectionConfig, Gateway, GatewayError, Params};
use tempfile::TempDir;

fn provisioned(dir: &TempDir) -> Gateway {
    let path = dir.path().join("portal.db");
    let gateway = Gateway::connect(ConnectionConfig::new(path.to_string_lossy()));
    assert!(gateway.is_connected(), "{:?}", gateway.error());
    schema::provision(&gateway).unwrap();
    gateway
}

#[test]
fn reachable_database_yields_connected_gateway() {
    let dir = TempDir::new().unwrap();
    let gateway = provisioned(&dir);
    assert!(gateway.error().is_none());
    assert_eq!(gateway.row_count().unwrap(), 0);
}

#[test]
fn unreachable_database_fails_loudly() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("no-such-dir").join("portal.db");
    let gateway = Gateway::connect(ConnectionConfig::new(missing.to_string_lossy()));

    assert!(!gateway.is_connected());
    assert!(!gateway.error().unwrap_or_default().is_empty());
    assert!(matches!(gateway.row_count(), Err(GatewayError::NotConnected)));
    assert!(matches!(gateway.last_insert_id(), Err(GatewayError::NotConnected)));
    assert!(matches!(
        gateway.query("SELECT 1", Params::None),
        Err(GatewayError::NotConnected)
    ));
}

#[test]
fn missing_file_without_create_fails() {
    let dir = TempDir::new().unwrap();
    let config = ConnectionConfig::new(dir.path().join("absent.db").to_string_lossy())
        .with_create_if_missing(false);
    let err = Gateway::try_connect(config).unwrap_err();
    assert!(matches!(err, GatewayError::Connection(_)));
}

#[test]
fn placeholder_mismatch_fails_and_records_error() {
    let dir = TempDir::new().unwrap();
    let gateway = provisioned(&dir);

    let result = gateway.query(
        "SELECT * FROM users WHERE email = ? AND full_name = ?",
        params!["ada@example.com"],
    );
    assert!(matches!(
        result,
        Err(GatewayError::ParameterCount { expected: 2, supplied: 1 })
    ));
    assert!(gateway.last_query_error().unwrap().contains("expects 2"));
    assert!(gateway.is_connected());
}

#[test]
fn insert_then_single_round_trips() {
    let dir = TempDir::new().unwrap();
    let gateway = provisioned(&dir);

    gateway
        .query(
            "INSERT INTO users (full_name, email, password_hash) VALUES (?, ?, ?)",
            params!["Ada Lovelace", "ada@example.com", "hash"],
        )
        .unwrap();
    let inserted_id = gateway.last_insert_id().unwrap();
    assert_eq!(gateway.row_count().unwrap(), 1);

    let row = gateway
        .single("SELECT * FROM users WHERE email = ?", params!["ada@example.com"])
        .unwrap()
        .expect("row should exist");

    assert_eq!(row.get_i64("id"), Some(inserted_id));
    assert_eq!(row.get_str("full_name"), Some("Ada Lovelace"));
    assert_eq!(row.get_str("email"), Some("ada@example.com"));
    assert_eq!(row.get_str("password_hash"), Some("hash"));
    assert!(row.get_str("created_at").is_some());
}

#[test]
fn result_set_over_no_rows_is_empty_not_error() {
    let dir = TempDir::new().unwrap();
    let gateway = provisioned(&dir);

    let rows = gateway
        .result_set("SELECT * FROM users WHERE email = ?", params!["nobody@example.com"])
        .unwrap();
    assert!(rows.is_empty());
    assert!(gateway.last_query_error().is_none());
}

#[test]
fn injection_string_is_literal_data() {
    let dir = TempDir::new().unwrap();
    let gateway = provisioned(&dir);
    let store = UserStore::new(&gateway);
    store.create(&NewUser::new("Ada", "ada@example.com", "h")).unwrap();

    let rows = gateway
        .result_set("SELECT * FROM users WHERE email = ?", params!["' OR '1'='1"])
        .unwrap();
    assert!(rows.is_empty());

    let rows = gateway
        .result_set(
            "SELECT * FROM users WHERE email = :email",
            Params::named().with("email", "x'; DROP TABLE users; --"),
        )
        .unwrap();
    assert!(rows.is_empty());
    assert!(schema::table_exists(&gateway, "users").unwrap());
}

#[test]
fn data_survives_reconnect() {
    let dir = TempDir::new().unwrap();
    {
        let gateway = provisioned(&dir);
        UserStore::new(&gateway)
            .create(&NewUser::new("Grace Hopper", "grace@example.com", "h"))
            .unwrap();
    }

    let path = dir.path().join("portal.db");
    let gateway = Gateway::connect(ConnectionConfig::new(path.to_string_lossy()));
    let user = UserStore::new(&gateway)
        .find_by_email("grace@example.com")
        .unwrap()
        .unwrap();
    assert_eq!(user.full_name, "Grace Hopper");
}

#[test]
fn update_refreshes_updated_at() {
    let dir = TempDir::new().unwrap();
    let gateway = provisioned(&dir);
    gateway
        .execute(
            "INSERT INTO users (full_name, email, password_hash, created_at, updated_at) \
             VALUES (?, ?, ?, '2020-01-01 00:00:00', '2020-01-01 00:00:00')",
            params!["Old", "old@example.com", "h"],
        )
        .unwrap();

    let changed = gateway
        .execute(
            "UPDATE users SET full_name = ? WHERE email = ?",
            params!["New", "old@example.com"],
        )
        .unwrap();
    assert_eq!(changed, 1);

    let user = UserStore::new(&gateway)
        .find_by_email("old@example.com")
        .unwrap()
        .unwrap();
    assert_eq!(user.full_name, "New");
    assert!(user.updated_at > user.created_at);
}
