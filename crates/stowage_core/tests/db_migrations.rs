use rusqlite::Connection;
use stowage_core::db::migrations::latest_version;
use stowage_core::db::{open_db, open_db_in_memory, DbError};
use stowage_core::{DataStore, StoreError, StoreOptions};

#[test]
fn open_db_in_memory_applies_all_migrations() {
    let conn = open_db_in_memory(&StoreOptions::default()).unwrap();

    assert_eq!(schema_version(&conn), latest_version());
    assert_table_exists(&conn, "customers");
    assert_table_exists(&conn, "vehicles");
}

#[test]
fn foreign_keys_follow_options() {
    let enforced = open_db_in_memory(&StoreOptions::default()).unwrap();
    assert_eq!(pragma(&enforced, "foreign_keys"), 1);

    let options = StoreOptions {
        foreign_keys: false,
        ..StoreOptions::default()
    };
    let relaxed = open_db_in_memory(&options).unwrap();
    assert_eq!(pragma(&relaxed, "foreign_keys"), 0);
}

#[test]
fn opening_same_database_twice_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("stowage.db");

    let conn_first = open_db(&path, &StoreOptions::default()).unwrap();
    assert_eq!(schema_version(&conn_first), latest_version());
    drop(conn_first);

    let conn_second = open_db(&path, &StoreOptions::default()).unwrap();
    assert_eq!(schema_version(&conn_second), latest_version());
    assert_table_exists(&conn_second, "vehicles");
}

#[test]
fn opening_database_with_newer_schema_version_returns_error() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = open_db(&path, &StoreOptions::default()).unwrap_err();
    match err {
        DbError::UnsupportedSchemaVersion {
            db_version,
            latest_supported,
        } => {
            assert_eq!(db_version, 999);
            assert_eq!(latest_supported, latest_version());
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn data_store_open_surfaces_schema_errors() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("future.db");

    let conn = Connection::open(&path).unwrap();
    conn.execute_batch("PRAGMA user_version = 999;").unwrap();
    drop(conn);

    let err = DataStore::open(&path, StoreOptions::default()).unwrap_err();
    assert!(matches!(
        err,
        StoreError::Db(DbError::UnsupportedSchemaVersion { db_version: 999, .. })
    ));
}

fn schema_version(conn: &Connection) -> u32 {
    conn.query_row("PRAGMA user_version;", [], |row| row.get(0))
        .unwrap()
}

fn pragma(conn: &Connection, name: &str) -> i64 {
    conn.query_row(&format!("PRAGMA {name};"), [], |row| row.get(0))
        .unwrap()
}

fn assert_table_exists(conn: &Connection, table_name: &str) {
    let exists: i64 = conn
        .query_row(
            "SELECT EXISTS(
                SELECT 1
                FROM sqlite_master
                WHERE type = 'table' AND name = ?1
            );",
            [table_name],
            |row| row.get(0),
        )
        .unwrap();
    assert_eq!(exists, 1, "table {table_name} does not exist");
}
