#![allow(dead_code)]

//! PostgreSQL test infrastructure module.
//!
//! Starts one PostgreSQL container for the whole test binary and hands each
//! test a freshly created database.

use std::sync::OnceLock;

use postgres::{Client, NoTls};
use testcontainers::runners::AsyncRunner;
use testcontainers::ContainerAsync;
use testcontainers_modules::postgres::Postgres;
use uuid::Uuid;

use crate::config::ConnectionConfig;

/// Default credentials for testcontainers-modules postgres
const PG_USER: &str = "postgres";
const PG_PASSWORD: &str = "postgres";
const PG_DB: &str = "postgres";

struct SharedContainer {
    port: u16,
    // Kept alive for the test binary's lifetime, with the runtime driving it
    _container: ContainerAsync<Postgres>,
    _runtime: tokio::runtime::Runtime,
}

static POSTGRES: OnceLock<SharedContainer> = OnceLock::new();

fn start_container() -> SharedContainer {
    let runtime = tokio::runtime::Runtime::new().expect("failed to create tokio runtime");

    let (container, port) = runtime.block_on(async {
        let container = Postgres::default()
            .start()
            .await
            .expect("failed to start postgres container");
        let port = container
            .get_host_port_ipv4(5432)
            .await
            .expect("failed to get postgres port");
        (container, port)
    });

    SharedContainer {
        port,
        _container: container,
        _runtime: runtime,
    }
}

/// Get the PostgreSQL port for the shared container.
pub fn get_postgres_port() -> u16 {
    POSTGRES.get_or_init(start_container).port
}

/// Get a PostgreSQL connection URL for a specific database.
pub fn url_with_db(db: &str) -> String {
    format!(
        "postgres://{}:{}@127.0.0.1:{}/{}",
        PG_USER,
        PG_PASSWORD,
        get_postgres_port(),
        db
    )
}

/// Connect to an existing database on the shared container.
pub fn connect_to(db: &str) -> Client {
    Client::connect(&url_with_db(db), NoTls).expect("failed to connect to test database")
}

/// Connection settings for an existing database on the shared container.
pub fn connection_config(db: &str) -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port: get_postgres_port(),
        user: PG_USER.to_string(),
        password: Some(PG_PASSWORD.to_string()),
        dbname: db.to_string(),
        ..ConnectionConfig::default()
    }
}

/// Create a fresh PostgreSQL database with a unique name for isolated testing.
///
/// Returns a Client connected to the new database and the database name, so
/// that tests needing a second session can open one with [`connect_to`].
pub fn fresh_postgres_db() -> (Client, String) {
    let mut admin = connect_to(PG_DB);

    let db_name = format!("test_{}", Uuid::new_v4().simple());
    admin
        .execute(&format!("CREATE DATABASE \"{}\"", db_name), &[])
        .expect("failed to create test database");
    drop(admin);

    (connect_to(&db_name), db_name)
}

/// Get a client connected to a fresh, isolated database.
pub fn get_test_client() -> Client {
    let (client, _db_name) = fresh_postgres_db();
    client
}

/// Create a login role with no privileges beyond the defaults and connect as
/// it to `db`. Returns the client and the role name.
pub fn connect_as_new_role(admin: &mut Client, db: &str) -> (Client, String) {
    let role = format!("role_{}", Uuid::new_v4().simple());
    admin
        .batch_execute(&format!("CREATE ROLE {role} LOGIN PASSWORD '{role}'"))
        .expect("failed to create test role");

    let url = format!(
        "postgres://{}:{}@127.0.0.1:{}/{}",
        role,
        role,
        get_postgres_port(),
        db
    );
    let client = Client::connect(&url, NoTls).expect("failed to connect as test role");
    (client, role)
}
