//! Testing utilities for migration development.
//!
//! [`TestHarness`] pairs a PostgreSQL client with a temporary migrations
//! directory, so a test can write migration files, run them, and assert on the
//! resulting schema and ledger.
//!
//! ```ignore
//! use pgledger::testing::TestHarness;
//!
//! #[test]
//! fn creates_users() {
//!     let client = get_test_client(); // however you connect to a test database
//!     let mut harness = TestHarness::new(client);
//!
//!     harness.write_migration("001_users.sql", "CREATE TABLE users (id SERIAL PRIMARY KEY)");
//!     let report = harness.run().unwrap();
//!
//!     assert_eq!(report.applied(), vec!["001_users.sql"]);
//!     harness.assert_table_exists("users");
//!     assert_eq!(harness.ledger_names(), vec!["001_users.sql"]);
//! }
//! ```
//!
//! Helpers panic on failure, like the `assert!` family.

use std::fs;
use std::path::{Path, PathBuf};

use postgres::types::FromSql;
use postgres::Client;
use tempfile::TempDir;

use crate::core::DEFAULT_NAMESPACE;
use crate::{Error, Migrator, RunReport};

pub struct TestHarness {
    client: Client,
    dir: TempDir,
    namespace: String,
}

impl TestHarness {
    /// Create a harness around `client` with an empty migrations directory.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            dir: TempDir::new().expect("failed to create temporary migrations directory"),
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Use `namespace` for the ledger and for table assertions.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn client(&mut self) -> &mut Client {
        &mut self.client
    }

    pub fn migrations_dir(&self) -> &Path {
        self.dir.path()
    }

    /// Write (or overwrite) a migration file.
    pub fn write_migration(&self, name: &str, sql: &str) -> PathBuf {
        let path = self.dir.path().join(name);
        fs::write(&path, sql)
            .unwrap_or_else(|e| panic!("failed to write migration {}: {}", name, e));
        path
    }

    /// A migrator over the harness directory and namespace, for further configuration.
    pub fn migrator(&self) -> Migrator {
        Migrator::new(self.dir.path()).with_namespace(self.namespace.as_str())
    }

    /// Run all pending migrations with the default settings.
    pub fn run(&mut self) -> Result<RunReport, Error> {
        let migrator = self.migrator();
        migrator.run(&mut self.client)
    }

    /// Execute SQL directly (for setting up test data).
    pub fn execute(&mut self, sql: &str) {
        self.client
            .batch_execute(sql)
            .unwrap_or_else(|e| panic!("failed to execute {:?}: {}", sql, e));
    }

    /// Query a single value.
    ///
    /// Note: The type `T` must be an owned type (e.g., `String` not `&str`).
    pub fn query_one<T>(&mut self, sql: &str) -> T
    where
        T: for<'a> FromSql<'a>,
    {
        self.client
            .query_one(sql, &[])
            .unwrap_or_else(|e| panic!("query {:?} failed: {}", sql, e))
            .get(0)
    }

    /// Query all values from a single-column result.
    pub fn query_all<T>(&mut self, sql: &str) -> Vec<T>
    where
        T: for<'a> FromSql<'a>,
    {
        self.client
            .query(sql, &[])
            .unwrap_or_else(|e| panic!("query {:?} failed: {}", sql, e))
            .iter()
            .map(|row| row.get(0))
            .collect()
    }

    /// Names recorded in the ledger, in the order they were applied.
    pub fn ledger_names(&mut self) -> Vec<String> {
        let migrator = self.migrator();
        migrator
            .history(&mut self.client)
            .unwrap_or_else(|e| panic!("failed to read ledger: {}", e))
            .into_iter()
            .map(|record| record.name)
            .collect()
    }

    fn table_exists(&mut self, table_name: &str) -> bool {
        self.client
            .query_one(
                "SELECT EXISTS (SELECT FROM information_schema.tables WHERE table_schema = $1 AND table_name = $2)",
                &[&self.namespace, &table_name],
            )
            .unwrap_or_else(|e| panic!("failed to look up table {}: {}", table_name, e))
            .get(0)
    }

    /// Assert that a table exists in the harness namespace.
    pub fn assert_table_exists(&mut self, table_name: &str) {
        assert!(
            self.table_exists(table_name),
            "Table '{}.{}' does not exist",
            self.namespace,
            table_name
        );
    }

    /// Assert that a table does not exist in the harness namespace.
    pub fn assert_table_not_exists(&mut self, table_name: &str) {
        assert!(
            !self.table_exists(table_name),
            "Table '{}.{}' exists but should not",
            self.namespace,
            table_name
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_postgres::get_test_client;

    #[test]
    fn runs_written_migrations() {
        let mut harness = TestHarness::new(get_test_client());
        harness.write_migration("001_users.sql", "CREATE TABLE users (id SERIAL PRIMARY KEY)");
        harness.write_migration(
            "002_seed.sql",
            "INSERT INTO users DEFAULT VALUES; INSERT INTO users DEFAULT VALUES;",
        );

        let report = harness.run().unwrap();

        assert_eq!(report.applied(), vec!["001_users.sql", "002_seed.sql"]);
        harness.assert_table_exists("users");
        assert_eq!(harness.query_one::<i64>("SELECT COUNT(*) FROM users"), 2);
        assert_eq!(harness.ledger_names(), vec!["001_users.sql", "002_seed.sql"]);
    }

    #[test]
    fn failed_migration_leaves_no_table() {
        let mut harness = TestHarness::new(get_test_client());
        harness.write_migration("001_broken.sql", "CREATE TABLE t (id INT); SELECT nope;");

        let report = harness.run().unwrap();

        assert_eq!(report.failed().len(), 1);
        harness.assert_table_not_exists("t");
        assert!(harness.ledger_names().is_empty());
    }

    #[test]
    fn custom_namespace() {
        let mut harness = TestHarness::new(get_test_client()).with_namespace("app");
        harness.write_migration("001_items.sql", "CREATE TABLE items (id INT)");

        harness.run().unwrap();

        harness.assert_table_exists("items");
        assert_eq!(
            harness.query_all::<String>("SELECT name FROM app.migrations"),
            vec!["001_items.sql".to_string()]
        );
    }
}
