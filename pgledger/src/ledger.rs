//! The ledger: a table recording which migrations have been applied.
//!
//! The ledger lives at `"<namespace>"."<table>"` and has the shape
//!
//! ```sql
//! CREATE TABLE "<namespace>"."<table>" (
//!     id SERIAL PRIMARY KEY,
//!     name TEXT NOT NULL UNIQUE,
//!     applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
//! )
//! ```
//!
//! Records are only ever inserted. The namespace and table are never dropped.

use std::fmt;

use postgres::error::SqlState;
use postgres::{Client, Transaction};

use crate::error::{Error, Phase};
use crate::MigrationRecord;

/// Location of the ledger table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ledger {
    namespace: String,
    table: String,
}

impl fmt::Display for Ledger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{}",
            quote_ident(&self.namespace),
            quote_ident(&self.table)
        )
    }
}

impl Ledger {
    pub fn new(namespace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            table: table.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Whether the ledger table exists. Performs no DDL.
    ///
    /// Looks in the catalog rather than `information_schema`, which hides
    /// tables the connected role holds no privilege on.
    pub fn exists(&self, client: &mut Client) -> Result<bool, Error> {
        let exists: bool = client
            .query_one(
                "SELECT EXISTS (SELECT FROM pg_catalog.pg_tables WHERE schemaname = $1 AND tablename = $2)",
                &[&self.namespace, &self.table],
            )
            .map_err(|e| Error::from_postgres(Phase::QueryLedger, None, e))?
            .get(0);
        Ok(exists)
    }

    fn namespace_exists(&self, client: &mut Client) -> Result<bool, Error> {
        let exists: bool = client
            .query_one(
                "SELECT EXISTS (SELECT FROM pg_catalog.pg_namespace WHERE nspname = $1)",
                &[&self.namespace],
            )
            .map_err(|e| Error::from_postgres(Phase::EnsureLedger, None, e))?
            .get(0);
        Ok(exists)
    }

    /// Create the namespace and the ledger table if they are absent.
    /// Returns whether the table already existed.
    ///
    /// `CREATE SCHEMA` is only sent for a missing namespace: the server checks
    /// the database-level CREATE privilege even with `IF NOT EXISTS`.
    pub fn ensure(&self, client: &mut Client) -> Result<bool, Error> {
        let existed = self.exists(client)?;
        if existed {
            return Ok(true);
        }

        #[cfg(feature = "tracing")]
        tracing::info!(ledger = %self, "Creating migration ledger");

        if !self.namespace_exists(client)? {
            client
                .batch_execute(&format!(
                    "CREATE SCHEMA IF NOT EXISTS {}",
                    quote_ident(&self.namespace)
                ))
                .map_err(|e| Error::from_postgres(Phase::EnsureLedger, None, e))?;
        }

        client
            .batch_execute(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id SERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    applied_at TIMESTAMPTZ NOT NULL DEFAULT now()
                )",
                self
            ))
            .map_err(|e| Error::from_postgres(Phase::EnsureLedger, None, e))?;

        Ok(false)
    }

    /// Whether a record with this name exists.
    pub fn is_applied(&self, client: &mut Client, name: &str) -> Result<bool, Error> {
        let applied: bool = client
            .query_one(
                &format!("SELECT EXISTS (SELECT FROM {} WHERE name = $1)", self),
                &[&name],
            )
            .map_err(|e| Error::from_postgres(Phase::QueryLedger, None, e))?
            .get(0);
        Ok(applied)
    }

    /// Insert a record for `name` within the migration's own transaction.
    ///
    /// A unique violation means another runner recorded the same migration
    /// after this run checked [`Ledger::is_applied`].
    pub fn record_applied(&self, tx: &mut Transaction<'_>, name: &str) -> Result<(), Error> {
        tx.execute(
            &format!("INSERT INTO {} (name) VALUES ($1)", self),
            &[&name],
        )
        .map_err(|e| {
            if e.code() == Some(&SqlState::UNIQUE_VIOLATION) {
                Error::DuplicateRecord {
                    migration: name.to_string(),
                    ledger: self.to_string(),
                    source: e,
                }
            } else {
                Error::from_postgres(Phase::Record, Some(name), e)
            }
        })?;
        Ok(())
    }

    /// All records, in the order they were applied.
    /// Returns an empty history when the ledger does not exist yet.
    pub fn history(&self, client: &mut Client) -> Result<Vec<MigrationRecord>, Error> {
        if !self.exists(client)? {
            return Ok(vec![]);
        }

        let rows = client
            .query(
                &format!("SELECT id, name, applied_at FROM {} ORDER BY id", self),
                &[],
            )
            .map_err(|e| Error::from_postgres(Phase::QueryLedger, None, e))?;

        Ok(rows
            .into_iter()
            .map(|row| MigrationRecord {
                id: row.get(0),
                name: row.get(1),
                applied_at: row.get(2),
            })
            .collect())
    }
}

/// Quote a PostgreSQL identifier, doubling any embedded quotes.
pub(crate) fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
