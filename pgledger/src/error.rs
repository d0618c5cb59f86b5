use std::fmt;
use std::path::PathBuf;

use postgres::error::SqlState;

/// Boxed cause for errors that may originate from more than one driver layer
/// (the `postgres` client itself, or the `r2d2` pool wrapped around it).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The step of a run during which an error occurred.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connect,
    AdvisoryLock,
    EnsureLedger,
    QueryLedger,
    BeginTransaction,
    Execute,
    Record,
    Commit,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            Phase::Connect => "acquiring a connection",
            Phase::AdvisoryLock => "acquiring the advisory lock",
            Phase::EnsureLedger => "ensuring the ledger table",
            Phase::QueryLedger => "querying the ledger",
            Phase::BeginTransaction => "beginning a transaction",
            Phase::Execute => "executing migration statements",
            Phase::Record => "recording the migration in the ledger",
            Phase::Commit => "committing",
        };
        f.write_str(phase)
    }
}

/// Error type for the pgledger crate.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The run configuration is missing or invalid. Raised before any database interaction.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The database could not be reached, or the connection was lost mid-run.
    #[error("connection error while {phase}{}: {}", for_migration(.migration), describe_boxed(.source))]
    Connectivity {
        phase: Phase,
        migration: Option<String>,
        #[source]
        source: BoxError,
    },

    /// The connected role lacks the privileges for a DDL or DML statement.
    #[error("permission denied while {phase}{}: {}", for_migration(.migration), describe(.source))]
    Permission {
        phase: Phase,
        migration: Option<String>,
        #[source]
        source: postgres::Error,
    },

    /// The migrations directory, or one of its files, could not be read.
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A migration's own statements (or its ledger insert) failed.
    #[error("migration '{migration}' failed while {phase}: {}", describe(.source))]
    MigrationExecution {
        migration: String,
        phase: Phase,
        #[source]
        source: postgres::Error,
    },

    /// The ledger already holds a record for a migration this run just applied.
    /// Another runner applied it concurrently.
    #[error("migration '{migration}' is already recorded in {ledger}; another runner applied it concurrently")]
    DuplicateRecord {
        migration: String,
        ledger: String,
        #[source]
        source: postgres::Error,
    },

    /// Any other database error outside of a migration's own statements.
    #[error("database error while {phase}: {}", describe(.source))]
    Database {
        phase: Phase,
        #[source]
        source: postgres::Error,
    },
}

fn for_migration(migration: &Option<String>) -> String {
    match migration {
        Some(name) => format!(" (migration '{}')", name),
        None => String::new(),
    }
}

/// The server's own message for database errors; `postgres::Error` alone
/// only displays "db error".
fn describe(error: &postgres::Error) -> String {
    let Some(db) = error.as_db_error() else {
        return error.to_string();
    };

    let mut message = format!("{} (SQLSTATE {})", db.message(), db.code().code());
    if let Some(detail) = db.detail() {
        message.push_str(&format!("; detail: {}", detail));
    }
    if let Some(hint) = db.hint() {
        message.push_str(&format!("; hint: {}", hint));
    }
    message
}

fn describe_boxed(error: &BoxError) -> String {
    match error.downcast_ref::<postgres::Error>() {
        Some(error) => describe(error),
        None => error.to_string(),
    }
}

impl Error {
    /// Classify a driver error raised during `phase`.
    ///
    /// `migration` is set when the error happened while applying a specific
    /// migration; such errors become per-file failures unless they are
    /// connectivity errors.
    pub(crate) fn from_postgres(
        phase: Phase,
        migration: Option<&str>,
        error: postgres::Error,
    ) -> Self {
        let migration = migration.map(str::to_string);

        if is_connectivity(&error) {
            return Error::Connectivity {
                phase,
                migration,
                source: Box::new(error),
            };
        }

        if error.code() == Some(&SqlState::INSUFFICIENT_PRIVILEGE) {
            return Error::Permission {
                phase,
                migration,
                source: error,
            };
        }

        match migration {
            Some(migration) => Error::MigrationExecution {
                migration,
                phase,
                source: error,
            },
            None => Error::Database {
                phase,
                source: error,
            },
        }
    }

    /// Whether this error aborts the whole run.
    ///
    /// Only failures scoped to a single migration (its statements failing, or
    /// a permission error on them) are isolated; everything else is fatal.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::MigrationExecution { .. }
                | Error::Permission {
                    migration: Some(_),
                    ..
                }
        )
    }

    /// The migration this error is attributed to, if any.
    pub fn migration(&self) -> Option<&str> {
        match self {
            Error::Connectivity { migration, .. } | Error::Permission { migration, .. } => {
                migration.as_deref()
            }
            Error::MigrationExecution { migration, .. }
            | Error::DuplicateRecord { migration, .. } => Some(migration),
            Error::Config(_) | Error::Io { .. } | Error::Database { .. } => None,
        }
    }

    /// The SQLSTATE reported by the server, if the error came from the database.
    pub fn sql_state(&self) -> Option<&SqlState> {
        match self {
            Error::Permission { source, .. }
            | Error::MigrationExecution { source, .. }
            | Error::DuplicateRecord { source, .. }
            | Error::Database { source, .. } => source.code(),
            Error::Connectivity { source, .. } => source
                .downcast_ref::<postgres::Error>()
                .and_then(|e| e.code()),
            Error::Config(_) | Error::Io { .. } => None,
        }
    }
}

/// Connection-level failures: closed sessions, I/O errors, SQLSTATE class 08
/// and the server shutdown codes sent when a backend is terminated.
fn is_connectivity(error: &postgres::Error) -> bool {
    if error.is_closed() {
        return true;
    }

    if let Some(code) = error.code() {
        return code.code().starts_with("08")
            || *code == SqlState::ADMIN_SHUTDOWN
            || *code == SqlState::CRASH_SHUTDOWN
            || *code == SqlState::CANNOT_CONNECT_NOW;
    }

    std::error::Error::source(error)
        .map(|source| source.is::<std::io::Error>())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_errors_are_fatal() {
        assert!(Error::Config("missing host".to_string()).is_fatal());
    }

    #[test]
    fn io_errors_are_fatal_and_name_the_path() {
        let error = Error::Io {
            path: PathBuf::from("/nowhere/migrations"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such directory"),
        };
        assert!(error.is_fatal());
        assert_eq!(error.migration(), None);
        assert_eq!(
            error.to_string(),
            "cannot read /nowhere/migrations: no such directory"
        );
    }

    #[test]
    fn connectivity_message_includes_phase_and_migration() {
        let error = Error::Connectivity {
            phase: Phase::Execute,
            migration: Some("002_posts.sql".to_string()),
            source: "connection reset".into(),
        };
        assert!(error.is_fatal());
        assert_eq!(error.migration(), Some("002_posts.sql"));
        assert_eq!(
            error.to_string(),
            "connection error while executing migration statements (migration '002_posts.sql'): connection reset"
        );
    }

    #[test]
    fn connectivity_message_without_migration() {
        let error = Error::Connectivity {
            phase: Phase::Connect,
            migration: None,
            source: "timed out waiting for connection".into(),
        };
        assert_eq!(
            error.to_string(),
            "connection error while acquiring a connection: timed out waiting for connection"
        );
        assert_eq!(error.sql_state(), None);
    }
}
