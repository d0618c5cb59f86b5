use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Namespace (PostgreSQL schema) holding the ledger when none is configured.
pub const DEFAULT_NAMESPACE: &str = "public";

/// Name of the ledger table when none is configured.
pub const DEFAULT_LEDGER_TABLE: &str = "migrations";

/// A migration loaded from the migrations directory.
///
/// The file name is the migration's identity: it is what the ledger records.
/// Renaming a file that has already been applied makes it pending again.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationFile {
    pub name: String,
    pub path: PathBuf,
    /// Raw statement batch, executed as-is.
    pub content: String,
}

/// A row of the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationRecord {
    pub id: i32,
    pub name: String,
    pub applied_at: DateTime<Utc>,
}

/// What a run does when a migration fails with a non-fatal error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Roll back the failed migration and continue with the next file.
    #[default]
    Isolate,
    /// Roll back the failed migration and stop the run.
    AbortOnFirstFailure,
}

/// Final state of one migration file within a run.
#[derive(Debug)]
pub enum MigrationOutcome {
    Applied { duration: Duration },
    Skipped,
    Failed { error: Error },
}

/// Result for a single migration file.
#[derive(Debug)]
pub struct MigrationResult {
    pub name: String,
    pub outcome: MigrationOutcome,
}

/// A report of actions performed during a run.
#[derive(Debug, Default)]
pub struct RunReport {
    pub ledger_existed: bool,
    /// One entry per file considered, in execution order.
    pub results: Vec<MigrationResult>,
}

impl RunReport {
    /// Names of the migrations applied by this run.
    pub fn applied(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, MigrationOutcome::Applied { .. }))
    }

    /// Names of the migrations skipped because the ledger already recorded them.
    pub fn skipped(&self) -> Vec<&str> {
        self.names_where(|o| matches!(o, MigrationOutcome::Skipped))
    }

    /// Migrations that failed, with the error that caused each failure.
    pub fn failed(&self) -> Vec<(&str, &Error)> {
        self.results
            .iter()
            .filter_map(|r| match &r.outcome {
                MigrationOutcome::Failed { error } => Some((r.name.as_str(), error)),
                _ => None,
            })
            .collect()
    }

    /// Whether every migration considered was applied or skipped.
    pub fn is_success(&self) -> bool {
        self.failed().is_empty()
    }

    fn names_where(&self, predicate: impl Fn(&MigrationOutcome) -> bool) -> Vec<&str> {
        self.results
            .iter()
            .filter(|r| predicate(&r.outcome))
            .map(|r| r.name.as_str())
            .collect()
    }
}

pub(crate) type NameHook = Box<dyn Fn(&str) + Send + Sync>;
pub(crate) type CompleteHook = Box<dyn Fn(&str, Duration) + Send + Sync>;
pub(crate) type ErrorHook = Box<dyn Fn(&str, &Error) + Send + Sync>;

/// Observability callbacks fired by the executor.
#[derive(Default)]
pub(crate) struct Hooks {
    pub on_migration_start: Option<NameHook>,
    pub on_migration_complete: Option<CompleteHook>,
    pub on_migration_skipped: Option<NameHook>,
    pub on_migration_error: Option<ErrorHook>,
}

// Manual Debug impl since closures don't implement Debug
impl std::fmt::Debug for Hooks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hooks")
            .field("on_migration_start", &self.on_migration_start.is_some())
            .field(
                "on_migration_complete",
                &self.on_migration_complete.is_some(),
            )
            .field("on_migration_skipped", &self.on_migration_skipped.is_some())
            .field("on_migration_error", &self.on_migration_error.is_some())
            .finish()
    }
}

impl Hooks {
    pub fn start(&self, name: &str) {
        if let Some(ref callback) = self.on_migration_start {
            callback(name);
        }
    }

    pub fn complete(&self, name: &str, duration: Duration) {
        if let Some(ref callback) = self.on_migration_complete {
            callback(name, duration);
        }
    }

    pub fn skipped(&self, name: &str) {
        if let Some(ref callback) = self.on_migration_skipped {
            callback(name);
        }
    }

    pub fn error(&self, name: &str, error: &Error) {
        if let Some(ref callback) = self.on_migration_error {
            callback(name, error);
        }
    }
}
