//! Run configuration.
//!
//! [`RunConfig`] is what the top-level [`run`](crate::run) entry point
//! consumes. It derives `Deserialize`, so it can be embedded in an
//! application's own configuration file:
//!
//! ```toml
//! migrations_dir = "db/migrations"
//! namespace = "app"
//!
//! [connection]
//! host = "db.internal"
//! user = "deployer"
//! password = "secret"
//! dbname = "app"
//! pool_size = 2
//! ```

use std::path::PathBuf;
use std::time::Duration;

use postgres::NoTls;
use r2d2_postgres::PostgresConnectionManager;
use serde::Deserialize;

use crate::core::{FailurePolicy, DEFAULT_LEDGER_TABLE, DEFAULT_NAMESPACE};
use crate::error::{Error, Phase};

/// Connection pool handed to [`Migrator::run_pooled`](crate::Migrator::run_pooled).
pub type Pool = r2d2::Pool<PostgresConnectionManager<NoTls>>;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_POOL_SIZE: u32 = 4;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Where and how to connect to PostgreSQL.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ConnectionConfig {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub user: String,
    #[serde(default)]
    pub password: Option<String>,
    pub dbname: String,
    /// Upper bound on pooled connections. A run only ever uses one.
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            user: "postgres".to_string(),
            password: None,
            dbname: "postgres".to_string(),
            pool_size: DEFAULT_POOL_SIZE,
            connect_timeout_secs: DEFAULT_CONNECT_TIMEOUT_SECS,
        }
    }
}

impl ConnectionConfig {
    pub fn validate(&self) -> Result<(), Error> {
        if self.host.trim().is_empty() {
            return Err(Error::Config("connection host must not be empty".to_string()));
        }
        if self.user.trim().is_empty() {
            return Err(Error::Config("connection user must not be empty".to_string()));
        }
        if self.dbname.trim().is_empty() {
            return Err(Error::Config(
                "connection database name must not be empty".to_string(),
            ));
        }
        if self.port == 0 {
            return Err(Error::Config("connection port must not be 0".to_string()));
        }
        if self.pool_size == 0 {
            return Err(Error::Config("pool size must be at least 1".to_string()));
        }
        if self.connect_timeout_secs == 0 {
            return Err(Error::Config(
                "connect timeout must be at least 1 second".to_string(),
            ));
        }
        Ok(())
    }

    /// Driver-level configuration for these settings.
    pub fn to_postgres_config(&self) -> postgres::Config {
        let mut config = postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .user(&self.user)
            .dbname(&self.dbname)
            .connect_timeout(Duration::from_secs(self.connect_timeout_secs))
            .application_name("pgledger");
        if let Some(ref password) = self.password {
            config.password(password);
        }
        config
    }

    /// Build a connection pool. Opens at least one connection, so an
    /// unreachable server is reported here as a connectivity error.
    pub fn build_pool(&self) -> Result<Pool, Error> {
        self.validate()?;

        let manager = PostgresConnectionManager::new(self.to_postgres_config(), NoTls);
        r2d2::Pool::builder()
            .max_size(self.pool_size)
            .min_idle(Some(1))
            .connection_timeout(Duration::from_secs(self.connect_timeout_secs))
            .build(manager)
            .map_err(|e| Error::Connectivity {
                phase: Phase::Connect,
                migration: None,
                source: Box::new(e),
            })
    }
}

/// Everything a single run needs. Immutable for the duration of the run.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    pub connection: ConnectionConfig,
    pub migrations_dir: PathBuf,
    /// PostgreSQL schema holding the ledger. Defaults to [`DEFAULT_NAMESPACE`].
    #[serde(default)]
    pub namespace: Option<String>,
    /// Ledger table name. Defaults to [`DEFAULT_LEDGER_TABLE`].
    #[serde(default)]
    pub ledger_table: Option<String>,
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Serialize concurrent runners with a PostgreSQL advisory lock.
    #[serde(default = "default_advisory_lock")]
    pub advisory_lock: bool,
}

fn default_advisory_lock() -> bool {
    true
}

impl RunConfig {
    pub fn new(connection: ConnectionConfig, migrations_dir: impl Into<PathBuf>) -> Self {
        Self {
            connection,
            migrations_dir: migrations_dir.into(),
            namespace: None,
            ledger_table: None,
            failure_policy: FailurePolicy::default(),
            advisory_lock: default_advisory_lock(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_ledger_table(mut self, table: impl Into<String>) -> Self {
        self.ledger_table = Some(table.into());
        self
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn with_advisory_lock(mut self, enabled: bool) -> Self {
        self.advisory_lock = enabled;
        self
    }

    pub fn namespace(&self) -> &str {
        self.namespace.as_deref().unwrap_or(DEFAULT_NAMESPACE)
    }

    pub fn ledger_table(&self) -> &str {
        self.ledger_table.as_deref().unwrap_or(DEFAULT_LEDGER_TABLE)
    }

    /// Check the configuration without touching the database or the filesystem.
    pub fn validate(&self) -> Result<(), Error> {
        self.connection.validate()?;

        if self.migrations_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "migrations directory must not be empty".to_string(),
            ));
        }
        validate_identifier("namespace", self.namespace())?;
        validate_identifier("ledger table", self.ledger_table())?;
        Ok(())
    }
}

/// PostgreSQL truncates identifiers longer than 63 bytes; reject them rather
/// than silently writing to a differently named object.
const MAX_IDENTIFIER_LEN: usize = 63;

pub(crate) fn validate_identifier(kind: &str, ident: &str) -> Result<(), Error> {
    if ident.trim().is_empty() {
        return Err(Error::Config(format!("{} must not be empty", kind)));
    }
    if ident.len() > MAX_IDENTIFIER_LEN {
        return Err(Error::Config(format!(
            "{} '{}' exceeds {} bytes",
            kind, ident, MAX_IDENTIFIER_LEN
        )));
    }
    if ident.contains('\0') {
        return Err(Error::Config(format!("{} must not contain NUL", kind)));
    }
    Ok(())
}
