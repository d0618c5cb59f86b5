//! Session-level advisory lock serializing runners that target the same ledger.
//!
//! Without it, two runners started at the same moment can both see a migration
//! as pending. Both execute it; the second ledger insert then fails with
//! [`Error::DuplicateRecord`](crate::Error::DuplicateRecord) and that runner's
//! transaction is rolled back.

use std::ops::{Deref, DerefMut};

use postgres::Client;
use sha2::{Digest, Sha256};

use crate::error::{Error, Phase};
use crate::ledger::Ledger;

/// Derive the `pg_advisory_lock` key for a ledger.
pub(crate) fn lock_key(ledger: &Ledger) -> i64 {
    let mut hasher = Sha256::new();
    hasher.update(b"pgledger:");
    hasher.update(ledger.namespace().as_bytes());
    hasher.update(b".");
    hasher.update(ledger.table().as_bytes());
    let digest = hasher.finalize();

    let mut key = [0u8; 8];
    key.copy_from_slice(&digest[..8]);
    i64::from_be_bytes(key)
}

/// Holds the advisory lock for as long as it lives; unlocks on drop.
pub(crate) struct AdvisoryLock<'a> {
    client: &'a mut Client,
    key: i64,
}

impl<'a> AdvisoryLock<'a> {
    /// Block until the lock for `ledger` is granted to this session.
    pub fn acquire(client: &'a mut Client, ledger: &Ledger) -> Result<Self, Error> {
        let key = lock_key(ledger);

        #[cfg(feature = "tracing")]
        tracing::debug!(key, ledger = %ledger, "Acquiring advisory lock");

        client
            .execute("SELECT pg_advisory_lock($1)", &[&key])
            .map_err(|e| Error::from_postgres(Phase::AdvisoryLock, None, e))?;

        Ok(Self { client, key })
    }
}

impl Deref for AdvisoryLock<'_> {
    type Target = Client;

    fn deref(&self) -> &Client {
        self.client
    }
}

impl DerefMut for AdvisoryLock<'_> {
    fn deref_mut(&mut self) -> &mut Client {
        self.client
    }
}

impl Drop for AdvisoryLock<'_> {
    fn drop(&mut self) {
        // A closed session has already released its locks
        if self.client.is_closed() {
            return;
        }

        if let Err(_error) = self
            .client
            .execute("SELECT pg_advisory_unlock($1)", &[&self.key])
        {
            #[cfg(feature = "tracing")]
            tracing::warn!(key = self.key, error = %_error, "Failed to release advisory lock");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_postgres::fresh_postgres_db;

    #[test]
    fn key_depends_on_namespace_and_table() {
        let a = lock_key(&Ledger::new("public", "migrations"));
        assert_eq!(a, lock_key(&Ledger::new("public", "migrations")));
        assert_ne!(a, lock_key(&Ledger::new("app", "migrations")));
        assert_ne!(a, lock_key(&Ledger::new("public", "schema_log")));
    }

    #[test]
    fn lock_is_released_on_drop() {
        let (mut client, db_name) = fresh_postgres_db();
        let mut other = crate::test_postgres::connect_to(&db_name);
        let ledger = Ledger::new("public", "migrations");
        let key = lock_key(&ledger);

        {
            let _lock = AdvisoryLock::acquire(&mut client, &ledger).unwrap();
            let granted: bool = other
                .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
                .unwrap()
                .get(0);
            assert!(!granted, "lock should be held by the first session");
        }

        let granted: bool = other
            .query_one("SELECT pg_try_advisory_lock($1)", &[&key])
            .unwrap()
            .get(0);
        assert!(granted, "lock should be free once the guard is dropped");
    }
}
