//! SQLite-backed contact store.
//!
//! The database lives at `~/.idrecon/contacts.db` unless the config names another
//! path. Every connection runs in WAL mode so readers keep seeing the last
//! committed state while one `identify` call holds the write lock.

use std::path::PathBuf;
use std::time::Duration;

use rusqlite::{Connection, Transaction, TransactionBehavior};

pub mod contacts;
pub mod types;
pub use types::*;

pub struct ContactDb {
    conn: Connection,
}

impl ContactDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Execute a closure within a SQLite transaction.
    ///
    /// The transaction starts with `BEGIN IMMEDIATE`, taking the write lock
    /// before the first read. Commits on `Ok`; rolls back on `Err` and on
    /// unwind, since the rusqlite transaction rolls back when dropped.
    pub fn with_transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Self) -> Result<T, E>,
        E: From<DbError>,
    {
        let tx = Transaction::new_unchecked(&self.conn, TransactionBehavior::Immediate)
            .map_err(DbError::from)?;
        let val = f(self)?;
        tx.commit().map_err(DbError::from)?;
        Ok(val)
    }

    /// Open a database at an explicit path and apply the schema.
    pub fn open_at(path: PathBuf, busy_timeout: Duration) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // Set before anything that may contend for the lock, migrations included.
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        crate::migrations::run_migrations(&conn)?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")?;

        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.idrecon/contacts.db`.
    pub fn default_db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".idrecon").join("contacts.db"))
    }
}


#[cfg(test)]
mod tests {
    use super::test_utils::test_db;
    use super::*;

    #[test]
    fn test_open_creates_tables() {
        let db = test_db();
        let count: i32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .expect("contacts table should exist");
        assert_eq!(count, 0);
    }

    #[test]
    fn test_open_twice_is_safe() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("twice.db");
        let _db1 = ContactDb::open_at(path.clone(), Duration::from_millis(100)).expect("first open");
        let _db2 = ContactDb::open_at(path, Duration::from_millis(100)).expect("second open");
    }

    #[test]
    fn test_open_creates_missing_parent_dirs() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("nested").join("deeper").join("contacts.db");
        ContactDb::open_at(path.clone(), Duration::from_millis(100)).expect("open");
        assert!(path.exists());
    }

    #[test]
    fn test_transaction_commits_on_ok() {
        let db = test_db();
        let inserted: Result<i64, DbError> = db.with_transaction(|tx| {
            tx.conn.execute(
                "INSERT INTO contacts (email, link_precedence, created_at, updated_at)
                 VALUES ('a@x.com', 'primary', '2025-01-01', '2025-01-01')",
                [],
            )?;
            Ok(tx.conn.last_insert_rowid())
        });
        assert_eq!(inserted.expect("commit"), 1);

        let count: i32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_transaction_rolls_back_on_err() {
        let db = test_db();
        let result: Result<(), DbError> = db.with_transaction(|tx| {
            tx.conn.execute(
                "INSERT INTO contacts (email, link_precedence, created_at, updated_at)
                 VALUES ('a@x.com', 'primary', '2025-01-01', '2025-01-01')",
                [],
            )?;
            Err(DbError::Migration("forced failure".to_string()))
        });
        assert!(result.is_err());

        let count: i32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0, "insert must be rolled back");
        assert!(db.conn.is_autocommit(), "connection must leave the transaction");
    }

    #[test]
    fn test_transaction_rolls_back_on_panic() {
        let db = test_db();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _: Result<(), DbError> = db.with_transaction(|tx| {
                tx.conn
                    .execute(
                        "INSERT INTO contacts (email, link_precedence, created_at, updated_at)
                         VALUES ('a@x.com', 'primary', '2025-01-01', '2025-01-01')",
                        [],
                    )
                    .unwrap();
                panic!("boom");
            });
        }));
        assert!(outcome.is_err());
        assert!(db.conn.is_autocommit());

        let count: i32 = db
            .conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
