//! Contact schema versions.
//!
//! Each schema step is an embedded SQL file, applied once and stamped into
//! `schema_version`. Pending steps run inside one `BEGIN IMMEDIATE`
//! transaction, so two processes opening a fresh file cannot both apply them.
//!
//! A `contacts` table that predates versioning is adopted as version 1, but
//! only when it has the linkage columns and every row already satisfies the
//! primary/secondary linkage rule the baseline enforces with a CHECK.

use rusqlite::{Connection, DatabaseName, OptionalExtension, Transaction, TransactionBehavior};

use crate::db::DbError;

/// Embedded schema steps, in apply order.
const SCHEMA_STEPS: &[(u32, &str)] = &[(1, include_str!("migrations/001_baseline.sql"))];

/// Columns the resolver reads and writes.
const CONTACT_COLUMNS: &[&str] = &[
    "id",
    "email",
    "phone_number",
    "linked_id",
    "link_precedence",
    "created_at",
    "updated_at",
];

/// Lookup indexes an adopted table may be missing.
const CONTACT_INDEXES: &str = "
    CREATE INDEX IF NOT EXISTS idx_contacts_email ON contacts(email);
    CREATE INDEX IF NOT EXISTS idx_contacts_phone_number ON contacts(phone_number);
    CREATE INDEX IF NOT EXISTS idx_contacts_linked_id ON contacts(linked_id);
";

fn migration_err(context: &str, err: rusqlite::Error) -> DbError {
    DbError::Migration(format!("{context}: {err}"))
}

fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |(version, _)| *version)
}

fn applied_version(conn: &Connection) -> Result<u32, DbError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
    .map_err(|e| migration_err("Failed to read schema_version", e))
}

fn has_contacts_table(conn: &Connection) -> Result<bool, DbError> {
    conn.query_row(
        "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = 'contacts'",
        [],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .map_err(|e| migration_err("Failed to inspect sqlite_master", e))
}

/// Check an unversioned `contacts` table and stamp it as version 1.
fn adopt_unversioned_table(conn: &Connection) -> Result<(), DbError> {
    let mut stmt = conn
        .prepare("SELECT name FROM pragma_table_info('contacts')")
        .map_err(|e| migration_err("Failed to read contacts columns", e))?;
    let present = stmt
        .query_map([], |row| row.get::<_, String>(0))
        .and_then(|rows| rows.collect::<Result<Vec<_>, _>>())
        .map_err(|e| migration_err("Failed to read contacts columns", e))?;

    let missing: Vec<&str> = CONTACT_COLUMNS
        .iter()
        .copied()
        .filter(|column| !present.iter().any(|p| p == column))
        .collect();
    if !missing.is_empty() {
        return Err(DbError::Migration(format!(
            "Existing contacts table lacks column(s): {}",
            missing.join(", ")
        )));
    }

    let inconsistent: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM contacts
             WHERE link_precedence NOT IN ('primary', 'secondary')
                OR (link_precedence = 'primary') <> (linked_id IS NULL)",
            [],
            |row| row.get(0),
        )
        .map_err(|e| migration_err("Failed to check contact linkage", e))?;
    if inconsistent > 0 {
        return Err(DbError::Migration(format!(
            "Existing contacts table has {inconsistent} row(s) whose link_precedence disagrees with linked_id"
        )));
    }

    conn.execute_batch(CONTACT_INDEXES)
        .map_err(|e| migration_err("Failed to index existing contacts table", e))?;
    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])
        .map_err(|e| migration_err("Failed to stamp schema v1", e))?;
    log::info!("Adopted existing contacts table as schema v1");
    Ok(())
}

/// Hot copy of the database to `<db>.v<version>.bak` before an upgrade.
/// In-memory databases are skipped.
fn backup_before_upgrade(conn: &Connection, from: u32) -> Result<(), DbError> {
    let path: String = conn
        .query_row("SELECT file FROM pragma_database_list WHERE name = 'main'", [], |row| {
            row.get(0)
        })
        .map_err(|e| migration_err("Failed to locate database file", e))?;
    if path.is_empty() {
        return Ok(());
    }
    let backup_path = format!("{path}.v{from}.bak");
    conn.backup(DatabaseName::Main, &backup_path, None)
        .map_err(|e| migration_err("Pre-upgrade backup failed", e))?;
    log::info!("Backed up schema v{from} database to {backup_path}");
    Ok(())
}

/// Bring the schema up to date. Returns the number of steps applied.
///
/// A database stamped with a version newer than this build knows is refused.
pub fn run_migrations(conn: &Connection) -> Result<usize, DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
        );",
    )
    .map_err(|e| migration_err("Failed to create schema_version", e))?;

    let before = applied_version(conn)?;
    let latest = latest_version();
    if before > latest {
        return Err(DbError::Migration(format!(
            "Database schema v{before} is newer than this idrecon build supports (v{latest})"
        )));
    }
    if before == latest {
        return Ok(0);
    }
    if before > 0 {
        backup_before_upgrade(conn, before)?;
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)
        .map_err(|e| migration_err("Failed to begin schema upgrade", e))?;

    // Another connection may have upgraded while this one waited for the lock.
    let mut version = applied_version(&tx)?;
    if version == 0 && has_contacts_table(&tx)? {
        adopt_unversioned_table(&tx)?;
        version = 1;
    }

    let mut applied = 0;
    for (step, sql) in SCHEMA_STEPS.iter().filter(|(step, _)| *step > version) {
        tx.execute_batch(sql)
            .map_err(|e| migration_err(&format!("Schema step v{step} failed"), e))?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [step])
            .map_err(|e| migration_err(&format!("Failed to stamp schema v{step}"), e))?;
        log::info!("Applied schema v{step}");
        applied += 1;
    }

    tx.commit()
        .map_err(|e| migration_err("Failed to commit schema upgrade", e))?;
    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mem_db() -> Connection {
        Connection::open_in_memory().expect("in-memory db")
    }

    fn legacy_table(conn: &Connection, extra_sql: &str) {
        conn.execute_batch(&format!(
            "CREATE TABLE contacts (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                email TEXT,
                phone_number TEXT,
                linked_id INTEGER,
                link_precedence TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            {extra_sql}"
        ))
        .expect("seed legacy table");
    }

    fn index_exists(conn: &Connection, name: &str) -> bool {
        conn.query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'index' AND name = ?1",
            [name],
            |_| Ok(()),
        )
        .optional()
        .unwrap()
        .is_some()
    }

    #[test]
    fn test_fresh_db_gets_baseline() {
        let conn = mem_db();
        assert_eq!(run_migrations(&conn).expect("migrate"), 1);
        assert_eq!(applied_version(&conn).unwrap(), 1);
        assert!(index_exists(&conn, "idx_contacts_linked_id"));
        assert!(conn.is_autocommit());
    }

    #[test]
    fn test_rerun_is_a_noop() {
        let conn = mem_db();
        run_migrations(&conn).expect("first run");
        assert_eq!(run_migrations(&conn).expect("second run"), 0);
        assert_eq!(applied_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_baseline_enforces_linkage_rule() {
        let conn = mem_db();
        run_migrations(&conn).expect("migrate");

        conn.execute(
            "INSERT INTO contacts (email, link_precedence, created_at, updated_at)
             VALUES ('a@x.com', 'primary', '2025-01-01', '2025-01-01')",
            [],
        )
        .expect("plain primary is valid");

        let linked_primary = conn.execute(
            "INSERT INTO contacts (email, linked_id, link_precedence, created_at, updated_at)
             VALUES ('b@x.com', 1, 'primary', '2025-01-01', '2025-01-01')",
            [],
        );
        assert!(linked_primary.is_err());

        let unlinked_secondary = conn.execute(
            "INSERT INTO contacts (email, link_precedence, created_at, updated_at)
             VALUES ('c@x.com', 'secondary', '2025-01-01', '2025-01-01')",
            [],
        );
        assert!(unlinked_secondary.is_err());
    }

    #[test]
    fn test_consistent_legacy_table_is_adopted() {
        let conn = mem_db();
        legacy_table(
            &conn,
            "INSERT INTO contacts (email, link_precedence, created_at, updated_at)
             VALUES ('legacy@x.com', 'primary', '2025-01-01', '2025-01-01');
             INSERT INTO contacts (email, linked_id, link_precedence, created_at, updated_at)
             VALUES ('other@x.com', 1, 'secondary', '2025-01-02', '2025-01-02');",
        );

        assert_eq!(run_migrations(&conn).expect("adopt"), 0);
        assert_eq!(applied_version(&conn).unwrap(), 1);
        assert!(index_exists(&conn, "idx_contacts_email"));

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM contacts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_legacy_table_missing_linkage_columns_is_refused() {
        let conn = mem_db();
        conn.execute_batch(
            "CREATE TABLE contacts (
                id INTEGER PRIMARY KEY,
                email TEXT,
                phone_number TEXT,
                created_at TEXT,
                updated_at TEXT
            );",
        )
        .unwrap();

        let err = run_migrations(&conn).unwrap_err().to_string();
        assert!(err.contains("linked_id, link_precedence"), "{err}");
        assert_eq!(applied_version(&conn).unwrap(), 0, "nothing stamped");
    }

    #[test]
    fn test_legacy_rows_breaking_linkage_are_refused() {
        let conn = mem_db();
        legacy_table(
            &conn,
            "INSERT INTO contacts (email, linked_id, link_precedence, created_at, updated_at)
             VALUES ('a@x.com', 7, 'primary', '2025-01-01', '2025-01-01');
             INSERT INTO contacts (email, link_precedence, created_at, updated_at)
             VALUES ('b@x.com', 'secondary', '2025-01-01', '2025-01-01');",
        );

        let err = run_migrations(&conn).unwrap_err().to_string();
        assert!(err.contains("2 row(s)"), "{err}");
        assert!(!index_exists(&conn, "idx_contacts_email"), "adoption rolled back");
    }

    #[test]
    fn test_newer_schema_is_refused() {
        let conn = mem_db();
        run_migrations(&conn).unwrap();
        conn.execute("INSERT INTO schema_version (version) VALUES (999)", [])
            .unwrap();

        let err = run_migrations(&conn).unwrap_err();
        assert!(matches!(err, DbError::Migration(_)));
        assert!(err.to_string().contains("v999 is newer"), "{err}");
    }

    #[test]
    fn test_upgrade_backup_is_a_readable_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let db_path = dir.path().join("contacts.db");
        let conn = Connection::open(&db_path).expect("open db");
        run_migrations(&conn).unwrap();
        assert!(
            !dir.path().join("contacts.db.v0.bak").exists(),
            "a fresh file has nothing to back up"
        );

        conn.execute(
            "INSERT INTO contacts (email, link_precedence, created_at, updated_at)
             VALUES ('a@x.com', 'primary', '2025-01-01', '2025-01-01')",
            [],
        )
        .unwrap();
        backup_before_upgrade(&conn, 1).expect("backup");

        let copy = Connection::open(dir.path().join("contacts.db.v1.bak")).expect("open copy");
        let email: String = copy
            .query_row("SELECT email FROM contacts", [], |row| row.get(0))
            .unwrap();
        assert_eq!(email, "a@x.com");
    }

    #[test]
    fn test_backup_skips_in_memory() {
        let conn = mem_db();
        run_migrations(&conn).unwrap();
        backup_before_upgrade(&conn, 1).expect("no-op for :memory:");
    }
}
