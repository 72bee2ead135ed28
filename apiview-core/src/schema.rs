/// DDL to create the schema_version tracking table.
///
/// Applied unconditionally on every DB open (before checking the version),
/// using `IF NOT EXISTS` so it is safe to run multiple times.
pub const SCHEMA_VERSION_DDL: &str = "
    CREATE TABLE IF NOT EXISTS schema_version (
        version INTEGER NOT NULL
    ) STRICT;
";

/// DDL for the v1 schema.
///
/// - `reviews`: one row per review, keyed by UUID v4 text.
/// - `code_files`: parsed code files as JSON blobs. Rows are never updated;
///   a refresh inserts a new row and repoints the revision.
/// - `revisions`: ordered snapshots of a review; `source` keeps the uploaded
///   document so the code file can be regenerated.
/// - `comments`: review comments anchored to an element id.
/// - `thread_resolutions`: one row per resolved (review, element) thread.
///
/// All tables use `STRICT` mode. Child rows cascade with their review.
pub const SCHEMA_V1_SQL: &str = "
    CREATE TABLE IF NOT EXISTS reviews (
        id          TEXT    PRIMARY KEY,
        name        TEXT    NOT NULL,
        author      TEXT    NOT NULL,
        is_closed   INTEGER NOT NULL DEFAULT 0,
        created_at  INTEGER NOT NULL,
        updated_at  INTEGER NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS code_files (
        id          TEXT    PRIMARY KEY,
        content     BLOB    NOT NULL,
        created_at  INTEGER NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS revisions (
        id           TEXT    PRIMARY KEY,
        review_id    TEXT    NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
        number       INTEGER NOT NULL,
        label        TEXT,
        author       TEXT    NOT NULL,
        created_at   INTEGER NOT NULL,
        source       BLOB    NOT NULL,
        code_file_id TEXT    NOT NULL REFERENCES code_files(id),
        UNIQUE (review_id, number)
    ) STRICT;

    CREATE TABLE IF NOT EXISTS comments (
        id           TEXT    PRIMARY KEY,
        review_id    TEXT    NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
        revision_id  TEXT    REFERENCES revisions(id) ON DELETE SET NULL,
        element_id   TEXT    NOT NULL,
        author       TEXT    NOT NULL,
        body         TEXT    NOT NULL,
        created_at   INTEGER NOT NULL
    ) STRICT;

    CREATE TABLE IF NOT EXISTS thread_resolutions (
        review_id    TEXT    NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
        element_id   TEXT    NOT NULL,
        resolved_by  TEXT    NOT NULL,
        resolved_at  INTEGER NOT NULL,
        PRIMARY KEY (review_id, element_id)
    ) STRICT;
";

/// DDL for v2: per-user review subscriptions.
pub const SCHEMA_V2_SQL: &str = "
    CREATE TABLE IF NOT EXISTS subscriptions (
        review_id   TEXT    NOT NULL REFERENCES reviews(id) ON DELETE CASCADE,
        user_name   TEXT    NOT NULL,
        created_at  INTEGER NOT NULL,
        PRIMARY KEY (review_id, user_name)
    ) STRICT;
";

/// Ordered list of `(version, ddl)` migrations.
const MIGRATIONS: &[(i64, &str)] = &[(1, SCHEMA_V1_SQL), (2, SCHEMA_V2_SQL)];

/// The version `migrate` brings a database to.
pub const LATEST_VERSION: i64 = 2;

/// Runs forward-only schema migration to migrate the DB to the latest version.
///
/// Idempotent: safe to call on every startup.
///
/// # Process
///
/// 1. Creates the `schema_version` table if it does not exist.
/// 2. Reads the current version (`0` if the table is empty).
/// 3. Applies each pending migration inside its own `BEGIN IMMEDIATE`
///    transaction and records its version.
///
/// # Errors
///
/// Returns `rusqlite::Error` if the DDL fails or the version row cannot be read.
pub fn migrate(db: &mut rusqlite::Connection) -> rusqlite::Result<()> {
    db.execute_batch(SCHEMA_VERSION_DDL)?;

    let version: i64 = db.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    for &(target, ddl) in MIGRATIONS.iter().filter(|(v, _)| *v > version) {
        let tx = db.transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)?;
        tx.execute_batch(ddl)?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [target])?;
        tx.commit()?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_exists(db: &rusqlite::Connection, name: &str) -> bool {
        db.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [name],
            |r| r.get::<_, i64>(0),
        )
        .unwrap()
            == 1
    }

    #[test]
    fn migrate_applies_every_version_once() {
        let mut db = rusqlite::Connection::open_in_memory().unwrap();
        migrate(&mut db).unwrap();
        migrate(&mut db).unwrap();
        let rows: i64 = db
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, LATEST_VERSION);
        assert!(table_exists(&db, "subscriptions"));
    }

    #[test]
    fn unreadable_version_table_fails_without_migrating() {
        let mut db = rusqlite::Connection::open_in_memory().unwrap();
        db.execute_batch("CREATE TABLE schema_version (applied_at INTEGER);")
            .unwrap();
        assert!(migrate(&mut db).is_err());
        assert!(!table_exists(&db, "reviews"));
    }
}
