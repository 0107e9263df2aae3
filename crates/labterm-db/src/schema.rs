use rusqlite::Connection;

/// Current schema version. Bump this when adding migrations.
const CURRENT_VERSION: i64 = 3;

pub fn initialize(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );

        CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS tabs (
            position INTEGER PRIMARY KEY,
            host TEXT NOT NULL,
            port INTEGER NOT NULL DEFAULT 23 CHECK(port BETWEEN 1 AND 65535),
            label TEXT NOT NULL
        );
        ",
    )?;

    migrate(conn)?;
    Ok(())
}

pub fn current_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

fn migrate(conn: &Connection) -> rusqlite::Result<()> {
    let version = current_version(conn)?;

    if version < 1 {
        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            [1_i64],
        )?;
    }

    if version < 2 {
        // v2: tabs remember whether the user typed the label.
        let has_label_source = conn
            .prepare("SELECT label_source FROM tabs LIMIT 0")
            .is_ok();

        if !has_label_source {
            conn.execute_batch(
                "ALTER TABLE tabs ADD COLUMN label_source TEXT NOT NULL DEFAULT 'default';",
            )?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            [2_i64],
        )?;
    }

    if version < 3 {
        // v3: tabs remember the session they were showing, so a reloaded
        // window can reattach to it.
        let has_session_id = conn.prepare("SELECT session_id FROM tabs LIMIT 0").is_ok();

        if !has_session_id {
            conn.execute_batch("ALTER TABLE tabs ADD COLUMN session_id TEXT;")?;
        }

        conn.execute(
            "INSERT OR REPLACE INTO schema_version (version) VALUES (?1)",
            [CURRENT_VERSION],
        )?;
    }

    Ok(())
}
