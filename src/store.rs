//! Read-only access to Cursor's SQLite key-value stores.
//!
//! Two store layouts exist: each workspace directory carries its own
//! `state.vscdb` with an `ItemTable` key-value table, and a single shared
//! `globalStorage/state.vscdb` sibling of the workspace storage root carries
//! the `cursorDiskKV` table with full composer and bubble bodies.
//!
//! Every connection is opened with `SQLITE_OPEN_READ_ONLY`; the databases
//! belong to Cursor and are never written, not even to a temp copy.

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use serde::de::DeserializeOwned;

/// Path to a workspace's own key-value store.
pub fn workspace_store_path(storage_root: &Path, workspace_id: &str) -> PathBuf {
    storage_root.join(workspace_id).join("state.vscdb")
}

/// Path to the shared global store, a fixed sibling of the storage root.
pub fn global_store_path(storage_root: &Path) -> PathBuf {
    let base = match storage_root.parent() {
        Some(parent) => parent.to_path_buf(),
        None => storage_root.join(".."),
    };
    base.join("globalStorage").join("state.vscdb")
}

/// Open a store strictly read-only.
pub fn open_readonly(path: &Path) -> Result<Connection> {
    Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .wrap_err_with(|| format!("Failed to open store: {}", path.display()))
}

/// Look up a key in a workspace store's `ItemTable`.
pub fn read_item(conn: &Connection, key: &str) -> Result<Option<String>> {
    read_value(conn, "SELECT value FROM ItemTable WHERE [key] = ?1", key)
}

/// Look up a key in the global store's `cursorDiskKV` table.
pub fn read_kv(conn: &Connection, key: &str) -> Result<Option<String>> {
    read_value(conn, "SELECT value FROM cursorDiskKV WHERE [key] = ?1", key)
}

fn read_value(conn: &Connection, sql: &str, key: &str) -> Result<Option<String>> {
    let value = conn
        .query_row(sql, [key], |row| row.get_ref(0).map(value_to_string))
        .optional()
        .wrap_err_with(|| format!("Store lookup failed for key {key}"))?;
    Ok(value.flatten())
}

/// Every row of the global key-value table as `(key, value)` strings.
/// Cursor also parks binary blobs in this table; values that are not UTF-8
/// text are skipped.
pub fn scan_kv(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn
        .prepare("SELECT [key], value FROM cursorDiskKV")
        .wrap_err("Failed to prepare global store scan")?;
    let mut rows = stmt.query([]).wrap_err("Failed to scan global store")?;

    let mut entries = Vec::new();
    while let Some(row) = rows.next().wrap_err("Failed to read global store row")? {
        let key: String = row.get(0)?;
        if let Some(value) = value_to_string(row.get_ref(1)?) {
            entries.push((key, value));
        }
    }
    Ok(entries)
}

fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            std::str::from_utf8(bytes).ok().map(str::to_owned)
        }
        _ => None,
    }
}

/// Parse a JSON payload pulled out of a store, degrading to `None` on
/// malformed data. Every per-record parse goes through here, so a corrupt
/// value surfaces as a console warning and missing data, never as an abort.
pub fn parse_json<T: DeserializeOwned>(what: &str, raw: &str) -> Option<T> {
    match serde_json::from_str(raw) {
        Ok(value) => Some(value),
        Err(err) => {
            eprintln!("Warning: malformed {what}: {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture_store(dir: &Path) -> PathBuf {
        let path = dir.join("state.vscdb");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE ItemTable ([key] TEXT PRIMARY KEY, value BLOB);
             CREATE TABLE cursorDiskKV ([key] TEXT PRIMARY KEY, value BLOB);",
        )
        .unwrap();
        conn.execute(
            "INSERT INTO ItemTable VALUES ('greeting', '{\"hello\":true}')",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO cursorDiskKV VALUES ('composerData:c1', '{\"a\":1}')",
            [],
        )
        .unwrap();
        // A value stored as a BLOB but still valid UTF-8
        conn.execute(
            "INSERT INTO cursorDiskKV VALUES ('blobbed', CAST('{\"b\":2}' AS BLOB))",
            [],
        )
        .unwrap();
        // Binary garbage that must be skipped by the scan
        conn.execute(
            "INSERT INTO cursorDiskKV VALUES ('binary', X'FFFE00')",
            [],
        )
        .unwrap();
        path
    }

    #[test]
    fn point_lookup_hits_and_misses() {
        let dir = TempDir::new().unwrap();
        let path = fixture_store(dir.path());
        let conn = open_readonly(&path).unwrap();

        assert_eq!(
            read_item(&conn, "greeting").unwrap().as_deref(),
            Some("{\"hello\":true}")
        );
        assert_eq!(read_item(&conn, "absent").unwrap(), None);
        assert_eq!(
            read_kv(&conn, "composerData:c1").unwrap().as_deref(),
            Some("{\"a\":1}")
        );
    }

    #[test]
    fn blob_values_are_read_as_text() {
        let dir = TempDir::new().unwrap();
        let path = fixture_store(dir.path());
        let conn = open_readonly(&path).unwrap();

        assert_eq!(
            read_kv(&conn, "blobbed").unwrap().as_deref(),
            Some("{\"b\":2}")
        );
    }

    #[test]
    fn scan_skips_non_utf8_values() {
        let dir = TempDir::new().unwrap();
        let path = fixture_store(dir.path());
        let conn = open_readonly(&path).unwrap();

        let rows = scan_kv(&conn).unwrap();
        let keys: Vec<&str> = rows.iter().map(|(k, _)| k.as_str()).collect();
        assert!(keys.contains(&"composerData:c1"));
        assert!(keys.contains(&"blobbed"));
        assert!(!keys.contains(&"binary"));
    }

    #[test]
    fn open_readonly_fails_on_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(open_readonly(&dir.path().join("nope.vscdb")).is_err());
    }

    #[test]
    fn parse_json_degrades_to_none() {
        assert_eq!(
            parse_json::<serde_json::Value>("test payload", "not json"),
            None
        );
        assert!(parse_json::<serde_json::Value>("test payload", "{\"ok\":1}").is_some());
    }

    #[test]
    fn global_store_is_a_sibling_of_the_root() {
        let path = global_store_path(Path::new("/data/Cursor/User/workspaceStorage"));
        assert_eq!(
            path,
            Path::new("/data/Cursor/User/globalStorage/state.vscdb")
        );
    }
}
