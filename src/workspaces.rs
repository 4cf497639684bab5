//! Enumerates Cursor workspace directories.
//!
//! Each sub-directory of the workspace storage root that holds a
//! `state.vscdb` becomes one [`WorkspaceSummary`]: id, optional source
//! folder from the `workspace.json` manifest, store mtime, and a chat count
//! read without loading conversation bodies. One bad workspace is logged
//! and skipped; only an unreadable root aborts the enumeration.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use eyre::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::reconcile;
use crate::store;

const MANIFEST_FILE: &str = "workspace.json";

/// Lightweight per-workspace summary, built fresh on every enumeration pass.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceSummary {
    pub id: String,
    /// Path of the workspace's local store file.
    pub path: PathBuf,
    /// Original source folder (usually a `file://` URI), when the manifest
    /// records one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder: Option<String>,
    #[serde(rename = "lastModified")]
    pub last_modified: String,
    #[serde(rename = "chatCount")]
    pub chat_count: usize,
}

impl WorkspaceSummary {
    /// Human-facing name: the folder's base name when known, else the id.
    pub fn display_name(&self) -> String {
        match self.folder.as_deref() {
            Some(folder) => {
                let base = reconcile::folder_basename(folder);
                if base.is_empty() { self.id.clone() } else { base }
            }
            None => self.id.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkspaceManifest {
    folder: Option<String>,
}

/// Scan the storage root and summarize every workspace directory that holds
/// a local store. Directory-listing order is preserved.
pub fn list_workspaces(storage_root: &Path) -> Result<Vec<WorkspaceSummary>> {
    let entries = fs::read_dir(storage_root).wrap_err_with(|| {
        format!(
            "Failed to read workspace storage: {}",
            storage_root.display()
        )
    })?;

    let mut workspaces = Vec::new();
    for entry in entries {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                eprintln!("Warning: unreadable storage entry: {err}");
                continue;
            }
        };
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        let id = entry.file_name().to_string_lossy().into_owned();
        let db_path = dir.join("state.vscdb");
        if !db_path.exists() {
            eprintln!("Skipping {id}: no state.vscdb found");
            continue;
        }
        match summarize(&dir, &id, &db_path) {
            Ok(workspace) => workspaces.push(workspace),
            Err(err) => eprintln!("Error processing workspace {id}: {err:#}"),
        }
    }
    Ok(workspaces)
}

fn summarize(dir: &Path, id: &str, db_path: &Path) -> Result<WorkspaceSummary> {
    let modified = fs::metadata(db_path)
        .and_then(|meta| meta.modified())
        .wrap_err_with(|| format!("Failed to stat {}", db_path.display()))?;
    let last_modified =
        DateTime::<Utc>::from(modified).to_rfc3339_opts(SecondsFormat::Millis, true);

    let chat_count = {
        let conn = store::open_readonly(db_path)?;
        match store::read_item(&conn, reconcile::CHAT_DATA_KEY)? {
            Some(raw) => reconcile::chat_tab_count(id, &raw),
            None => 0,
        }
    };

    // The manifest is optional; a workspace without one just has no folder.
    let folder = fs::read_to_string(dir.join(MANIFEST_FILE))
        .ok()
        .and_then(|raw| {
            store::parse_json::<WorkspaceManifest>(&format!("manifest for workspace {id}"), &raw)
        })
        .and_then(|manifest| manifest.folder);

    Ok(WorkspaceSummary {
        id: id.to_string(),
        path: db_path.to_path_buf(),
        folder,
        last_modified,
        chat_count,
    })
}

/// Case-insensitive substring filter against the workspace id, the
/// normalized folder path, or the folder's base name.
pub fn matches_filter(workspace: &WorkspaceSummary, filter: &str) -> bool {
    let filter = filter.to_lowercase();
    if workspace.id.to_lowercase().contains(&filter) {
        return true;
    }
    let Some(folder) = workspace.folder.as_deref() else {
        return false;
    };
    reconcile::normalize_folder(folder)
        .to_lowercase()
        .contains(&filter)
        || reconcile::folder_basename(folder)
            .to_lowercase()
            .contains(&filter)
}
