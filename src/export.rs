//! Writes the export tree.
//!
//! ```text
//! TARGET_DIR/
//!   html/<workspace name>/<timestamp>--<title>.html
//!   markdown/<workspace name>/<timestamp>--<title>.md
//!   json/<workspace name>.json
//! ```
//!
//! The JSON document is the full `{ workspaceInfo, chatData }` pair;
//! Markdown and HTML are rendered per conversation. A failure in one
//! workspace is logged and counted, the run continues.

use std::collections::HashSet;
use std::fs;
use std::path::PathBuf;

use chrono::DateTime;
use eyre::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use pulldown_cmark::{Options, Parser, html};
use serde::Serialize;
use serde_json::Value;

use crate::reconcile::{self, Role, WorkspaceDetail};
use crate::workspaces::{self, WorkspaceSummary};

/// Stylesheet embedded into every exported HTML page.
const STYLE: &str = include_str!("../assets/markdown.css");

/// Configuration required to run the export process.
/// This decouples the logic from how the arguments were parsed (CLI/Config file).
#[derive(Clone)]
pub struct ExportConfig {
    pub target_dir: PathBuf,
    pub workspace_storage: PathBuf,
    pub tags: Option<Vec<String>>,
    pub only: Option<String>,
    pub verbose: bool,
    pub quiet: bool,
}

/// The hand-off pair consumed by the file writers: one enumerated workspace
/// plus its reconciled conversation document.
#[derive(Serialize)]
pub struct WorkspaceExport<'a> {
    #[serde(rename = "workspaceInfo")]
    pub workspace_info: &'a WorkspaceSummary,
    #[serde(rename = "chatData")]
    pub chat_data: &'a WorkspaceDetail,
}

/// Enumerate, filter, reconcile and export every workspace.
pub fn run(config: &ExportConfig) -> Result<()> {
    let workspaces = workspaces::list_workspaces(&config.workspace_storage)?;
    let selected: Vec<WorkspaceSummary> = match config.only.as_deref() {
        Some(filter) => workspaces
            .into_iter()
            .filter(|ws| workspaces::matches_filter(ws, filter))
            .collect(),
        None => workspaces,
    };

    for subdir in ["html", "markdown", "json"] {
        let dir = config.target_dir.join(subdir);
        fs::create_dir_all(&dir)
            .wrap_err_with(|| format!("Failed to create output directory: {}", dir.display()))?;
    }

    let pb = if config.quiet {
        ProgressBar::hidden()
    } else {
        let bar = ProgressBar::new(selected.len() as u64);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} ({percent}%)",
            )
            .unwrap()
            .progress_chars("=>-"),
        );
        bar.println(format!("Found {} workspaces.", selected.len()));
        bar
    };

    let mut exported = 0usize;
    let mut errors = 0usize;
    for workspace in &selected {
        match export_workspace(config, workspace, &pb) {
            Ok(()) => exported += 1,
            Err(err) => {
                errors += 1;
                pb.println(format!("Error [{}]: {err:#}", workspace.id));
            }
        }
        pb.inc(1);
    }
    pb.finish_and_clear();

    if !config.quiet {
        let mut summary = format!(
            "Done. {exported} of {} workspace(s) exported to {}.",
            selected.len(),
            config.target_dir.display()
        );
        if errors > 0 {
            summary.push_str(&format!(" Completed with {errors} error(s)."));
        }
        eprintln!("{summary}");
    }

    Ok(())
}

fn export_workspace(
    config: &ExportConfig,
    workspace: &WorkspaceSummary,
    pb: &ProgressBar,
) -> Result<()> {
    let detail = reconcile::workspace_detail(
        &config.workspace_storage,
        &workspace.id,
        workspace.folder.as_deref(),
    )?;
    let name = workspace.display_name();

    let md_dir = config.target_dir.join("markdown").join(&name);
    let html_dir = config.target_dir.join("html").join(&name);
    fs::create_dir_all(&md_dir)
        .wrap_err_with(|| format!("Failed to create: {}", md_dir.display()))?;
    fs::create_dir_all(&html_dir)
        .wrap_err_with(|| format!("Failed to create: {}", html_dir.display()))?;

    let mut taken = HashSet::new();
    for doc in collect_documents(&detail) {
        let stem = allocate_stem(&doc, &mut taken);
        let body = render_body(&doc);

        let md_path = md_dir.join(format!("{stem}.md"));
        let markdown = render_markdown_file(config, &name, &doc, &body)?;
        fs::write(&md_path, markdown)
            .wrap_err_with(|| format!("Failed to write: {}", md_path.display()))?;

        let html_path = html_dir.join(format!("{stem}.html"));
        fs::write(&html_path, render_html(&doc.title, &body))
            .wrap_err_with(|| format!("Failed to write: {}", html_path.display()))?;

        if config.verbose {
            pb.println(format!("Wrote:    {name}/{stem}.md"));
        }
    }

    let export = WorkspaceExport {
        workspace_info: workspace,
        chat_data: &detail,
    };
    let json_path = config.target_dir.join("json").join(format!("{name}.json"));
    let json = serde_json::to_string_pretty(&export)
        .wrap_err_with(|| format!("Failed to serialize workspace {}", workspace.id))?;
    fs::write(&json_path, json)
        .wrap_err_with(|| format!("Failed to write: {}", json_path.display()))?;
    if config.verbose {
        pb.println(format!("Wrote:    json/{name}.json"));
    }

    Ok(())
}

// ── Conversation documents ───────────────────────────────────────────────────

/// One exportable conversation: a legacy tab or a composer session.
struct ConversationDoc<'a> {
    id: &'a str,
    title: String,
    timestamp: String,
    entries: &'a [Value],
}

fn collect_documents(detail: &WorkspaceDetail) -> Vec<ConversationDoc<'_>> {
    let mut docs = Vec::new();
    for tab in &detail.tabs {
        docs.push(ConversationDoc {
            id: &tab.id,
            title: tab.title.clone(),
            timestamp: tab.timestamp.clone(),
            entries: tab.bubbles.as_deref().unwrap_or(&[]),
        });
    }
    for composer in &detail.composers.all_composers {
        let title = composer
            .extra
            .get("name")
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| {
                format!(
                    "Composer {}",
                    &composer.composer_id[..composer.composer_id.len().min(8)]
                )
            });
        docs.push(ConversationDoc {
            id: &composer.composer_id,
            title,
            timestamp: reconcile::normalize_timestamp(composer.extra.get("createdAt")),
            entries: &composer.conversation,
        });
    }
    docs
}

/// `<timestamp>--<title slug>`, unique within the workspace.
fn allocate_stem(doc: &ConversationDoc<'_>, taken: &mut HashSet<String>) -> String {
    let stamp = DateTime::parse_from_rfc3339(&doc.timestamp)
        .map(|dt| dt.format("%Y%m%d-%H%M%S").to_string())
        .unwrap_or_else(|_| "undated".to_string());

    let raw_slug = slug::slugify(&doc.title);
    // Truncate slug to 60 chars (slug output is ASCII-only, so byte == char)
    let slug = raw_slug[..raw_slug.len().min(60)]
        .trim_end_matches('-')
        .to_string();

    let base = if slug.is_empty() {
        stamp
    } else {
        format!("{stamp}--{slug}")
    };
    if taken.insert(base.clone()) {
        return base;
    }
    let with_id = format!("{base}-{}", &doc.id[..doc.id.len().min(8)]);
    taken.insert(with_id.clone());
    with_id
}

// ── Rendering ────────────────────────────────────────────────────────────────

/// Best-effort view over one conversation entry. Entries are either
/// normalized messages (`role`/`text`/`codeBlocks`) or raw store objects
/// (numeric `type`, `suggestedCodeBlocks`).
struct MessageView<'a> {
    role: Role,
    text: &'a str,
    code_blocks: &'a [Value],
}

impl<'a> MessageView<'a> {
    fn from_value(entry: &'a Value) -> Option<Self> {
        let role = match entry.get("role").and_then(Value::as_str) {
            Some("user") => Role::User,
            Some("assistant") => Role::Assistant,
            Some(_) => return None,
            None => match entry.get("type").and_then(Value::as_i64) {
                Some(1) => Role::User,
                Some(2) => Role::Assistant,
                _ => return None,
            },
        };
        let code_blocks = entry
            .get("suggestedCodeBlocks")
            .or_else(|| entry.get("codeBlocks"))
            .and_then(Value::as_array)
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        Some(MessageView {
            role,
            text: entry.get("text").and_then(Value::as_str).unwrap_or(""),
            code_blocks,
        })
    }

    fn heading(&self) -> &'static str {
        match self.role {
            Role::User => "User",
            Role::Assistant => "Assistant",
        }
    }
}

fn render_body(doc: &ConversationDoc<'_>) -> String {
    let mut body = String::new();
    for entry in doc.entries {
        let Some(view) = MessageView::from_value(entry) else {
            continue;
        };
        body.push_str(&format!("## {}\n\n", view.heading()));
        if !view.text.is_empty() {
            body.push_str(view.text);
            body.push_str("\n\n");
        }
        for block in view.code_blocks {
            push_code_block(&mut body, block);
        }
    }
    body
}

fn push_code_block(body: &mut String, block: &Value) {
    let Some(code) = block
        .get("code")
        .or_else(|| block.get("content"))
        .and_then(Value::as_str)
    else {
        return;
    };
    let language = block
        .get("language")
        .or_else(|| block.get("languageId"))
        .and_then(Value::as_str)
        .unwrap_or("");
    body.push_str(&format!("```{language}\n{code}\n```\n\n"));
}

#[derive(Serialize)]
struct Frontmatter<'a> {
    title: &'a str,
    workspace: &'a str,
    id: &'a str,
    timestamp: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    tags: Option<&'a [String]>,
}

fn render_markdown_file(
    config: &ExportConfig,
    workspace_name: &str,
    doc: &ConversationDoc<'_>,
    body: &str,
) -> Result<String> {
    let fm = Frontmatter {
        title: &doc.title,
        workspace: workspace_name,
        id: doc.id,
        timestamp: &doc.timestamp,
        tags: config.tags.as_deref(),
    };
    let yaml = serde_yaml::to_string(&fm).wrap_err("Failed to serialize frontmatter")?;
    Ok(format!("---\n{yaml}---\n\n# {}\n\n{body}", doc.title))
}

fn render_html(title: &str, markdown_body: &str) -> String {
    let mut rendered = String::new();
    let parser = Parser::new_ext(
        markdown_body,
        Options::ENABLE_TABLES | Options::ENABLE_STRIKETHROUGH,
    );
    html::push_html(&mut rendered, parser);
    format!(
        "<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n<title>{}</title>\n<style>\n{STYLE}</style>\n</head>\n<body class=\"markdown-body\">\n<h1>{}</h1>\n{rendered}</body>\n</html>\n",
        escape_html(title),
        escape_html(title),
    )
}

fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use serde_json::json;
    use tempfile::TempDir;

    fn fixture(root: &TempDir) -> ExportConfig {
        let storage_root = root.path().join("workspaceStorage");
        let ws_dir = storage_root.join("abc123");
        fs::create_dir_all(&ws_dir).unwrap();

        let conn = Connection::open(ws_dir.join("state.vscdb")).unwrap();
        conn.execute_batch("CREATE TABLE ItemTable ([key] TEXT PRIMARY KEY, value BLOB);")
            .unwrap();
        conn.execute(
            "INSERT INTO ItemTable VALUES (?1, ?2)",
            (
                reconcile::CHAT_DATA_KEY,
                json!({
                    "tabs": [{
                        "tabId": "t1",
                        "chatTitle": "Greeting",
                        "lastSendTime": 1_700_000_000_000i64,
                        "bubbles": [
                            {"type": 1, "text": "hello",
                             "suggestedCodeBlocks": [{"code": "let x = 1;", "language": "rust"}]},
                            {"type": 2, "text": "hi there"}
                        ]
                    }]
                })
                .to_string(),
            ),
        )
        .unwrap();
        fs::write(
            ws_dir.join("workspace.json"),
            json!({"folder": "file:///Users/me/demo-project"}).to_string(),
        )
        .unwrap();

        ExportConfig {
            target_dir: root.path().join("out"),
            workspace_storage: storage_root,
            tags: Some(vec!["cursor".to_string()]),
            only: None,
            verbose: false,
            quiet: true,
        }
    }

    #[test]
    fn run_writes_the_three_format_tree() {
        let root = TempDir::new().unwrap();
        let config = fixture(&root);
        run(&config).unwrap();

        let json_path = config.target_dir.join("json/demo-project.json");
        let parsed: Value =
            serde_json::from_str(&fs::read_to_string(&json_path).unwrap()).unwrap();
        assert_eq!(parsed["workspaceInfo"]["id"], json!("abc123"));
        assert_eq!(parsed["workspaceInfo"]["chatCount"], json!(1));
        assert_eq!(parsed["chatData"]["tabs"][0]["title"], json!("Greeting"));

        let md_path = config
            .target_dir
            .join("markdown/demo-project/20231114-221320--greeting.md");
        let markdown = fs::read_to_string(&md_path).unwrap();
        assert!(markdown.starts_with("---\n"));
        assert!(markdown.contains("## User"));
        assert!(markdown.contains("```rust\nlet x = 1;\n```"));
        assert!(markdown.contains("## Assistant"));
        assert!(markdown.contains("tags:"));

        let html_path = config
            .target_dir
            .join("html/demo-project/20231114-221320--greeting.html");
        let page = fs::read_to_string(&html_path).unwrap();
        assert!(page.contains("<html"));
        assert!(page.contains("<h2>User</h2>"));
        assert!(page.contains("markdown-body"));
    }

    #[test]
    fn only_filter_excludes_unmatched_workspaces() {
        let root = TempDir::new().unwrap();
        let mut config = fixture(&root);
        config.only = Some("nomatch".to_string());
        run(&config).unwrap();

        assert!(!config.target_dir.join("json/demo-project.json").exists());
    }

    #[test]
    fn message_view_reads_both_entry_shapes() {
        let normalized = json!({"role": "assistant", "text": "done", "codeBlocks": []});
        let view = MessageView::from_value(&normalized).unwrap();
        assert_eq!(view.heading(), "Assistant");
        assert_eq!(view.text, "done");

        let raw = json!({"type": 1, "text": "ask", "suggestedCodeBlocks": [{"code": "x"}]});
        let view = MessageView::from_value(&raw).unwrap();
        assert_eq!(view.heading(), "User");
        assert_eq!(view.code_blocks.len(), 1);

        assert!(MessageView::from_value(&json!({"note": "no role"})).is_none());
        assert!(MessageView::from_value(&json!({"type": 9})).is_none());
    }

    #[test]
    fn stem_collisions_get_an_id_suffix() {
        let mut taken = HashSet::new();
        let doc_a = ConversationDoc {
            id: "aaaa1111",
            title: "Same title".to_string(),
            timestamp: "2023-11-14T22:13:20.000Z".to_string(),
            entries: &[],
        };
        let doc_b = ConversationDoc {
            id: "bbbb2222",
            title: "Same title".to_string(),
            timestamp: "2023-11-14T22:13:20.000Z".to_string(),
            entries: &[],
        };
        assert_eq!(
            allocate_stem(&doc_a, &mut taken),
            "20231114-221320--same-title"
        );
        assert_eq!(
            allocate_stem(&doc_b, &mut taken),
            "20231114-221320--same-title-bbbb2222"
        );
    }
}
