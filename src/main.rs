use clap::Parser;
use cursor_chat_export::export::{self, ExportConfig};
use cursor_chat_export::workspaces;
use eyre::{Context, Result, eyre};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Export Cursor editor AI chat and composer history to HTML, Markdown and
/// JSON files.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Directory to write the export tree.
    /// Defaults to ./cursor-export-output if not set in config.
    #[arg(value_name = "TARGET_DIR")]
    target_dir: Option<PathBuf>,

    /// Path to Cursor workspace storage (one sub-directory per workspace).
    /// Auto-detected if omitted.
    #[arg(short = 'w', long, value_name = "PATH")]
    workspace_storage: Option<PathBuf>,

    /// Only export workspaces whose id, folder path or folder name contains
    /// this string (case-insensitive).
    #[arg(short, long, value_name = "FILTER")]
    only: Option<String>,

    /// List discovered workspaces (with --only applied) and exit.
    #[arg(short = 'L', long)]
    list: bool,

    /// Path to a specific configuration file.
    /// Defaults to $XDG_CONFIG_HOME/cursor-chat-export/config.toml
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Comma-separated tags to add to Markdown frontmatter (e.g. "cursor,llm").
    #[arg(long, value_name = "TAGS", value_delimiter = ',')]
    tags: Option<Vec<String>>,

    /// Print each file written.
    #[arg(short, long)]
    verbose: bool,

    /// Suppress standard output (progress bars).
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Deserialize, Default)]
struct FileConfig {
    target_dir: Option<PathBuf>,
    workspace_storage: Option<PathBuf>,
    tags: Option<Vec<String>>,
}

fn default_storage_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("Cursor/User/workspaceStorage"))
}

fn load_file_config(explicit_path: Option<&Path>) -> Result<FileConfig> {
    let path = if let Some(p) = explicit_path {
        if !p.exists() {
            return Err(eyre!("Config file not found: {}", p.display()));
        }
        Some(p.to_path_buf())
    } else {
        // Search: XDG/OS config dir, then nothing
        dirs::config_dir()
            .map(|d| d.join("cursor-chat-export/config.toml"))
            .filter(|p| p.exists())
    };

    match path {
        None => Ok(FileConfig::default()),
        Some(p) => {
            let content = fs::read_to_string(&p)
                .wrap_err_with(|| format!("Failed to read config: {}", p.display()))?;
            toml::from_str(&content)
                .wrap_err_with(|| format!("Failed to parse config: {}", p.display()))
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load config file (CLI path > default path)
    let file_cfg = load_file_config(cli.config.as_deref())?;

    // 2. Resolve workspace storage (CLI > Config > Auto-detect)
    let workspace_storage = cli
        .workspace_storage
        .or(file_cfg.workspace_storage)
        .or_else(default_storage_path)
        .ok_or_else(|| {
            eyre!(
                "Could not determine workspace storage path.\nUse --workspace-storage to specify manually, or set workspace_storage in config.toml."
            )
        })?;

    if !workspace_storage.exists() {
        return Err(eyre!(
            "Workspace storage not found at: {}\nUse --workspace-storage to specify the path manually.",
            workspace_storage.display()
        ));
    }

    if cli.list {
        return list_command(&workspace_storage, cli.only.as_deref());
    }

    // 3. Resolve target_dir (CLI > Config > Default) and tags (CLI > Config)
    let target_dir = cli
        .target_dir
        .or(file_cfg.target_dir)
        .unwrap_or_else(|| PathBuf::from("cursor-export-output"));
    let tags = cli.tags.or(file_cfg.tags);

    if !cli.quiet {
        eprintln!("Starting export from: {}", workspace_storage.display());
        if let Some(filter) = cli.only.as_deref() {
            eprintln!("Workspace filter: {filter}");
        }
    }

    let config = ExportConfig {
        target_dir,
        workspace_storage,
        tags,
        only: cli.only,
        verbose: cli.verbose,
        quiet: cli.quiet,
    };
    export::run(&config)
}

fn list_command(storage: &Path, filter: Option<&str>) -> Result<()> {
    let all = workspaces::list_workspaces(storage)?;
    let filtered: Vec<_> = match filter {
        Some(f) => all
            .into_iter()
            .filter(|ws| workspaces::matches_filter(ws, f))
            .collect(),
        None => all,
    };

    println!(
        "\n{} workspaces found{}:",
        filtered.len(),
        if filter.is_some() { " (filtered)" } else { "" }
    );
    for ws in &filtered {
        println!(
            "- name: {}\n  id: {}\n  folder: {}\n  chats: {}\n  lastModified: {}\n",
            ws.display_name(),
            ws.id,
            ws.folder.as_deref().unwrap_or("<unknown>"),
            ws.chat_count,
            ws.last_modified
        );
    }
    Ok(())
}
