//! # cursor-chat-export
//!
//! A CLI tool that exports [Cursor](https://cursor.com) AI chat and composer
//! history to local HTML, Markdown and JSON files, organized by workspace.
//!
//! ## What it does
//!
//! Cursor scatters conversation data across SQLite key-value stores: each
//! workspace directory under `workspaceStorage` has its own `state.vscdb`,
//! and a shared `globalStorage/state.vscdb` holds full composer and bubble
//! bodies referenced by id. This tool enumerates the workspaces, reconciles
//! every historical storage shape (legacy chat tabs, inline composer
//! conversations, bubble-header indirection, and a best-effort scan for
//! orphaned records) into one document per workspace, and writes the result
//! as an `html/markdown/json` output tree.
//!
//! The databases are opened **read-only** — your data is never modified.
//!
//! ## Usage
//!
//! ```sh
//! # Export everything to a directory
//! cursor-chat-export ~/notes/cursor-chats
//!
//! # Only workspaces whose folder name mentions "api", with explicit storage
//! cursor-chat-export --only api -w /path/to/workspaceStorage
//!
//! # Just list what would be exported
//! cursor-chat-export --list
//! ```
//!
//! Preferences can be persisted in `~/.config/cursor-chat-export/config.toml`.
//!
//! ## Compatibility
//!
//! Tracks Cursor's internal (undocumented) SQLite layout: the
//! `workbench.panel.aichat.view.aichat.chatdata` and `composer.composerData`
//! keys in the workspace store, and `composerData:{id}` /
//! `bubbleId:{composerId}:{bubbleId}` keys in the global store.

pub mod export;
pub mod reconcile;
pub mod store;
pub mod workspaces;
