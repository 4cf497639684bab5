//! Reconciles the scattered representations of a workspace's AI history
//! into one document.
//!
//! Cursor has stored conversations in several shapes over time: legacy chat
//! tabs inlined in the workspace store, composer records in the global store
//! with the conversation inlined, composer records that only carry bubble
//! headers and need bubble-by-bubble reassembly, and orphaned records only
//! findable by scanning the global store. Each shape gets its own raw type
//! and normalization path; the passes run strictly in order and merge at the
//! end.

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use eyre::Result;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

use crate::store;

/// Workspace-store key holding the legacy chat-tab data.
pub const CHAT_DATA_KEY: &str = "workbench.panel.aichat.view.aichat.chatdata";
/// Workspace-store key holding the list of composer ids for that workspace.
pub const COMPOSER_INDEX_KEY: &str = "composer.composerData";

// ── Normalized output shapes ─────────────────────────────────────────────────

/// Conversation turn role, decoded from the numeric bubble `type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    /// Bubble `type` codes: 1 is the user, 2 is the assistant.
    fn from_code(code: i64) -> Option<Role> {
        match code {
            1 => Some(Role::User),
            2 => Some(Role::Assistant),
            _ => None,
        }
    }
}

/// One normalized conversation message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub text: String,
    #[serde(rename = "codeBlocks")]
    pub code_blocks: Vec<Value>,
}

/// A legacy chat tab from the workspace store.
#[derive(Debug, Clone, Serialize)]
pub struct Tab {
    pub id: String,
    pub title: String,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bubbles: Option<Vec<Value>>,
}

/// A composer conversation. Fields beyond the id and the resolved
/// conversation are passed through unchanged from the store.
#[derive(Debug, Clone, Serialize)]
pub struct ComposerRecord {
    #[serde(rename = "composerId")]
    pub composer_id: String,
    pub conversation: Vec<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A conversation discovered by the heuristic scan under an agent-flavored
/// key. It has no stronger identity than the key it was stored at.
#[derive(Debug, Clone, Serialize)]
pub struct AgentConversation {
    #[serde(rename = "agentKey")]
    pub agent_key: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ComposerCollection {
    #[serde(rename = "allComposers")]
    pub all_composers: Vec<ComposerRecord>,
}

/// Everything known about one workspace's conversations.
#[derive(Debug, Clone, Serialize)]
pub struct WorkspaceDetail {
    pub tabs: Vec<Tab>,
    pub composers: ComposerCollection,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agents: Option<Vec<AgentConversation>>,
}

impl WorkspaceDetail {
    fn empty() -> Self {
        WorkspaceDetail {
            tabs: Vec::new(),
            composers: ComposerCollection::default(),
            agents: None,
        }
    }
}

// ── Raw store shapes ─────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RawChatData {
    #[serde(default)]
    tabs: Vec<RawTab>,
}

#[derive(Debug, Deserialize)]
struct RawTab {
    #[serde(rename = "tabId")]
    tab_id: String,
    #[serde(rename = "chatTitle")]
    chat_title: Option<String>,
    #[serde(rename = "lastSendTime")]
    last_send_time: Option<Value>,
    bubbles: Option<Vec<Value>>,
}

impl RawTab {
    fn into_tab(self) -> Tab {
        let title = self
            .chat_title
            .as_deref()
            .and_then(|t| t.lines().next())
            .filter(|line| !line.is_empty())
            .map(str::to_owned)
            .unwrap_or_else(|| {
                format!("Chat {}", &self.tab_id[..self.tab_id.len().min(8)])
            });
        let timestamp = normalize_timestamp(self.last_send_time.as_ref());
        Tab {
            id: self.tab_id,
            title,
            timestamp,
            bubbles: self.bubbles,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ComposerIndex {
    #[serde(rename = "allComposers", default)]
    all_composers: Vec<ComposerStub>,
}

#[derive(Debug, Deserialize)]
struct ComposerStub {
    #[serde(rename = "composerId")]
    composer_id: String,
}

/// Pointer to a bubble stored separately from its composer record.
#[derive(Debug, Deserialize)]
struct BubbleHeader {
    #[serde(rename = "bubbleId")]
    bubble_id: String,
}

/// A composer body as fetched from `composerData:{id}` in the global store.
#[derive(Debug, Deserialize)]
struct RawComposerBody {
    #[serde(default)]
    conversation: Option<Value>,
    #[serde(rename = "fullConversationHeadersOnly", default)]
    full_conversation_headers_only: Option<Value>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

/// The two historical layouts of a composer body: conversation inlined in
/// full, or a header list to resolve bubble by bubble.
enum ConversationSource {
    Inline(Vec<Value>),
    Headers(Vec<BubbleHeader>),
    Empty,
}

impl RawComposerBody {
    fn classify(self) -> (ConversationSource, Map<String, Value>) {
        if let Some(Value::Array(messages)) = self.conversation
            && !messages.is_empty()
        {
            return (ConversationSource::Inline(messages), self.extra);
        }
        if let Some(Value::Array(headers)) = self.full_conversation_headers_only {
            let headers: Vec<BubbleHeader> = headers
                .into_iter()
                .filter_map(|h| serde_json::from_value(h).ok())
                .collect();
            if !headers.is_empty() {
                return (ConversationSource::Headers(headers), self.extra);
            }
        }
        (ConversationSource::Empty, self.extra)
    }
}

/// One bubble body as stored at `bubbleId:{composerId}:{bubbleId}`.
#[derive(Debug, Deserialize)]
struct RawBubble {
    #[serde(rename = "type")]
    kind: i64,
    #[serde(default)]
    text: Option<String>,
    #[serde(rename = "suggestedCodeBlocks", default)]
    suggested_code_blocks: Option<Vec<Value>>,
    #[serde(rename = "codeBlocks", default)]
    code_blocks: Option<Vec<Value>>,
}

impl RawBubble {
    /// Normalize a stored bubble. A bubble with an unknown role code is
    /// treated like a missing bubble and dropped.
    fn into_message(self) -> Option<Message> {
        Some(Message {
            role: Role::from_code(self.kind)?,
            text: self.text.unwrap_or_default(),
            code_blocks: self
                .suggested_code_blocks
                .or(self.code_blocks)
                .unwrap_or_default(),
        })
    }
}

// ── Timestamp and folder normalization ───────────────────────────────────────

/// Normalize a stored timestamp to an RFC 3339 UTC string with millisecond
/// precision. Absent, zero, or unparseable values fall back to the current
/// time; the output is always a valid timestamp.
pub fn normalize_timestamp(raw: Option<&Value>) -> String {
    parse_timestamp(raw)
        .unwrap_or_else(Utc::now)
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn parse_timestamp(raw: Option<&Value>) -> Option<DateTime<Utc>> {
    match raw? {
        Value::Number(n) => {
            let millis = n.as_i64().or_else(|| n.as_f64().map(|f| f as i64))?;
            if millis == 0 {
                return None;
            }
            Utc.timestamp_millis_opt(millis).single()
        }
        Value::String(s) if !s.is_empty() => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        _ => None,
    }
}

/// Strip the `file://` scheme from a workspace folder reference. Cursor
/// records folders as file URIs; percent-encoded paths are decoded when the
/// reference parses as a proper file URL.
pub fn normalize_folder(folder: &str) -> String {
    if let Ok(url) = Url::parse(folder)
        && url.scheme() == "file"
        && let Ok(path) = url.to_file_path()
    {
        return path.to_string_lossy().into_owned();
    }
    folder.strip_prefix("file://").unwrap_or(folder).to_string()
}

/// Base name of a workspace folder reference, after normalization.
pub fn folder_basename(folder: &str) -> String {
    let normalized = normalize_folder(folder);
    match Path::new(&normalized).file_name() {
        Some(name) => name.to_string_lossy().into_owned(),
        None => String::new(),
    }
}

// ── Heuristic workspace attribution ──────────────────────────────────────────

/// Fuzzy attribution of a global-store row to a workspace: case-insensitive
/// substring match of the row's serialized JSON against the workspace id,
/// the normalized folder path, or the folder's base name. Trades precision
/// for recall; only the heuristic scan uses it, never the structured join.
struct WorkspaceMatcher {
    tokens: Vec<String>,
}

impl WorkspaceMatcher {
    fn new(workspace_id: &str, folder: Option<&str>) -> Self {
        let mut tokens = vec![workspace_id.to_lowercase()];
        if let Some(folder) = folder {
            tokens.push(normalize_folder(folder).to_lowercase());
            tokens.push(folder_basename(folder).to_lowercase());
        }
        tokens.retain(|t| !t.is_empty());
        WorkspaceMatcher { tokens }
    }

    fn matches(&self, serialized: &str) -> bool {
        let haystack = serialized.to_lowercase();
        self.tokens.iter().any(|t| haystack.contains(t))
    }
}

// ── Reconciliation ───────────────────────────────────────────────────────────

/// Number of legacy chat tabs in a serialized chat-data payload. The
/// enumerator uses this to count chats without keeping conversation bodies.
pub fn chat_tab_count(workspace_id: &str, raw: &str) -> usize {
    store::parse_json::<RawChatData>(&format!("chat data for workspace {workspace_id}"), raw)
        .map(|chat| chat.tabs.len())
        .unwrap_or(0)
}

/// Reconcile every known representation of a workspace's conversations into
/// one [`WorkspaceDetail`]. Four passes, strictly in order: legacy tabs,
/// the structured composer index, a heuristic scan of the global store, and
/// a dedup merge where structured entries win on id collision.
pub fn workspace_detail(
    storage_root: &Path,
    workspace_id: &str,
    folder: Option<&str>,
) -> Result<WorkspaceDetail> {
    let db_path = store::workspace_store_path(storage_root, workspace_id);
    let (chat_raw, index_raw) = {
        let conn = store::open_readonly(&db_path)?;
        let chat = store::read_item(&conn, CHAT_DATA_KEY)?;
        let index = store::read_item(&conn, COMPOSER_INDEX_KEY)?;
        (chat, index)
    };

    let mut detail = WorkspaceDetail::empty();

    // Neither key present: the workspace is presumed to have no AI history.
    if chat_raw.is_none() && index_raw.is_none() {
        return Ok(detail);
    }

    // Pass 1: legacy tabs.
    if let Some(raw) = chat_raw.as_deref()
        && let Some(chat) = store::parse_json::<RawChatData>(
            &format!("chat data for workspace {workspace_id}"),
            raw,
        )
    {
        detail.tabs = chat.tabs.into_iter().map(RawTab::into_tab).collect();
    }

    let global_path = store::global_store_path(storage_root);

    // Pass 2: resolve the workspace's composer index against the global store.
    let mut composers = Vec::new();
    if let Some(raw) = index_raw.as_deref()
        && let Some(index) = store::parse_json::<ComposerIndex>(
            &format!("composer index for workspace {workspace_id}"),
            raw,
        )
        && !index.all_composers.is_empty()
    {
        match store::open_readonly(&global_path) {
            Ok(global) => {
                composers = resolve_indexed_composers(&global, workspace_id, &index);
            }
            Err(err) => eprintln!(
                "Warning: global store unavailable for workspace {workspace_id}: {err:#}"
            ),
        }
    }

    // Pass 3: heuristic scan, isolated so its failure or false positives
    // cannot disturb the structured results above.
    let matcher = WorkspaceMatcher::new(workspace_id, folder);
    let (extra_composers, agents) = match scan_global(&global_path, &matcher) {
        Ok(found) => found,
        Err(err) => {
            eprintln!("Warning: global store scan failed for workspace {workspace_id}: {err:#}");
            (Vec::new(), Vec::new())
        }
    };

    // Pass 4: merge by composer id, first seen wins.
    let mut seen: HashSet<String> = HashSet::new();
    for composer in composers.into_iter().chain(extra_composers) {
        if seen.insert(composer.composer_id.clone()) {
            detail.composers.all_composers.push(composer);
        }
    }
    if !agents.is_empty() {
        detail.agents = Some(agents);
    }

    Ok(detail)
}

fn resolve_indexed_composers(
    global: &Connection,
    workspace_id: &str,
    index: &ComposerIndex,
) -> Vec<ComposerRecord> {
    let mut records = Vec::new();
    for stub in &index.all_composers {
        let key = format!("composerData:{}", stub.composer_id);
        let raw = match store::read_kv(global, &key) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("Warning: lookup failed for {key} (workspace {workspace_id}): {err:#}");
                continue;
            }
        };
        let Some(body) =
            store::parse_json::<RawComposerBody>(&format!("composer record {key}"), &raw)
        else {
            continue;
        };

        let (source, mut extra) = body.classify();
        // The id always comes from the store key, as does the resolved
        // conversation; drop the body's own copies so they are not emitted
        // twice through the passthrough map.
        extra.remove("composerId");
        let conversation = match source {
            ConversationSource::Inline(messages) => messages,
            ConversationSource::Headers(headers) => {
                resolve_bubbles(global, &stub.composer_id, &headers)
            }
            ConversationSource::Empty => Vec::new(),
        };
        records.push(ComposerRecord {
            composer_id: stub.composer_id.clone(),
            conversation,
            extra,
        });
    }
    records
}

/// Resolve a header list bubble by bubble. Missing or malformed bubbles
/// leave a gap; a partial conversation is acceptable.
fn resolve_bubbles(
    global: &Connection,
    composer_id: &str,
    headers: &[BubbleHeader],
) -> Vec<Value> {
    let mut messages = Vec::new();
    for header in headers {
        let key = format!("bubbleId:{composer_id}:{}", header.bubble_id);
        let raw = match store::read_kv(global, &key) {
            Ok(Some(raw)) => raw,
            Ok(None) => continue,
            Err(err) => {
                eprintln!("Warning: lookup failed for {key}: {err:#}");
                continue;
            }
        };
        let Some(message) = serde_json::from_str::<RawBubble>(&raw)
            .ok()
            .and_then(RawBubble::into_message)
        else {
            continue;
        };
        if let Ok(value) = serde_json::to_value(&message) {
            messages.push(value);
        }
    }
    messages
}

fn scan_global(
    global_path: &Path,
    matcher: &WorkspaceMatcher,
) -> Result<(Vec<ComposerRecord>, Vec<AgentConversation>)> {
    let conn = store::open_readonly(global_path)?;
    let rows = store::scan_kv(&conn)?;

    let mut composers = Vec::new();
    let mut agents = Vec::new();
    for (key, value) in rows {
        // The scan is noisy by nature; rows that are not JSON objects are
        // simply not candidates.
        let Ok(Value::Object(mut data)) = serde_json::from_str::<Value>(&value) else {
            continue;
        };
        if !looks_like_conversation(&data) || !matcher.matches(&value) {
            continue;
        }

        if let Some(id) = key.strip_prefix("composerData:") {
            let conversation = match data.remove("conversation") {
                Some(Value::Array(messages)) => messages,
                _ => Vec::new(),
            };
            data.remove("composerId");
            composers.push(ComposerRecord {
                composer_id: id.to_string(),
                conversation,
                extra: data,
            });
        } else if key.to_lowercase().contains("agent") {
            data.remove("agentKey");
            agents.push(AgentConversation {
                agent_key: key,
                extra: data,
            });
        }
    }
    Ok((composers, agents))
}

fn looks_like_conversation(data: &Map<String, Value>) -> bool {
    ["conversation", "messages"].iter().any(|field| {
        data.get(*field)
            .and_then(Value::as_array)
            .is_some_and(|a| !a.is_empty())
    })
}
