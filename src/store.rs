//! Workspace collection and its persistence.
//!
//! Conversations are grouped into workspaces: named, independently persisted
//! threads. The store keeps the full set in memory and writes it through an
//! injected key-value interface on every mutation, so it stays unit-testable
//! without a real storage backend.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

pub const WORKSPACES_KEY: &str = "workspaces";
pub const CURRENT_WORKSPACE_KEY: &str = "currentWorkspaceId";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Model,
}

/// One message exchange unit. Immutable once appended; ordering within a
/// workspace history is insertion-ordered and significant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Workspace {
    pub id: i64,
    pub name: String,
    pub history: Vec<Turn>,
}

/// Minimal key-value persistence seam. `remove` exists because clearing the
/// persisted current-id on last-workspace deletion needs it.
pub trait KvStore: Send {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&mut self, key: &str, value: &str);
    fn remove(&mut self, key: &str);
}

/// In-memory store, shared behind an `Arc` so tests can keep a handle and
/// inspect what was persisted.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    inner: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryKvStore {
    fn get(&self, key: &str) -> Option<String> {
        self.inner.lock().ok()?.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.insert(key.to_string(), value.to_string());
        }
    }

    fn remove(&mut self, key: &str) {
        if let Ok(mut map) = self.inner.lock() {
            map.remove(key);
        }
    }
}

/// One file per key under a storage directory. Write failures are logged and
/// swallowed: persistence problems must never abort a chat turn.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            error!(dir = %dir.display(), error = %e, "failed to create storage directory");
        }
        Self { dir }
    }
}

impl KvStore for FileKvStore {
    fn get(&self, key: &str) -> Option<String> {
        fs::read_to_string(self.dir.join(key)).ok()
    }

    fn set(&mut self, key: &str, value: &str) {
        if let Err(e) = fs::write(self.dir.join(key), value) {
            error!(key, error = %e, "failed to persist key");
        }
    }

    fn remove(&mut self, key: &str) {
        if let Err(e) = fs::remove_file(self.dir.join(key)) {
            if e.kind() != std::io::ErrorKind::NotFound {
                error!(key, error = %e, "failed to remove key");
            }
        }
    }
}

pub struct ConversationStore {
    kv: Box<dyn KvStore>,
    workspaces: Vec<Workspace>,
    current_id: Option<i64>,
}

impl ConversationStore {
    /// Rehydrates the store from the two persisted keys. A missing or corrupt
    /// blob is treated as an empty initial state, never a fatal error.
    pub fn new(kv: Box<dyn KvStore>) -> Self {
        let workspaces: Vec<Workspace> = match kv.get(WORKSPACES_KEY) {
            Some(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                warn!(error = %e, "persisted workspaces are corrupt; starting empty");
                Vec::new()
            }),
            None => Vec::new(),
        };

        let mut current_id = kv
            .get(CURRENT_WORKSPACE_KEY)
            .and_then(|raw| raw.trim().parse::<i64>().ok());

        // The current-id must reference an existing workspace.
        if let Some(id) = current_id {
            if !workspaces.iter().any(|w| w.id == id) {
                warn!(id, "persisted current workspace id is stale; clearing");
                current_id = None;
            }
        }

        Self {
            kv,
            workspaces,
            current_id,
        }
    }

    pub fn workspaces(&self) -> &[Workspace] {
        &self.workspaces
    }

    pub fn workspace(&self, id: i64) -> Option<&Workspace> {
        self.workspaces.iter().find(|w| w.id == id)
    }

    pub fn current_id(&self) -> Option<i64> {
        self.current_id
    }

    pub fn current(&self) -> Option<&Workspace> {
        self.current_id.and_then(|id| self.workspace(id))
    }

    /// Creates a fresh workspace, makes it current, and persists immediately.
    /// The name derives from `seed_title` (first two words, `...` suffix iff
    /// longer), falling back to `Workspace N`.
    pub fn create_workspace(&mut self, seed_title: Option<&str>) -> i64 {
        let id = self.next_id();
        let name = seed_title
            .map(truncate_title)
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| format!("Workspace {}", self.workspaces.len() + 1));

        debug!(id, %name, "creating workspace");
        self.workspaces.push(Workspace {
            id,
            name,
            history: Vec::new(),
        });
        self.current_id = Some(id);
        self.persist();
        id
    }

    /// Makes `id` the current workspace. Unknown ids are a silent no-op;
    /// callers are expected to only pass known ids.
    pub fn select_workspace(&mut self, id: i64) {
        if self.workspaces.iter().any(|w| w.id == id) {
            self.current_id = Some(id);
            self.persist_current();
        } else {
            debug!(id, "ignoring select of unknown workspace");
        }
    }

    /// Removes a workspace. If it was current, the first remaining workspace
    /// (in persisted order) becomes current, or the current pointer is
    /// cleared when none remain.
    pub fn delete_workspace(&mut self, id: i64) {
        self.workspaces.retain(|w| w.id != id);

        if self.current_id == Some(id) {
            self.current_id = self.workspaces.first().map(|w| w.id);
        }
        self.persist();
    }

    /// Appends a turn. On the workspace's first turn the display name is
    /// finalized from the turn content with the same two-word truncation
    /// rule; after that the name never changes.
    pub fn append_turn(&mut self, id: i64, turn: Turn) {
        let Some(workspace) = self.workspaces.iter_mut().find(|w| w.id == id) else {
            warn!(id, "ignoring append to unknown workspace");
            return;
        };

        if workspace.history.is_empty() {
            let name = truncate_title(&turn.content);
            if !name.is_empty() {
                workspace.name = name;
            }
        }
        workspace.history.push(turn);
        self.persist();
    }

    // Ids derive from the creation timestamp; the monotonic floor covers two
    // creations landing in the same millisecond.
    fn next_id(&self) -> i64 {
        let now = chrono::Utc::now().timestamp_millis();
        let floor = self.workspaces.iter().map(|w| w.id).max().unwrap_or(0) + 1;
        now.max(floor)
    }

    fn persist(&mut self) {
        match serde_json::to_string(&self.workspaces) {
            Ok(blob) => self.kv.set(WORKSPACES_KEY, &blob),
            Err(e) => error!(error = %e, "failed to serialize workspaces"),
        }
        self.persist_current();
    }

    fn persist_current(&mut self) {
        match self.current_id {
            Some(id) => self.kv.set(CURRENT_WORKSPACE_KEY, &id.to_string()),
            None => self.kv.remove(CURRENT_WORKSPACE_KEY),
        }
    }
}

/// First two words of `title`, with a `...` suffix iff it has more than two.
fn truncate_title(title: &str) -> String {
    let words: Vec<&str> = title.split_whitespace().collect();
    if words.len() > 2 {
        format!("{}...", words[..2].join(" "))
    } else {
        words.join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (ConversationStore, MemoryKvStore) {
        let kv = MemoryKvStore::new();
        (ConversationStore::new(Box::new(kv.clone())), kv)
    }

    fn user_turn(content: &str) -> Turn {
        Turn {
            role: Role::User,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_truncate_title() {
        assert_eq!(truncate_title("Best espresso machines 2024"), "Best espresso...");
        assert_eq!(truncate_title("two words"), "two words");
        assert_eq!(truncate_title("one"), "one");
        assert_eq!(truncate_title(""), "");
    }

    #[test]
    fn test_create_workspace_derives_name_from_seed() {
        let (mut store, _) = store();
        let id = store.create_workspace(Some("Best espresso machines 2024"));

        let workspace = store.workspace(id).unwrap();
        assert_eq!(workspace.name, "Best espresso...");
        assert!(workspace.history.is_empty());
        assert_eq!(store.current_id(), Some(id));
    }

    #[test]
    fn test_create_workspace_falls_back_to_counter_name() {
        let (mut store, _) = store();
        let first = store.create_workspace(None);
        let second = store.create_workspace(None);

        assert_eq!(store.workspace(first).unwrap().name, "Workspace 1");
        assert_eq!(store.workspace(second).unwrap().name, "Workspace 2");
        assert_ne!(first, second);
    }

    #[test]
    fn test_select_unknown_workspace_is_a_noop() {
        let (mut store, _) = store();
        let id = store.create_workspace(None);
        store.select_workspace(id + 42);

        assert_eq!(store.current_id(), Some(id));
    }

    #[test]
    fn test_delete_current_selects_first_remaining() {
        let (mut store, _) = store();
        let first = store.create_workspace(Some("first one"));
        let second = store.create_workspace(Some("second one"));
        assert_eq!(store.current_id(), Some(second));

        store.delete_workspace(second);
        assert_eq!(store.current_id(), Some(first));
    }

    #[test]
    fn test_delete_last_workspace_clears_current_key() {
        let (mut store, kv) = store();
        let id = store.create_workspace(None);
        assert!(kv.get(CURRENT_WORKSPACE_KEY).is_some());

        store.delete_workspace(id);
        assert_eq!(store.current_id(), None);
        assert!(kv.get(CURRENT_WORKSPACE_KEY).is_none());
    }

    #[test]
    fn test_delete_non_current_keeps_selection() {
        let (mut store, _) = store();
        let first = store.create_workspace(None);
        let second = store.create_workspace(None);
        store.select_workspace(first);

        store.delete_workspace(second);
        assert_eq!(store.current_id(), Some(first));
    }

    #[test]
    fn test_first_turn_finalizes_name() {
        let (mut store, _) = store();
        let id = store.create_workspace(None);
        assert_eq!(store.workspace(id).unwrap().name, "Workspace 1");

        store.append_turn(id, user_turn("how do solar panels work"));
        assert_eq!(store.workspace(id).unwrap().name, "how do...");

        // Fixed after the first turn.
        store.append_turn(id, user_turn("and what about wind turbines"));
        assert_eq!(store.workspace(id).unwrap().name, "how do...");
    }

    #[test]
    fn test_rehydrates_from_persisted_state() {
        let (mut store, kv) = store();
        let id = store.create_workspace(Some("persisted thread"));
        store.append_turn(id, user_turn("hello"));
        store.append_turn(
            id,
            Turn {
                role: Role::Model,
                content: "hi there".to_string(),
            },
        );

        let reloaded = ConversationStore::new(Box::new(kv));
        assert_eq!(reloaded.workspaces(), store.workspaces());
        assert_eq!(reloaded.current_id(), Some(id));
    }

    #[test]
    fn test_corrupt_blob_starts_empty() {
        let mut kv = MemoryKvStore::new();
        kv.set(WORKSPACES_KEY, "not json at all {{{");
        kv.set(CURRENT_WORKSPACE_KEY, "123");

        let store = ConversationStore::new(Box::new(kv));
        assert!(store.workspaces().is_empty());
        assert_eq!(store.current_id(), None);
    }

    #[test]
    fn test_stale_current_id_is_cleared() {
        let mut kv = MemoryKvStore::new();
        kv.set(WORKSPACES_KEY, "[]");
        kv.set(CURRENT_WORKSPACE_KEY, "999");

        let store = ConversationStore::new(Box::new(kv));
        assert_eq!(store.current_id(), None);
    }
}
