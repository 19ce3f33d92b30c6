//! Local archive of finished conversations.
//!
//! The archive is one JSON array under the `all_chat_history` key, newest
//! entry first. Saving is best-effort bookkeeping: conversations with fewer
//! than two messages and exact repeats of an archived one are not stored.

use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::Role;
use crate::session::{now_ms, Transcript};
use crate::store::KeyValueStore;

pub const ARCHIVE_KEY: &str = "all_chat_history";
pub const MAX_ENTRIES: usize = 50;
pub const TITLE_CHARS: usize = 30;
const UNTITLED: &str = "对话记录";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchivedMessage {
    #[serde(rename = "type")]
    pub role: Role,
    pub content: String,
    /// Milliseconds since the epoch, kept as a string.
    #[serde(deserialize_with = "string_or_number")]
    pub timestamp: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchivedChat {
    pub id: String,
    pub title: String,
    pub messages: Vec<ArchivedMessage>,
    #[serde(default)]
    pub created_at: u64,
}

impl ArchivedChat {
    fn same_conversation(&self, messages: &[ArchivedMessage]) -> bool {
        self.messages.len() == messages.len()
            && self
                .messages
                .iter()
                .zip(messages)
                .all(|(a, b)| a.role == b.role && a.content == b.content)
    }
}

fn string_or_number<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match serde_json::Value::deserialize(de)? {
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// First user message cut to [`TITLE_CHARS`] characters.
pub fn make_title(messages: &[ArchivedMessage]) -> String {
    let Some(first) = messages.iter().find(|m| m.role == Role::User) else {
        return UNTITLED.to_string();
    };
    let mut chars = first.content.chars();
    let head: String = chars.by_ref().take(TITLE_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

pub struct ChatArchive {
    store: Arc<dyn KeyValueStore>,
}

impl ChatArchive {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// All entries, newest first. Unreadable stored JSON reads as empty.
    pub fn load(&self) -> Result<Vec<ArchivedChat>> {
        let Some(raw) = self.store.get(ARCHIVE_KEY)? else {
            return Ok(Vec::new());
        };
        match serde_json::from_str::<Vec<ArchivedChat>>(&raw) {
            Ok(entries) => Ok(entries),
            Err(e) => {
                warn!(error = %e, "chat archive is corrupt, treating as empty");
                Ok(Vec::new())
            }
        }
    }

    fn write(&self, entries: &[ArchivedChat]) -> Result<()> {
        let json = serde_json::to_string(entries)?;
        self.store.set(ARCHIVE_KEY, &json)
    }

    /// Archive the answered part of a transcript. Returns the new entry id,
    /// or `None` when nothing was stored.
    pub fn save_transcript(&self, transcript: &Transcript) -> Result<Option<String>> {
        let messages = transcript
            .archivable()
            .into_iter()
            .map(|(role, content, ts)| ArchivedMessage {
                role,
                content,
                timestamp: ts.to_string(),
            })
            .collect();
        self.save(messages)
    }

    pub fn save(&self, messages: Vec<ArchivedMessage>) -> Result<Option<String>> {
        if messages.len() < 2 {
            debug!(count = messages.len(), "not archiving short conversation");
            return Ok(None);
        }
        let mut entries = self.load()?;
        if entries.iter().any(|e| e.same_conversation(&messages)) {
            debug!("conversation already archived");
            return Ok(None);
        }

        // Strictly increasing so ids stay unique across quick saves.
        let newest = entries.iter().map(|e| e.created_at).max().unwrap_or(0);
        let created_at = now_ms().max(newest + 1);
        let id = format!("chat_history_{created_at}");

        entries.insert(
            0,
            ArchivedChat {
                id: id.clone(),
                title: make_title(&messages),
                messages,
                created_at,
            },
        );
        entries.truncate(MAX_ENTRIES);
        self.write(&entries)?;
        debug!(%id, total = entries.len(), "conversation archived");
        Ok(Some(id))
    }

    pub fn get(&self, id: &str) -> Result<Option<ArchivedChat>> {
        Ok(self.load()?.into_iter().find(|e| e.id == id))
    }

    /// Returns false when no entry has that id.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let mut entries = self.load()?;
        let before = entries.len();
        entries.retain(|e| e.id != id);
        if entries.len() == before {
            return Ok(false);
        }
        self.write(&entries)?;
        Ok(true)
    }

    pub fn clear(&self) -> Result<()> {
        self.store.remove(ARCHIVE_KEY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn msg(role: Role, content: &str) -> ArchivedMessage {
        ArchivedMessage {
            role,
            content: content.to_string(),
            timestamp: "1700000000000".to_string(),
        }
    }

    fn archive() -> (Arc<MemoryStore>, ChatArchive) {
        let store = Arc::new(MemoryStore::new());
        (store.clone(), ChatArchive::new(store))
    }

    #[test]
    fn test_title_truncation() {
        let long = "a".repeat(31);
        assert_eq!(make_title(&[msg(Role::User, &long)]), format!("{}...", "a".repeat(30)));
        let exact = "b".repeat(30);
        assert_eq!(make_title(&[msg(Role::User, &exact)]), exact);
        assert_eq!(make_title(&[msg(Role::Assistant, "x")]), UNTITLED);
    }

    #[test]
    fn test_title_counts_characters_not_bytes() {
        let zh = "问".repeat(40);
        let title = make_title(&[msg(Role::User, &zh)]);
        assert_eq!(title.chars().count(), 33);
    }

    #[test]
    fn test_single_message_not_saved() {
        let (_, a) = archive();
        assert_eq!(a.save(vec![msg(Role::User, "hi")]).unwrap(), None);
        assert!(a.load().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_not_saved_and_newest_first() {
        let (_, a) = archive();
        let first = vec![msg(Role::User, "q1"), msg(Role::Assistant, "a1")];
        let second = vec![msg(Role::User, "q2"), msg(Role::Assistant, "a2")];
        assert!(a.save(first.clone()).unwrap().is_some());
        assert!(a.save(first).unwrap().is_none());
        assert!(a.save(second).unwrap().is_some());
        let entries = a.load().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].title, "q2");
        assert_ne!(entries[0].id, entries[1].id);
    }

    #[test]
    fn test_corrupt_archive_reads_empty() {
        let (store, a) = archive();
        store.set(ARCHIVE_KEY, "{not json").unwrap();
        assert!(a.load().unwrap().is_empty());
    }

    #[test]
    fn test_reads_numeric_timestamps() {
        let (store, a) = archive();
        store
            .set(
                ARCHIVE_KEY,
                r#"[{"id":"x","title":"t","messages":[{"type":"user","content":"c","timestamp":1700000000000}],"createdAt":1}]"#,
            )
            .unwrap();
        let entries = a.load().unwrap();
        assert_eq!(entries[0].messages[0].timestamp, "1700000000000");
    }

    #[test]
    fn test_delete_and_clear() {
        let (_, a) = archive();
        let id = a
            .save(vec![msg(Role::User, "q"), msg(Role::Assistant, "a")])
            .unwrap()
            .unwrap();
        assert!(a.get(&id).unwrap().is_some());
        assert!(!a.delete("missing").unwrap());
        assert!(a.delete(&id).unwrap());
        assert!(a.load().unwrap().is_empty());
        a.save(vec![msg(Role::User, "q"), msg(Role::Assistant, "a")]).unwrap();
        a.clear().unwrap();
        assert!(a.load().unwrap().is_empty());
    }
}
