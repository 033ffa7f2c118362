//! Collaborator traits for persistence, object storage and quota
//!
//! The relational store, file storage and quota counters live outside this
//! core; they are consumed through these seams. [`MemoryStore`] is the
//! bundled in-process implementation used by tests and demos.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::{PolychatError, Result};
use crate::messages::Role;

/// A conversation owned by a user, optionally bound to a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dialog {
    pub id: i64,
    pub user_id: i64,
    pub resource_id: Option<i64>,
}

/// One persisted chat turn
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRecord {
    pub id: i64,
    pub dialog_id: i64,
    pub role: Role,
    pub content: String,
}

/// One embedded page of a resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageRecord {
    pub resource_id: i64,
    /// 1-based position within the resource
    pub page_number: u32,
    pub content: String,
    pub token_count: u32,
    pub embedding: Vec<f32>,
}

/// Persistence collaborator
#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_dialog(&self, id: i64) -> Result<Option<Dialog>>;

    /// Most recent turns of a dialog, newest first
    async fn recent_chats(&self, dialog_id: i64, limit: usize) -> Result<Vec<ChatRecord>>;

    /// Append a turn, returning its id
    async fn append_chat(&self, dialog_id: i64, role: Role, content: &str) -> Result<i64>;

    /// Full text of a resource, for on-demand embedding
    async fn find_resource_text(&self, resource_id: i64) -> Result<Option<String>>;

    /// Embedded pages of a resource, in page order
    async fn find_resource_pages(&self, resource_id: i64) -> Result<Vec<PageRecord>>;

    async fn bulk_create_pages(&self, resource_id: i64, pages: &[PageRecord]) -> Result<()>;

    async fn delete_resource_pages(&self, resource_id: i64) -> Result<()>;
}

/// Object storage collaborator
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store a file and return its public URL
    async fn put_file(&self, name: &str, bytes: &[u8]) -> Result<String>;
}

/// Which quota bucket a consumption comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanceKind {
    Free,
    Paid,
}

/// A user's remaining chat/upload quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Chances {
    pub free: u32,
    pub paid: u32,
}

impl Chances {
    /// Bucket the next consumption comes from, free before paid
    #[must_use]
    pub fn pick(self) -> Option<ChanceKind> {
        if self.free > 0 {
            Some(ChanceKind::Free)
        } else if self.paid > 0 {
            Some(ChanceKind::Paid)
        } else {
            None
        }
    }
}

/// Quota collaborator
#[async_trait]
pub trait QuotaStore: Send + Sync {
    async fn chances(&self, user_id: i64) -> Result<Chances>;

    async fn debit(&self, user_id: i64, kind: ChanceKind) -> Result<()>;
}

#[derive(Default)]
struct MemoryInner {
    dialogs: HashMap<i64, Dialog>,
    chats: Vec<ChatRecord>,
    resource_texts: HashMap<i64, String>,
    pages: HashMap<i64, Vec<PageRecord>>,
    chances: HashMap<i64, Chances>,
}

/// In-process store implementing every collaborator trait
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
    next_id: AtomicI64,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryInner::default()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn insert_dialog(&self, dialog: Dialog) {
        self.inner.lock().dialogs.insert(dialog.id, dialog);
    }

    pub fn insert_resource_text(&self, resource_id: i64, text: impl Into<String>) {
        self.inner
            .lock()
            .resource_texts
            .insert(resource_id, text.into());
    }

    pub fn set_chances(&self, user_id: i64, chances: Chances) {
        self.inner.lock().chances.insert(user_id, chances);
    }

    fn next_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn find_dialog(&self, id: i64) -> Result<Option<Dialog>> {
        Ok(self.inner.lock().dialogs.get(&id).cloned())
    }

    async fn recent_chats(&self, dialog_id: i64, limit: usize) -> Result<Vec<ChatRecord>> {
        let inner = self.inner.lock();
        Ok(inner
            .chats
            .iter()
            .rev()
            .filter(|c| c.dialog_id == dialog_id)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn append_chat(&self, dialog_id: i64, role: Role, content: &str) -> Result<i64> {
        let id = self.next_id();
        self.inner.lock().chats.push(ChatRecord {
            id,
            dialog_id,
            role,
            content: content.to_string(),
        });
        Ok(id)
    }

    async fn find_resource_text(&self, resource_id: i64) -> Result<Option<String>> {
        Ok(self.inner.lock().resource_texts.get(&resource_id).cloned())
    }

    async fn find_resource_pages(&self, resource_id: i64) -> Result<Vec<PageRecord>> {
        Ok(self
            .inner
            .lock()
            .pages
            .get(&resource_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn bulk_create_pages(&self, resource_id: i64, pages: &[PageRecord]) -> Result<()> {
        self.inner
            .lock()
            .pages
            .entry(resource_id)
            .or_default()
            .extend_from_slice(pages);
        Ok(())
    }

    async fn delete_resource_pages(&self, resource_id: i64) -> Result<()> {
        self.inner.lock().pages.remove(&resource_id);
        Ok(())
    }
}

#[async_trait]
impl QuotaStore for MemoryStore {
    async fn chances(&self, user_id: i64) -> Result<Chances> {
        Ok(self
            .inner
            .lock()
            .chances
            .get(&user_id)
            .copied()
            .unwrap_or_default())
    }

    async fn debit(&self, user_id: i64, kind: ChanceKind) -> Result<()> {
        let mut inner = self.inner.lock();
        let chances = inner.chances.entry(user_id).or_default();
        let bucket = match kind {
            ChanceKind::Free => &mut chances.free,
            ChanceKind::Paid => &mut chances.paid,
        };
        *bucket = bucket
            .checked_sub(1)
            .ok_or_else(|| PolychatError::QuotaExhausted(format!("user {user_id}")))?;
        Ok(())
    }
}

#[async_trait]
impl ObjectStorage for MemoryStore {
    async fn put_file(&self, name: &str, _bytes: &[u8]) -> Result<String> {
        Ok(format!("memory://{name}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_prefers_free() {
        assert_eq!(Chances { free: 1, paid: 5 }.pick(), Some(ChanceKind::Free));
        assert_eq!(Chances { free: 0, paid: 5 }.pick(), Some(ChanceKind::Paid));
        assert_eq!(Chances { free: 0, paid: 0 }.pick(), None);
    }

    #[tokio::test]
    async fn test_recent_chats_newest_first_with_limit() {
        let store = MemoryStore::new();
        for i in 0..5 {
            store
                .append_chat(1, Role::User, &format!("m{i}"))
                .await
                .unwrap();
        }

        let recent = store.recent_chats(1, 3).await.unwrap();
        let contents: Vec<_> = recent.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["m4", "m3", "m2"]);
    }

    #[tokio::test]
    async fn test_debit_at_zero_fails() {
        let store = MemoryStore::new();
        store.set_chances(1, Chances { free: 0, paid: 0 });
        assert!(store.debit(1, ChanceKind::Free).await.is_err());
    }
}
