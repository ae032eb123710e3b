//! In-memory `RemoteStore` used by the engine's tests.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::RemoteError;
use crate::item::{ItemQuery, RemoteItem, FOLDER_MIME_TYPE};
use crate::remote::{ByteRange, Chunk, DriveUser, RemoteStore};

/// How fetches of an item's content misbehave.
#[derive(Debug, Clone, Copy)]
pub enum Fault {
    /// The first `n` fetches fail, later ones succeed.
    FailTimes(u32),
    /// Every fetch fails.
    Always,
    /// Fetches starting at or past this offset fail.
    FromOffset(u64),
}

#[derive(Default)]
struct State {
    items: Vec<(Option<String>, RemoteItem)>,
    content: HashMap<String, Vec<u8>>,
    faults: HashMap<String, Fault>,
    failing_listings: Vec<String>,
    fetch_counts: HashMap<String, u32>,
    listings: Vec<ItemQuery>,
}

/// Remote tree held in memory. Items are added with an optional parent ID.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_folder(&self, parent: Option<&str>, id: &str, name: &str) -> RemoteItem {
        self.add_item(parent, RemoteItem::new(id, name, FOLDER_MIME_TYPE))
    }

    pub fn add_file(&self, parent: Option<&str>, id: &str, name: &str, data: &[u8]) -> RemoteItem {
        self.add_typed_file(parent, id, name, "application/octet-stream", data)
    }

    pub fn add_typed_file(
        &self,
        parent: Option<&str>,
        id: &str,
        name: &str,
        mime_type: &str,
        data: &[u8],
    ) -> RemoteItem {
        let item = self.add_item(parent, RemoteItem::new(id, name, mime_type));
        self.state
            .lock()
            .unwrap()
            .content
            .insert(id.to_string(), data.to_vec());
        item
    }

    fn add_item(&self, parent: Option<&str>, item: RemoteItem) -> RemoteItem {
        self.state
            .lock()
            .unwrap()
            .items
            .push((parent.map(str::to_string), item.clone()));
        item
    }

    pub fn set_fault(&self, id: &str, fault: Fault) {
        self.state
            .lock()
            .unwrap()
            .faults
            .insert(id.to_string(), fault);
    }

    pub fn fail_listing(&self, folder_id: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_listings
            .push(folder_id.to_string());
    }

    /// Number of content fetches issued for an item.
    pub fn fetch_count(&self, id: &str) -> u32 {
        self.state
            .lock()
            .unwrap()
            .fetch_counts
            .get(id)
            .copied()
            .unwrap_or(0)
    }

    pub fn listings(&self) -> Vec<ItemQuery> {
        self.state.lock().unwrap().listings.clone()
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn list(&self, query: &ItemQuery) -> Result<Vec<RemoteItem>, RemoteError> {
        let mut state = self.state.lock().unwrap();
        state.listings.push(query.clone());

        if let ItemQuery::ChildrenOf(id) = query {
            if state.failing_listings.contains(id) {
                return Err(RemoteError::Http {
                    status: 500,
                    body: "backend error".to_string(),
                });
            }
        }

        Ok(state
            .items
            .iter()
            .filter(|(parent, item)| match query {
                ItemQuery::Named(name) => &item.name == name,
                ItemQuery::ChildrenOf(id) => parent.as_deref() == Some(id.as_str()),
            })
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn fetch_chunk(
        &self,
        item_id: &str,
        export_mime_type: Option<&str>,
        range: ByteRange,
    ) -> Result<Chunk, RemoteError> {
        let mut state = self.state.lock().unwrap();
        let count = {
            let entry = state.fetch_counts.entry(item_id.to_string()).or_insert(0);
            *entry += 1;
            *entry
        };

        let failing = match state.faults.get(item_id) {
            Some(Fault::FailTimes(n)) => count <= *n,
            Some(Fault::Always) => true,
            Some(Fault::FromOffset(offset)) => range.offset >= *offset,
            None => false,
        };
        if failing {
            return Err(RemoteError::Transport("connection reset".to_string()));
        }

        let content = state
            .content
            .get(item_id)
            .ok_or_else(|| RemoteError::Http {
                status: 404,
                body: format!("no content for {}", item_id),
            })?;

        // Exports are served whole, like the Drive export endpoint
        if export_mime_type.is_some() {
            return Ok(Chunk {
                data: content.clone(),
                total_size: None,
            });
        }

        let total = content.len() as u64;
        let start = range.offset.min(total) as usize;
        let end = (range.offset + range.len).min(total) as usize;
        Ok(Chunk {
            data: content[start..end].to_vec(),
            total_size: Some(total),
        })
    }

    async fn current_user(&self) -> Result<DriveUser, RemoteError> {
        Ok(DriveUser {
            display_name: "Test User".to_string(),
            email_address: "test@example.com".to_string(),
        })
    }
}
