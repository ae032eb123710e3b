use async_trait::async_trait;

use crate::error::RemoteError;
use crate::item::{ItemQuery, RemoteItem};

/// Byte window requested from a content stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub offset: u64,
    pub len: u64,
}

impl ByteRange {
    /// Inclusive index of the last byte, as used by HTTP `Range` headers.
    pub fn last_byte(&self) -> u64 {
        self.offset + self.len.saturating_sub(1)
    }
}

/// A piece of file content returned by the store.
#[derive(Debug, Clone, Default)]
pub struct Chunk {
    pub data: Vec<u8>,
    /// Full content length when the store served a partial range.
    /// `None` means the response carried the whole remaining content.
    pub total_size: Option<u64>,
}

impl Chunk {
    /// Whether the stream is complete once `data` has been written at `offset`.
    pub fn completes_at(&self, offset: u64) -> bool {
        match self.total_size {
            Some(total) => offset + self.data.len() as u64 >= total,
            None => true,
        }
    }
}

/// The authenticated account, shown once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveUser {
    pub display_name: String,
    pub email_address: String,
}

/// Remote storage abstraction consumed by the traversal engine.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// List all items matching the query (every page).
    async fn list(&self, query: &ItemQuery) -> Result<Vec<RemoteItem>, RemoteError>;

    /// Fetch a range of an item's content.
    ///
    /// # Arguments
    /// * `item_id` - Remote item ID
    /// * `export_mime_type` - Export target for native documents, `None` for raw media
    /// * `range` - Requested byte window
    async fn fetch_chunk(
        &self,
        item_id: &str,
        export_mime_type: Option<&str>,
        range: ByteRange,
    ) -> Result<Chunk, RemoteError>;

    /// The account the store is authorized as.
    async fn current_user(&self) -> Result<DriveUser, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_completion() {
        let chunk = Chunk {
            data: vec![0; 10],
            total_size: Some(25),
        };
        assert!(!chunk.completes_at(0));
        assert!(!chunk.completes_at(10));
        assert!(chunk.completes_at(15));

        let whole = Chunk {
            data: vec![0; 3],
            total_size: None,
        };
        assert!(whole.completes_at(0));
    }

    #[test]
    fn test_last_byte() {
        let range = ByteRange {
            offset: 1024,
            len: 1024,
        };
        assert_eq!(range.last_byte(), 2047);
    }
}
