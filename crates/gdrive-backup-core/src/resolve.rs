use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::error::BackupError;
use crate::item::{ItemQuery, RemoteItem};
use crate::remote::RemoteStore;

/// Resolves the requested backup source name into remote items.
pub struct SourceResolver<S: ?Sized> {
    store: Arc<S>,
}

impl<S: RemoteStore + ?Sized> SourceResolver<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Validate a source name without touching the remote store.
    pub fn validate(query: Option<&str>) -> Result<&str, BackupError> {
        match query.map(str::trim) {
            Some(q) if !q.is_empty() => Ok(q),
            _ => Err(BackupError::InvalidSource),
        }
    }

    /// Look up every non-trashed item named `query`.
    ///
    /// Duplicate names are legal remotely, so the result may hold several items
    /// (or none). Provider errors are not retried here.
    #[instrument(skip(self), level = "debug")]
    pub async fn resolve(&self, query: Option<&str>) -> Result<Vec<RemoteItem>, BackupError> {
        let name = Self::validate(query)?;
        let query = ItemQuery::Named(name.to_string());

        let items = self
            .store
            .list(&query)
            .await
            .map_err(|source| BackupError::RemoteQuery {
                context: query.to_string(),
                source,
            })?;

        if items.is_empty() {
            warn!("No items named '{}' were found", name);
        } else {
            info!("Found {} source item(s) named '{}'", items.len(), name);
        }

        Ok(items)
    }
}
