//! One backup run: validation, traversal, and optional archiving.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::archive::{archive, ArchiveFormat};
use crate::conversion::DocConversion;
use crate::error::BackupError;
use crate::remote::RemoteStore;
use crate::resolve::SourceResolver;
use crate::retry::RetryPolicy;
use crate::transfer::TransferExecutor;
use crate::walker::{TreeWalker, WalkStats};

/// Default chunk size for content downloads (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Settings for one backup run.
#[derive(Debug, Clone)]
pub struct BackupOptions {
    /// Name of the remote item(s) to back up
    pub source: Option<String>,
    /// Absolute local path; must not exist yet
    pub destination: PathBuf,
    /// Abort on the first failed transfer
    pub graceful: bool,
    pub conversion: DocConversion,
    pub compression: Option<ArchiveFormat>,
    pub chunk_size: u64,
    pub retry: RetryPolicy,
    /// Maximum sibling files transferred at once
    pub transfer_concurrency: usize,
}

impl BackupOptions {
    pub fn new(source: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            source: Some(source.into()),
            destination: destination.into(),
            graceful: false,
            conversion: DocConversion::default(),
            compression: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry: RetryPolicy::default(),
            transfer_concurrency: 4,
        }
    }

    /// Check the source and destination before anything touches the network
    /// or the filesystem. Returns the source name.
    pub fn validate(&self) -> Result<&str, BackupError> {
        let source = SourceResolver::<dyn RemoteStore>::validate(self.source.as_deref())?;
        check_destination(&self.destination)?;
        Ok(source)
    }
}

/// Outcome of a completed run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupSummary {
    pub destination: PathBuf,
    pub stats: WalkStats,
    pub archive: Option<PathBuf>,
}

impl BackupSummary {
    /// True when every attempted transfer succeeded.
    pub fn is_clean(&self) -> bool {
        self.stats.partial == 0 && self.stats.failed == 0
    }
}

impl fmt::Display for BackupSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = &self.stats;
        write!(
            f,
            "{} downloaded, {} partial, {} failed, {} skipped, {} folders, {} bytes",
            s.succeeded, s.partial, s.failed, s.skipped, s.folders, s.bytes
        )?;
        if let Some(archive) = &self.archive {
            write!(f, ", archived to {}", archive.display())?;
        }
        Ok(())
    }
}

/// A single backup invocation against a remote store.
pub struct BackupSession<S: ?Sized> {
    store: Arc<S>,
    options: BackupOptions,
    cancel: CancellationToken,
}

impl<S: RemoteStore + ?Sized> BackupSession<S> {
    pub fn new(store: Arc<S>, options: BackupOptions, cancel: CancellationToken) -> Self {
        Self {
            store,
            options,
            cancel,
        }
    }

    /// Run the backup to completion.
    ///
    /// Non-graceful runs return `Ok` even when some transfers failed; check
    /// `BackupSummary::is_clean`.
    #[instrument(skip(self), fields(source = ?self.options.source, destination = %self.options.destination.display()))]
    pub async fn run(&self) -> Result<BackupSummary, BackupError> {
        let source = self.options.validate()?;

        let resolver = SourceResolver::new(self.store.clone());
        let sources = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BackupError::Cancelled),
            sources = resolver.resolve(Some(source)) => sources?,
        };

        let root = &self.options.destination;
        tokio::fs::create_dir(root)
            .await
            .map_err(|e| BackupError::io(root, e))?;
        info!("Created backup directory at {}", root.display());

        let executor = TransferExecutor::new(
            self.store.clone(),
            self.options.conversion,
            self.options.chunk_size,
            self.options.retry,
            self.cancel.clone(),
        );
        let walker = TreeWalker::new(
            self.store.clone(),
            executor,
            self.options.graceful,
            self.options.transfer_concurrency,
            self.cancel.clone(),
        );
        let stats = walker.walk(sources, root).await?;

        let archive = match self.options.compression {
            Some(format) => Some(archive_blocking(format, root.clone()).await?),
            None => None,
        };

        let summary = BackupSummary {
            destination: root.clone(),
            stats,
            archive,
        };
        if summary.is_clean() {
            info!("Backup complete: {}", summary);
        } else {
            warn!("Backup complete with failures: {}", summary);
        }
        Ok(summary)
    }
}

/// The destination must be absolute and must not exist yet.
fn check_destination(destination: &Path) -> Result<(), BackupError> {
    if !destination.is_absolute() {
        return Err(BackupError::DestinationConflict {
            path: destination.to_path_buf(),
            reason: "is not an absolute path".to_string(),
        });
    }
    if destination.exists() {
        return Err(BackupError::DestinationConflict {
            path: destination.to_path_buf(),
            reason: "already exists; in place backups are not supported".to_string(),
        });
    }
    Ok(())
}

async fn archive_blocking(format: ArchiveFormat, root: PathBuf) -> Result<PathBuf, BackupError> {
    tokio::task::spawn_blocking(move || archive(format, &root))
        .await
        .map_err(|e| BackupError::Archive(format!("archive task failed: {}", e)))?
}
