//! Single-file transfer: chunked download with per-chunk retry.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::conversion::{export_format, DocConversion};
use crate::error::{BackupError, RemoteError};
use crate::item::RemoteItem;
use crate::naming::{create_unique_file, sanitize};
use crate::remote::{ByteRange, Chunk, RemoteStore};
use crate::retry::{with_retry, RetryPolicy};

/// Suffix appended to files whose download did not complete.
const INCOMPLETE_SUFFIX: &str = ".incomplete";

/// Result of transferring one leaf item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    /// Some content was written before retries ran out; the file is truncated.
    PartialFailure,
    /// Nothing was written.
    HardFailure,
    /// Native type with no export format; no file was created.
    Skipped,
}

impl TransferOutcome {
    pub fn is_failure(self) -> bool {
        matches!(self, Self::PartialFailure | Self::HardFailure)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::PartialFailure => "partial failure",
            Self::HardFailure => "hard failure",
            Self::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferReport {
    pub outcome: TransferOutcome,
    /// Final local path (renamed with `.incomplete` on failure).
    pub path: PathBuf,
    pub bytes: u64,
}

/// Downloads (or exports) a single remote file into a local directory.
pub struct TransferExecutor<S: ?Sized> {
    store: Arc<S>,
    conversion: DocConversion,
    chunk_size: u64,
    retry: RetryPolicy,
    cancel: CancellationToken,
}

impl<S: RemoteStore + ?Sized> TransferExecutor<S> {
    pub fn new(
        store: Arc<S>,
        conversion: DocConversion,
        chunk_size: u64,
        retry: RetryPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            conversion,
            chunk_size: chunk_size.max(1),
            retry,
            cancel,
        }
    }

    /// Transfer `item` into `dest_dir`.
    ///
    /// Per-file failures are reported through the outcome; only cancellation is an error.
    pub async fn transfer(
        &self,
        item: &RemoteItem,
        dest_dir: &Path,
    ) -> Result<TransferReport, BackupError> {
        self.transfer_until(item, dest_dir, &self.cancel).await
    }

    /// Like `transfer`, but stops when `cancel` fires.
    ///
    /// A file interrupted after creation is renamed with the `.incomplete`
    /// suffix before `Cancelled` is returned.
    pub async fn transfer_until(
        &self,
        item: &RemoteItem,
        dest_dir: &Path,
        cancel: &CancellationToken,
    ) -> Result<TransferReport, BackupError> {
        if cancel.is_cancelled() {
            return Err(BackupError::Cancelled);
        }

        let (file_name, export_mime_type) = if item.is_native_document() {
            match export_format(&item.mime_type, self.conversion) {
                Some(format) => (
                    format!("{}{}", item.name, format.extension),
                    Some(format.mime_type),
                ),
                None => {
                    warn!(
                        "Skipping '{}': {} cannot be exported",
                        item.name, item.mime_type
                    );
                    return Ok(TransferReport {
                        outcome: TransferOutcome::Skipped,
                        path: dest_dir.join(sanitize(&item.name)),
                        bytes: 0,
                    });
                }
            }
        } else {
            (item.name.clone(), None)
        };

        let file_name = sanitize(&file_name);
        let (mut file, path) = match create_unique_file(dest_dir, &file_name).await {
            Ok(created) => created,
            Err(e) => {
                error!("Failed to download file {}: {}", item.name, e);
                return Ok(TransferReport {
                    outcome: TransferOutcome::HardFailure,
                    path: dest_dir.join(file_name),
                    bytes: 0,
                });
            }
        };

        let what = format!("Chunk download of {}", path.display());
        let mut offset = 0u64;

        loop {
            if cancel.is_cancelled() {
                drop(file);
                self.mark_failed(path, offset).await;
                return Err(BackupError::Cancelled);
            }

            let range = ByteRange {
                offset,
                len: self.chunk_size,
            };
            let id = item.id.as_str();
            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                fetched = with_retry(&self.retry, &what, move || {
                    self.fetch_checked(id, export_mime_type, range)
                }) => Some(fetched),
            };

            let chunk = match fetched {
                Some(Ok(chunk)) => chunk,
                None => {
                    drop(file);
                    self.mark_failed(path, offset).await;
                    return Err(BackupError::Cancelled);
                }
                Some(Err(exhausted)) => {
                    error!(
                        "Failed to download file {}: {}",
                        path.display(),
                        exhausted
                    );
                    drop(file);
                    return Ok(self.mark_failed(path, offset).await);
                }
            };

            if let Err(e) = file.write_all(&chunk.data).await {
                error!("Failed to write file {}: {}", path.display(), e);
                drop(file);
                return Ok(self.mark_failed(path, offset).await);
            }

            let done = chunk.completes_at(offset);
            offset += chunk.data.len() as u64;

            match chunk.total_size {
                Some(total) if total > 0 => debug!(
                    "{}: {}/{} bytes ({}%)",
                    path.display(),
                    offset,
                    total,
                    offset * 100 / total
                ),
                _ => debug!("{}: {} bytes", path.display(), offset),
            }

            if done {
                break;
            }
        }

        if let Err(e) = file.flush().await {
            error!("Failed to flush file {}: {}", path.display(), e);
            drop(file);
            return Ok(self.mark_failed(path, offset).await);
        }

        info!("Downloaded {} ({} bytes)", path.display(), offset);
        Ok(TransferReport {
            outcome: TransferOutcome::Success,
            path,
            bytes: offset,
        })
    }

    /// Fetch one chunk, rejecting empty chunks that do not end the stream.
    async fn fetch_checked(
        &self,
        item_id: &str,
        export_mime_type: Option<&str>,
        range: ByteRange,
    ) -> Result<Chunk, RemoteError> {
        let chunk = self
            .store
            .fetch_chunk(item_id, export_mime_type, range)
            .await?;

        if chunk.data.is_empty() && !chunk.completes_at(range.offset) {
            return Err(RemoteError::Decode(format!(
                "empty chunk at offset {} before end of content",
                range.offset
            )));
        }
        Ok(chunk)
    }

    /// Rename a failed file so it is not mistaken for a complete copy.
    async fn mark_failed(&self, path: PathBuf, bytes: u64) -> TransferReport {
        let outcome = if bytes > 0 {
            error!("Partial download of file: {}", path.display());
            TransferOutcome::PartialFailure
        } else {
            TransferOutcome::HardFailure
        };

        let mut marked = path.clone().into_os_string();
        marked.push(INCOMPLETE_SUFFIX);
        let marked = PathBuf::from(marked);

        let path = match tokio::fs::rename(&path, &marked).await {
            Ok(()) => marked,
            Err(e) => {
                warn!("Failed to mark {} as incomplete: {}", path.display(), e);
                path
            }
        };

        TransferReport {
            outcome,
            path,
            bytes,
        }
    }
}
