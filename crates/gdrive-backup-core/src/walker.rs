//! Depth-first mirror of a remote subtree onto local disk.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::error::BackupError;
use crate::item::{ItemQuery, RemoteItem};
use crate::naming::{ensure_unique_path, sanitize};
use crate::remote::RemoteStore;
use crate::transfer::{TransferExecutor, TransferOutcome, TransferReport};

/// Counters accumulated over a walk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalkStats {
    pub succeeded: u64,
    pub partial: u64,
    pub failed: u64,
    pub skipped: u64,
    pub folders: u64,
    pub bytes: u64,
}

impl WalkStats {
    fn record(&mut self, report: &TransferReport) {
        self.bytes += report.bytes;
        match report.outcome {
            TransferOutcome::Success => self.succeeded += 1,
            TransferOutcome::PartialFailure => self.partial += 1,
            TransferOutcome::HardFailure => self.failed += 1,
            TransferOutcome::Skipped => self.skipped += 1,
        }
    }
}

/// Pending work on the explicit traversal stack.
enum Frame {
    /// Items already listed, to be mirrored into `dir`.
    Level { items: Vec<RemoteItem>, dir: PathBuf },
    /// A folder whose directory has not been created nor its children listed.
    Folder { item: RemoteItem, parent: PathBuf },
}

/// Walks a remote tree, creating directories and transferring files.
///
/// Files of one level are transferred before that level's folders are entered,
/// and each folder's subtree is finished before its next sibling starts.
pub struct TreeWalker<S: ?Sized> {
    store: Arc<S>,
    executor: TransferExecutor<S>,
    graceful: bool,
    concurrency: usize,
    cancel: CancellationToken,
}

impl<S: RemoteStore + ?Sized> TreeWalker<S> {
    /// # Arguments
    /// * `graceful` - abort on the first failed transfer instead of recording it
    /// * `concurrency` - maximum sibling files transferred at once
    pub fn new(
        store: Arc<S>,
        executor: TransferExecutor<S>,
        graceful: bool,
        concurrency: usize,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            store,
            executor,
            graceful,
            concurrency: concurrency.max(1),
            cancel,
        }
    }

    /// Mirror `items` (and everything below them) into `local_dir`.
    pub async fn walk(
        &self,
        items: Vec<RemoteItem>,
        local_dir: &Path,
    ) -> Result<WalkStats, BackupError> {
        let mut stats = WalkStats::default();
        let mut stack = vec![Frame::Level {
            items,
            dir: local_dir.to_path_buf(),
        }];

        while let Some(frame) = stack.pop() {
            if self.cancel.is_cancelled() {
                return Err(BackupError::Cancelled);
            }

            match frame {
                Frame::Level { items, dir } => {
                    let (folders, files): (Vec<_>, Vec<_>) =
                        items.into_iter().partition(RemoteItem::is_folder);

                    self.transfer_files(&files, &dir, &mut stats).await?;

                    // Reversed so the first folder is popped first
                    stack.extend(folders.into_iter().rev().map(|item| Frame::Folder {
                        item,
                        parent: dir.clone(),
                    }));
                }
                Frame::Folder { item, parent } => {
                    let dir = ensure_unique_path(&parent, &sanitize(&item.name)).await?;
                    stats.folders += 1;
                    info!("Created directory {}", dir.display());

                    let children = self.list_children(&item).await?;
                    debug!("{} has {} item(s)", dir.display(), children.len());
                    stack.push(Frame::Level {
                        items: children,
                        dir,
                    });
                }
            }
        }

        Ok(stats)
    }

    async fn list_children(&self, folder: &RemoteItem) -> Result<Vec<RemoteItem>, BackupError> {
        let query = ItemQuery::ChildrenOf(folder.id.clone());
        let listed = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(BackupError::Cancelled),
            listed = self.store.list(&query) => listed,
        };

        listed.map_err(|source| {
            error!("Error listing folder '{}': {}", folder.name, source);
            BackupError::RemoteQuery {
                context: format!("{} ('{}')", query, folder.name),
                source,
            }
        })
    }

    /// Transfer one folder's files, `concurrency` at a time.
    ///
    /// When the level has to stop early, the remaining transfers are
    /// cancelled and drained so each one marks its own file `.incomplete`.
    async fn transfer_files(
        &self,
        files: &[RemoteItem],
        dir: &Path,
        stats: &mut WalkStats,
    ) -> Result<(), BackupError> {
        let abort = self.cancel.child_token();
        let mut transfers = futures::stream::iter(files)
            .map(|item| self.executor.transfer_until(item, dir, &abort))
            .buffer_unordered(self.concurrency);

        let mut failure = None;
        while let Some(result) = transfers.next().await {
            let report = match result {
                Ok(report) => report,
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };
            stats.record(&report);

            if self.graceful && report.outcome.is_failure() {
                error!(
                    "Graceful backup aborted: {} ended in {}",
                    report.path.display(),
                    report.outcome.as_str()
                );
                failure = Some(BackupError::TransferFailed {
                    path: report.path,
                    outcome: report.outcome.as_str(),
                });
                break;
            }
        }

        let Some(failure) = failure else {
            return Ok(());
        };

        abort.cancel();
        while let Some(result) = transfers.next().await {
            if let Ok(report) = result {
                stats.record(&report);
            }
        }
        Err(failure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversion::DocConversion;
    use crate::memory::{Fault, MemoryStore};
    use crate::retry::RetryPolicy;
    use tempfile::TempDir;

    fn walker(store: Arc<MemoryStore>, graceful: bool, concurrency: usize) -> TreeWalker<MemoryStore> {
        let cancel = CancellationToken::new();
        let executor = TransferExecutor::new(
            store.clone(),
            DocConversion::Pdf,
            1024,
            RetryPolicy::immediate(5),
            cancel.clone(),
        );
        TreeWalker::new(store, executor, graceful, concurrency, cancel)
    }

    /// root -> [fileA, folderB -> [fileC]]
    fn sample_tree() -> (Arc<MemoryStore>, Vec<RemoteItem>) {
        let store = Arc::new(MemoryStore::new());
        store.add_folder(None, "root", "root");
        let file_a = store.add_file(Some("root"), "a", "fileA", b"alpha");
        let folder_b = store.add_folder(Some("root"), "b", "folderB");
        store.add_file(Some("b"), "c", "fileC", b"charlie");
        (store, vec![file_a, folder_b])
    }

    #[tokio::test]
    async fn test_mirrors_tree_layout() {
        let temp_dir = TempDir::new().unwrap();
        let (store, items) = sample_tree();

        let stats = walker(store, false, 4)
            .walk(items, temp_dir.path())
            .await
            .unwrap();

        let dest = temp_dir.path();
        assert_eq!(std::fs::read(dest.join("fileA")).unwrap(), b"alpha");
        assert!(dest.join("folderB").is_dir());
        assert_eq!(
            std::fs::read(dest.join("folderB").join("fileC")).unwrap(),
            b"charlie"
        );
        assert_eq!(stats.succeeded, 2);
        assert_eq!(stats.folders, 1);
        assert_eq!(stats.bytes, 12);
    }

    #[tokio::test]
    async fn test_non_graceful_continues_after_failure() {
        let temp_dir = TempDir::new().unwrap();
        let (store, items) = sample_tree();
        store.set_fault("a", Fault::Always);

        let stats = walker(store.clone(), false, 1)
            .walk(items, temp_dir.path())
            .await
            .unwrap();

        assert_eq!(stats.failed, 1);
        assert_eq!(stats.succeeded, 1);
        assert!(temp_dir.path().join("folderB").join("fileC").is_file());
        assert_eq!(store.fetch_count("c"), 1);
    }

    #[tokio::test]
    async fn test_graceful_aborts_on_first_failure() {
        let temp_dir = TempDir::new().unwrap();
        let (store, mut items) = sample_tree();
        let sibling = store.add_file(Some("root"), "a2", "fileA2", b"later");
        items.insert(1, sibling);
        store.set_fault("a", Fault::Always);

        let result = walker(store.clone(), true, 1)
            .walk(items, temp_dir.path())
            .await;

        match result {
            Err(BackupError::TransferFailed { outcome, .. }) => {
                assert_eq!(outcome, "hard failure")
            }
            other => panic!("expected TransferFailed, got {:?}", other),
        }
        assert_eq!(store.fetch_count("a2"), 0);
        assert_eq!(store.fetch_count("c"), 0);
        assert!(!temp_dir.path().join("folderB").exists());
    }

    #[tokio::test]
    async fn test_graceful_aborts_on_partial_failure() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let big = store.add_file(None, "big", "big.bin", &[1u8; 4096]);
        store.set_fault("big", Fault::FromOffset(1024));

        let result = walker(store, true, 1).walk(vec![big], temp_dir.path()).await;

        assert!(matches!(
            result,
            Err(BackupError::TransferFailed {
                outcome: "partial failure",
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_listing_failure_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let (store, items) = sample_tree();
        store.fail_listing("b");

        let result = walker(store, false, 4).walk(items, temp_dir.path()).await;

        assert!(matches!(result, Err(BackupError::RemoteQuery { .. })));
        // Files before the failing folder were already mirrored
        assert!(temp_dir.path().join("fileA").is_file());
    }

    #[tokio::test]
    async fn test_empty_folder_creates_directory() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let empty = store.add_folder(None, "e", "Empty");

        let stats = walker(store, false, 4)
            .walk(vec![empty], temp_dir.path())
            .await
            .unwrap();

        assert!(temp_dir.path().join("Empty").is_dir());
        assert_eq!(stats.folders, 1);
        assert_eq!(stats.succeeded, 0);
    }

    #[tokio::test]
    async fn test_duplicate_folder_names_get_distinct_directories() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let first = store.add_folder(None, "d1", "Docs?");
        let second = store.add_folder(None, "d2", "Docs*");
        store.add_file(Some("d1"), "x", "x.txt", b"one");
        store.add_file(Some("d2"), "y", "y.txt", b"two");

        let stats = walker(store, false, 4)
            .walk(vec![first, second], temp_dir.path())
            .await
            .unwrap();

        assert_eq!(stats.folders, 2);
        let mut dirs: Vec<_> = std::fs::read_dir(temp_dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect();
        dirs.sort();
        assert_eq!(dirs.len(), 2);
        assert_eq!(dirs[0], "Docs-");
        assert!(dirs[1].starts_with("Docs-"));
        assert!(temp_dir.path().join("Docs-").join("x.txt").is_file());
    }

    #[tokio::test]
    async fn test_depth_first_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let one = store.add_folder(None, "1", "one");
        let two = store.add_folder(None, "2", "two");
        store.add_folder(Some("1"), "1a", "one-a");

        walker(store.clone(), false, 4)
            .walk(vec![one, two], temp_dir.path())
            .await
            .unwrap();

        let order: Vec<_> = store
            .listings()
            .into_iter()
            .map(|q| match q {
                ItemQuery::ChildrenOf(id) => id,
                ItemQuery::Named(name) => name,
            })
            .collect();
        assert_eq!(order, vec!["1", "1a", "2"]);
    }

    #[tokio::test]
    async fn test_deep_tree() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let top = store.add_folder(None, "0", "d");
        for depth in 1..200 {
            let parent = (depth - 1).to_string();
            store.add_folder(Some(&parent), &depth.to_string(), "d");
        }
        store.add_file(Some("199"), "leaf", "leaf.txt", b"deep");

        let stats = walker(store, false, 4)
            .walk(vec![top], temp_dir.path())
            .await
            .unwrap();

        assert_eq!(stats.folders, 200);
        assert_eq!(stats.succeeded, 1);
    }

    #[tokio::test]
    async fn test_cancelled_walk() {
        let temp_dir = TempDir::new().unwrap();
        let (store, items) = sample_tree();
        let w = walker(store.clone(), false, 4);
        w.cancel.cancel();

        let result = w.walk(items, temp_dir.path()).await;

        assert!(matches!(result, Err(BackupError::Cancelled)));
        assert!(store.listings().is_empty());
    }

    #[tokio::test]
    async fn test_graceful_abort_marks_in_flight_siblings() {
        let temp_dir = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let big = store.add_file(None, "big", "big.bin", &[3u8; 200_000]);
        let bad = store.add_file(None, "bad", "bad.bin", b"never");
        store.set_fault("bad", Fault::Always);

        let cancel = CancellationToken::new();
        let executor = TransferExecutor::new(
            store.clone(),
            DocConversion::Pdf,
            16,
            RetryPolicy::immediate(5),
            cancel.clone(),
        );
        let w = TreeWalker::new(store, executor, true, 4, cancel);

        let result = w.walk(vec![big, bad], temp_dir.path()).await;

        assert!(matches!(result, Err(BackupError::TransferFailed { .. })));
        assert!(temp_dir.path().join("bad.bin.incomplete").is_file());
        // The sibling is either complete or marked, never a short file under its real name
        let big_path = temp_dir.path().join("big.bin");
        if big_path.exists() {
            assert_eq!(std::fs::metadata(&big_path).unwrap().len(), 200_000);
        } else {
            assert!(temp_dir.path().join("big.bin.incomplete").is_file());
        }
    }
}
