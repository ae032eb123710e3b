//! Core engine for gdrive-backup.
//!
//! This crate mirrors a remote folder tree onto local disk. It is provider
//! agnostic: everything remote goes through the `RemoteStore` trait.
//! - `SourceResolver`: turns the requested source name into remote items
//! - `TreeWalker`: depth-first traversal that creates folders and drives transfers
//! - `TransferExecutor`: chunked, retried download of a single file
//! - `BackupSession`: validation, traversal and optional archiving for one run

mod archive;
mod conversion;
mod error;
mod item;
mod naming;
mod remote;
mod resolve;
mod retry;
mod session;
mod transfer;
mod walker;

#[cfg(test)]
mod memory;

pub use archive::{archive, ArchiveFormat};
pub use conversion::{export_format, DocConversion, ExportFormat};
pub use error::{BackupError, RemoteError};
pub use item::{ItemKind, ItemQuery, RemoteItem, FOLDER_MIME_TYPE, NATIVE_MIME_PREFIX};
pub use naming::{create_unique_file, ensure_unique_path, sanitize};
pub use remote::{ByteRange, Chunk, DriveUser, RemoteStore};
pub use resolve::SourceResolver;
pub use retry::{with_retry, RetryExhausted, RetryPolicy};
pub use session::{BackupOptions, BackupSession, BackupSummary, DEFAULT_CHUNK_SIZE};
pub use transfer::{TransferExecutor, TransferOutcome, TransferReport};
pub use walker::{TreeWalker, WalkStats};
