//! Local naming: turns remote display names into safe, unique path segments.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::warn;

use crate::error::BackupError;

const RESERVED: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*'];
const PLACEHOLDER: char = '-';
const MAX_SUFFIX_ATTEMPTS: usize = 8;

/// Convert a remote display name into a path segment without reserved characters.
pub fn sanitize(raw: &str) -> String {
    let replaced: String = raw
        .chars()
        .map(|c| {
            if RESERVED.contains(&c) || c.is_control() {
                PLACEHOLDER
            } else {
                c
            }
        })
        .collect();

    let trimmed = replaced.trim();
    match trimmed.strip_suffix("..") {
        Some(stem) => format!("{}{}", stem, PLACEHOLDER),
        None => trimmed.to_string(),
    }
}

fn with_suffix(base: &Path, segment: &str) -> PathBuf {
    base.join(format!("{}{}", segment, uuid::Uuid::new_v4().simple()))
}

/// Create the directory `base/segment`, appending a random suffix if the name is taken.
///
/// The existence check is the `create_dir` call itself, so siblings racing for the
/// same name each end up with their own directory.
pub async fn ensure_unique_path(base: &Path, segment: &str) -> Result<PathBuf, BackupError> {
    let wanted = base.join(segment);
    let mut candidate = wanted.clone();

    for _ in 0..MAX_SUFFIX_ATTEMPTS {
        match fs::create_dir(&candidate).await {
            Ok(()) => {
                if candidate != wanted {
                    warn!(
                        "Found duplicate folders at the same node, {} was created as {}",
                        wanted.display(),
                        candidate.display()
                    );
                }
                return Ok(candidate);
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                candidate = with_suffix(base, segment);
            }
            Err(e) => return Err(BackupError::io(candidate, e)),
        }
    }

    Err(BackupError::io(
        wanted,
        std::io::Error::new(ErrorKind::AlreadyExists, "no free directory name"),
    ))
}

/// Exclusively create `dir/file_name`, appending a random suffix if the name is taken.
pub async fn create_unique_file(
    dir: &Path,
    file_name: &str,
) -> Result<(fs::File, PathBuf), BackupError> {
    let wanted = dir.join(file_name);
    let mut candidate = wanted.clone();

    for _ in 0..MAX_SUFFIX_ATTEMPTS {
        let opened = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
            .await;

        match opened {
            Ok(file) => {
                if candidate != wanted {
                    warn!(
                        "Found duplicate files at the same node, {} was created as {}",
                        wanted.display(),
                        candidate.display()
                    );
                }
                return Ok((file, candidate));
            }
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                candidate = with_suffix(dir, file_name);
            }
            Err(e) => return Err(BackupError::io(candidate, e)),
        }
    }

    Err(BackupError::io(
        wanted,
        std::io::Error::new(ErrorKind::AlreadyExists, "no free file name"),
    ))
}
