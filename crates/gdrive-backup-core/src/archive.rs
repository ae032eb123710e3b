//! Post-backup compression of the destination tree.

use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::error::BackupError;

/// Supported archive formats. There is no bzip2 or xz variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    Tar,
    GzTar,
}

impl ArchiveFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ArchiveFormat::Zip => "zip",
            ArchiveFormat::Tar => "tar",
            ArchiveFormat::GzTar => "tar.gz",
        }
    }
}

/// Archive the contents of `source_dir` into `<source_dir>.<ext>`.
///
/// Entries are stored relative to `source_dir`. Fails if the archive file already exists.
/// A failed write removes the partial archive.
/// This is blocking I/O; async callers should run it on the blocking pool.
pub fn archive(format: ArchiveFormat, source_dir: &Path) -> Result<PathBuf, BackupError> {
    let mut target = source_dir.as_os_str().to_owned();
    target.push(".");
    target.push(format.extension());
    let target = PathBuf::from(target);

    let file = File::create_new(&target).map_err(|e| {
        BackupError::Archive(format!("cannot create {}: {}", target.display(), e))
    })?;

    let written = match format {
        ArchiveFormat::Tar => write_tar(file, source_dir).map(|_| ()),
        ArchiveFormat::GzTar => write_tar(GzEncoder::new(file, Compression::default()), source_dir)
            .and_then(|encoder| encoder.finish())
            .map(|_| ()),
        ArchiveFormat::Zip => write_zip(file, source_dir),
    };

    if let Err(e) = written {
        if let Err(cleanup) = std::fs::remove_file(&target) {
            warn!("Failed to remove partial archive {}: {}", target.display(), cleanup);
        }
        return Err(BackupError::Archive(format!(
            "failed writing {}: {}",
            target.display(),
            e
        )));
    }

    info!("Created archive {}", target.display());
    Ok(target)
}

fn write_tar<W: io::Write>(writer: W, source_dir: &Path) -> io::Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", source_dir)?;
    builder.into_inner()
}

fn write_zip(file: File, source_dir: &Path) -> io::Result<()> {
    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);
    let mut writer = zip::ZipWriter::new(file);

    for entry in WalkDir::new(source_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source_dir)
            .map_err(io::Error::other)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");

        if entry.file_type().is_dir() {
            writer
                .add_directory(format!("{}/", name), options)
                .map_err(io::Error::other)?;
        } else if entry.file_type().is_file() {
            writer.start_file(name.as_str(), options).map_err(io::Error::other)?;
            let mut source = File::open(entry.path())?;
            io::copy(&mut source, &mut writer)?;
        }
        debug!("Archived {}", name);
    }

    writer.finish().map_err(io::Error::other)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::io::Read;
    use tempfile::TempDir;

    fn sample_dir(root: &Path) -> PathBuf {
        let dir = root.join("backup");
        std::fs::create_dir_all(dir.join("folderB")).unwrap();
        std::fs::write(dir.join("fileA"), b"alpha").unwrap();
        std::fs::write(dir.join("folderB").join("fileC"), b"charlie").unwrap();
        dir
    }

    fn tar_files<R: Read>(reader: R) -> BTreeSet<String> {
        let mut archive = tar::Archive::new(reader);
        archive
            .entries()
            .unwrap()
            .map(|e| e.unwrap())
            .filter(|e| e.header().entry_type().is_file())
            .map(|e| {
                e.path()
                    .unwrap()
                    .to_string_lossy()
                    .trim_start_matches("./")
                    .to_string()
            })
            .collect()
    }

    fn expected() -> BTreeSet<String> {
        ["fileA", "folderB/fileC"]
            .into_iter()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_tar_archive() {
        let temp_dir = TempDir::new().unwrap();
        let dir = sample_dir(temp_dir.path());

        let path = archive(ArchiveFormat::Tar, &dir).unwrap();

        assert_eq!(path, temp_dir.path().join("backup.tar"));
        assert_eq!(tar_files(File::open(&path).unwrap()), expected());
    }

    #[test]
    fn test_gztar_archive() {
        let temp_dir = TempDir::new().unwrap();
        let dir = sample_dir(temp_dir.path());

        let path = archive(ArchiveFormat::GzTar, &dir).unwrap();

        assert_eq!(path, temp_dir.path().join("backup.tar.gz"));
        let decoder = flate2::read::GzDecoder::new(File::open(&path).unwrap());
        assert_eq!(tar_files(decoder), expected());
    }

    #[test]
    fn test_zip_archive() {
        let temp_dir = TempDir::new().unwrap();
        let dir = sample_dir(temp_dir.path());

        let path = archive(ArchiveFormat::Zip, &dir).unwrap();

        let mut zip = zip::ZipArchive::new(File::open(&path).unwrap()).unwrap();
        let names: BTreeSet<String> = zip
            .file_names()
            .filter(|n| !n.ends_with('/'))
            .map(str::to_string)
            .collect();
        assert_eq!(names, expected());

        let mut content = String::new();
        zip.by_name("folderB/fileC")
            .unwrap()
            .read_to_string(&mut content)
            .unwrap();
        assert_eq!(content, "charlie");
    }

    #[test]
    fn test_existing_archive_is_not_overwritten() {
        let temp_dir = TempDir::new().unwrap();
        let dir = sample_dir(temp_dir.path());
        std::fs::write(temp_dir.path().join("backup.zip"), b"keep").unwrap();

        let result = archive(ArchiveFormat::Zip, &dir);

        assert!(matches!(result, Err(BackupError::Archive(_))));
        assert_eq!(
            std::fs::read(temp_dir.path().join("backup.zip")).unwrap(),
            b"keep"
        );
    }

    #[test]
    fn test_failed_write_removes_partial_archive() {
        let temp_dir = TempDir::new().unwrap();
        // The target can be created but the tree cannot be read
        let missing = temp_dir.path().join("gone");

        for format in [ArchiveFormat::Tar, ArchiveFormat::GzTar] {
            let result = archive(format, &missing);

            assert!(matches!(result, Err(BackupError::Archive(_))));
            let target = temp_dir.path().join(format!("gone.{}", format.extension()));
            assert!(!target.exists());
        }
    }
}
