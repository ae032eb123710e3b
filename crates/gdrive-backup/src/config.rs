use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use gdrive_backup_core::{ArchiveFormat, BackupOptions, DocConversion, RetryPolicy};

/// Upper bound on concurrent downloads, to stay clear of Drive rate limits.
const MAX_CONCURRENCY: usize = 32;

/// Configuration for gdrive-backup.
#[derive(Parser, Debug, Clone)]
#[command(name = "gdrive-backup", version)]
#[command(about = "Back up a Google Drive folder or file to local disk")]
pub struct Config {
    /// Application directory holding credentials and logs [default: ~/.google_drive_backup]
    #[arg(long, global = true, env = "GDRIVE_BACKUP_HOME")]
    pub app_dir: Option<PathBuf>,

    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "info", env = "GDRIVE_BACKUP_LOG_LEVEL")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Back up a remote folder or file
    Backup(BackupArgs),

    /// Install an OAuth client secrets file into the application directory
    Install {
        /// Client secrets JSON downloaded from the Google Cloud console
        client_secrets: PathBuf,
    },
}

#[derive(clap::Args, Debug, Clone)]
pub struct BackupArgs {
    /// Name of the Drive folder or file to back up
    #[arg(long, env = "GDRIVE_BACKUP_SOURCE")]
    pub source: Option<String>,

    /// Absolute path of the backup directory to create
    #[arg(long, env = "GDRIVE_BACKUP_DESTINATION")]
    pub destination: PathBuf,

    /// Abort on the first failed download. Non-graceful backups keep going
    /// and mark incomplete files
    #[arg(long)]
    pub graceful: bool,

    /// Archive the finished backup
    #[arg(long, value_enum)]
    pub compression: Option<Compression>,

    /// Export format for Google Docs, Sheets and Slides
    #[arg(long = "gDocConversion", alias = "g-doc-conversion", value_enum, default_value_t = Conversion::Pdf)]
    pub gdoc_conversion: Conversion,

    /// OAuth scope (must match the installed client credentials)
    #[arg(long, value_enum, ignore_case = true, default_value_t = Scope::Readonly)]
    pub scope: Scope,

    /// Download chunk size in MiB
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u64).range(1..=1024))]
    pub chunk_size_mib: u64,

    /// Attempts per chunk before a download is given up
    #[arg(long, default_value = "5", value_parser = clap::value_parser!(u32).range(1..=100))]
    pub retries: u32,

    /// Initial delay between attempts, doubled each time (0 retries immediately)
    #[arg(long, default_value = "250")]
    pub retry_backoff_ms: u64,

    /// Files downloaded concurrently within one folder
    #[arg(long, default_value = "4", value_parser = parse_concurrency)]
    pub concurrency: usize,
}

/// Archive format for `--compression`.
///
/// Only formats backed by the `zip` and `flate2` crates are offered;
/// `bztar` and `xztar` are not supported.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    Zip,
    Tar,
    Gztar,
}

impl From<Compression> for ArchiveFormat {
    fn from(value: Compression) -> Self {
        match value {
            Compression::Zip => ArchiveFormat::Zip,
            Compression::Tar => ArchiveFormat::Tar,
            Compression::Gztar => ArchiveFormat::GzTar,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Msoffice,
    Pdf,
}

impl From<Conversion> for DocConversion {
    fn from(value: Conversion) -> Self {
        match value {
            Conversion::Msoffice => DocConversion::MsOffice,
            Conversion::Pdf => DocConversion::Pdf,
        }
    }
}

/// OAuth 2.0 access level requested from Google.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    #[value(name = "READONLY")]
    Readonly,
    #[value(name = "FILE")]
    File,
    #[value(name = "DRIVE")]
    Drive,
}

impl Scope {
    pub fn url(self) -> &'static str {
        match self {
            Scope::Readonly => "https://www.googleapis.com/auth/drive.readonly",
            Scope::File => "https://www.googleapis.com/auth/drive.file",
            Scope::Drive => "https://www.googleapis.com/auth/drive",
        }
    }
}

fn parse_concurrency(s: &str) -> Result<usize, String> {
    let value: usize = s
        .parse()
        .map_err(|_| format!("'{s}' is not a valid number"))?;

    if value == 0 {
        return Err("concurrency must be at least 1".to_string());
    }
    if value > MAX_CONCURRENCY {
        return Err(format!(
            "concurrency {value} exceeds maximum of {MAX_CONCURRENCY}"
        ));
    }
    Ok(value)
}

impl BackupArgs {
    pub fn to_options(&self) -> BackupOptions {
        let retry = if self.retry_backoff_ms == 0 {
            RetryPolicy::immediate(self.retries)
        } else {
            RetryPolicy {
                max_attempts: self.retries,
                base_delay: Duration::from_millis(self.retry_backoff_ms),
                ..RetryPolicy::default()
            }
        };

        BackupOptions {
            source: self.source.clone(),
            destination: self.destination.clone(),
            graceful: self.graceful,
            conversion: self.gdoc_conversion.into(),
            compression: self.compression.map(Into::into),
            chunk_size: self.chunk_size_mib * 1024 * 1024,
            retry,
            transfer_concurrency: self.concurrency,
        }
    }
}
