//! Command-line Google Drive backup.
//!
//! - `backup`: mirror a Drive folder or file onto local disk
//! - `install`: register the OAuth client secrets used to authorize

mod config;
mod gdrive;
mod logging;
mod oauth;
mod paths;
mod token_manager;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use gdrive_backup_core::{BackupError, BackupSession, RemoteStore};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;

use config::{BackupArgs, Command, Config};
use gdrive::GDriveClient;
use paths::AppDirs;
use token_manager::{ClientConfig, TokenManager};

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    // Errors before logging is up can only go to stderr
    let (dirs, _log_guard) = match prepare(&config) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("Starting gdrive-backup v{}", env!("CARGO_PKG_VERSION"));
    info!("  App directory: {}", dirs.root.display());

    let result = match config.command {
        Command::Install { client_secrets } => dirs
            .install_client_secrets(&client_secrets)
            .await
            .map(|_| ()),
        Command::Backup(args) => run_backup(&dirs, &args).await,
    };

    report(result)
}

/// Resolve and scaffold the application directory, then start logging into it.
fn prepare(config: &Config) -> anyhow::Result<(AppDirs, WorkerGuard)> {
    let dirs = AppDirs::resolve(config.app_dir.clone())?;
    dirs.scaffold()?;
    let guard = logging::init(&config.log_level, &dirs.logs)?;
    Ok((dirs, guard))
}

/// Log a failed run once and turn it into the process exit code.
fn report(result: anyhow::Result<()>) -> ExitCode {
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run_backup(dirs: &AppDirs, args: &BackupArgs) -> anyhow::Result<()> {
    let options = args.to_options();
    let source = options.validate()?;

    info!("  Source: {}", source);
    info!("  Destination: {}", options.destination.display());
    info!(
        "  Graceful: {}, conversion: {:?}, compression: {:?}",
        options.graceful, options.conversion, options.compression
    );

    let tokens = authorize(dirs, args)
        .await
        .map_err(|e| BackupError::Credential(format!("{:#}", e)))?;
    let client = Arc::new(GDriveClient::new(Arc::new(tokens)));

    let user = client
        .current_user()
        .await
        .map_err(|source| BackupError::RemoteQuery {
            context: "the authenticated user".to_string(),
            source,
        })?;
    info!("Authenticated as {} ({})", user.display_name, user.email_address);

    let cancel = CancellationToken::new();
    spawn_shutdown_listener(cancel.clone());

    let summary = BackupSession::new(client, options, cancel).run().await?;
    if !summary.is_clean() {
        warn!("Files that could not be downloaded were renamed with an .incomplete suffix");
    }
    Ok(())
}

async fn authorize(dirs: &AppDirs, args: &BackupArgs) -> anyhow::Result<TokenManager> {
    let client = ClientConfig::load(&dirs.client_secret_path()).await?;
    let tokens = TokenManager::new(client, args.scope.url(), dirs.token_path());
    tokens.ensure_authorized().await?;
    Ok(tokens)
}

/// Cancel the backup on Ctrl+C or SIGTERM.
fn spawn_shutdown_listener(cancel: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = async {
            match signal::ctrl_c().await {
                Ok(()) => info!("Received Ctrl+C, cancelling backup"),
                Err(e) => {
                    warn!("Failed to install Ctrl+C handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(unix)]
        let terminate = async {
            match signal::unix::signal(signal::unix::SignalKind::terminate()) {
                Ok(mut sigterm) => {
                    sigterm.recv().await;
                    info!("Received SIGTERM, cancelling backup");
                }
                Err(e) => {
                    warn!("Failed to install SIGTERM handler: {}", e);
                    std::future::pending::<()>().await;
                }
            }
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }

        cancel.cancel();
    });
}
