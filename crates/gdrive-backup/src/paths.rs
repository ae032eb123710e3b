//! Application directory layout.

use std::path::{Path, PathBuf};

use anyhow::Context;
use tracing::info;

use crate::token_manager::{ClientConfig, CLIENT_SECRET_FILE, TOKEN_FILE};

const APP_DIR_NAME: &str = ".google_drive_backup";

/// `<root>`, `<root>/known_users` and `<root>/logs`.
#[derive(Debug, Clone)]
pub struct AppDirs {
    pub root: PathBuf,
    pub known_users: PathBuf,
    pub logs: PathBuf,
}

impl AppDirs {
    /// Use `override_dir` if given, else `~/.google_drive_backup`.
    pub fn resolve(override_dir: Option<PathBuf>) -> anyhow::Result<Self> {
        let root = match override_dir {
            Some(dir) => dir,
            None => dirs::home_dir()
                .context("cannot determine the home directory; pass --app-dir")?
                .join(APP_DIR_NAME),
        };
        Ok(Self::from_root(root))
    }

    pub fn from_root(root: PathBuf) -> Self {
        Self {
            known_users: root.join("known_users"),
            logs: root.join("logs"),
            root,
        }
    }

    /// Create any missing directories.
    pub fn scaffold(&self) -> anyhow::Result<()> {
        for dir in [&self.root, &self.known_users, &self.logs] {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("cannot create {}", dir.display()))?;
        }
        Ok(())
    }

    pub fn client_secret_path(&self) -> PathBuf {
        self.known_users.join(CLIENT_SECRET_FILE)
    }

    pub fn token_path(&self) -> PathBuf {
        self.known_users.join(TOKEN_FILE)
    }

    /// Validate a client secrets file and copy it into `known_users`.
    ///
    /// Any stored token is removed, since it belongs to the previous client.
    pub async fn install_client_secrets(&self, source: &Path) -> anyhow::Result<PathBuf> {
        let json = tokio::fs::read_to_string(source)
            .await
            .with_context(|| format!("cannot read {}", source.display()))?;
        let client = ClientConfig::from_json(&json)?;

        let target = self.client_secret_path();
        tokio::fs::write(&target, json)
            .await
            .with_context(|| format!("cannot write {}", target.display()))?;

        match tokio::fs::remove_file(self.token_path()).await {
            Ok(()) => info!("Removed token issued to the previous client"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e).context("cannot remove the stored token"),
        }

        info!("Installed client {} at {}", client.client_id, target.display());
        Ok(target)
    }
}
