// ─── License Gate ───
// The acceptance artifact is a Minecraft-style `eula.txt`. It passes only
// with a non-comment line reading exactly `eula=true`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{info, instrument, warn};

use crate::core::error::{LauncherError, LauncherResult};

pub const EULA_FILE_NAME: &str = "eula.txt";
pub const AFFIRMATIVE_MARKER: &str = "eula=true";
pub const EULA_URL: &str = "https://aka.ms/MinecraftEULA";

/// Presence flag and raw content of the acceptance artifact.
#[derive(Debug, Clone)]
pub struct LicenseAcceptance {
    pub path: PathBuf,
    pub present: bool,
    pub content: String,
}

impl LicenseAcceptance {
    pub async fn read(path: &Path) -> LauncherResult<Self> {
        match tokio::fs::read(path).await {
            Ok(bytes) => Ok(Self {
                path: path.to_path_buf(),
                present: true,
                content: String::from_utf8_lossy(&bytes).into_owned(),
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self {
                path: path.to_path_buf(),
                present: false,
                content: String::new(),
            }),
            Err(e) => Err(LauncherError::io(path, e)),
        }
    }

    /// Why the artifact does not record acceptance, or `None` when it does.
    pub fn rejection(&self) -> Option<&'static str> {
        if !self.present {
            return Some("acceptance file is missing");
        }
        if self.content.trim().is_empty() {
            return Some("acceptance file is empty");
        }
        let accepted = self
            .content
            .lines()
            .map(str::trim)
            .filter(|line| !line.starts_with('#'))
            .any(|line| line == AFFIRMATIVE_MARKER);
        if accepted {
            None
        } else {
            Some("acceptance file lacks an `eula=true` line")
        }
    }
}

/// Proof that the gate passed. Staging requires one.
#[derive(Debug, Clone)]
pub struct LicenseToken {
    path: PathBuf,
    checked_at: DateTime<Utc>,
}

impl LicenseToken {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn checked_at(&self) -> DateTime<Utc> {
        self.checked_at
    }
}

pub struct LicenseGate;

impl LicenseGate {
    #[instrument]
    pub async fn check(path: &Path) -> LauncherResult<LicenseToken> {
        let acceptance = LicenseAcceptance::read(path).await.map_err(|e| {
            LauncherError::LicenseNotAccepted {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;

        if let Some(reason) = acceptance.rejection() {
            warn!("License gate refused {:?}: {}", path, reason);
            return Err(LauncherError::LicenseNotAccepted {
                path: path.to_path_buf(),
                reason: format!("{reason} (see {EULA_URL})"),
            });
        }

        info!("License accepted via {:?}", path);
        Ok(LicenseToken {
            path: path.to_path_buf(),
            checked_at: Utc::now(),
        })
    }

    /// Record acceptance at `path`, replacing whatever is there.
    pub async fn write_acceptance(path: &Path) -> LauncherResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::io(parent, e))?;
        }
        let content = format!(
            "#By changing the setting below to TRUE you are indicating your agreement to our EULA ({EULA_URL}).\n#{}\n{AFFIRMATIVE_MARKER}\n",
            Utc::now().to_rfc2822()
        );
        tokio::fs::write(path, content)
            .await
            .map_err(|e| LauncherError::io(path, e))?;
        info!("Wrote license acceptance to {:?}", path);
        Ok(())
    }
}
