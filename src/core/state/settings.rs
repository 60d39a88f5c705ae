use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::java::RuntimeArchive;
use crate::core::launch::LaunchDefaults;
use crate::core::supervisor::RestartPolicy;

pub const SETTINGS_FILE: &str = "launcher_settings.json";

/// Operator configuration persisted as `launcher_settings.json`.
///
/// Every field has a fallback, so a partial (or missing) file is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LauncherSettings {
    pub launch_defaults: LaunchDefaults,
    pub restart_policy: RestartPolicy,
    pub stop_grace_secs: u64,
    pub service_user: String,
    pub service_group: String,
    /// Java binary tried before `JAVA_HOME` and `PATH`.
    pub java_path: Option<PathBuf>,
    /// Installable runtimes keyed by Java track (8, 17, 21).
    pub runtime_archives: HashMap<u32, RuntimeArchive>,
    /// Acceptance artifact; defaults to `<data_dir>/eula.txt`.
    pub license_path: Option<PathBuf>,
    pub fetch_retries: u32,
    pub max_instances_per_owner: usize,
    pub min_free_disk_mb: u64,
    pub log_capacity: usize,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        Self {
            launch_defaults: LaunchDefaults::default(),
            restart_policy: RestartPolicy::default(),
            stop_grace_secs: 30,
            service_user: "minecraft".into(),
            service_group: "minecraft".into(),
            java_path: None,
            runtime_archives: HashMap::new(),
            license_path: None,
            fetch_retries: 3,
            max_instances_per_owner: 5,
            min_free_disk_mb: 512,
            log_capacity: 1_000,
        }
    }
}

impl LauncherSettings {
    pub fn stop_grace(&self) -> Duration {
        Duration::from_secs(self.stop_grace_secs)
    }

    pub fn min_free_disk_bytes(&self) -> u64 {
        self.min_free_disk_mb.saturating_mul(1024 * 1024)
    }

    /// Read settings from `data_dir`. A missing file gives the defaults; an
    /// unreadable one is reported and replaced by the defaults.
    pub fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(SETTINGS_FILE);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::default(),
            Err(e) => {
                warn!("Cannot read {:?}: {}; using defaults", path, e);
                return Self::default();
            }
        };
        match serde_json::from_str(&raw) {
            Ok(settings) => settings,
            Err(e) => {
                warn!("Corrupt {:?}: {}; using defaults", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, data_dir: &Path) -> LauncherResult<()> {
        std::fs::create_dir_all(data_dir).map_err(|e| LauncherError::io(data_dir, e))?;
        let path = data_dir.join(SETTINGS_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(|e| LauncherError::io(&path, e))
    }
}
