use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use crate::core::error::{LauncherError, LauncherResult};

/// Lifecycle state of an instance as last persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InstanceState {
    /// Metadata exists but nothing has been staged yet.
    Created,
    /// Server root staged and ready to launch.
    Provisioned,
    /// A supervisor is running the server.
    Running,
    /// Last run ended cleanly or was stopped by the operator.
    Stopped,
    /// Last provisioning or run failed.
    Failed,
}

impl std::fmt::Display for InstanceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceState::Created => write!(f, "created"),
            InstanceState::Provisioned => write!(f, "provisioned"),
            InstanceState::Running => write!(f, "running"),
            InstanceState::Stopped => write!(f, "stopped"),
            InstanceState::Failed => write!(f, "failed"),
        }
    }
}

/// One server instance, persisted as `instance.json` inside its root.
///
/// Each instance owns `servers/<uuid>/`, which is also the isolated root
/// the provisioner stages into.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Instance {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub variant_id: String,
    #[serde(default)]
    pub mods: Vec<String>,
    pub path: PathBuf,
    pub state: InstanceState,
    pub created_at: DateTime<Utc>,
    pub last_started: Option<DateTime<Utc>>,
}

impl Instance {
    pub fn new(
        name: String,
        owner: String,
        variant_id: String,
        mods: Vec<String>,
        base_dir: &std::path::Path,
    ) -> LauncherResult<Self> {
        validate_name(&name)?;
        let id = Uuid::new_v4().to_string();
        let path = base_dir.join(&id);

        Ok(Self {
            id,
            name,
            owner,
            variant_id,
            mods,
            path,
            state: InstanceState::Created,
            created_at: Utc::now(),
            last_started: None,
        })
    }

    /// Path to this instance's metadata file.
    pub fn config_path(&self) -> PathBuf {
        self.path.join("instance.json")
    }
}

pub fn validate_name(name: &str) -> LauncherResult<()> {
    let valid = !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(LauncherError::Other(format!(
            "invalid instance name '{name}': use letters, digits, '-', '_' or '.'"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_instance_lives_under_base_dir() {
        let base = std::path::Path::new("/srv/servers");
        let instance = Instance::new(
            "survival".into(),
            "alice".into(),
            "vanilla/1.20.4".into(),
            Vec::new(),
            base,
        )
        .unwrap();
        assert_eq!(instance.path, base.join(&instance.id));
        assert_eq!(instance.state, InstanceState::Created);
        assert!(instance.config_path().ends_with("instance.json"));
    }

    #[test]
    fn names_are_restricted() {
        assert!(validate_name("creative-1.20").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("../etc").is_err());
        assert!(validate_name("has space").is_err());
    }
}
