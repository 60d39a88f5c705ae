use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::model::{Instance, InstanceState};
use crate::core::downloader::write_file;
use crate::core::error::{LauncherError, LauncherResult};

/// Manages instance metadata on disk.
#[derive(Debug, Clone)]
pub struct InstanceManager {
    /// Root directory where all instance roots live.
    instances_dir: PathBuf,
    max_per_owner: usize,
    /// Held from the owner count until the new instance is on disk. Shared
    /// by clones.
    creating: Arc<Mutex<()>>,
}

impl InstanceManager {
    pub fn new(instances_dir: PathBuf, max_per_owner: usize) -> Self {
        Self {
            instances_dir,
            max_per_owner,
            creating: Arc::new(Mutex::new(())),
        }
    }

    pub fn instances_dir(&self) -> &Path {
        &self.instances_dir
    }

    /// Reuse the instance called `name`, or create it if the owner still has
    /// room. The stored variant and mods follow the latest request.
    pub async fn find_or_create(
        &self,
        name: &str,
        owner: &str,
        variant_id: &str,
        mods: &[String],
    ) -> LauncherResult<Instance> {
        let _creating = self.creating.lock().await;
        let existing = self.list().await?;

        if let Some(mut instance) = existing.iter().find(|i| i.name == name).cloned() {
            if instance.owner != owner {
                return Err(LauncherError::Other(format!(
                    "instance '{name}' belongs to '{}'",
                    instance.owner
                )));
            }
            if instance.variant_id != variant_id || instance.mods != mods {
                info!(
                    "Instance '{}' switches to {} with {} mods",
                    name,
                    variant_id,
                    mods.len()
                );
                instance.variant_id = variant_id.to_string();
                instance.mods = mods.to_vec();
                self.save(&instance).await?;
            }
            return Ok(instance);
        }

        let owned = existing.iter().filter(|i| i.owner == owner).count();
        if owned >= self.max_per_owner {
            return Err(LauncherError::InstanceLimitReached {
                owner: owner.to_string(),
                limit: self.max_per_owner,
            });
        }

        let instance = Instance::new(
            name.to_string(),
            owner.to_string(),
            variant_id.to_string(),
            mods.to_vec(),
            &self.instances_dir,
        )?;
        self.create(instance).await
    }

    async fn create(&self, instance: Instance) -> LauncherResult<Instance> {
        if instance.path.exists() {
            return Err(LauncherError::Other(format!(
                "instance directory {:?} already exists",
                instance.path
            )));
        }
        tokio::fs::create_dir_all(&instance.path)
            .await
            .map_err(|e| LauncherError::io(&instance.path, e))?;
        self.save(&instance).await?;

        info!(
            "Created instance '{}' ({}) for {}",
            instance.name, instance.id, instance.owner
        );
        Ok(instance)
    }

    /// Save instance metadata to disk.
    pub async fn save(&self, instance: &Instance) -> LauncherResult<()> {
        let json = serde_json::to_string_pretty(instance)?;
        let config_path = instance.config_path();

        if let Some(parent) = config_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::io(parent, e))?;
        }

        write_file(&config_path, json.as_bytes()).await
    }

    /// Load a single instance by ID.
    pub async fn load(&self, id: &str) -> LauncherResult<Instance> {
        let config_path = self.instances_dir.join(id).join("instance.json");
        if !config_path.exists() {
            return Err(LauncherError::InstanceNotFound(id.to_string()));
        }

        let json = tokio::fs::read_to_string(&config_path)
            .await
            .map_err(|e| LauncherError::io(&config_path, e))?;

        let instance: Instance = serde_json::from_str(&json)?;
        Ok(instance)
    }

    /// Find an instance by id or by name.
    pub async fn find(&self, id_or_name: &str) -> LauncherResult<Instance> {
        self.list()
            .await?
            .into_iter()
            .find(|i| i.id == id_or_name || i.name == id_or_name)
            .ok_or_else(|| LauncherError::InstanceNotFound(id_or_name.to_string()))
    }

    /// List all instances, oldest first.
    pub async fn list(&self) -> LauncherResult<Vec<Instance>> {
        let mut instances = Vec::new();

        if !self.instances_dir.exists() {
            return Ok(instances);
        }

        let mut entries = tokio::fs::read_dir(&self.instances_dir)
            .await
            .map_err(|e| LauncherError::io(&self.instances_dir, e))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| LauncherError::io(&self.instances_dir, e))?
        {
            let config_path = entry.path().join("instance.json");
            if !config_path.exists() {
                continue;
            }
            match tokio::fs::read_to_string(&config_path).await {
                Ok(json) => match serde_json::from_str::<Instance>(&json) {
                    Ok(inst) => instances.push(inst),
                    Err(e) => warn!("Corrupt instance.json at {:?}: {}", config_path, e),
                },
                Err(e) => warn!("Cannot read {:?}: {}", config_path, e),
            }
        }

        instances.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(instances)
    }

    /// Delete an instance and its whole server root.
    pub async fn delete(&self, id: &str) -> LauncherResult<()> {
        let instance = self.load(id).await?;
        if instance.state == InstanceState::Running {
            warn!(
                "Deleting instance {} while it is recorded as running",
                instance.id
            );
        }

        tokio::fs::remove_dir_all(&instance.path)
            .await
            .map_err(|e| LauncherError::io(&instance.path, e))?;

        info!("Deleted instance {}", id);
        Ok(())
    }

    /// Update instance state and persist.
    pub async fn set_state(
        &self,
        instance: &mut Instance,
        state: InstanceState,
    ) -> LauncherResult<()> {
        instance.state = state;
        if state == InstanceState::Running {
            instance.last_started = Some(Utc::now());
        }
        self.save(instance).await
    }

    /// Persist `state` for the instance with `id`, re-reading it from disk.
    pub async fn record_state(&self, id: &str, state: InstanceState) -> LauncherResult<()> {
        let mut instance = self.load(id).await?;
        self.set_state(&mut instance, state).await
    }
}
