// ─── Variant Catalog ───
// Explicit table of known server variants and registered mods. Loaded once,
// shared read-only between instances behind an `Arc`.

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::downloader::ArtifactRef;
use crate::core::error::{LauncherError, LauncherResult};

/// One server distribution build, keyed by a namespaced id such as `vanilla/1.20.4`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogVariant {
    pub id: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub aliases: Vec<String>,
    pub artifact: ArtifactRef,
    /// Required Java major version. Derived from the version name when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub java_major: Option<u32>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub jvm_args: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub server_args: Vec<String>,
    /// Directory (relative to the server root) the distribution loads mods from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mods_dir: Option<String>,
}

impl CatalogVariant {
    /// Distribution part of the id (`vanilla` in `vanilla/1.20.4`).
    pub fn distribution(&self) -> &str {
        split_id(&self.id).0
    }

    /// Every name this variant answers to: its id and its aliases.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.aliases.iter().map(String::as_str))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogMod {
    pub id: String,
    pub artifact: ArtifactRef,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Catalog {
    #[serde(default)]
    pub variants: Vec<CatalogVariant>,
    #[serde(default)]
    pub mods: Vec<CatalogMod>,
}

impl Catalog {
    pub fn new(variants: Vec<CatalogVariant>, mods: Vec<CatalogMod>) -> LauncherResult<Self> {
        let catalog = Self { variants, mods };
        catalog.validate()?;
        Ok(catalog)
    }

    /// Load the catalog file. A missing file yields an empty catalog.
    pub async fn load(path: &Path) -> LauncherResult<Self> {
        let raw = match tokio::fs::read_to_string(path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    "No catalog at {:?}; run `catalog-sync` or write one by hand",
                    path
                );
                return Ok(Self::default());
            }
            Err(e) => return Err(LauncherError::io(path, e)),
        };

        let catalog: Catalog = serde_json::from_str(&raw)?;
        catalog.validate()?;
        info!(
            "Loaded catalog {:?}: {} variants, {} mods",
            path,
            catalog.variants.len(),
            catalog.mods.len()
        );
        Ok(catalog)
    }

    pub async fn save(&self, path: &Path) -> LauncherResult<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::io(parent, e))?;
        }
        let json = serde_json::to_string_pretty(self)?;
        tokio::fs::write(path, json)
            .await
            .map_err(|e| LauncherError::io(path, e))
    }

    /// Ids must be namespaced and unique; mod ids must be unique.
    pub fn validate(&self) -> LauncherResult<()> {
        let mut seen = HashSet::new();
        for variant in &self.variants {
            let (distribution, name) = split_id(&variant.id);
            if distribution.is_empty() || name.is_empty() || !variant.id.contains('/') {
                return Err(LauncherError::Other(format!(
                    "catalog variant id '{}' must look like <distribution>/<name>",
                    variant.id
                )));
            }
            if !seen.insert(variant.id.as_str()) {
                return Err(LauncherError::Other(format!(
                    "catalog lists variant '{}' twice",
                    variant.id
                )));
            }
        }

        let mut mod_ids = HashSet::new();
        for entry in &self.mods {
            if !mod_ids.insert(entry.id.as_str()) {
                return Err(LauncherError::Other(format!(
                    "catalog lists mod '{}' twice",
                    entry.id
                )));
            }
        }
        Ok(())
    }

    pub fn find_mod(&self, id: &str) -> Option<&CatalogMod> {
        self.mods.iter().find(|m| m.id == id)
    }

    /// Replace every variant of `distribution` with `variants`, keeping the rest.
    pub fn replace_distribution(&mut self, distribution: &str, variants: Vec<CatalogVariant>) {
        self.variants.retain(|v| v.distribution() != distribution);
        self.variants.extend(variants);
        self.variants.sort_by(|a, b| a.id.cmp(&b.id));
    }
}

/// Split `dist/name` at the first slash. Ids without a slash have an empty name.
pub fn split_id(id: &str) -> (&str, &str) {
    id.split_once('/').unwrap_or((id, ""))
}
