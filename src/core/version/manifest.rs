// ─── Version Manifest ───
// Handles fetching and parsing the Mojang version manifest v2.

use serde::Deserialize;
use tracing::info;

use crate::core::error::LauncherResult;

pub const VERSION_MANIFEST_URL: &str =
    "https://piston-meta.mojang.com/mc/game/version_manifest_v2.json";

/// Top-level Mojang version manifest.
#[derive(Debug, Deserialize)]
pub struct VersionManifest {
    pub latest: LatestVersions,
    pub versions: Vec<VersionEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LatestVersions {
    pub release: String,
    pub snapshot: String,
}

/// A single entry in the manifest.
#[derive(Debug, Clone, Deserialize)]
pub struct VersionEntry {
    pub id: String,
    pub url: String,
}

impl VersionManifest {
    /// Fetch the version manifest from `url` using a shared HTTP client.
    pub async fn fetch(client: &reqwest::Client, url: &str) -> LauncherResult<Self> {
        info!("Fetching Minecraft version manifest...");

        let manifest: VersionManifest = client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        info!(
            "Loaded {} versions from manifest (latest release {})",
            manifest.versions.len(),
            manifest.latest.release
        );
        Ok(manifest)
    }

    /// Find a specific version entry by ID (e.g. "1.20.4").
    pub fn find_version(&self, id: &str) -> Option<&VersionEntry> {
        self.versions.iter().find(|v| v.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_manifest_with_latest() {
        let json = r#"{
            "latest": {"release": "1.20.4", "snapshot": "24w03a"},
            "versions": [
                {
                    "id": "24w03a",
                    "type": "snapshot",
                    "releaseTime": "2024-01-17T13:00:00+00:00",
                    "url": "https://example.com/24w03a.json"
                },
                {
                    "id": "1.20.4",
                    "type": "release",
                    "releaseTime": "2023-12-07T12:56:20+00:00",
                    "url": "https://example.com/1.20.4.json",
                    "sha1": "abc123"
                }
            ]
        }"#;
        let manifest: VersionManifest = serde_json::from_str(json).unwrap();
        assert_eq!(manifest.latest.release, "1.20.4");
        let entry = manifest.find_version("1.20.4").unwrap();
        assert_eq!(entry.url, "https://example.com/1.20.4.json");
        assert!(manifest.find_version("1.0").is_none());
    }
}
