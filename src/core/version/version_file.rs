// ─── Version File ───
// The slice of a Mojang version JSON a dedicated server needs: the server
// download and the Java major version it targets.

use serde::Deserialize;

use crate::core::error::LauncherResult;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionJson {
    pub id: String,
    pub downloads: Option<VersionDownloads>,
    #[serde(default)]
    pub java_version: Option<JavaVersionInfo>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JavaVersionInfo {
    pub major_version: u32,
}

#[derive(Debug, Deserialize)]
pub struct VersionDownloads {
    pub server: Option<DownloadArtifact>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DownloadArtifact {
    pub sha1: String,
    pub url: String,
}

impl VersionJson {
    pub async fn fetch(client: &reqwest::Client, url: &str) -> LauncherResult<Self> {
        let version = client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(version)
    }

    /// Dedicated server download, absent for very old versions.
    pub fn server_download(&self) -> Option<&DownloadArtifact> {
        self.downloads.as_ref().and_then(|d| d.server.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_server_download_and_java_version() {
        let json = r#"{
            "id": "1.20.4",
            "mainClass": "net.minecraft.client.main.Main",
            "downloads": {
                "client": {"sha1": "c", "size": 1, "url": "https://example.com/client.jar"},
                "server": {"sha1": "s", "size": 2, "url": "https://example.com/server.jar"}
            },
            "javaVersion": {"component": "java-runtime-gamma", "majorVersion": 17}
        }"#;
        let version: VersionJson = serde_json::from_str(json).unwrap();
        let server = version.server_download().unwrap();
        assert_eq!(server.url, "https://example.com/server.jar");
        assert_eq!(server.sha1, "s");
        assert_eq!(version.java_version.unwrap().major_version, 17);
    }

    #[test]
    fn old_versions_have_no_server_download() {
        let version: VersionJson = serde_json::from_str(r#"{"id": "a1.0.4"}"#).unwrap();
        assert!(version.server_download().is_none());
    }
}
