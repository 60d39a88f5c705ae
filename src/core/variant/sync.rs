// ─── Catalog Sync ───
// Refreshes the `vanilla/*` catalog entries from Mojang's version manifest.

use tracing::{info, warn};

use crate::core::downloader::ArtifactRef;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::version::{VersionJson, VersionManifest};

use super::catalog::{Catalog, CatalogVariant};

pub const VANILLA_DISTRIBUTION: &str = "vanilla";

#[derive(Debug, Clone, Default)]
pub struct SyncOptions {
    /// Also register the latest snapshot as `vanilla/snapshot`.
    pub include_snapshot: bool,
    /// Extra version ids to register besides the latest release.
    pub versions: Vec<String>,
}

/// Fetch the manifest and rewrite the vanilla distribution in `catalog`.
/// Returns how many variants were written.
pub async fn sync_vanilla(
    client: &reqwest::Client,
    manifest_url: &str,
    catalog: &mut Catalog,
    options: &SyncOptions,
) -> LauncherResult<usize> {
    let manifest = VersionManifest::fetch(client, manifest_url).await?;

    let mut wanted: Vec<(String, Vec<String>)> = vec![(
        manifest.latest.release.clone(),
        vec![format!("{VANILLA_DISTRIBUTION}/latest")],
    )];
    if options.include_snapshot {
        push_wanted(
            &mut wanted,
            &manifest.latest.snapshot,
            Some(format!("{VANILLA_DISTRIBUTION}/snapshot")),
        );
    }
    for id in &options.versions {
        push_wanted(&mut wanted, id, None);
    }

    let mut variants = Vec::with_capacity(wanted.len());
    for (id, aliases) in wanted {
        let entry = manifest
            .find_version(&id)
            .ok_or_else(|| LauncherError::UnknownVariant(format!("{VANILLA_DISTRIBUTION}/{id}")))?;
        let version = VersionJson::fetch(client, &entry.url).await?;
        match vanilla_entry(&version, aliases) {
            Some(variant) => variants.push(variant),
            None => warn!("Version {} has no dedicated server download, skipping", id),
        }
    }

    let written = variants.len();
    catalog.replace_distribution(VANILLA_DISTRIBUTION, variants);
    catalog.validate()?;
    info!("Catalog sync wrote {} vanilla variants", written);
    Ok(written)
}

fn push_wanted(wanted: &mut Vec<(String, Vec<String>)>, id: &str, alias: Option<String>) {
    match wanted.iter_mut().find(|(existing, _)| existing == id) {
        Some((_, aliases)) => aliases.extend(alias),
        None => wanted.push((id.to_string(), alias.into_iter().collect())),
    }
}

fn vanilla_entry(version: &VersionJson, aliases: Vec<String>) -> Option<CatalogVariant> {
    let server = version.server_download()?;
    Some(CatalogVariant {
        id: format!("{VANILLA_DISTRIBUTION}/{}", version.id),
        aliases,
        artifact: ArtifactRef::Remote {
            url: server.url.clone(),
            sha1: Some(server.sha1.clone()),
        },
        java_major: version.java_version.as_ref().map(|j| j.major_version),
        jvm_args: Vec::new(),
        server_args: vec!["--nogui".to_string()],
        mods_dir: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_entry_from_version_json() {
        let version: VersionJson = serde_json::from_str(
            r#"{
                "id": "1.20.4",
                "downloads": {"server": {"sha1": "8dd1a28015f51b1803213892b50b7b4fc76e594d", "size": 49150256, "url": "https://piston-data.mojang.com/v1/objects/8dd1a28015f51b1803213892b50b7b4fc76e594d/server.jar"}},
                "javaVersion": {"majorVersion": 17}
            }"#,
        )
        .unwrap();
        let entry = vanilla_entry(&version, vec!["vanilla/latest".into()]).unwrap();
        assert_eq!(entry.id, "vanilla/1.20.4");
        assert_eq!(entry.aliases, vec!["vanilla/latest"]);
        assert_eq!(entry.java_major, Some(17));
        assert!(matches!(entry.artifact, ArtifactRef::Remote { sha1: Some(_), .. }));
    }

    #[test]
    fn snapshot_equal_to_release_merges_aliases() {
        let mut wanted = vec![("1.20.4".to_string(), vec!["vanilla/latest".to_string()])];
        push_wanted(&mut wanted, "1.20.4", Some("vanilla/snapshot".into()));
        push_wanted(&mut wanted, "1.19.4", None);
        assert_eq!(wanted.len(), 2);
        assert_eq!(wanted[0].1, vec!["vanilla/latest", "vanilla/snapshot"]);
        assert!(wanted[1].1.is_empty());
    }
}
