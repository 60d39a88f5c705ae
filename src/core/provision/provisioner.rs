// ─── Runtime Provisioner ───
// Stages a resolved variant into its isolated server root:
//   <root>/server.jar
//   <root>/<mods_dir>/<mod-id>.jar
//   <root>/eula.txt
//   <root>/runtime/        (only when a Java runtime had to be installed)

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument};

use crate::core::downloader::{Downloader, copy_file, write_file};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::java::{JavaLocator, JavaRuntime};
use crate::core::license::{EULA_FILE_NAME, LicenseToken};
use crate::core::variant::{ModSet, ServerVariant};

use super::identity::{IdentityProvider, ServiceIdentity, running_as_root};
use super::scope::ScopedRoot;

pub const SERVER_JAR: &str = "server.jar";
pub const RUNTIME_DIR: &str = "runtime";
const STAGED_MODS_MANIFEST: &str = ".staged-mods.json";

/// A staged server root and the identity that owns it.
#[derive(Debug, Clone, Serialize)]
pub struct RuntimeImage {
    pub root: PathBuf,
    pub identity: ServiceIdentity,
    pub server_jar: PathBuf,
    pub mods: Vec<PathBuf>,
    pub java: JavaRuntime,
    pub variant: ServerVariant,
}

#[derive(Debug, Clone)]
pub struct ProvisionerConfig {
    pub service_user: String,
    pub service_group: String,
    /// Free space required on the volume holding the root. Zero disables the check.
    pub min_free_disk_bytes: u64,
}

pub struct RuntimeProvisioner<'a> {
    downloader: &'a Downloader,
    identities: &'a dyn IdentityProvider,
    java: &'a JavaLocator,
    config: ProvisionerConfig,
}

impl<'a> RuntimeProvisioner<'a> {
    pub fn new(
        downloader: &'a Downloader,
        identities: &'a dyn IdentityProvider,
        java: &'a JavaLocator,
        config: ProvisionerConfig,
    ) -> Self {
        Self {
            downloader,
            identities,
            java,
            config,
        }
    }

    /// Stage `variant` and `mods` under `root`. Any failure surfaces as
    /// `ProvisionFailed`.
    #[instrument(skip_all, fields(variant = %variant.id, root = ?root))]
    pub async fn provision(
        &self,
        root: &Path,
        variant: &ServerVariant,
        mods: &ModSet,
        license: &LicenseToken,
    ) -> LauncherResult<RuntimeImage> {
        self.stage(root, variant, mods, license)
            .await
            .map_err(LauncherError::into_provision_failure)
    }

    async fn stage(
        &self,
        root: &Path,
        variant: &ServerVariant,
        mods: &ModSet,
        license: &LicenseToken,
    ) -> LauncherResult<RuntimeImage> {
        tokio::fs::create_dir_all(root)
            .await
            .map_err(|e| LauncherError::io(root, e))?;
        if self.config.min_free_disk_bytes > 0 {
            ensure_min_disk_space(root, self.config.min_free_disk_bytes)?;
        }

        let identity = self
            .identities
            .ensure(&self.config.service_user, &self.config.service_group)
            .await?;
        if identity.is_root() {
            return Err(LauncherError::Other(
                "service identity resolved to root; refusing to stage".into(),
            ));
        }

        let scope = ScopedRoot::new(root);

        let server_jar = scope.join(SERVER_JAR)?;
        info!("Staging {} from {}", variant.id, variant.artifact);
        self.downloader.fetch(&variant.artifact, &server_jar).await?;

        let staged_mods = self.stage_mods(&scope, &variant.mods_dir, mods).await?;

        let eula = scope.join(EULA_FILE_NAME)?;
        if !same_file(license.path(), &eula) {
            copy_file(license.path(), &eula).await?;
        }

        let java = self
            .java
            .ensure(variant.java_major, &scope.join_dir(RUNTIME_DIR)?, self.downloader)
            .await?;

        if running_as_root() {
            hand_over(root, &identity).await?;
        }

        info!(
            "Provisioned {} for {}:{} ({} mods, Java {})",
            variant.id,
            identity.user,
            identity.group,
            staged_mods.len(),
            java.version
        );

        Ok(RuntimeImage {
            root: root.to_path_buf(),
            identity,
            server_jar,
            mods: staged_mods,
            java,
            variant: variant.clone(),
        })
    }

    async fn stage_mods(
        &self,
        scope: &ScopedRoot,
        mods_dir: &str,
        mods: &ModSet,
    ) -> LauncherResult<Vec<PathBuf>> {
        let previous = read_staged_manifest(scope, mods_dir).await;
        let mut current = Vec::with_capacity(mods.len());
        let mut staged = Vec::with_capacity(mods.len());

        if !mods.is_empty() || !previous.is_empty() {
            scope.create_dir(mods_dir).await?;
        }

        for m in mods.iter() {
            let file_name = format!("{}.jar", m.id);
            let dest = scope.join(Path::new(mods_dir).join(&file_name))?;
            debug!("Staging mod {} from {}", m.id, m.artifact);
            self.downloader.fetch(&m.artifact, &dest).await?;
            current.push(file_name);
            staged.push(dest);
        }

        let keep: HashSet<&str> = current.iter().map(String::as_str).collect();
        for stale in previous.iter().filter(|name| !keep.contains(name.as_str())) {
            let path = scope.join(Path::new(mods_dir).join(stale))?;
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!("Removed mod no longer in the set: {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(LauncherError::io(&path, e)),
            }
        }

        if !current.is_empty() || !previous.is_empty() {
            let manifest = scope.join(Path::new(mods_dir).join(STAGED_MODS_MANIFEST))?;
            write_file(&manifest, &serde_json::to_vec(&current)?).await?;
        }
        Ok(staged)
    }
}

async fn read_staged_manifest(scope: &ScopedRoot, mods_dir: &str) -> Vec<String> {
    let Ok(path) = scope.join(Path::new(mods_dir).join(STAGED_MODS_MANIFEST)) else {
        return Vec::new();
    };
    match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => Vec::new(),
    }
}

/// True when `b` is `a` itself rather than a link to it.
fn same_file(a: &Path, b: &Path) -> bool {
    let linked = std::fs::symlink_metadata(b)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false);
    if linked {
        return false;
    }
    match (std::fs::canonicalize(a), std::fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn ensure_min_disk_space(path: &Path, minimum_bytes: u64) -> LauncherResult<()> {
    let disks = sysinfo::Disks::new_with_refreshed_list();
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut best_len = 0usize;
    let mut available = None;
    for disk in disks.list() {
        let mount = disk.mount_point();
        if canonical.starts_with(mount) {
            let len = mount.as_os_str().len();
            if len >= best_len {
                best_len = len;
                available = Some(disk.available_space());
            }
        }
    }
    if let Some(bytes) = available {
        if bytes < minimum_bytes {
            return Err(LauncherError::Other(format!(
                "not enough free space at {:?}: available={} required={}",
                path, bytes, minimum_bytes
            )));
        }
    }
    Ok(())
}

/// Give the whole root to the service identity.
async fn hand_over(root: &Path, identity: &ServiceIdentity) -> LauncherResult<()> {
    #[cfg(unix)]
    {
        let root = root.to_path_buf();
        let (uid, gid) = (identity.uid, identity.gid);
        tokio::task::spawn_blocking(move || chown_recursive(&root, uid, gid))
            .await
            .map_err(|e| LauncherError::Other(format!("chown task failed: {e}")))??;
        debug!("Handed root to uid={} gid={}", identity.uid, identity.gid);
    }
    #[cfg(not(unix))]
    let _ = (root, identity);
    Ok(())
}

#[cfg(unix)]
fn chown_recursive(path: &Path, uid: u32, gid: u32) -> LauncherResult<()> {
    std::os::unix::fs::lchown(path, Some(uid), Some(gid))
        .map_err(|e| LauncherError::io(path, e))?;
    let metadata = std::fs::symlink_metadata(path).map_err(|e| LauncherError::io(path, e))?;
    if metadata.is_dir() {
        for entry in std::fs::read_dir(path).map_err(|e| LauncherError::io(path, e))? {
            let entry = entry.map_err(|e| LauncherError::io(path, e))?;
            chown_recursive(&entry.path(), uid, gid)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeMap, HashMap};
    use std::sync::Arc;
    use std::time::SystemTime;

    use super::*;
    use crate::core::downloader::ArtifactRef;
    use crate::core::java::runtime::tests::FixedProbe;
    use crate::core::license::LicenseGate;
    use crate::core::provision::identity::tests::{FixedIdentity, test_identity};
    use crate::core::variant::ModRef;

    struct Fixture {
        dir: tempfile::TempDir,
        java: PathBuf,
        eula: PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let artifacts = dir.path().join("artifacts");
            std::fs::create_dir_all(&artifacts).unwrap();
            std::fs::write(artifacts.join("server-1.20.4.jar"), b"server").unwrap();
            std::fs::write(artifacts.join("lithium.jar"), b"lithium").unwrap();
            std::fs::write(artifacts.join("krypton.jar"), b"krypton").unwrap();

            let java = dir.path().join("jdk").join("bin").join("java");
            std::fs::create_dir_all(java.parent().unwrap()).unwrap();
            std::fs::write(&java, b"").unwrap();

            let eula = dir.path().join("eula.txt");
            std::fs::write(&eula, "eula=true\n").unwrap();
            Self { dir, java, eula }
        }

        fn artifact(&self, name: &str) -> ArtifactRef {
            ArtifactRef::Local {
                path: self.dir.path().join("artifacts").join(name),
            }
        }

        fn variant(&self) -> ServerVariant {
            ServerVariant {
                id: "modded/foo".into(),
                artifact: self.artifact("server-1.20.4.jar"),
                java_major: 17,
                jvm_args: Vec::new(),
                server_args: vec!["--nogui".into()],
                mods_dir: "mods".into(),
            }
        }

        fn mods(&self, ids: &[&str]) -> ModSet {
            ModSet::new(
                ids.iter()
                    .map(|id| ModRef {
                        id: id.to_string(),
                        artifact: self.artifact(&format!("{id}.jar")),
                    })
                    .collect(),
            )
            .unwrap()
        }

        fn locator(&self) -> JavaLocator {
            JavaLocator::new(Arc::new(FixedProbe(17)), Some(self.java.clone()), HashMap::new())
                .without_environment()
        }

        /// Every file under the fixture dir with its modification time.
        fn snapshot(&self) -> BTreeMap<PathBuf, SystemTime> {
            let mut out = BTreeMap::new();
            let mut stack = vec![self.dir.path().to_path_buf()];
            while let Some(dir) = stack.pop() {
                for entry in std::fs::read_dir(&dir).unwrap().flatten() {
                    let meta = entry.metadata().unwrap();
                    if meta.is_dir() {
                        stack.push(entry.path());
                    }
                    out.insert(entry.path(), meta.modified().unwrap());
                }
            }
            out
        }
    }

    fn config() -> ProvisionerConfig {
        ProvisionerConfig {
            service_user: "minecraft".into(),
            service_group: "minecraft".into(),
            min_free_disk_bytes: 0,
        }
    }

    #[tokio::test]
    async fn stages_server_mods_and_eula_into_root() {
        let fx = Fixture::new();
        let downloader = Downloader::new(reqwest::Client::new());
        let identities = FixedIdentity(test_identity());
        let locator = fx.locator();
        let provisioner = RuntimeProvisioner::new(&downloader, &identities, &locator, config());
        let token = LicenseGate::check(&fx.eula).await.unwrap();
        let root = fx.dir.path().join("servers").join("abc");

        let image = provisioner
            .provision(&root, &fx.variant(), &fx.mods(&["lithium", "krypton"]), &token)
            .await
            .unwrap();

        assert_eq!(image.server_jar, root.join("server.jar"));
        assert_eq!(std::fs::read(root.join("server.jar")).unwrap(), b"server");
        assert_eq!(
            image.mods,
            vec![root.join("mods/lithium.jar"), root.join("mods/krypton.jar")]
        );
        assert_eq!(std::fs::read_to_string(root.join("eula.txt")).unwrap(), "eula=true\n");
        assert_eq!(image.identity, test_identity());
        assert_eq!(image.java.major, 17);
    }

    #[tokio::test]
    async fn never_writes_outside_the_root() {
        let fx = Fixture::new();
        let downloader = Downloader::new(reqwest::Client::new());
        let identities = FixedIdentity(test_identity());
        let locator = fx.locator();
        let provisioner = RuntimeProvisioner::new(&downloader, &identities, &locator, config());
        let token = LicenseGate::check(&fx.eula).await.unwrap();
        let root = fx.dir.path().join("servers").join("abc");

        let before = fx.snapshot();
        provisioner
            .provision(&root, &fx.variant(), &fx.mods(&["lithium"]), &token)
            .await
            .unwrap();
        let after = fx.snapshot();

        let servers_dir = fx.dir.path().join("servers");
        for (path, modified) in &after {
            let unchanged = before.get(path) == Some(modified);
            if !unchanged {
                assert!(
                    path.starts_with(&root) || *path == servers_dir,
                    "provisioning touched {path:?} outside {root:?}"
                );
            }
        }
        for path in before.keys() {
            assert!(after.contains_key(path), "provisioning removed {path:?}");
        }
    }

    #[tokio::test]
    async fn restaging_prunes_mods_dropped_from_the_set() {
        let fx = Fixture::new();
        let downloader = Downloader::new(reqwest::Client::new());
        let identities = FixedIdentity(test_identity());
        let locator = fx.locator();
        let provisioner = RuntimeProvisioner::new(&downloader, &identities, &locator, config());
        let token = LicenseGate::check(&fx.eula).await.unwrap();
        let root = fx.dir.path().join("servers").join("abc");

        provisioner
            .provision(&root, &fx.variant(), &fx.mods(&["lithium", "krypton"]), &token)
            .await
            .unwrap();
        std::fs::write(root.join("mods").join("hand-installed.jar"), b"x").unwrap();

        provisioner
            .provision(&root, &fx.variant(), &fx.mods(&["krypton"]), &token)
            .await
            .unwrap();

        assert!(!root.join("mods/lithium.jar").exists());
        assert!(root.join("mods/krypton.jar").exists());
        assert!(root.join("mods/hand-installed.jar").exists());
    }

    #[tokio::test]
    async fn missing_artifact_is_provision_failed() {
        let fx = Fixture::new();
        let downloader = Downloader::new(reqwest::Client::new());
        let identities = FixedIdentity(test_identity());
        let locator = fx.locator();
        let provisioner = RuntimeProvisioner::new(&downloader, &identities, &locator, config());
        let token = LicenseGate::check(&fx.eula).await.unwrap();

        let mut variant = fx.variant();
        variant.artifact = fx.artifact("missing.jar");
        let err = provisioner
            .provision(&fx.dir.path().join("servers/abc"), &variant, &ModSet::default(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::ProvisionFailed { .. }));
    }

    #[tokio::test]
    async fn mod_ids_cannot_escape_the_mods_dir() {
        let fx = Fixture::new();
        let downloader = Downloader::new(reqwest::Client::new());
        let identities = FixedIdentity(test_identity());
        let locator = fx.locator();
        let provisioner = RuntimeProvisioner::new(&downloader, &identities, &locator, config());
        let token = LicenseGate::check(&fx.eula).await.unwrap();

        let mods = ModSet::new(vec![ModRef {
            id: "../../evil".into(),
            artifact: fx.artifact("lithium.jar"),
        }])
        .unwrap();
        let err = provisioner
            .provision(&fx.dir.path().join("servers/abc"), &fx.variant(), &mods, &token)
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::ProvisionFailed { .. }));
        assert!(!fx.dir.path().join("evil.jar").exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn planted_links_are_replaced_not_followed() {
        let fx = Fixture::new();
        let downloader = Downloader::new(reqwest::Client::new());
        let identities = FixedIdentity(test_identity());
        let locator = fx.locator();
        let provisioner = RuntimeProvisioner::new(&downloader, &identities, &locator, config());
        let token = LicenseGate::check(&fx.eula).await.unwrap();
        let root = fx.dir.path().join("servers").join("abc");

        provisioner
            .provision(&root, &fx.variant(), &fx.mods(&["lithium"]), &token)
            .await
            .unwrap();

        let outside = fx.dir.path().join("outside-secret");
        std::fs::write(&outside, b"ORIGINAL").unwrap();
        for staged in ["server.jar", "eula.txt", "mods/lithium.jar", "mods/.staged-mods.json"] {
            let path = root.join(staged);
            std::fs::remove_file(&path).unwrap();
            std::os::unix::fs::symlink(&outside, &path).unwrap();
        }

        provisioner
            .provision(&root, &fx.variant(), &fx.mods(&["lithium"]), &token)
            .await
            .unwrap();

        assert_eq!(std::fs::read(&outside).unwrap(), b"ORIGINAL");
        assert_eq!(std::fs::read(root.join("server.jar")).unwrap(), b"server");
        assert_eq!(std::fs::read(root.join("mods/lithium.jar")).unwrap(), b"lithium");
        assert_eq!(std::fs::read_to_string(root.join("eula.txt")).unwrap(), "eula=true\n");
        let meta = std::fs::symlink_metadata(root.join("server.jar")).unwrap();
        assert!(!meta.file_type().is_symlink());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn linked_mods_dir_is_refused() {
        let fx = Fixture::new();
        let downloader = Downloader::new(reqwest::Client::new());
        let identities = FixedIdentity(test_identity());
        let locator = fx.locator();
        let provisioner = RuntimeProvisioner::new(&downloader, &identities, &locator, config());
        let token = LicenseGate::check(&fx.eula).await.unwrap();
        let root = fx.dir.path().join("servers").join("abc");

        let outside = fx.dir.path().join("elsewhere");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("lithium.jar"), b"keep").unwrap();
        std::fs::create_dir_all(&root).unwrap();
        std::os::unix::fs::symlink(&outside, root.join("mods")).unwrap();

        let err = provisioner
            .provision(&root, &fx.variant(), &fx.mods(&["lithium"]), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::ProvisionFailed { .. }));
        assert_eq!(std::fs::read(outside.join("lithium.jar")).unwrap(), b"keep");
        assert_eq!(std::fs::read_dir(&outside).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn root_identity_is_refused() {
        let fx = Fixture::new();
        let downloader = Downloader::new(reqwest::Client::new());
        let mut root_identity = test_identity();
        root_identity.uid = 0;
        let identities = FixedIdentity(root_identity);
        let locator = fx.locator();
        let provisioner = RuntimeProvisioner::new(&downloader, &identities, &locator, config());
        let token = LicenseGate::check(&fx.eula).await.unwrap();

        let err = provisioner
            .provision(&fx.dir.path().join("servers/abc"), &fx.variant(), &ModSet::default(), &token)
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::ProvisionFailed { .. }));
    }
}
