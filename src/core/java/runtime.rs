use std::collections::HashMap;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::downloader::{Checksum, Downloader};
use crate::core::error::{LauncherError, LauncherResult};

/// Archive (zip) a Java runtime track can be installed from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuntimeArchive {
    pub url: String,
    pub sha256: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JavaInstallation {
    pub path: PathBuf,
    pub version: String,
    pub major: u32,
    pub is_64bit: bool,
    pub vendor: String,
}

/// The runtime a staged server will be started with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JavaRuntime {
    pub java_bin: PathBuf,
    pub java_home: Option<PathBuf>,
    pub major: u32,
    pub version: String,
    pub vendor: String,
}

impl JavaRuntime {
    fn from_installation(info: JavaInstallation) -> Self {
        let java_home = info
            .path
            .parent()
            .filter(|bin| bin.file_name().and_then(|n| n.to_str()) == Some("bin"))
            .and_then(Path::parent)
            .map(Path::to_path_buf);
        Self {
            java_bin: info.path,
            java_home,
            major: info.major,
            version: info.version,
            vendor: info.vendor,
        }
    }
}

/// Inspects a candidate `java` binary.
pub trait JavaProbe: Send + Sync {
    fn probe(&self, path: &Path) -> Option<JavaInstallation>;
}

/// Runs `java -XshowSettings:properties -version` and parses the banner.
#[derive(Debug, Default, Clone, Copy)]
pub struct CommandProbe;

impl JavaProbe for CommandProbe {
    #[instrument(skip(self))]
    fn probe(&self, path: &Path) -> Option<JavaInstallation> {
        if !path.is_file() {
            return None;
        }
        let output = Command::new(path)
            .args(["-XshowSettings:properties", "-version"])
            .output()
            .ok()?;

        let banner = format!(
            "{}\n{}",
            String::from_utf8_lossy(&output.stderr),
            String::from_utf8_lossy(&output.stdout)
        );
        probe::parse_output(path, &banner)
    }
}

/// Finds a compatible runtime for a server, installing one into the
/// server root from a configured archive when nothing on the host fits.
pub struct JavaLocator {
    probe: Arc<dyn JavaProbe>,
    configured: Option<PathBuf>,
    archives: HashMap<u32, RuntimeArchive>,
    search_environment: bool,
}

impl JavaLocator {
    pub fn new(
        probe: Arc<dyn JavaProbe>,
        configured: Option<PathBuf>,
        archives: HashMap<u32, RuntimeArchive>,
    ) -> Self {
        Self {
            probe,
            configured,
            archives,
            search_environment: true,
        }
    }

    /// Skip `JAVA_HOME` and `PATH` when collecting candidates.
    pub fn without_environment(mut self) -> Self {
        self.search_environment = false;
        self
    }

    /// Candidate binaries in priority order: configured path, `JAVA_HOME`,
    /// `PATH`, then a runtime previously installed into `runtime_dir`.
    pub fn candidates(&self, runtime_dir: &Path) -> Vec<PathBuf> {
        let mut out: Vec<PathBuf> = Vec::new();
        let mut push = |path: PathBuf| {
            if !out.contains(&path) {
                out.push(path);
            }
        };

        if let Some(configured) = &self.configured {
            push(configured.clone());
        }
        if self.search_environment {
            if let Some(home) = std::env::var_os("JAVA_HOME") {
                push(PathBuf::from(home).join("bin").join(java_exe()));
            }
            if let Some(paths) = std::env::var_os("PATH") {
                for dir in std::env::split_paths(&paths) {
                    push(dir.join(java_exe()));
                }
            }
        }
        push(locate_java_binary(runtime_dir));
        out
    }

    #[instrument(skip(self, downloader))]
    pub async fn ensure(
        &self,
        required_major: u32,
        runtime_dir: &Path,
        downloader: &Downloader,
    ) -> LauncherResult<JavaRuntime> {
        for candidate in self.candidates(runtime_dir) {
            if let Some(info) = self.probe_async(candidate).await {
                if is_usable_for(&info, required_major) {
                    info!(
                        "Using Java {} ({}) at {:?} for required major {}",
                        info.version, info.vendor, info.path, required_major
                    );
                    return Ok(JavaRuntime::from_installation(info));
                }
            }
        }

        let track = runtime_track(required_major);
        let Some(archive) = self.archives.get(&track) else {
            return Err(LauncherError::Other(format!(
                "no compatible Java {required_major} runtime found and no runtime archive configured for track {track}"
            )));
        };

        self.install_archive(archive, runtime_dir, downloader).await?;

        let java_bin = locate_java_binary(runtime_dir);
        match self.probe_async(java_bin.clone()).await {
            Some(info) if is_usable_for(&info, required_major) => {
                Ok(JavaRuntime::from_installation(info))
            }
            Some(info) => Err(LauncherError::Other(format!(
                "installed runtime at {:?} reports Java {} (64-bit: {}), required {}",
                java_bin, info.version, info.is_64bit, required_major
            ))),
            None => Err(LauncherError::Other(format!(
                "installed runtime at {:?} does not run",
                java_bin
            ))),
        }
    }

    async fn probe_async(&self, candidate: PathBuf) -> Option<JavaInstallation> {
        let probe = Arc::clone(&self.probe);
        tokio::task::spawn_blocking(move || probe.probe(&candidate))
            .await
            .ok()
            .flatten()
    }

    async fn install_archive(
        &self,
        archive: &RuntimeArchive,
        runtime_dir: &Path,
        downloader: &Downloader,
    ) -> LauncherResult<()> {
        let zip_path = runtime_dir.with_extension("zip");
        info!("Installing Java runtime from {} into {:?}", archive.url, runtime_dir);
        downloader
            .download_file(&archive.url, &zip_path, Some(Checksum::Sha256(&archive.sha256)))
            .await?;

        let zip_for_task = zip_path.clone();
        let root_for_task = runtime_dir.to_path_buf();
        tokio::task::spawn_blocking(move || extract::extract_zip_file(&zip_for_task, &root_for_task))
            .await
            .map_err(|e| LauncherError::Other(format!("runtime extraction task failed: {e}")))??;

        if let Err(e) = tokio::fs::remove_file(&zip_path).await {
            warn!("Could not remove runtime archive {:?}: {}", zip_path, e);
        }
        ensure_java_executable(runtime_dir)
    }
}

fn is_usable_for(info: &JavaInstallation, required_major: u32) -> bool {
    info.is_64bit && is_java_compatible_major(info.major, required_major)
}

pub fn runtime_track(required_major: u32) -> u32 {
    if required_major <= 8 {
        8
    } else if required_major >= 21 {
        21
    } else {
        17
    }
}

pub fn required_java_for_minecraft_version(minecraft_version: &str) -> u32 {
    let lower = minecraft_version.to_ascii_lowercase();
    if let Some(week_pos) = lower.find('w') {
        let year_hint = &lower[..week_pos];
        if year_hint.len() >= 2 {
            let year_suffix = &year_hint[year_hint.len() - 2..];
            if let Ok(snapshot_year) = year_suffix.parse::<u32>() {
                if snapshot_year >= 24 {
                    return 21;
                }
                return 17;
            }
        }
    }

    let mut parts = minecraft_version.split('.');
    let major = parts.next().and_then(leading_number).unwrap_or(1);
    let minor = parts.next().and_then(leading_number).unwrap_or(20);
    // "1.21-pre1" ends after the minor; a suffix never carries a patch.
    let patch = parts.next().and_then(leading_number).unwrap_or(0);

    if major > 1 || minor >= 21 || (minor == 20 && patch >= 5) {
        21
    } else if minor >= 17 {
        17
    } else {
        8
    }
}

/// Digits at the start of a version part: "21-pre1" -> 21, "4-rc2" -> 4.
fn leading_number(part: &str) -> Option<u32> {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    part[..end].parse().ok()
}

pub fn is_java_compatible_major(installed_major: u32, required_major: u32) -> bool {
    installed_major >= required_major
        && runtime_track(installed_major) == runtime_track(required_major)
}

fn parse_major_version(version: &str) -> u32 {
    let first_part = version.split('.').next().unwrap_or("0");
    let major: u32 = first_part.parse().unwrap_or(0);

    if major == 1 {
        version
            .split('.')
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or(major)
    } else {
        major
    }
}

fn java_exe() -> &'static str {
    if cfg!(windows) { "java.exe" } else { "java" }
}

pub fn locate_java_binary(runtime_root: &Path) -> PathBuf {
    let primary = runtime_root.join("bin").join(java_exe());
    if primary.exists() {
        return primary;
    }

    let mac_layout = runtime_root
        .join("Contents")
        .join("Home")
        .join("bin")
        .join(java_exe());
    if mac_layout.exists() {
        return mac_layout;
    }

    find_java_binary_recursive(runtime_root).unwrap_or(primary)
}

fn find_java_binary_recursive(root: &Path) -> Option<PathBuf> {
    let entries = std::fs::read_dir(root).ok()?;
    for entry in entries.filter_map(Result::ok) {
        let path = entry.path();
        let file_type = entry.file_type().ok()?;

        if file_type.is_file() {
            if path.file_name().and_then(|n| n.to_str()) == Some(java_exe()) {
                return Some(path);
            }
        } else if file_type.is_dir() {
            if let Some(found) = find_java_binary_recursive(&path) {
                return Some(found);
            }
        }
    }
    None
}

fn ensure_java_executable(runtime_root: &Path) -> LauncherResult<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let java_bin = locate_java_binary(runtime_root);
        if java_bin.exists() {
            let mut perms = std::fs::metadata(&java_bin)
                .map_err(|e| LauncherError::io(&java_bin, e))?
                .permissions();
            perms.set_mode(0o755);
            std::fs::set_permissions(&java_bin, perms)
                .map_err(|e| LauncherError::io(&java_bin, e))?;
        }
    }
    #[cfg(not(unix))]
    let _ = runtime_root;
    Ok(())
}

mod probe {
    use super::*;

    pub fn parse_output(path: &Path, version_output: &str) -> Option<JavaInstallation> {
        debug!(
            "Probing {:?}: {}",
            path,
            version_output.lines().next().unwrap_or("")
        );

        let version_str = parse_version_string(version_output)?;
        let major = parse_major_version(&version_str);
        let lower_output = version_output.to_ascii_lowercase();
        let is_64bit = lower_output.contains("sun.arch.data.model = 64")
            || lower_output.contains("os.arch = amd64")
            || lower_output.contains("os.arch = x86_64")
            || lower_output.contains("os.arch = aarch64");
        let vendor = parse_vendor(version_output);

        let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

        Some(JavaInstallation {
            path: canonical,
            version: version_str,
            major,
            is_64bit,
            vendor,
        })
    }

    fn parse_version_string(output: &str) -> Option<String> {
        for line in output.lines() {
            if let Some(start) = line.find('"') {
                if let Some(end) = line[start + 1..].find('"') {
                    return Some(line[start + 1..start + 1 + end].to_string());
                }
            }
        }
        None
    }

    fn parse_vendor(output: &str) -> String {
        for line in output.lines() {
            if line.contains("Temurin") {
                return "Temurin".to_string();
            }
            if line.contains("Adoptium") {
                return "Adoptium".to_string();
            }
            if line.contains("OpenJDK") {
                return "OpenJDK".to_string();
            }
        }
        "unknown".to_string()
    }
}

mod extract {
    use super::*;

    /// Unpack a runtime zip into `runtime_root`, dropping the archive's
    /// top-level directory. Entries that would escape the root are refused.
    pub fn extract_zip_file(zip_path: &Path, runtime_root: &Path) -> LauncherResult<()> {
        let zip_file = std::fs::File::open(zip_path).map_err(|e| LauncherError::io(zip_path, e))?;
        let mut archive = zip::ZipArchive::new(zip_file)?;

        if runtime_root.exists() {
            std::fs::remove_dir_all(runtime_root).map_err(|e| LauncherError::io(runtime_root, e))?;
        }
        std::fs::create_dir_all(runtime_root).map_err(|e| LauncherError::io(runtime_root, e))?;

        for index in 0..archive.len() {
            let mut zipped = archive.by_index(index)?;
            let mut rel_path = PathBuf::new();

            let enclosed_name = zipped
                .enclosed_name()
                .ok_or_else(|| LauncherError::Other("Invalid zip entry path".into()))?;
            let mut components = enclosed_name.components();
            let _ = components.next();
            for component in components {
                if let Component::Normal(part) = component {
                    rel_path.push(part);
                }
            }

            if rel_path.as_os_str().is_empty() {
                continue;
            }

            let out_path = runtime_root.join(rel_path);
            if zipped.is_dir() {
                std::fs::create_dir_all(&out_path).map_err(|e| LauncherError::io(&out_path, e))?;
                continue;
            }

            if let Some(parent) = out_path.parent() {
                std::fs::create_dir_all(parent).map_err(|e| LauncherError::io(parent, e))?;
            }

            let mut out =
                std::fs::File::create(&out_path).map_err(|e| LauncherError::io(&out_path, e))?;
            std::io::copy(&mut zipped, &mut out).map_err(|e| LauncherError::io(&out_path, e))?;
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    /// Probe that reports a fixed installation for every existing path.
    pub(crate) struct FixedProbe(pub u32);

    impl JavaProbe for FixedProbe {
        fn probe(&self, path: &Path) -> Option<JavaInstallation> {
            path.exists().then(|| JavaInstallation {
                path: path.to_path_buf(),
                version: format!("{}.0.1", self.0),
                major: self.0,
                is_64bit: true,
                vendor: "Temurin".into(),
            })
        }
    }

    #[test]
    fn test_parse_major_modern() {
        assert_eq!(parse_major_version("17.0.8"), 17);
        assert_eq!(parse_major_version("21.0.1"), 21);
    }

    #[test]
    fn test_parse_major_legacy() {
        assert_eq!(parse_major_version("1.8.0_392"), 8);
    }

    #[test]
    fn java_required_by_minecraft_version() {
        assert_eq!(required_java_for_minecraft_version("1.16.5"), 8);
        assert_eq!(required_java_for_minecraft_version("1.20.4"), 17);
        assert_eq!(required_java_for_minecraft_version("1.20.5"), 21);
        assert_eq!(required_java_for_minecraft_version("24w03a"), 21);
    }

    #[test]
    fn java_required_by_pre_release_versions() {
        assert_eq!(required_java_for_minecraft_version("1.21-pre1"), 21);
        assert_eq!(required_java_for_minecraft_version("1.20.5-rc2"), 21);
        assert_eq!(required_java_for_minecraft_version("1.17-rc1"), 17);
        assert_eq!(required_java_for_minecraft_version("1.16.5-rc1"), 8);
    }

    #[test]
    fn java_runtime_track_mapping() {
        assert_eq!(runtime_track(8), 8);
        assert_eq!(runtime_track(11), 17);
        assert_eq!(runtime_track(17), 17);
        assert_eq!(runtime_track(21), 21);
    }

    #[test]
    fn compatibility_stays_within_track() {
        assert!(is_java_compatible_major(17, 17));
        assert!(!is_java_compatible_major(21, 17));
        assert!(!is_java_compatible_major(8, 17));
    }

    #[test]
    fn parses_temurin_banner() {
        let banner = "Property settings:\n    os.arch = amd64\n    sun.arch.data.model = 64\n\nopenjdk version \"17.0.9\" 2023-10-17\nOpenJDK Runtime Environment Temurin-17.0.9+9 (build 17.0.9+9)\n";
        let info = probe::parse_output(Path::new("/nonexistent/java"), banner).unwrap();
        assert_eq!(info.major, 17);
        assert_eq!(info.version, "17.0.9");
        assert!(info.is_64bit);
        assert_eq!(info.vendor, "Temurin");
    }

    #[test]
    fn banner_without_version_is_rejected() {
        assert!(probe::parse_output(Path::new("java"), "command not found").is_none());
    }

    #[test]
    fn java_home_derived_from_bin_dir() {
        let runtime = JavaRuntime::from_installation(JavaInstallation {
            path: PathBuf::from("/opt/jdk-17/bin/java"),
            version: "17.0.9".into(),
            major: 17,
            is_64bit: true,
            vendor: "Temurin".into(),
        });
        assert_eq!(runtime.java_home, Some(PathBuf::from("/opt/jdk-17")));
    }

    #[tokio::test]
    async fn ensure_prefers_configured_binary() {
        let dir = tempfile::tempdir().unwrap();
        let java = dir.path().join("jdk").join("bin").join(java_exe());
        std::fs::create_dir_all(java.parent().unwrap()).unwrap();
        std::fs::write(&java, b"").unwrap();

        let locator = JavaLocator::new(Arc::new(FixedProbe(17)), Some(java.clone()), HashMap::new())
            .without_environment();
        let downloader = Downloader::new(reqwest::Client::new());
        let runtime = locator
            .ensure(17, &dir.path().join("runtime"), &downloader)
            .await
            .unwrap();
        assert_eq!(runtime.java_bin, java);
        assert_eq!(runtime.major, 17);
    }

    #[tokio::test]
    async fn ensure_fails_without_candidates_or_archive() {
        let dir = tempfile::tempdir().unwrap();
        let locator =
            JavaLocator::new(Arc::new(FixedProbe(17)), None, HashMap::new()).without_environment();
        let downloader = Downloader::new(reqwest::Client::new());
        let err = locator
            .ensure(17, &dir.path().join("runtime"), &downloader)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no runtime archive configured"));
    }

    #[tokio::test]
    async fn incompatible_runtime_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let java = dir.path().join("java");
        std::fs::write(&java, b"").unwrap();
        let locator = JavaLocator::new(Arc::new(FixedProbe(8)), Some(java), HashMap::new())
            .without_environment();
        let downloader = Downloader::new(reqwest::Client::new());
        assert!(
            locator
                .ensure(17, &dir.path().join("runtime"), &downloader)
                .await
                .is_err()
        );
    }

    #[test]
    fn extract_strips_top_level_directory() {
        let dir = tempfile::tempdir().unwrap();
        let zip_path = dir.path().join("jdk.zip");
        {
            let file = std::fs::File::create(&zip_path).unwrap();
            let mut writer = zip::ZipWriter::new(file);
            let options = zip::write::SimpleFileOptions::default();
            writer.add_directory("jdk-17.0.9+9/bin/", options).unwrap();
            writer.start_file("jdk-17.0.9+9/bin/java", options).unwrap();
            writer.write_all(b"#!/bin/sh\n").unwrap();
            writer.start_file("jdk-17.0.9+9/release", options).unwrap();
            writer.write_all(b"JAVA_VERSION=\"17.0.9\"\n").unwrap();
            writer.finish().unwrap();
        }

        let runtime_root = dir.path().join("runtime");
        extract::extract_zip_file(&zip_path, &runtime_root).unwrap();
        assert!(runtime_root.join("bin").join("java").is_file());
        assert!(runtime_root.join("release").is_file());
        assert_eq!(locate_java_binary(&runtime_root), runtime_root.join("bin").join("java"));
    }
}
