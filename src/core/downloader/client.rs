use std::path::{Path, PathBuf};
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tokio::fs::File;
use tracing::{debug, info, warn};

use crate::core::error::{LauncherError, LauncherResult};

const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE: Duration = Duration::from_millis(250);

/// Where an artifact comes from: a file already on this host, or a URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArtifactRef {
    Remote {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sha1: Option<String>,
    },
    Local {
        path: PathBuf,
    },
}

impl ArtifactRef {
    /// Last path segment of the URL or path, used to name ad-hoc mods.
    pub fn file_name(&self) -> Option<String> {
        match self {
            ArtifactRef::Remote { url, .. } => url
                .split(['?', '#'])
                .next()
                .and_then(|u| u.rsplit('/').next())
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            ArtifactRef::Local { path } => path
                .file_name()
                .map(|n| n.to_string_lossy().to_string()),
        }
    }

    fn expected_sha1(&self) -> Option<&str> {
        match self {
            ArtifactRef::Remote { sha1, .. } => sha1.as_deref(),
            ArtifactRef::Local { .. } => None,
        }
    }
}

impl std::fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArtifactRef::Remote { url, .. } => write!(f, "{url}"),
            ArtifactRef::Local { path } => write!(f, "{}", path.display()),
        }
    }
}

/// Digest an artifact is checked against after transfer.
#[derive(Debug, Clone, Copy)]
pub enum Checksum<'a> {
    Sha1(&'a str),
    Sha256(&'a str),
}

enum StreamHasher {
    Sha1(Sha1),
    Sha256(Sha256),
}

impl StreamHasher {
    fn for_checksum(checksum: Checksum<'_>) -> Self {
        match checksum {
            Checksum::Sha1(_) => StreamHasher::Sha1(Sha1::new()),
            Checksum::Sha256(_) => StreamHasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, chunk: &[u8]) {
        match self {
            StreamHasher::Sha1(h) => h.update(chunk),
            StreamHasher::Sha256(h) => h.update(chunk),
        }
    }

    fn finish(self) -> String {
        match self {
            StreamHasher::Sha1(h) => hex::encode(h.finalize()),
            StreamHasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// Artifact fetcher with bounded retries for transient failures and
/// checksum validation before the destination file appears.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: Client,
    retries: u32,
    retry_base: Duration,
}

impl Downloader {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retries: DEFAULT_RETRIES,
            retry_base: DEFAULT_RETRY_BASE,
        }
    }

    pub fn with_retries(mut self, retries: u32, retry_base: Duration) -> Self {
        self.retries = retries;
        self.retry_base = retry_base;
        self
    }

    /// Place `artifact` at `dest`.
    ///
    /// Local artifacts are copied. Remote artifacts are downloaded unless
    /// `dest` already is a regular file with the expected SHA-1.
    pub async fn fetch(&self, artifact: &ArtifactRef, dest: &Path) -> LauncherResult<()> {
        if let Some(expected) = artifact.expected_sha1() {
            if is_regular_file(dest).await && Self::validate_sha1(dest, expected).await? {
                debug!("Reusing staged artifact {:?}", dest);
                return Ok(());
            }
        }

        match artifact {
            ArtifactRef::Local { path } => copy_file(path, dest).await,
            ArtifactRef::Remote { url, sha1 } => {
                self.download_file(url, dest, sha1.as_deref().map(Checksum::Sha1))
                    .await
            }
        }
    }

    // ── Single file download ────────────────────────────

    /// Stream `url` into `dest`, validating the checksum on the fly.
    ///
    /// Writes to a `.part` sibling first and renames on success, so a
    /// failed or corrupt transfer never leaves a file at `dest`. Transient
    /// failures, including a body cut off mid-transfer, restart the whole
    /// request.
    pub async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        checksum: Option<Checksum<'_>>,
    ) -> LauncherResult<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| LauncherError::io(parent, e))?;
        }

        let part = part_path(dest);
        let mut attempt = 0;
        loop {
            let err = match self.transfer(url, dest, &part, checksum).await {
                Ok(written) => {
                    tokio::fs::rename(&part, dest)
                        .await
                        .map_err(|e| LauncherError::io(dest, e))?;
                    info!("Downloaded {} ({} bytes) -> {:?}", url, written, dest);
                    return Ok(());
                }
                Err(err) => err,
            };

            let _ = tokio::fs::remove_file(&part).await;
            if attempt >= self.retries || !is_transient(&err) {
                return Err(err);
            }
            attempt += 1;
            let delay = self.retry_base * 2_u32.pow(attempt);
            warn!(
                "Transient failure fetching {} (attempt {}/{}): {}. Retrying in {:?}",
                url,
                attempt,
                self.retries + 1,
                err,
                delay
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// One request streamed into `part`. Returns the number of bytes written.
    async fn transfer(
        &self,
        url: &str,
        dest: &Path,
        part: &Path,
        checksum: Option<Checksum<'_>>,
    ) -> LauncherResult<u64> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(LauncherError::DownloadFailed {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let mut hasher = checksum.map(StreamHasher::for_checksum);
        let mut written = 0_u64;
        let mut file = create_part(part).await?;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            if let Some(h) = hasher.as_mut() {
                h.update(&chunk);
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| LauncherError::io(part, e))?;
            written += chunk.len() as u64;
        }
        file.flush().await.map_err(|e| LauncherError::io(part, e))?;

        if let (Some(h), Some(expected)) = (hasher, checksum) {
            check_digest(dest, expected, h.finish())?;
        }
        Ok(written)
    }

    /// Validate an existing file's SHA-1.
    pub async fn validate_sha1(path: &Path, expected: &str) -> LauncherResult<bool> {
        let path = path.to_path_buf();
        let actual = tokio::task::spawn_blocking(move || sha1_file(&path))
            .await
            .map_err(|e| LauncherError::Other(format!("hash task failed: {e}")))??;
        Ok(actual.eq_ignore_ascii_case(expected))
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

fn is_transient(err: &LauncherError) -> bool {
    match err {
        LauncherError::Http(e) => !e.is_builder() && !e.is_redirect(),
        LauncherError::DownloadFailed { status, .. } => StatusCode::from_u16(*status)
            .map(is_transient_status)
            .unwrap_or(false),
        _ => false,
    }
}

fn check_digest(dest: &Path, expected: Checksum<'_>, actual: String) -> LauncherResult<()> {
    match expected {
        Checksum::Sha1(expected) if !actual.eq_ignore_ascii_case(expected) => {
            Err(LauncherError::Sha1Mismatch {
                path: dest.to_path_buf(),
                expected: expected.to_string(),
                actual,
            })
        }
        Checksum::Sha256(expected) if !actual.eq_ignore_ascii_case(expected) => {
            Err(LauncherError::Sha256Mismatch {
                path: dest.to_path_buf(),
                expected: expected.to_string(),
                actual,
            })
        }
        _ => Ok(()),
    }
}

fn part_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    dest.with_file_name(name)
}

/// Open a fresh `.part` file. Whatever sits at `part` is unlinked first
/// and never followed.
async fn create_part(part: &Path) -> LauncherResult<File> {
    match tokio::fs::remove_file(part).await {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(LauncherError::io(part, e)),
    }
    tokio::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(part)
        .await
        .map_err(|e| LauncherError::io(part, e))
}

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::symlink_metadata(path)
        .await
        .map(|meta| meta.file_type().is_file())
        .unwrap_or(false)
}

/// Copy `source` to `dest` through a `.part` sibling. A link at `dest` is
/// replaced, not written through.
pub async fn copy_file(source: &Path, dest: &Path) -> LauncherResult<()> {
    let metadata = tokio::fs::metadata(source)
        .await
        .map_err(|e| LauncherError::io(source, e))?;
    if !metadata.is_file() {
        return Err(LauncherError::Other(format!(
            "artifact {:?} is not a regular file",
            source
        )));
    }
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| LauncherError::io(parent, e))?;
    }

    let part = part_path(dest);
    let copied = async {
        let mut input = File::open(source)
            .await
            .map_err(|e| LauncherError::io(source, e))?;
        let mut output = create_part(&part).await?;
        tokio::io::copy(&mut input, &mut output)
            .await
            .map_err(|e| LauncherError::io(&part, e))?;
        output.flush().await.map_err(|e| LauncherError::io(&part, e))?;
        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| LauncherError::io(dest, e))
    }
    .await;
    if copied.is_err() {
        let _ = tokio::fs::remove_file(&part).await;
    }
    copied?;
    debug!("Copied {:?} -> {:?}", source, dest);
    Ok(())
}

/// Write `bytes` to `dest` through a `.part` sibling.
pub async fn write_file(dest: &Path, bytes: &[u8]) -> LauncherResult<()> {
    let part = part_path(dest);
    let written = async {
        let mut output = create_part(&part).await?;
        output
            .write_all(bytes)
            .await
            .map_err(|e| LauncherError::io(&part, e))?;
        output.flush().await.map_err(|e| LauncherError::io(&part, e))?;
        tokio::fs::rename(&part, dest)
            .await
            .map_err(|e| LauncherError::io(dest, e))
    }
    .await;
    if written.is_err() {
        let _ = tokio::fs::remove_file(&part).await;
    }
    written
}

pub fn sha1_file(path: &Path) -> LauncherResult<String> {
    let bytes = std::fs::read(path).map_err(|e| LauncherError::io(path, e))?;
    Ok(hex::encode(Sha1::digest(&bytes)))
}
