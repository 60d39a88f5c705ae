use std::path::{Component, Path, PathBuf};

use crate::core::error::{LauncherError, LauncherResult};

/// A directory that every provisioning write is confined to.
///
/// Paths are only ever produced through [`ScopedRoot::join`], which accepts
/// plain relative components and nothing else. The root's contents belong
/// to the service identity, so directories inside it that turned into
/// symbolic links are refused as well. A link in the final position is left
/// to the writer, which replaces it with `rename`.
#[derive(Debug, Clone)]
pub struct ScopedRoot {
    root: PathBuf,
}

impl ScopedRoot {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// Path of a file under the root. Every existing directory on the way
    /// must be a real directory.
    pub fn join(&self, relative: impl AsRef<Path>) -> LauncherResult<PathBuf> {
        self.resolve(relative.as_ref(), false)
    }

    /// Like [`ScopedRoot::join`], but the last component must not be a
    /// symbolic link either.
    pub fn join_dir(&self, relative: impl AsRef<Path>) -> LauncherResult<PathBuf> {
        self.resolve(relative.as_ref(), true)
    }

    pub async fn create_dir(&self, relative: impl AsRef<Path>) -> LauncherResult<PathBuf> {
        let path = self.join_dir(relative)?;
        tokio::fs::create_dir_all(&path)
            .await
            .map_err(|e| LauncherError::io(&path, e))?;
        Ok(path)
    }
}

impl ScopedRoot {
    fn resolve(&self, relative: &Path, include_last: bool) -> LauncherResult<PathBuf> {
        if relative.as_os_str().is_empty() {
            return Err(escape_error(relative));
        }
        let mut normal = Vec::new();
        for component in relative.components() {
            match component {
                Component::Normal(part) => normal.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(escape_error(relative));
                }
            }
        }

        let checked = if include_last {
            normal.len()
        } else {
            normal.len().saturating_sub(1)
        };
        let mut current = self.root.clone();
        for part in &normal[..checked] {
            current.push(part);
            if is_symlink(&current) {
                return Err(LauncherError::Other(format!(
                    "refusing to write {:?}: {:?} is a symbolic link",
                    relative, current
                )));
            }
        }
        Ok(self.root.join(relative))
    }
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|meta| meta.file_type().is_symlink())
        .unwrap_or(false)
}

fn escape_error(relative: &Path) -> LauncherError {
    LauncherError::Other(format!(
        "refusing to write {:?}: path leaves the server root",
        relative
    ))
}
