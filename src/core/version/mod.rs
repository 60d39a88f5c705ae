pub mod manifest;
pub mod version_file;

pub use manifest::{VERSION_MANIFEST_URL, VersionEntry, VersionManifest};
pub use version_file::{DownloadArtifact, VersionJson};
