pub mod client;

pub use client::{ArtifactRef, Checksum, Downloader, copy_file, sha1_file, write_file};
