// ─── ServerLauncher Core ───
// Build and launch pipeline for JVM game servers.
//
// Architecture:
//   core/
//     variant/    — Catalog, variant/mod resolution, Mojang catalog sync
//     license/    — EULA acceptance gate
//     provision/  — Isolated server roots, service identity, staging
//     java/       — Java runtime discovery and installation
//     launch/     — Launch planning (heap, port, arguments)
//     supervisor/ — Process spawning, restart policy, console
//     instance/   — Persisted instances and the running registry
//     downloader/ — Artifact fetches with checksum validation
//     version/    — Mojang manifest and version JSON
//     state/      — Settings and per-invocation application state

pub mod downloader;
pub mod error;
pub mod http;
pub mod instance;
pub mod java;
pub mod launch;
pub mod license;
pub mod pipeline;
pub mod provision;
pub mod state;
pub mod supervisor;
pub mod variant;
pub mod version;
