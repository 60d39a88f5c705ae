// ─── Operator Commands ───
// One function per CLI subcommand. Each takes the loaded `AppState` and
// returns data for the caller to print.

use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use crate::core::error::LauncherResult;
use crate::core::instance::{Instance, InstanceRegistry};
use crate::core::launch::LaunchPlan;
use crate::core::license::LicenseGate;
use crate::core::pipeline::{LaunchPipeline, LaunchRequest};
use crate::core::state::{AppState, LauncherSettings};
use crate::core::supervisor::SupervisorState;
use crate::core::variant::{SyncOptions, sync_vanilla};
use crate::core::version::VERSION_MANIFEST_URL;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VariantSummary {
    pub id: String,
    pub aliases: Vec<String>,
    pub java_major: u32,
    pub mods_dir: String,
}

/// Run the pipeline and supervise the server until it ends or the operator
/// stops it. Lines typed on stdin are forwarded to the server console.
pub async fn launch(state: &AppState, request: LaunchRequest) -> LauncherResult<()> {
    let registry = InstanceRegistry::new(Arc::new(LaunchPipeline::from_state(state)));
    let running = registry.launch(&request).await?;
    info!(
        "Instance '{}' ({}) launched from {}",
        running.name, running.id, running.variant_id
    );

    let mut rx = registry.subscribe(&running.id).await?;
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                return registry.stop(&running.id).await;
            }
            _ = rx.wait_for(SupervisorState::is_terminal) => {
                return registry.finish(&running.id, false).await;
            }
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => {
                    if let Err(e) = registry.send_command(&running.id, &line).await {
                        warn!("Console command dropped: {}", e);
                    }
                }
                Ok(None) | Err(_) => stdin_open = false,
            },
        }
    }
}

/// Stages 1–4 only. The staged root is left in place.
pub async fn plan(state: &AppState, request: LaunchRequest) -> LauncherResult<LaunchPlan> {
    let pipeline = LaunchPipeline::from_state(state);
    Ok(pipeline.prepare(&request).await?.plan)
}

pub fn list_variants(state: &AppState) -> LauncherResult<Vec<VariantSummary>> {
    let pipeline = LaunchPipeline::from_state(state);
    state
        .catalog
        .variants
        .iter()
        .map(|entry| {
            let resolved = pipeline.resolver().resolve_variant(&entry.id)?;
            Ok(VariantSummary {
                id: entry.id.clone(),
                aliases: entry.aliases.clone(),
                java_major: resolved.java_major,
                mods_dir: resolved.mods_dir,
            })
        })
        .collect()
}

pub async fn accept_eula(state: &AppState) -> LauncherResult<PathBuf> {
    let path = state.eula_path();
    LicenseGate::write_acceptance(&path).await?;
    Ok(path)
}

/// Refresh the vanilla entries of the catalog file. Returns how many were written.
pub async fn sync_catalog(state: &AppState, options: &SyncOptions) -> LauncherResult<usize> {
    let mut catalog = (*state.catalog).clone();
    let written = sync_vanilla(&state.http_client, VERSION_MANIFEST_URL, &mut catalog, options).await?;
    catalog.save(&state.catalog_path()).await?;
    info!("Catalog {:?} now has {} variants", state.catalog_path(), catalog.variants.len());
    Ok(written)
}

pub async fn list_instances(state: &AppState) -> LauncherResult<Vec<Instance>> {
    state.instance_manager.list().await
}

pub async fn delete_instance(state: &AppState, id_or_name: &str) -> LauncherResult<Instance> {
    let instance = state.instance_manager.find(id_or_name).await?;
    state.instance_manager.delete(&instance.id).await?;
    Ok(instance)
}

/// Effective settings, optionally written back so the operator can edit them.
pub fn settings(state: &AppState, write: bool) -> LauncherResult<LauncherSettings> {
    if write {
        state.save_settings()?;
        info!("Wrote settings to {:?}", state.data_dir);
    }
    Ok(state.settings.clone())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
            }
            Err(e) => {
                warn!("Cannot listen for SIGTERM: {}", e);
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}
