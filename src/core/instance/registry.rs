// ─── Instance Registry ───
// Tracks the supervisors of instances running in this process. Each one is
// an independent task; the registry only routes operator requests to them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tracing::info;

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::pipeline::{LaunchPipeline, LaunchRequest};
use crate::core::supervisor::{LogLine, SupervisorHandle, SupervisorState};

use super::model::Instance;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningInstance {
    pub id: String,
    pub name: String,
    pub owner: String,
    pub variant_id: String,
    pub state: SupervisorState,
    pub pid: Option<u32>,
    pub restarts: u32,
}

struct Entry {
    instance: Instance,
    handle: SupervisorHandle,
}

impl Entry {
    fn matches(&self, id_or_name: &str) -> bool {
        self.instance.id == id_or_name || self.instance.name == id_or_name
    }

    fn summary(&self) -> RunningInstance {
        RunningInstance {
            id: self.instance.id.clone(),
            name: self.instance.name.clone(),
            owner: self.instance.owner.clone(),
            variant_id: self.instance.variant_id.clone(),
            state: self.handle.state(),
            pid: self.handle.pid(),
            restarts: self.handle.restarts(),
        }
    }
}

#[derive(Default)]
struct Inner {
    running: HashMap<String, Entry>,
    starting: HashSet<String>,
}

pub struct InstanceRegistry {
    pipeline: Arc<LaunchPipeline>,
    inner: Mutex<Inner>,
}

impl InstanceRegistry {
    pub fn new(pipeline: Arc<LaunchPipeline>) -> Self {
        Self {
            pipeline,
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Run the whole pipeline for `request` and keep its supervisor.
    pub async fn launch(&self, request: &LaunchRequest) -> LauncherResult<RunningInstance> {
        {
            let mut inner = self.inner.lock().await;
            let busy = inner.starting.contains(&request.name)
                || inner
                    .running
                    .values()
                    .any(|e| e.instance.name == request.name && !e.handle.is_finished());
            if busy {
                return Err(LauncherError::Other(format!(
                    "instance '{}' is already running",
                    request.name
                )));
            }
            inner.starting.insert(request.name.clone());
        }

        let launched = self.pipeline.launch(request).await;

        let mut inner = self.inner.lock().await;
        inner.starting.remove(&request.name);
        let (instance, handle) = launched?;
        let entry = Entry { instance, handle };
        let summary = entry.summary();
        inner.running.insert(summary.id.clone(), entry);
        Ok(summary)
    }

    pub async fn list(&self) -> Vec<RunningInstance> {
        let inner = self.inner.lock().await;
        let mut out: Vec<RunningInstance> = inner.running.values().map(Entry::summary).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name));
        out
    }

    pub async fn subscribe(&self, id_or_name: &str) -> LauncherResult<watch::Receiver<SupervisorState>> {
        let inner = self.inner.lock().await;
        Ok(find(&inner, id_or_name)?.handle.subscribe())
    }

    pub async fn send_command(&self, id_or_name: &str, line: &str) -> LauncherResult<()> {
        let inner = self.inner.lock().await;
        find(&inner, id_or_name)?.handle.send_command(line).await
    }

    pub async fn logs(&self, id_or_name: &str, lines: usize) -> LauncherResult<Vec<LogLine>> {
        let inner = self.inner.lock().await;
        Ok(find(&inner, id_or_name)?.handle.logs(lines))
    }

    /// Remove an instance's supervisor and wait for its outcome, stopping it
    /// first when `stop` is set.
    pub async fn finish(&self, id_or_name: &str, stop: bool) -> LauncherResult<()> {
        let entry = {
            let mut inner = self.inner.lock().await;
            let id = find(&inner, id_or_name)?.instance.id.clone();
            inner
                .running
                .remove(&id)
                .ok_or_else(|| LauncherError::InstanceNotFound(id_or_name.to_string()))?
        };
        if stop {
            info!("Stopping instance '{}'", entry.instance.name);
            entry.handle.stop_and_wait().await
        } else {
            entry.handle.wait().await
        }
    }

    pub async fn stop(&self, id_or_name: &str) -> LauncherResult<()> {
        self.finish(id_or_name, true).await
    }

    /// Stop every instance concurrently. Returns each instance's outcome.
    pub async fn stop_all(&self) -> Vec<(String, LauncherResult<()>)> {
        let entries: Vec<Entry> = {
            let mut inner = self.inner.lock().await;
            inner.running.drain().map(|(_, entry)| entry).collect()
        };
        join_all(entries.into_iter().map(|entry| async move {
            let name = entry.instance.name.clone();
            (name, entry.handle.stop_and_wait().await)
        }))
        .await
    }
}

fn find<'a>(inner: &'a Inner, id_or_name: &str) -> LauncherResult<&'a Entry> {
    inner
        .running
        .values()
        .find(|e| e.matches(id_or_name))
        .ok_or_else(|| LauncherError::InstanceNotFound(id_or_name.to_string()))
}
