// ─── Launch Pipeline ───
// resolve → license → provision → plan → supervise, strictly in that order.
// Any stage failing aborts the request before a process is started.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, instrument, warn};

use crate::core::downloader::Downloader;
use crate::core::error::LauncherResult;
use crate::core::instance::{Instance, InstanceManager, InstanceState};
use crate::core::java::{CommandProbe, JavaLocator};
use crate::core::launch::{LaunchDefaults, LaunchOverrides, LaunchPlan, LaunchPlanner};
use crate::core::license::LicenseGate;
use crate::core::provision::{
    IdentityProvider, ProvisionerConfig, RuntimeImage, RuntimeProvisioner, SystemIdentityProvider,
};
use crate::core::state::AppState;
use crate::core::supervisor::{ProcessSupervisor, SupervisorHandle, SupervisorState, TokioSpawner};
use crate::core::variant::VariantResolver;

pub const DEFAULT_INSTANCE_NAME: &str = "default";
pub const DEFAULT_OWNER: &str = "operator";

#[derive(Debug, Clone)]
pub struct LaunchRequest {
    /// Instance to create or reuse.
    pub name: String,
    pub owner: String,
    pub variant: String,
    pub mods: Vec<String>,
    pub overrides: LaunchOverrides,
}

impl LaunchRequest {
    pub fn new(variant: impl Into<String>) -> Self {
        Self {
            name: DEFAULT_INSTANCE_NAME.to_string(),
            owner: DEFAULT_OWNER.to_string(),
            variant: variant.into(),
            mods: Vec::new(),
            overrides: LaunchOverrides::default(),
        }
    }
}

/// Output of stages 1–4: a staged root and the plan to run it.
#[derive(Debug, Clone)]
pub struct PreparedLaunch {
    pub instance: Instance,
    pub image: RuntimeImage,
    pub plan: LaunchPlan,
}

pub struct LaunchPipeline {
    resolver: VariantResolver,
    instances: InstanceManager,
    downloader: Downloader,
    identities: Arc<dyn IdentityProvider>,
    java: JavaLocator,
    provisioner: ProvisionerConfig,
    defaults: LaunchDefaults,
    license_path: PathBuf,
    supervisor: ProcessSupervisor,
}

impl LaunchPipeline {
    /// Wire the pipeline from loaded settings with the host-backed
    /// identity provider, Java probe and process spawner.
    pub fn from_state(state: &AppState) -> Self {
        let settings = &state.settings;
        let java = JavaLocator::new(
            Arc::new(CommandProbe),
            settings.java_path.clone(),
            settings.runtime_archives.clone(),
        );
        let supervisor = ProcessSupervisor::new(
            Arc::new(TokioSpawner),
            settings.restart_policy,
            settings.stop_grace(),
        )
        .with_log_capacity(settings.log_capacity);

        Self {
            resolver: VariantResolver::new(Arc::clone(&state.catalog)),
            instances: state.instance_manager.clone(),
            downloader: state.downloader.clone(),
            identities: Arc::new(SystemIdentityProvider),
            java,
            provisioner: ProvisionerConfig {
                service_user: settings.service_user.clone(),
                service_group: settings.service_group.clone(),
                min_free_disk_bytes: settings.min_free_disk_bytes(),
            },
            defaults: settings.launch_defaults,
            license_path: state.eula_path(),
            supervisor,
        }
    }

    pub fn resolver(&self) -> &VariantResolver {
        &self.resolver
    }

    pub fn instances(&self) -> &InstanceManager {
        &self.instances
    }

    /// Stages 1–4. Leaves a staged root and returns the plan without
    /// starting anything.
    #[instrument(skip_all, fields(instance = %request.name, variant = %request.variant))]
    pub async fn prepare(&self, request: &LaunchRequest) -> LauncherResult<PreparedLaunch> {
        let (variant, mods) = self.resolver.resolve(&request.variant, &request.mods)?;
        let token = LicenseGate::check(&self.license_path).await?;

        let mut instance = self
            .instances
            .find_or_create(&request.name, &request.owner, &variant.id, &mods.ids())
            .await?;

        let provisioner = RuntimeProvisioner::new(
            &self.downloader,
            self.identities.as_ref(),
            &self.java,
            self.provisioner.clone(),
        );
        let image = match provisioner
            .provision(&instance.path, &variant, &mods, &token)
            .await
        {
            Ok(image) => image,
            Err(err) => {
                self.mark(&mut instance, InstanceState::Failed).await;
                return Err(err);
            }
        };

        let plan = match LaunchPlanner::plan(&image, &request.overrides, &self.defaults) {
            Ok(plan) => plan,
            Err(err) => {
                self.mark(&mut instance, InstanceState::Failed).await;
                return Err(err);
            }
        };
        self.instances
            .set_state(&mut instance, InstanceState::Provisioned)
            .await?;

        Ok(PreparedLaunch {
            instance,
            image,
            plan,
        })
    }

    /// Stage 5. Hands the plan to the supervisor and keeps the instance's
    /// persisted state in step with it.
    pub async fn supervise(
        &self,
        prepared: PreparedLaunch,
    ) -> LauncherResult<(Instance, SupervisorHandle)> {
        let PreparedLaunch {
            mut instance, plan, ..
        } = prepared;
        self.instances
            .set_state(&mut instance, InstanceState::Running)
            .await?;

        let port = plan.port;
        let handle = self.supervisor.start(&instance.name, plan);
        info!(
            "Supervising instance '{}' ({}) on port {}",
            instance.name, instance.id, port
        );

        let mut rx = handle.subscribe();
        let instances = self.instances.clone();
        let id = instance.id.clone();
        tokio::spawn(async move {
            let terminal = match rx.wait_for(SupervisorState::is_terminal).await {
                Ok(state) => state.clone(),
                Err(_) => return,
            };
            let state = match terminal {
                SupervisorState::Stopped => InstanceState::Stopped,
                _ => InstanceState::Failed,
            };
            if let Err(e) = instances.record_state(&id, state).await {
                warn!("Cannot persist final state for {}: {}", id, e);
            }
        });

        Ok((instance, handle))
    }

    /// All five stages.
    pub async fn launch(&self, request: &LaunchRequest) -> LauncherResult<(Instance, SupervisorHandle)> {
        let prepared = self.prepare(request).await?;
        self.supervise(prepared).await
    }

    async fn mark(&self, instance: &mut Instance, state: InstanceState) {
        if let Err(e) = self.instances.set_state(instance, state).await {
            warn!("Cannot persist state for {}: {}", instance.id, e);
        }
    }
}
