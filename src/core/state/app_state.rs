use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use tracing::info;

use crate::core::downloader::Downloader;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::http::build_http_client;
use crate::core::instance::InstanceManager;
use crate::core::license::EULA_FILE_NAME;
use crate::core::variant::Catalog;

use super::settings::LauncherSettings;

pub const APP_DIR_NAME: &str = "ServerLauncher";
pub const CATALOG_FILE: &str = "catalog.json";
pub const SERVERS_DIR: &str = "servers";

const RETRY_BASE: Duration = Duration::from_millis(250);

/// Everything a command needs, loaded once per invocation and passed
/// explicitly.
pub struct AppState {
    pub data_dir: PathBuf,
    pub settings: LauncherSettings,
    pub http_client: Client,
    pub downloader: Downloader,
    pub catalog: Arc<Catalog>,
    pub instance_manager: InstanceManager,
}

impl AppState {
    /// Open the data dir (`data_dir`, or the platform default) and load
    /// settings and catalog from it.
    pub async fn load(data_dir: Option<PathBuf>) -> LauncherResult<Self> {
        let data_dir = data_dir.unwrap_or_else(default_data_dir);
        tokio::fs::create_dir_all(&data_dir)
            .await
            .map_err(|e| LauncherError::io(&data_dir, e))?;

        let settings = LauncherSettings::load(&data_dir);
        let catalog = Catalog::load(&data_dir.join(CATALOG_FILE)).await?;

        let http_client = build_http_client()?;
        let downloader =
            Downloader::new(http_client.clone()).with_retries(settings.fetch_retries, RETRY_BASE);
        let instance_manager = InstanceManager::new(
            data_dir.join(SERVERS_DIR),
            settings.max_instances_per_owner,
        );

        info!("Using data dir {:?}", data_dir);
        Ok(Self {
            data_dir,
            settings,
            http_client,
            downloader,
            catalog: Arc::new(catalog),
            instance_manager,
        })
    }

    pub fn eula_path(&self) -> PathBuf {
        self.settings
            .license_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(EULA_FILE_NAME))
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.data_dir.join(CATALOG_FILE)
    }

    pub fn servers_dir(&self) -> PathBuf {
        self.data_dir.join(SERVERS_DIR)
    }

    pub fn save_settings(&self) -> LauncherResult<()> {
        self.settings.save(&self.data_dir)
    }
}

fn default_base_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from("."))
}

pub fn default_data_dir() -> PathBuf {
    default_base_dir().join(APP_DIR_NAME)
}
