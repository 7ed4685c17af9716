use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::discovery::{
    default_search_roots, DiscoveryScanner, PlatformShortcuts, ScanBudget,
};
use crate::core::downloader::DownloadService;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::EventSink;
use crate::core::http::build_http_client;
use crate::core::identity::{IdentityProbe, IdentityValidator, PlatformProbe};
use crate::core::orchestrator::Orchestrator;
use crate::core::paths::LauncherPaths;
use crate::core::process::ProcessSupervisor;
use crate::core::registry::LauncherRegistry;

/// User-tunable knobs, stored as `launcher_settings.json` in the data dir.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct LauncherSettings {
    /// Where downloads land; `<data_dir>/downloads` when unset.
    pub downloads_dir: Option<PathBuf>,
    pub extra_search_roots: Vec<PathBuf>,
    pub scan_max_depth: usize,
    pub scan_max_entries: usize,
    pub max_shortcuts: usize,
    pub max_redirects: u8,
    pub probe_timeout_secs: u64,
    pub download_retries: u32,
}

impl Default for LauncherSettings {
    fn default() -> Self {
        let budget = ScanBudget::default();
        Self {
            downloads_dir: None,
            extra_search_roots: Vec::new(),
            scan_max_depth: budget.max_depth,
            scan_max_entries: budget.max_entries,
            max_shortcuts: 100,
            max_redirects: 5,
            probe_timeout_secs: 5,
            download_retries: 3,
        }
    }
}

impl LauncherSettings {
    pub fn scan_budget(&self) -> ScanBudget {
        ScanBudget {
            max_depth: self.scan_max_depth,
            max_entries: self.scan_max_entries,
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs.max(1))
    }
}

/// Everything a launch needs, wired together once per process.
pub struct AppState {
    pub paths: LauncherPaths,
    pub launcher_settings: LauncherSettings,
    pub http_client: Client,
    pub registry: Arc<LauncherRegistry>,
    pub downloads: Arc<DownloadService>,
    pub supervisor: Arc<ProcessSupervisor>,
    pub validator: IdentityValidator,
    pub orchestrator: Orchestrator,
}

impl AppState {
    pub fn new(paths: LauncherPaths, events: Arc<dyn EventSink>) -> LauncherResult<Self> {
        paths.ensure_data_dir()?;
        let launcher_settings = load_settings_from_disk(&paths).unwrap_or_default();
        debug!("Launcher settings: {:?}", launcher_settings);

        let http_client = build_http_client()?;
        let registry = Arc::new(LauncherRegistry::new(paths.registry_file()));
        let downloads = Arc::new(DownloadService::new(
            http_client.clone(),
            launcher_settings.max_redirects,
            launcher_settings.download_retries,
        ));
        let supervisor = Arc::new(ProcessSupervisor::new());

        let probe: Arc<dyn IdentityProbe> =
            Arc::new(PlatformProbe::new(launcher_settings.probe_timeout()));
        let validator = IdentityValidator::new(probe.clone());
        let scanner = Arc::new(DiscoveryScanner::new(
            default_search_roots(&launcher_settings.extra_search_roots),
            launcher_settings.scan_budget(),
            launcher_settings.max_shortcuts,
            probe,
            Arc::new(PlatformShortcuts::new(launcher_settings.probe_timeout())),
        ));

        let downloads_dir = launcher_settings
            .downloads_dir
            .clone()
            .unwrap_or_else(|| paths.default_downloads_dir());
        let orchestrator = Orchestrator::new(
            registry.clone(),
            validator.clone(),
            scanner,
            downloads.clone(),
            supervisor.clone(),
            events,
            downloads_dir,
        );

        info!("Launcher state ready (data dir {:?})", paths.data_dir());
        Ok(Self {
            paths,
            launcher_settings,
            http_client,
            registry,
            downloads,
            supervisor,
            validator,
            orchestrator,
        })
    }

    pub fn save_settings(&self) -> LauncherResult<()> {
        let settings_path = self.paths.settings_file();
        let json = serde_json::to_string_pretty(&self.launcher_settings)?;
        std::fs::write(&settings_path, json).map_err(|source| LauncherError::Io {
            path: settings_path,
            source,
        })
    }

    /// Cancel one live download by request id.
    pub fn cancel_download(&self, request_id: &str) -> bool {
        self.downloads.cancel(request_id)
    }

    /// Cancel every live download. Returns how many were signalled.
    pub fn cancel_all_downloads(&self) -> usize {
        self.downloads
            .live_sessions()
            .iter()
            .filter(|session| self.downloads.cancel(&session.request_id))
            .count()
    }
}

fn load_settings_from_disk(paths: &LauncherPaths) -> Option<LauncherSettings> {
    let path = paths.settings_file();
    let raw = std::fs::read_to_string(&path).ok()?;
    match serde_json::from_str(&raw) {
        Ok(settings) => Some(settings),
        Err(err) => {
            warn!("Ignoring invalid settings file {:?}: {err}", path);
            None
        }
    }
}
