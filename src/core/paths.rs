use std::path::{Path, PathBuf};

use crate::core::error::{LauncherError, LauncherResult};

pub const APP_DIR_NAME: &str = "Launchkeeper";
const REGISTRY_FILE: &str = "launchers.json";
const SETTINGS_FILE: &str = "launcher_settings.json";

/// Per-user locations used by the launcher.
#[derive(Debug, Clone)]
pub struct LauncherPaths {
    data_dir: PathBuf,
    config_dir: PathBuf,
}

impl LauncherPaths {
    /// Resolve the platform per-user directories, falling back to the
    /// working directory when the platform reports none.
    pub fn from_platform() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);
        let config_dir = dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR_NAME);
        Self {
            data_dir,
            config_dir,
        }
    }

    /// Root everything under one directory (tests, portable installs).
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            data_dir: root.join("data"),
            config_dir: root.join("config"),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn registry_file(&self) -> PathBuf {
        self.config_dir.join(REGISTRY_FILE)
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join(SETTINGS_FILE)
    }

    pub fn default_downloads_dir(&self) -> PathBuf {
        self.data_dir.join("downloads")
    }

    pub fn ensure_data_dir(&self) -> LauncherResult<()> {
        std::fs::create_dir_all(&self.data_dir).map_err(|source| LauncherError::Io {
            path: self.data_dir.clone(),
            source,
        })
    }
}
