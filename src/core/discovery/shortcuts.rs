use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Extensions treated as launcher shortcuts.
pub const SHORTCUT_EXTENSIONS: &[&str] = &["lnk", "desktop"];

pub fn is_shortcut(path: &Path) -> bool {
    path.extension().is_some_and(|ext| {
        SHORTCUT_EXTENSIONS
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known))
    })
}

/// Platform facility that turns a shortcut into the path it launches.
#[async_trait]
pub trait ShortcutResolver: Send + Sync {
    async fn resolve(&self, shortcut: &Path) -> Option<PathBuf>;
}

/// Resolves `.desktop` entries everywhere and `.lnk` files on Windows.
#[derive(Debug, Clone)]
pub struct PlatformShortcuts {
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    timeout: Duration,
}

impl PlatformShortcuts {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[cfg(target_os = "windows")]
    async fn resolve_lnk(&self, shortcut: &Path) -> Option<PathBuf> {
        use tokio::process::Command;

        let quoted = shortcut.to_string_lossy().replace('\'', "''");
        let script = format!(
            "$s = (New-Object -ComObject WScript.Shell).CreateShortcut('{quoted}'); Write-Output $s.TargetPath"
        );
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("powershell")
                .args(["-NoProfile", "-NonInteractive", "-Command", &script])
                .kill_on_drop(true)
                .output(),
        )
        .await;

        let output = match output {
            Ok(Ok(output)) if output.status.success() => output,
            Ok(Ok(output)) => {
                debug!("Shortcut {:?} not resolvable: {:?}", shortcut, output.status);
                return None;
            }
            Ok(Err(err)) => {
                tracing::warn!("Cannot run shortcut resolver for {:?}: {err}", shortcut);
                return None;
            }
            Err(_) => {
                tracing::warn!("Shortcut resolution timed out for {:?}", shortcut);
                return None;
            }
        };

        let target = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!target.is_empty()).then(|| PathBuf::from(target))
    }

    #[cfg(not(target_os = "windows"))]
    async fn resolve_lnk(&self, shortcut: &Path) -> Option<PathBuf> {
        debug!("No .lnk resolver on this platform, skipping {:?}", shortcut);
        None
    }
}

#[async_trait]
impl ShortcutResolver for PlatformShortcuts {
    async fn resolve(&self, shortcut: &Path) -> Option<PathBuf> {
        let ext = shortcut
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())?;

        match ext.as_str() {
            "lnk" => self.resolve_lnk(shortcut).await,
            "desktop" => {
                let contents = tokio::fs::read_to_string(shortcut).await.ok()?;
                let program = parse_desktop_exec(&contents)?;
                resolve_program(&program)
            }
            _ => None,
        }
    }
}

/// Program named by the `Exec=` key of a `[Desktop Entry]` group, with
/// quoting honoured and `%f`-style field codes ignored.
pub fn parse_desktop_exec(contents: &str) -> Option<String> {
    let mut in_entry = false;
    for line in contents.lines().map(str::trim) {
        if line.starts_with('[') {
            in_entry = line == "[Desktop Entry]";
            continue;
        }
        if !in_entry {
            continue;
        }
        let Some(command) = line.strip_prefix("Exec=") else {
            continue;
        };

        let command = command.trim();
        let program = if let Some(quoted) = command.strip_prefix('"') {
            quoted.split('"').next()?
        } else {
            command.split_whitespace().next()?
        };
        if program.is_empty() || program.starts_with('%') {
            return None;
        }
        return Some(program.to_string());
    }
    None
}

/// Absolute programs are taken as-is; bare names are looked up on `PATH`.
fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = PathBuf::from(program);
    if candidate.is_absolute() {
        return Some(candidate);
    }

    let search = std::env::var_os("PATH")?;
    std::env::split_paths(&search)
        .map(|dir| dir.join(program))
        .find(|path| path.is_file())
}
