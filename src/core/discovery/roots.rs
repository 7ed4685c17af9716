use std::path::PathBuf;

/// Well-known install roots for the current platform, followed by any
/// configured extras. Duplicates are removed, order is preserved.
pub fn default_search_roots(extra: &[PathBuf]) -> Vec<PathBuf> {
    let mut roots = platform_roots();
    roots.extend(extra.iter().cloned());

    let mut seen = std::collections::HashSet::new();
    roots.retain(|root| seen.insert(root.clone()));
    roots
}

#[cfg(target_os = "windows")]
fn platform_roots() -> Vec<PathBuf> {
    let mut roots = Vec::new();
    for var in ["ProgramFiles", "ProgramFiles(x86)", "ProgramW6432"] {
        if let Some(dir) = std::env::var_os(var) {
            roots.push(PathBuf::from(dir));
        }
    }
    if let Some(local) = dirs::data_local_dir() {
        roots.push(local.join("Programs"));
    }
    if let Some(roaming) = dirs::data_dir() {
        roots.push(roaming.join("Microsoft\\Windows\\Start Menu\\Programs"));
    }
    if let Some(program_data) = std::env::var_os("ProgramData") {
        roots.push(PathBuf::from(program_data).join("Microsoft\\Windows\\Start Menu\\Programs"));
    }
    if let Some(desktop) = dirs::desktop_dir() {
        roots.push(desktop);
    }
    roots
}

#[cfg(target_os = "macos")]
fn platform_roots() -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from("/Applications")];
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join("Applications"));
    }
    roots
}

#[cfg(not(any(target_os = "windows", target_os = "macos")))]
fn platform_roots() -> Vec<PathBuf> {
    let mut roots = vec![PathBuf::from("/opt"), PathBuf::from("/usr/local/bin")];
    if let Some(home) = dirs::home_dir() {
        roots.push(home.join("Applications"));
        roots.push(home.join(".local").join("bin"));
    }
    if let Some(data) = dirs::data_dir() {
        roots.push(data.join("applications"));
    }
    roots.push(PathBuf::from("/usr/share/applications"));
    roots
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extras_are_appended_once() {
        let extra = vec![PathBuf::from("/srv/games"), PathBuf::from("/srv/games")];
        let roots = default_search_roots(&extra);
        assert_eq!(
            roots.iter().filter(|r| r.as_path() == std::path::Path::new("/srv/games")).count(),
            1
        );
        assert_eq!(roots.last(), Some(&PathBuf::from("/srv/games")));
    }
}
