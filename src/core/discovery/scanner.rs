use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use super::shortcuts::{is_shortcut, ShortcutResolver};
use crate::core::identity::{file_name_of, is_likely_installer, normalize, IdentityProbe};

/// Limits for one root's traversal.
///
/// `max_depth` prunes descent (the root's children are depth 1);
/// `max_entries` aborts the root once that many entries were visited.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanBudget {
    pub max_depth: usize,
    pub max_entries: usize,
}

impl Default for ScanBudget {
    fn default() -> Self {
        Self {
            max_depth: 3,
            max_entries: 8000,
        }
    }
}

/// What a single root produced and what it cost.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Executables whose name matched, in visit order.
    pub candidates: Vec<PathBuf>,
    /// Shortcut files to resolve, at most the shortcut allowance.
    pub shortcuts: Vec<PathBuf>,
    pub entries_scanned: usize,
    /// `true` when `max_entries` cut the traversal short.
    pub exhausted: bool,
}

/// Name test applied to every file the scanner visits.
#[derive(Debug, Clone)]
pub struct NameMatcher {
    exe_hint: Option<String>,
    product: String,
}

impl NameMatcher {
    pub fn new(product_name: &str, exe_hint: Option<&str>) -> Self {
        Self {
            exe_hint: exe_hint
                .map(|hint| hint.trim().to_lowercase())
                .filter(|hint| !hint.is_empty()),
            product: normalize(product_name),
        }
    }

    /// Exact (case-insensitive) hint match, or the normalized product name
    /// contained in the normalized file name.
    pub fn matches(&self, file_name: &str) -> bool {
        if let Some(hint) = &self.exe_hint {
            if file_name.to_lowercase() == *hint {
                return true;
            }
        }
        !self.product.is_empty() && normalize(file_name).contains(&self.product)
    }
}

/// Walk `root` within `budget`, collecting matching executables and up to
/// `shortcut_allowance` shortcut files.
///
/// Blocking; run it on a blocking thread. Unreadable directories are
/// skipped, never fatal.
pub fn scan_root(
    root: &Path,
    matcher: &NameMatcher,
    budget: ScanBudget,
    shortcut_allowance: usize,
) -> ScanReport {
    let mut report = ScanReport::default();
    let mut pending: Vec<(PathBuf, usize)> = vec![(root.to_path_buf(), 0)];

    while let Some((dir, depth)) = pending.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(err) => {
                debug!("Skipping unreadable directory {:?}: {err}", dir);
                continue;
            }
        };

        let mut subdirs = Vec::new();
        for entry in entries.flatten() {
            if report.entries_scanned >= budget.max_entries {
                report.exhausted = true;
                return report;
            }
            report.entries_scanned += 1;

            let path = entry.path();
            let Ok(metadata) = std::fs::metadata(&path) else {
                continue;
            };

            if metadata.is_dir() {
                if depth + 1 < budget.max_depth {
                    subdirs.push((path, depth + 1));
                }
                continue;
            }
            if !metadata.is_file() {
                continue;
            }

            if is_shortcut(&path) {
                if report.shortcuts.len() < shortcut_allowance {
                    report.shortcuts.push(path);
                }
            } else if is_executable(&path, &metadata) && matcher.matches(&file_name_of(&path)) {
                report.candidates.push(path);
            }
        }

        // Reverse so the first subdirectory is visited first.
        pending.extend(subdirs.into_iter().rev());
    }

    report
}

fn is_executable(path: &Path, metadata: &Metadata) -> bool {
    let by_extension = path.extension().is_some_and(|ext| {
        ["exe", "appimage"]
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known))
    });
    if by_extension {
        return true;
    }

    has_exec_bit(metadata)
}

#[cfg(unix)]
fn has_exec_bit(metadata: &Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
fn has_exec_bit(_metadata: &Metadata) -> bool {
    false
}

/// Finds an already-installed copy of a product on this machine.
#[async_trait]
pub trait InstallLocator: Send + Sync {
    async fn find_installed_executable(
        &self,
        product_name: &str,
        exe_hint: Option<&str>,
    ) -> Option<PathBuf>;
}

/// Bounded search over well-known install roots, shortcuts included.
pub struct DiscoveryScanner {
    roots: Vec<PathBuf>,
    budget: ScanBudget,
    max_shortcuts: usize,
    probe: Arc<dyn IdentityProbe>,
    shortcuts: Arc<dyn ShortcutResolver>,
}

impl DiscoveryScanner {
    pub fn new(
        roots: Vec<PathBuf>,
        budget: ScanBudget,
        max_shortcuts: usize,
        probe: Arc<dyn IdentityProbe>,
        shortcuts: Arc<dyn ShortcutResolver>,
    ) -> Self {
        Self {
            roots,
            budget,
            max_shortcuts,
            probe,
            shortcuts,
        }
    }

    /// Probe `path` and keep it unless it looks like an installer.
    async fn accept(&self, path: &Path) -> bool {
        let identity = self.probe.probe(path).await;
        if is_likely_installer(path, &identity) {
            debug!("Discovery rejected installer-like candidate {:?}", path);
            return false;
        }
        true
    }
}

#[async_trait]
impl InstallLocator for DiscoveryScanner {
    #[instrument(skip(self))]
    async fn find_installed_executable(
        &self,
        product_name: &str,
        exe_hint: Option<&str>,
    ) -> Option<PathBuf> {
        let matcher = NameMatcher::new(product_name, exe_hint);
        let mut shortcuts_left = self.max_shortcuts;

        for root in &self.roots {
            if !tokio::fs::metadata(root)
                .await
                .map(|meta| meta.is_dir())
                .unwrap_or(false)
            {
                continue;
            }

            let scan_root_path = root.clone();
            let scan_matcher = matcher.clone();
            let budget = self.budget;
            let allowance = shortcuts_left;
            let report = match tokio::task::spawn_blocking(move || {
                scan_root(&scan_root_path, &scan_matcher, budget, allowance)
            })
            .await
            {
                Ok(report) => report,
                Err(err) => {
                    warn!("Scan of {:?} aborted: {err}", root);
                    continue;
                }
            };

            debug!(
                "Scanned {:?}: {} entries, {} candidates, {} shortcuts, exhausted={}",
                root,
                report.entries_scanned,
                report.candidates.len(),
                report.shortcuts.len(),
                report.exhausted
            );
            if report.exhausted {
                info!(
                    "Scan budget of {} entries reached under {:?}; moving on",
                    self.budget.max_entries, root
                );
            }

            for candidate in &report.candidates {
                if self.accept(candidate).await {
                    info!("Discovered {product_name} at {:?}", candidate);
                    return Some(candidate.clone());
                }
            }

            shortcuts_left = shortcuts_left.saturating_sub(report.shortcuts.len());
            for shortcut in &report.shortcuts {
                let Some(target) = self.shortcuts.resolve(shortcut).await else {
                    continue;
                };
                if !matcher.matches(&file_name_of(&target)) {
                    continue;
                }
                let is_file = tokio::fs::metadata(&target)
                    .await
                    .map(|meta| meta.is_file())
                    .unwrap_or(false);
                if is_file && self.accept(&target).await {
                    info!(
                        "Discovered {product_name} at {:?} via shortcut {:?}",
                        target, shortcut
                    );
                    return Some(target);
                }
            }
        }

        debug!("Discovery exhausted for {product_name}");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::probe::NullProbe;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingShortcuts {
        target: Option<PathBuf>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ShortcutResolver for CountingShortcuts {
        async fn resolve(&self, _shortcut: &Path) -> Option<PathBuf> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.target.clone()
        }
    }

    fn touch(path: &Path) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, b"bin").unwrap();
    }

    /// Roots live under "Program Files" so the location heuristic treats
    /// them as install locations even inside the temp directory.
    fn install_root(tmp: &tempfile::TempDir) -> PathBuf {
        let root = tmp.path().join("Program Files");
        std::fs::create_dir_all(&root).unwrap();
        root
    }

    fn scanner(roots: Vec<PathBuf>, budget: ScanBudget, shortcuts: Arc<dyn ShortcutResolver>) -> DiscoveryScanner {
        DiscoveryScanner::new(roots, budget, 100, Arc::new(NullProbe), shortcuts)
    }

    fn no_shortcuts() -> Arc<dyn ShortcutResolver> {
        Arc::new(CountingShortcuts {
            target: None,
            calls: AtomicUsize::new(0),
        })
    }

    #[test]
    fn matcher_accepts_hint_or_product_name() {
        let matcher = NameMatcher::new("Acme Studio", Some("Studio.exe"));
        assert!(matcher.matches("studio.EXE"));
        assert!(matcher.matches("AcmeStudio64.exe"));
        assert!(!matcher.matches("Other.exe"));
        assert!(!NameMatcher::new("", None).matches("anything.exe"));
    }

    #[test]
    fn scan_respects_depth_limit() {
        let tmp = tempfile::tempdir().unwrap();
        let root = install_root(&tmp);
        touch(&root.join("a/b/App.exe"));
        touch(&root.join("a/b/c/d/Deep.exe"));

        let matcher = NameMatcher::new("", Some("App.exe"));
        let report = scan_root(&root, &matcher, ScanBudget::default(), 0);
        assert_eq!(report.candidates, vec![root.join("a/b/App.exe")]);

        let deep = NameMatcher::new("", Some("Deep.exe"));
        assert!(scan_root(&root, &deep, ScanBudget::default(), 0).candidates.is_empty());
    }

    #[test]
    fn scan_stops_at_entry_cap() {
        let tmp = tempfile::tempdir().unwrap();
        let root = install_root(&tmp);
        for i in 0..50 {
            touch(&root.join(format!("file{i}.dat")));
        }

        let budget = ScanBudget {
            max_depth: 3,
            max_entries: 10,
        };
        let report = scan_root(&root, &NameMatcher::new("Acme", None), budget, 0);
        assert!(report.exhausted);
        assert_eq!(report.entries_scanned, 10);
        assert!(report.candidates.is_empty());
    }

    #[test]
    fn scan_caps_collected_shortcuts() {
        let tmp = tempfile::tempdir().unwrap();
        let root = install_root(&tmp);
        for i in 0..5 {
            touch(&root.join(format!("link{i}.lnk")));
        }
        let report = scan_root(&root, &NameMatcher::new("Acme", None), ScanBudget::default(), 3);
        assert_eq!(report.shortcuts.len(), 3);
    }

    #[tokio::test]
    async fn bounded_scan_returns_none_without_hanging() {
        let tmp = tempfile::tempdir().unwrap();
        let root = install_root(&tmp);
        for i in 0..200 {
            touch(&root.join(format!("d{}/f{i}.dat", i % 7)));
        }
        touch(&root.join("zzz/App.exe"));

        let budget = ScanBudget {
            max_depth: 3,
            max_entries: 20,
        };
        let found = scanner(vec![root], budget, no_shortcuts())
            .find_installed_executable("Nothing Here", Some("Missing.exe"))
            .await;
        assert_eq!(found, None);
    }

    #[tokio::test]
    async fn installer_candidates_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let root = install_root(&tmp);
        touch(&root.join("Acme/AcmeSetup.exe"));
        touch(&root.join("Acme/bin/Acme.exe"));

        let found = scanner(vec![root.clone()], ScanBudget::default(), no_shortcuts())
            .find_installed_executable("Acme", None)
            .await;
        assert_eq!(found, Some(root.join("Acme/bin/Acme.exe")));
    }

    #[tokio::test]
    async fn exhausted_root_falls_through_to_next_root() {
        let tmp = tempfile::tempdir().unwrap();
        let crowded = install_root(&tmp);
        for i in 0..30 {
            touch(&crowded.join(format!("f{i}.dat")));
        }
        let other = tmp.path().join("Program Files (x86)");
        touch(&other.join("Acme/App.exe"));

        let budget = ScanBudget {
            max_depth: 3,
            max_entries: 10,
        };
        let found = scanner(vec![crowded, other.clone()], budget, no_shortcuts())
            .find_installed_executable("Acme", Some("App.exe"))
            .await;
        assert_eq!(found, Some(other.join("Acme/App.exe")));
    }

    #[tokio::test]
    async fn shortcuts_resolve_to_matching_targets() {
        let tmp = tempfile::tempdir().unwrap();
        let root = install_root(&tmp);
        let target = root.join("Vendor/App.exe");
        touch(&target);
        let menu = tmp.path().join("Program Files/Start Menu");
        touch(&menu.join("Acme.lnk"));

        let resolver = Arc::new(CountingShortcuts {
            target: Some(target.clone()),
            calls: AtomicUsize::new(0),
        });
        let found = scanner(vec![menu], ScanBudget::default(), resolver.clone())
            .find_installed_executable("Acme", Some("App.exe"))
            .await;
        assert_eq!(found, Some(target));
        assert_eq!(resolver.calls.load(Ordering::SeqCst), 1);
    }
}
