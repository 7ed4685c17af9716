use std::path::Path;

use super::{file_name_of, normalize};
use super::probe::ExecutableIdentity;

/// Substrings (already normalized) that mark a binary as an installer,
/// updater or uninstaller rather than the application itself.
const INSTALLER_KEYWORDS: &[&str] = &[
    "setup",
    "installer",
    "install",
    "uninstall",
    "unins000",
    "update",
    "updater",
    "bootstrapper",
    "innosetup",
    "nsis",
    "nullsoft",
    "installshield",
    "wixtoolset",
    "squirrel",
    "advancedinstaller",
    "installaware",
];

/// Directory fragments for places downloads land before installation.
const TRANSIENT_MARKERS: &[&str] = &["downloads", "temp", "tmp"];

/// Directory fragments for places applications are installed into.
const PERMANENT_MARKERS: &[&str] = &[
    "program files",
    "appdata/local/programs",
    "/.local/share/",
    "/applications/",
    "/opt/",
];

/// Heuristic: is `path` an installer/updater instead of the application?
///
/// Rules, first match wins: `.msi` extension; an installer keyword in the
/// file name or in any descriptive identity field; a transient parent
/// directory that is not also a permanent install location.
pub fn is_likely_installer(path: &Path, identity: &ExecutableIdentity) -> bool {
    if is_likely_installer_by_identity(path, identity) {
        return true;
    }

    // Split by hand so Windows-style separators work on every host.
    let full = path.to_string_lossy().replace('\\', "/").to_lowercase();
    let Some((parent, _)) = full.rsplit_once('/') else {
        return false;
    };
    let parent = format!("{parent}/");

    TRANSIENT_MARKERS.iter().any(|marker| parent.contains(marker))
        && !PERMANENT_MARKERS.iter().any(|marker| parent.contains(marker))
}

/// The name- and metadata-based rules only, without the location rule.
///
/// Used for artifacts the launcher downloaded itself: those always sit in
/// a downloads directory, so their location says nothing about them.
pub fn is_likely_installer_by_identity(path: &Path, identity: &ExecutableIdentity) -> bool {
    let is_msi = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("msi"));
    if is_msi {
        return true;
    }

    let base_name = normalize(&file_name_of(path));

    std::iter::once(base_name)
        .chain(identity.descriptive_fields().map(normalize))
        .any(|text| contains_installer_keyword(&text))
}

fn contains_installer_keyword(normalized: &str) -> bool {
    INSTALLER_KEYWORDS
        .iter()
        .any(|keyword| normalized.contains(keyword))
}
