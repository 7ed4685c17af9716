// ─── Executable identity ───
// Probing version/signature metadata, telling installers apart from
// applications, and checking a candidate against the product record.

pub mod classifier;
pub mod probe;
pub mod validator;

pub use classifier::{is_likely_installer, is_likely_installer_by_identity};
pub use probe::{ExecutableIdentity, IdentityProbe, PlatformProbe};
pub use validator::{validate_identity, IdentityValidator, ValidationResult};

/// Lowercase and drop everything that is not alphanumeric, so that
/// "Acme, Inc." and "ACME inc" compare equal.
pub fn normalize(text: &str) -> String {
    text.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Last path component, splitting on both `/` and `\` so Windows paths
/// reported by shortcuts or probes are handled on any host.
pub fn file_name_of(path: &std::path::Path) -> String {
    let raw = path.to_string_lossy();
    raw.rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_string()
}
