use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::core::error::{LauncherError, LauncherResult};

/// Version/publisher metadata reported by the platform for a binary.
///
/// Every field is optional: `None` means "unknown", never "false".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ExecutableIdentity {
    pub file_name: Option<String>,
    pub original_file_name: Option<String>,
    pub product_name: Option<String>,
    pub file_description: Option<String>,
    pub company_name: Option<String>,
    pub file_version: Option<String>,
    pub product_version: Option<String>,
    pub signer_subject: Option<String>,
    pub publisher: Option<String>,
}

impl ExecutableIdentity {
    /// Identity with nothing known beyond the file name on disk.
    pub fn unknown(path: &Path) -> Self {
        Self {
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string()),
            ..Self::default()
        }
    }

    /// Free-text fields the installer heuristic looks at.
    pub fn descriptive_fields(&self) -> impl Iterator<Item = &str> {
        [
            &self.product_name,
            &self.file_description,
            &self.company_name,
            &self.original_file_name,
            &self.signer_subject,
            &self.publisher,
        ]
        .into_iter()
        .filter_map(|field| field.as_deref())
    }
}

/// Platform facility that reads identity metadata from a binary.
///
/// Implementations must not fail: a probe that cannot run degrades to
/// [`ExecutableIdentity::unknown`].
#[async_trait]
pub trait IdentityProbe: Send + Sync {
    async fn probe(&self, path: &Path) -> ExecutableIdentity;
}

/// Default probe for the current platform, bounded by `timeout`.
///
/// Windows queries `VersionInfo` and the Authenticode signer through
/// PowerShell. Other platforms have no equivalent facility and report
/// everything but the file name as unknown.
#[derive(Debug, Clone)]
pub struct PlatformProbe {
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    timeout: Duration,
}

impl PlatformProbe {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    #[cfg(target_os = "windows")]
    async fn query(&self, path: &Path) -> LauncherResult<ExecutableIdentity> {
        use tokio::process::Command;

        let script = powershell_identity_script(path);
        let output = tokio::time::timeout(
            self.timeout,
            Command::new("powershell")
                .args(["-NoProfile", "-NonInteractive", "-Command", &script])
                .kill_on_drop(true)
                .output(),
        )
        .await
        .map_err(|_| {
            LauncherError::MetadataProbeFailed(format!(
                "timed out after {:?} probing {:?}",
                self.timeout, path
            ))
        })?
        .map_err(|e| LauncherError::MetadataProbeFailed(e.to_string()))?;

        if !output.status.success() {
            return Err(LauncherError::MetadataProbeFailed(format!(
                "powershell exited with {:?}",
                output.status.code()
            )));
        }

        parse_probe_output(path, &String::from_utf8_lossy(&output.stdout))
    }

    #[cfg(not(target_os = "windows"))]
    async fn query(&self, path: &Path) -> LauncherResult<ExecutableIdentity> {
        Ok(ExecutableIdentity::unknown(path))
    }
}

#[async_trait]
impl IdentityProbe for PlatformProbe {
    #[instrument(skip(self))]
    async fn probe(&self, path: &Path) -> ExecutableIdentity {
        match self.query(path).await {
            Ok(identity) => {
                debug!("Probed {:?}: {:?}", path, identity);
                identity
            }
            Err(err) => {
                warn!("{err}; identity of {:?} is unknown", path);
                ExecutableIdentity::unknown(path)
            }
        }
    }
}

/// Probe that never consults the platform.
#[derive(Debug, Default, Clone)]
pub struct NullProbe;

#[async_trait]
impl IdentityProbe for NullProbe {
    async fn probe(&self, path: &Path) -> ExecutableIdentity {
        ExecutableIdentity::unknown(path)
    }
}

#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn powershell_identity_script(path: &Path) -> String {
    let quoted = path.to_string_lossy().replace('\'', "''");
    format!(
        r#"$ErrorActionPreference = 'SilentlyContinue'
$p = '{quoted}'
$v = (Get-Item -LiteralPath $p).VersionInfo
$s = Get-AuthenticodeSignature -LiteralPath $p
$signer = $null
if ($s -and $s.SignerCertificate) {{ $signer = $s.SignerCertificate.Subject }}
[pscustomobject]@{{
  originalFileName = $v.OriginalFilename
  productName = $v.ProductName
  fileDescription = $v.FileDescription
  companyName = $v.CompanyName
  fileVersion = $v.FileVersion
  productVersion = $v.ProductVersion
  signerSubject = $signer
}} | ConvertTo-Json -Compress"#
    )
}

/// Parse the probe's JSON line. Blank strings count as unknown and the
/// publisher is derived from the signer's common name.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn parse_probe_output(path: &Path, stdout: &str) -> LauncherResult<ExecutableIdentity> {
    let line = stdout
        .lines()
        .map(str::trim)
        .rfind(|line| line.starts_with('{'))
        .ok_or_else(|| {
            LauncherError::MetadataProbeFailed(format!("no metadata reported for {:?}", path))
        })?;

    let raw: ExecutableIdentity = serde_json::from_str(line)
        .map_err(|e| LauncherError::MetadataProbeFailed(e.to_string()))?;

    let clean = |value: Option<String>| value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
    let signer_subject = clean(raw.signer_subject);
    let publisher = clean(raw.publisher).or_else(|| {
        signer_subject
            .as_deref()
            .and_then(common_name)
            .map(str::to_string)
    });

    Ok(ExecutableIdentity {
        file_name: ExecutableIdentity::unknown(path).file_name,
        original_file_name: clean(raw.original_file_name),
        product_name: clean(raw.product_name),
        file_description: clean(raw.file_description),
        company_name: clean(raw.company_name),
        file_version: clean(raw.file_version),
        product_version: clean(raw.product_version),
        signer_subject,
        publisher,
    })
}

/// `CN=` component of an X.500 subject such as
/// `CN="Acme, Inc.", O="Acme, Inc.", C=US`.
#[cfg_attr(not(target_os = "windows"), allow(dead_code))]
fn common_name(subject: &str) -> Option<&str> {
    let start = subject.find("CN=")? + 3;
    let rest = &subject[start..];
    let value = if let Some(quoted) = rest.strip_prefix('"') {
        &quoted[..quoted.find('"')?]
    } else {
        rest.split(',').next()?
    };
    let value = value.trim();
    (!value.is_empty()).then_some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn parses_probe_json_and_derives_publisher() {
        let stdout = "\r\n{\"originalFileName\":\"App.exe\",\"productName\":\"App\",\"fileDescription\":\"\",\"companyName\":\"Acme, Inc.\",\"fileVersion\":\"1.2.0\",\"productVersion\":null,\"signerSubject\":\"CN=\\\"Acme, Inc.\\\", O=\\\"Acme, Inc.\\\", C=US\"}\r\n";
        let identity = parse_probe_output(&PathBuf::from("C:/Apps/App.exe"), stdout).unwrap();

        assert_eq!(identity.file_name.as_deref(), Some("App.exe"));
        assert_eq!(identity.original_file_name.as_deref(), Some("App.exe"));
        assert_eq!(identity.company_name.as_deref(), Some("Acme, Inc."));
        assert_eq!(identity.file_description, None);
        assert_eq!(identity.product_version, None);
        assert_eq!(identity.publisher.as_deref(), Some("Acme, Inc."));
    }

    #[test]
    fn empty_probe_output_is_a_probe_failure() {
        let err = parse_probe_output(&PathBuf::from("x.exe"), "").unwrap_err();
        assert!(matches!(err, LauncherError::MetadataProbeFailed(_)));
    }

    #[test]
    fn common_name_handles_unquoted_subjects() {
        assert_eq!(common_name("CN=Contoso Ltd, O=Contoso"), Some("Contoso Ltd"));
        assert_eq!(common_name("O=NoCommonName"), None);
    }

    #[test]
    fn script_escapes_single_quotes() {
        let script = powershell_identity_script(&PathBuf::from("C:/O'Brien/app.exe"));
        assert!(script.contains("'C:/O''Brien/app.exe'"));
    }

    #[tokio::test]
    async fn unknown_identity_keeps_only_file_name() {
        let identity = NullProbe.probe(Path::new("/opt/app/App")).await;
        assert_eq!(identity.file_name.as_deref(), Some("App"));
        assert_eq!(identity.descriptive_fields().count(), 0);
    }
}
