use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use tracing::debug;

use super::probe::{ExecutableIdentity, IdentityProbe};
use super::{file_name_of, normalize};
use crate::core::product::ProductRecord;

/// Outcome of checking a candidate against a product's expected identity.
/// `reasons` holds every failed check, in check order.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct ValidationResult {
    pub ok: bool,
    pub reasons: Vec<String>,
}

impl ValidationResult {
    fn from_reasons(reasons: Vec<String>) -> Self {
        Self {
            ok: reasons.is_empty(),
            reasons,
        }
    }
}

/// Compare a probed candidate with the expectations on `product`.
///
/// Name: with an `executable_name_hint`, the file name or the original
/// file name must equal it (case-insensitive); otherwise, with an
/// `expected_product_name`, its normalized form must occur in the file
/// name, product name, description or original file name.
/// Publisher: the normalized `expected_publisher` must occur in the
/// company name or the signer/publisher fields.
/// A dimension without an expectation is not checked.
pub fn validate_identity(
    path: &Path,
    identity: &ExecutableIdentity,
    product: &ProductRecord,
) -> ValidationResult {
    let mut reasons = Vec::new();
    let base_name = file_name_of(path);

    if let Some(hint) = product
        .executable_name_hint
        .as_deref()
        .filter(|hint| !hint.trim().is_empty())
    {
        let hint = hint.trim().to_lowercase();
        let matches = base_name.to_lowercase() == hint
            || identity
                .original_file_name
                .as_deref()
                .is_some_and(|original| original.to_lowercase() == hint);
        if !matches {
            reasons.push(format!(
                "File name \"{base_name}\" does not match the expected executable \"{}\"",
                product.executable_name_hint.as_deref().unwrap_or_default().trim()
            ));
        }
    } else if let Some(expected) = product.expected_product_name.as_deref() {
        let needle = normalize(expected);
        if !needle.is_empty() {
            let haystacks = [
                Some(base_name.as_str()),
                identity.product_name.as_deref(),
                identity.file_description.as_deref(),
                identity.original_file_name.as_deref(),
            ];
            let matches = haystacks
                .into_iter()
                .flatten()
                .any(|field| normalize(field).contains(&needle));
            if !matches {
                reasons.push(format!(
                    "Neither the file name nor the product metadata mentions \"{expected}\""
                ));
            }
        }
    }

    if let Some(expected) = product.expected_publisher.as_deref() {
        let needle = normalize(expected);
        if !needle.is_empty() {
            let publisher_fields = [
                identity.company_name.as_deref(),
                identity.signer_subject.as_deref(),
                identity.publisher.as_deref(),
            ];
            let matches = publisher_fields
                .into_iter()
                .flatten()
                .any(|field| normalize(field).contains(&needle));
            if !matches {
                let found = identity
                    .company_name
                    .as_deref()
                    .or(identity.publisher.as_deref())
                    .unwrap_or("unknown");
                reasons.push(format!(
                    "Publisher \"{found}\" does not match the expected publisher \"{expected}\""
                ));
            }
        }
    }

    ValidationResult::from_reasons(reasons)
}

/// Probes a candidate and validates it in one step.
#[derive(Clone)]
pub struct IdentityValidator {
    probe: Arc<dyn IdentityProbe>,
}

impl IdentityValidator {
    pub fn new(probe: Arc<dyn IdentityProbe>) -> Self {
        Self { probe }
    }

    pub fn probe(&self) -> &Arc<dyn IdentityProbe> {
        &self.probe
    }

    /// Probe `path` and validate it. A missing file fails without probing.
    pub async fn inspect(
        &self,
        path: &Path,
        product: &ProductRecord,
    ) -> (ExecutableIdentity, ValidationResult) {
        let exists = tokio::fs::metadata(path)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);
        if !exists {
            return (
                ExecutableIdentity::unknown(path),
                ValidationResult::from_reasons(vec![format!(
                    "Executable {:?} does not exist",
                    path
                )]),
            );
        }

        let identity = self.probe.probe(path).await;
        let result = validate_identity(path, &identity, product);
        debug!("Validated {:?} for {}: {:?}", path, product.id, result);
        (identity, result)
    }

    pub async fn validate(&self, path: &Path, product: &ProductRecord) -> ValidationResult {
        self.inspect(path, product).await.1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::identity::probe::NullProbe;

    fn product() -> ProductRecord {
        ProductRecord::new("42", "Acme Studio", "https://x/app.exe")
    }

    #[test]
    fn hint_matches_file_name_case_insensitively() {
        let mut product = product();
        product.executable_name_hint = Some("App.exe".into());
        let result = validate_identity(
            Path::new("/d/downloads/app.EXE"),
            &ExecutableIdentity::default(),
            &product,
        );
        assert!(result.ok, "{result:?}");
    }

    #[test]
    fn hint_matches_original_file_name() {
        let mut product = product();
        product.executable_name_hint = Some("AcmeStudio.exe".into());
        let identity = ExecutableIdentity {
            original_file_name: Some("acmestudio.exe".into()),
            ..ExecutableIdentity::default()
        };
        assert!(validate_identity(Path::new("/opt/renamed.bin"), &identity, &product).ok);
    }

    #[test]
    fn hint_takes_precedence_over_product_name() {
        let mut product = product();
        product.executable_name_hint = Some("Studio.exe".into());
        product.expected_product_name = Some("Acme Studio".into());
        let identity = ExecutableIdentity {
            product_name: Some("Acme Studio".into()),
            ..ExecutableIdentity::default()
        };
        let result = validate_identity(Path::new("/opt/other.exe"), &identity, &product);
        assert!(!result.ok);
        assert_eq!(result.reasons.len(), 1);
    }

    #[test]
    fn product_name_uses_normalized_substring() {
        let mut product = product();
        product.expected_product_name = Some("Acme-Studio".into());
        let identity = ExecutableIdentity {
            file_description: Some("ACME Studio 2024 (64 bit)".into()),
            ..ExecutableIdentity::default()
        };
        assert!(validate_identity(Path::new("/opt/as.exe"), &identity, &product).ok);
    }

    #[test]
    fn publisher_matches_company_or_signer() {
        let mut product = product();
        product.expected_publisher = Some("Acme Inc".into());

        let by_company = ExecutableIdentity {
            company_name: Some("Acme, Inc.".into()),
            ..ExecutableIdentity::default()
        };
        assert!(validate_identity(Path::new("/a.exe"), &by_company, &product).ok);

        let by_signer = ExecutableIdentity {
            signer_subject: Some("CN=\"Acme, Inc.\", C=US".into()),
            ..ExecutableIdentity::default()
        };
        assert!(validate_identity(Path::new("/a.exe"), &by_signer, &product).ok);
    }

    #[test]
    fn unknown_metadata_cannot_satisfy_a_publisher_expectation() {
        let mut product = product();
        product.expected_publisher = Some("Acme".into());
        let result = validate_identity(Path::new("/a.exe"), &ExecutableIdentity::default(), &product);
        assert!(!result.ok);
        assert!(result.reasons[0].contains("unknown"));
    }

    #[test]
    fn every_failing_check_is_reported() {
        let mut product = product();
        product.executable_name_hint = Some("App.exe".into());
        product.expected_publisher = Some("Acme".into());
        let identity = ExecutableIdentity {
            company_name: Some("Globex".into()),
            ..ExecutableIdentity::default()
        };
        let result = validate_identity(Path::new("/opt/Other.exe"), &identity, &product);
        assert!(!result.ok);
        assert_eq!(result.reasons.len(), 2);
        assert!(result.reasons[0].contains("Other.exe"));
        assert!(result.reasons[1].contains("Globex"));
    }

    #[test]
    fn no_expectations_means_nothing_to_check() {
        let result = validate_identity(
            Path::new("/anything"),
            &ExecutableIdentity::default(),
            &product(),
        );
        assert_eq!(result, ValidationResult { ok: true, reasons: vec![] });
    }

    #[tokio::test]
    async fn missing_file_fails_validation() {
        let tmp = tempfile::tempdir().unwrap();
        let validator = IdentityValidator::new(Arc::new(NullProbe));
        let result = validator
            .validate(&tmp.path().join("missing.exe"), &product())
            .await;
        assert!(!result.ok);
        assert!(result.reasons[0].contains("does not exist"));
    }
}
