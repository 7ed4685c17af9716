use serde::{Deserialize, Deserializer, Serialize};

/// Catalog entry for an entitled product, handed over by the license layer.
///
/// Immutable input: nothing in the launcher mutates or re-verifies it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    pub name: String,
    pub download_url: String,
    #[serde(default)]
    pub executable_name_hint: Option<String>,
    #[serde(default)]
    pub expected_publisher: Option<String>,
    #[serde(default)]
    pub expected_product_name: Option<String>,
    #[serde(default)]
    pub is_portable: bool,
    /// Hex SHA-256 of the download, when the catalog publishes one.
    #[serde(default)]
    pub expected_sha256: Option<String>,
}

impl ProductRecord {
    pub fn new(id: impl Into<String>, name: impl Into<String>, download_url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            download_url: download_url.into(),
            executable_name_hint: None,
            expected_publisher: None,
            expected_product_name: None,
            is_portable: false,
            expected_sha256: None,
        }
    }

    /// File name to store the download under, taken from the last URL
    /// path segment and falling back to a product-derived name.
    pub fn download_file_name(&self) -> String {
        let without_query = self
            .download_url
            .split(['?', '#'])
            .next()
            .unwrap_or_default();
        let candidate = without_query
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();

        let looks_like_host = without_query
            .split("://")
            .nth(1)
            .is_some_and(|rest| !rest.trim_end_matches('/').contains('/'));

        let sanitized: String = candidate
            .chars()
            .filter(|ch| !matches!(ch, '\\' | ':' | '*' | '"' | '<' | '>' | '|'))
            .collect();

        if sanitized.is_empty() || looks_like_host || sanitized == "." || sanitized == ".." {
            format!("product-{}.bin", self.id)
        } else {
            sanitized
        }
    }
}

fn string_or_number<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text,
        Raw::Number(number) => number.to_string(),
    })
}
