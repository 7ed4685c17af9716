use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the acquisition and launch backend.
/// Every module returns `Result<T, LauncherError>`.
#[derive(Debug, Error)]
pub enum LauncherError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── Network ─────────────────────────────────────────
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Download failed for {url}: HTTP {status}")]
    DownloadFailed { url: String, status: u16 },

    #[error("Download {request_id} was cancelled")]
    DownloadCancelled { request_id: String },

    #[error("Too many redirects (limit {limit}) while fetching {url}")]
    TooManyRedirects { url: String, limit: u8 },

    #[error("Download {0} is already in progress")]
    DownloadInProgress(String),

    // ── Integrity ───────────────────────────────────────
    #[error("SHA-256 mismatch for {path:?}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    // ── Registry ────────────────────────────────────────
    #[error("Launcher registry at {path:?} is unreadable: {message}")]
    RegistryUnreadable { path: PathBuf, message: String },

    // ── Identity ────────────────────────────────────────
    #[error("Executable failed validation: {}", reasons.join("; "))]
    ValidationFailed { reasons: Vec<String> },

    #[error("Metadata probe failed: {0}")]
    MetadataProbeFailed(String),

    // ── Process ─────────────────────────────────────────
    #[error("Failed to launch {path:?}: {message}")]
    LaunchFailed { path: PathBuf, message: String },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type LauncherResult<T> = Result<T, LauncherError>;

impl LauncherError {
    /// Cancellation is a user decision, not a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, LauncherError::DownloadCancelled { .. })
    }

    /// Individual reasons attached to the error, if any.
    pub fn reasons(&self) -> Vec<String> {
        match self {
            LauncherError::ValidationFailed { reasons } => reasons.clone(),
            _ => Vec::new(),
        }
    }
}

impl From<std::io::Error> for LauncherError {
    fn from(source: std::io::Error) -> Self {
        LauncherError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

impl From<inquire::InquireError> for LauncherError {
    fn from(err: inquire::InquireError) -> Self {
        LauncherError::Other(format!("Prompt failed: {err}"))
    }
}

// ── Serialization for reports and event payloads ────────
impl serde::Serialize for LauncherError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
