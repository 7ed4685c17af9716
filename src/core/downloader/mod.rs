pub mod cancel;
pub mod client;

pub use cancel::CancelToken;
pub use client::{
    ArtifactFetcher, DownloadProgress, DownloadRequest, DownloadService, DownloadSession,
    DownloadStage, ProgressFn,
};
