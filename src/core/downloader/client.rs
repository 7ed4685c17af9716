use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::header::{LOCATION, RANGE};
use reqwest::{Client, Response, StatusCode};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use super::cancel::CancelToken;
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::LaunchEvent;

const PROGRESS_INTERVAL: Duration = Duration::from_millis(150);

/// One file to fetch for one product.
#[derive(Debug, Clone)]
pub struct DownloadRequest {
    pub request_id: String,
    pub product_id: String,
    pub url: String,
    pub destination: PathBuf,
    pub expected_sha256: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStage {
    Start,
    Progress,
    Complete,
    Error,
    Cancelled,
}

/// Payload handed to the progress callback on every stage transition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadProgress {
    pub request_id: String,
    pub product_id: String,
    pub stage: DownloadStage,
    pub downloaded_bytes: u64,
    pub total_bytes: Option<u64>,
    pub percent: Option<f64>,
    /// Bytes per second since the transfer started.
    pub speed: Option<f64>,
    pub eta_seconds: Option<u64>,
    pub path: Option<PathBuf>,
    pub message: Option<String>,
}

impl DownloadProgress {
    /// Outbound event for this stage, if the stage has one.
    pub fn to_event(&self) -> Option<LaunchEvent> {
        let request_id = self.request_id.clone();
        let product_id = self.product_id.clone();
        match self.stage {
            DownloadStage::Start | DownloadStage::Progress => Some(LaunchEvent::DownloadProgress {
                request_id,
                product_id,
                downloaded_bytes: self.downloaded_bytes,
                total_bytes: self.total_bytes,
                percent: self.percent,
                speed: self.speed,
                eta_seconds: self.eta_seconds,
            }),
            DownloadStage::Complete => Some(LaunchEvent::DownloadComplete {
                request_id,
                product_id,
                path: self.path.clone().unwrap_or_default(),
            }),
            DownloadStage::Error => Some(LaunchEvent::DownloadError {
                request_id,
                product_id,
                message: self.message.clone().unwrap_or_default(),
            }),
            DownloadStage::Cancelled => Some(LaunchEvent::DownloadCancelled {
                request_id,
                product_id,
            }),
        }
    }
}

/// Snapshot of a live download.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadSession {
    pub request_id: String,
    pub product_id: String,
    pub destination_path: PathBuf,
    pub total_bytes: Option<u64>,
    pub downloaded_bytes: u64,
}

struct LiveSession {
    view: DownloadSession,
    cancel: CancelToken,
}

type SessionTable = Mutex<HashMap<String, LiveSession>>;

/// Removes its session from the live table when dropped, whatever the
/// outcome of the transfer.
struct SessionGuard<'a> {
    sessions: &'a SessionTable,
    request_id: String,
}

impl SessionGuard<'_> {
    fn update(&self, downloaded: u64, total: Option<u64>) {
        if let Ok(mut sessions) = self.sessions.lock() {
            if let Some(live) = sessions.get_mut(&self.request_id) {
                live.view.downloaded_bytes = downloaded;
                live.view.total_bytes = total;
            }
        }
    }

    /// Retire the session as completed. Returns `false` when a
    /// cancellation landed first; both happen under the table lock, so
    /// exactly one of the two wins.
    fn commit(&self, cancel: &CancelToken) -> bool {
        match self.sessions.lock() {
            Ok(mut sessions) => {
                let cancelled = cancel.is_cancelled();
                sessions.remove(&self.request_id);
                !cancelled
            }
            Err(_) => !cancel.is_cancelled(),
        }
    }
}

impl Drop for SessionGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut sessions) = self.sessions.lock() {
            sessions.remove(&self.request_id);
        }
    }
}

/// Progress callback handed to a fetch.
pub type ProgressFn = dyn for<'p> Fn(&'p DownloadProgress) + Send + Sync;

/// Something that can bring a product's payload onto local disk.
#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(
        &self,
        request: DownloadRequest,
        on_progress: &ProgressFn,
    ) -> LauncherResult<PathBuf>;
}

/// Streams files to disk with redirect following, progress reporting,
/// transient-error resume and cooperative cancellation.
pub struct DownloadService {
    client: Client,
    sessions: SessionTable,
    max_redirects: u8,
    retries: u32,
}

impl DownloadService {
    pub fn new(client: Client, max_redirects: u8, retries: u32) -> Self {
        Self {
            client,
            sessions: Mutex::new(HashMap::new()),
            max_redirects,
            retries,
        }
    }

    /// Flip the cancel token of a live session. `false` if no such
    /// session is live (never started, or already finished).
    pub fn cancel(&self, request_id: &str) -> bool {
        let Ok(sessions) = self.sessions.lock() else {
            return false;
        };
        match sessions.get(request_id) {
            Some(live) => {
                info!("Cancelling download {request_id}");
                live.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn live_sessions(&self) -> Vec<DownloadSession> {
        self.sessions
            .lock()
            .map(|sessions| sessions.values().map(|live| live.view.clone()).collect())
            .unwrap_or_default()
    }

    /// Download `request.url` to `request.destination`.
    ///
    /// Bytes go to `<destination>.part` and are renamed into place only on
    /// success; on error or cancellation the partial file is deleted.
    #[instrument(skip(self, cancel, on_progress), fields(request_id = %request.request_id))]
    pub async fn download(
        &self,
        request: DownloadRequest,
        cancel: CancelToken,
        on_progress: &ProgressFn,
    ) -> LauncherResult<PathBuf> {
        let guard = self.register(&request, &cancel)?;
        let part = part_path(&request.destination);
        let mut reporter = Reporter::new(&request, on_progress);

        let prepared = prepare_destination(&request.destination, &part).await;
        if let Err(err) = prepared {
            reporter.error(&err);
            return Err(err);
        }
        reporter.start();

        let outcome = self
            .transfer(&request, &part, &cancel, &guard, &mut reporter)
            .await;

        match outcome {
            Ok(()) if guard.commit(&cancel) => {
                if let Err(source) = tokio::fs::rename(&part, &request.destination).await {
                    remove_quietly(&part).await;
                    let err = LauncherError::Io {
                        path: request.destination.clone(),
                        source,
                    };
                    reporter.error(&err);
                    return Err(err);
                }
                info!("Downloaded {} -> {:?}", request.url, request.destination);
                reporter.complete(&request.destination);
                Ok(request.destination)
            }
            Ok(()) => Err(self.cancelled(&request, &part, &mut reporter).await),
            Err(err) if err.is_cancellation() || cancel.is_cancelled() => {
                Err(self.cancelled(&request, &part, &mut reporter).await)
            }
            Err(err) => {
                remove_quietly(&part).await;
                warn!("Download of {} failed: {err}", request.url);
                reporter.error(&err);
                Err(err)
            }
        }
    }

    fn register<'a>(
        &'a self,
        request: &DownloadRequest,
        cancel: &CancelToken,
    ) -> LauncherResult<SessionGuard<'a>> {
        let mut sessions = self
            .sessions
            .lock()
            .map_err(|_| LauncherError::Other("download table poisoned".into()))?;
        if sessions.contains_key(&request.request_id) {
            return Err(LauncherError::DownloadInProgress(request.request_id.clone()));
        }
        sessions.insert(
            request.request_id.clone(),
            LiveSession {
                view: DownloadSession {
                    request_id: request.request_id.clone(),
                    product_id: request.product_id.clone(),
                    destination_path: request.destination.clone(),
                    total_bytes: None,
                    downloaded_bytes: 0,
                },
                cancel: cancel.clone(),
            },
        );
        Ok(SessionGuard {
            sessions: &self.sessions,
            request_id: request.request_id.clone(),
        })
    }

    async fn cancelled(
        &self,
        request: &DownloadRequest,
        part: &Path,
        reporter: &mut Reporter<'_>,
    ) -> LauncherError {
        remove_quietly(part).await;
        remove_quietly(&request.destination).await;
        info!("Download {} cancelled", request.request_id);
        reporter.cancelled();
        LauncherError::DownloadCancelled {
            request_id: request.request_id.clone(),
        }
    }

    async fn transfer(
        &self,
        request: &DownloadRequest,
        part: &Path,
        cancel: &CancelToken,
        guard: &SessionGuard<'_>,
        reporter: &mut Reporter<'_>,
    ) -> LauncherResult<()> {
        let io_err = |source| LauncherError::Io {
            path: part.to_path_buf(),
            source,
        };

        let mut file = tokio::fs::File::create(part).await.map_err(io_err)?;
        let mut hasher = Sha256::new();
        let mut downloaded = 0_u64;
        let mut attempts = 0_u32;

        'attempts: loop {
            let response = self.open(&request.url, downloaded, cancel).await?;
            let status = response.status();

            if downloaded > 0 && status != StatusCode::PARTIAL_CONTENT {
                if status.is_success() {
                    debug!("Server ignored range request, restarting {}", request.url);
                    file = tokio::fs::File::create(part).await.map_err(io_err)?;
                    hasher = Sha256::new();
                    downloaded = 0;
                } else {
                    return Err(LauncherError::DownloadFailed {
                        url: request.url.clone(),
                        status: status.as_u16(),
                    });
                }
            } else if !status.is_success() {
                return Err(LauncherError::DownloadFailed {
                    url: request.url.clone(),
                    status: status.as_u16(),
                });
            }

            let total = response.content_length().map(|len| len + downloaded);
            reporter.total = total;
            guard.update(downloaded, total);

            let mut stream = response.bytes_stream();
            loop {
                let next = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        return Err(LauncherError::DownloadCancelled {
                            request_id: request.request_id.clone(),
                        });
                    }
                    next = stream.next() => next,
                };

                match next {
                    None => break 'attempts,
                    Some(Ok(chunk)) => {
                        if cancel.is_cancelled() {
                            return Err(LauncherError::DownloadCancelled {
                                request_id: request.request_id.clone(),
                            });
                        }
                        file.write_all(&chunk).await.map_err(io_err)?;
                        hasher.update(&chunk);
                        downloaded = downloaded.saturating_add(chunk.len() as u64);
                        guard.update(downloaded, total);
                        reporter.progress(downloaded);
                    }
                    Some(Err(err)) if attempts < self.retries => {
                        attempts += 1;
                        warn!(
                            "Transfer of {} interrupted at {downloaded} bytes ({err}); retry {attempts}/{}",
                            request.url, self.retries
                        );
                        file.flush().await.map_err(io_err)?;
                        continue 'attempts;
                    }
                    Some(Err(err)) => return Err(LauncherError::Http(err)),
                }
            }
        }

        file.flush().await.map_err(io_err)?;
        drop(file);

        if let Some(expected) = request.expected_sha256.as_deref() {
            let actual = hex::encode(hasher.finalize());
            if !actual.eq_ignore_ascii_case(expected.trim()) {
                return Err(LauncherError::ChecksumMismatch {
                    path: request.destination.clone(),
                    expected: expected.to_string(),
                    actual,
                });
            }
        }

        reporter.force_progress(downloaded);
        Ok(())
    }

    /// Issue the GET, following up to `max_redirects` redirects by hand.
    async fn open(&self, url: &str, offset: u64, cancel: &CancelToken) -> LauncherResult<Response> {
        let mut current = url.to_string();

        for _ in 0..=self.max_redirects {
            let mut builder = self.client.get(&current);
            if offset > 0 {
                builder = builder.header(RANGE, format!("bytes={offset}-"));
            }

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(LauncherError::DownloadCancelled {
                        request_id: String::new(),
                    });
                }
                response = builder.send() => response?,
            };

            if !response.status().is_redirection() {
                return Ok(response);
            }

            let Some(location) = response
                .headers()
                .get(LOCATION)
                .and_then(|value| value.to_str().ok())
            else {
                // A 3xx without a target is just another non-2xx answer.
                return Ok(response);
            };

            let next = response.url().join(location).map_err(|e| {
                LauncherError::Other(format!("Invalid redirect target {location:?}: {e}"))
            })?;
            debug!("Redirect {} -> {}", current, next);
            current = next.to_string();
        }

        Err(LauncherError::TooManyRedirects {
            url: url.to_string(),
            limit: self.max_redirects,
        })
    }
}

#[async_trait]
impl ArtifactFetcher for DownloadService {
    async fn fetch(
        &self,
        request: DownloadRequest,
        on_progress: &ProgressFn,
    ) -> LauncherResult<PathBuf> {
        self.download(request, CancelToken::new(), on_progress).await
    }
}

/// Builds progress payloads and throttles the `Progress` stage.
struct Reporter<'a> {
    request_id: String,
    product_id: String,
    total: Option<u64>,
    started: Instant,
    last_emit: Option<Instant>,
    downloaded: u64,
    sink: &'a ProgressFn,
}

impl<'a> Reporter<'a> {
    fn new(request: &DownloadRequest, sink: &'a ProgressFn) -> Self {
        Self {
            request_id: request.request_id.clone(),
            product_id: request.product_id.clone(),
            total: None,
            started: Instant::now(),
            last_emit: None,
            downloaded: 0,
            sink,
        }
    }

    fn payload(&self, stage: DownloadStage) -> DownloadProgress {
        let elapsed = self.started.elapsed().as_secs_f64();
        let speed = (elapsed > 0.0 && self.downloaded > 0).then(|| self.downloaded as f64 / elapsed);
        let percent = self
            .total
            .filter(|total| *total > 0)
            .map(|total| (self.downloaded as f64 / total as f64 * 100.0).min(100.0));
        let eta_seconds = match (self.total, speed) {
            (Some(total), Some(speed)) if speed > 0.0 => {
                Some((total.saturating_sub(self.downloaded) as f64 / speed).ceil() as u64)
            }
            _ => None,
        };

        DownloadProgress {
            request_id: self.request_id.clone(),
            product_id: self.product_id.clone(),
            stage,
            downloaded_bytes: self.downloaded,
            total_bytes: self.total,
            percent,
            speed,
            eta_seconds,
            path: None,
            message: None,
        }
    }

    fn start(&mut self) {
        (self.sink)(&self.payload(DownloadStage::Start));
    }

    fn progress(&mut self, downloaded: u64) {
        self.downloaded = downloaded;
        let due = self
            .last_emit
            .map_or(true, |last| last.elapsed() >= PROGRESS_INTERVAL);
        if due {
            self.force_progress(downloaded);
        }
    }

    fn force_progress(&mut self, downloaded: u64) {
        self.downloaded = downloaded;
        self.last_emit = Some(Instant::now());
        (self.sink)(&self.payload(DownloadStage::Progress));
    }

    fn complete(&mut self, path: &Path) {
        let mut payload = self.payload(DownloadStage::Complete);
        payload.path = Some(path.to_path_buf());
        (self.sink)(&payload);
    }

    fn error(&mut self, err: &LauncherError) {
        let mut payload = self.payload(DownloadStage::Error);
        payload.message = Some(err.to_string());
        (self.sink)(&payload);
    }

    fn cancelled(&mut self) {
        (self.sink)(&self.payload(DownloadStage::Cancelled));
    }
}

fn part_path(destination: &Path) -> PathBuf {
    let mut name = destination
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_default();
    name.push(".part");
    destination.with_file_name(name)
}

async fn prepare_destination(destination: &Path, part: &Path) -> LauncherResult<()> {
    if let Some(parent) = destination.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|source| LauncherError::Io {
                path: parent.to_path_buf(),
                source,
            })?;
    }
    remove_quietly(part).await;
    remove_quietly(destination).await;
    Ok(())
}

async fn remove_quietly(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("Removed {:?}", path),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => warn!("Cannot remove {:?}: {err}", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    struct Reply {
        bytes: Vec<u8>,
        hold_open: bool,
    }

    fn ok(body: &[u8]) -> Reply {
        let mut bytes = format!(
            "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
            body.len()
        )
        .into_bytes();
        bytes.extend_from_slice(body);
        Reply {
            bytes,
            hold_open: false,
        }
    }

    fn status(code: u16, extra_headers: &str) -> Reply {
        Reply {
            bytes: format!(
                "HTTP/1.1 {code} Status\r\n{extra_headers}Content-Length: 0\r\nConnection: close\r\n\r\n"
            )
            .into_bytes(),
            hold_open: false,
        }
    }

    /// Minimal HTTP/1.1 server; `handler` maps (path, raw request) to a reply.
    async fn serve<F>(handler: F) -> String
    where
        F: Fn(&str, &str) -> Reply + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handler = Arc::new(handler);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                let handler = handler.clone();
                tokio::spawn(async move {
                    let mut raw = Vec::new();
                    let mut buf = [0_u8; 1024];
                    while !raw.windows(4).any(|w| w == b"\r\n\r\n") {
                        match socket.read(&mut buf).await {
                            Ok(0) | Err(_) => return,
                            Ok(n) => raw.extend_from_slice(&buf[..n]),
                        }
                    }
                    let request = String::from_utf8_lossy(&raw).to_string();
                    let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                    let reply = handler(&path, &request);
                    let _ = socket.write_all(&reply.bytes).await;
                    let _ = socket.flush().await;
                    if reply.hold_open {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                });
            }
        });

        format!("http://{addr}")
    }

    fn service() -> DownloadService {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .no_proxy()
            .build()
            .unwrap();
        DownloadService::new(client, 5, 2)
    }

    fn request(base: &str, path: &str, destination: PathBuf) -> DownloadRequest {
        DownloadRequest {
            request_id: format!("req-{path}"),
            product_id: "42".into(),
            url: format!("{base}{path}"),
            destination,
            expected_sha256: None,
        }
    }

    fn collect() -> (
        impl Fn(&DownloadProgress) + Send + Sync,
        Arc<Mutex<Vec<DownloadStage>>>,
    ) {
        let stages = Arc::new(Mutex::new(Vec::new()));
        let sink = stages.clone();
        (
            move |p: &DownloadProgress| sink.lock().unwrap().push(p.stage),
            stages,
        )
    }

    #[tokio::test]
    async fn follows_redirects_and_reports_stages() {
        let base = serve(|path, _| match path {
            "/start" => status(302, "Location: /final\r\n"),
            "/final" => ok(b"hello world"),
            _ => status(404, ""),
        })
        .await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("downloads").join("app.exe");
        let (on_progress, stages) = collect();

        let svc = service();
        let path = svc
            .download(request(&base, "/start", dest.clone()), CancelToken::new(), &on_progress)
            .await
            .unwrap();

        assert_eq!(path, dest);
        assert_eq!(std::fs::read(&dest).unwrap(), b"hello world");
        assert!(!part_path(&dest).exists());
        assert!(svc.live_sessions().is_empty());

        let stages = stages.lock().unwrap().clone();
        assert_eq!(stages.first(), Some(&DownloadStage::Start));
        assert_eq!(stages.last(), Some(&DownloadStage::Complete));
        assert!(stages.contains(&DownloadStage::Progress));
    }

    #[tokio::test]
    async fn redirect_chain_is_capped() {
        let base = serve(|_, _| status(302, "Location: /loop\r\n")).await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("loop.bin");

        let err = service()
            .download(request(&base, "/loop", dest.clone()), CancelToken::new(), &|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::TooManyRedirects { limit: 5, .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn non_success_status_fails_and_cleans_up() {
        let base = serve(|_, _| status(404, "")).await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("missing.bin");
        let (on_progress, stages) = collect();

        let svc = service();
        let err = svc
            .download(request(&base, "/missing", dest.clone()), CancelToken::new(), &on_progress)
            .await
            .unwrap_err();

        assert!(matches!(err, LauncherError::DownloadFailed { status: 404, .. }));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
        assert!(svc.live_sessions().is_empty());
        assert_eq!(stages.lock().unwrap().last(), Some(&DownloadStage::Error));
    }

    #[tokio::test]
    async fn cancelling_mid_transfer_removes_session_and_file() {
        let base = serve(|_, _| {
            let mut bytes =
                b"HTTP/1.1 200 OK\r\nContent-Length: 1000000\r\nConnection: close\r\n\r\n".to_vec();
            bytes.extend_from_slice(&[7_u8; 4096]);
            Reply {
                bytes,
                hold_open: true,
            }
        })
        .await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("big.bin");

        let svc = Arc::new(service());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task = {
            let svc = svc.clone();
            let req = request(&base, "/big", dest.clone());
            tokio::spawn(async move {
                let on_progress = move |p: &DownloadProgress| {
                    if p.stage == DownloadStage::Progress {
                        let _ = tx.send(());
                    }
                };
                svc.download(req, CancelToken::new(), &on_progress).await
            })
        };

        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("first progress event")
            .expect("channel open");
        assert_eq!(svc.live_sessions().len(), 1);
        assert!(svc.cancel("req-/big"));

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .expect("download stops after cancel")
            .unwrap();
        assert!(matches!(result, Err(LauncherError::DownloadCancelled { .. })));
        assert!(svc.live_sessions().is_empty());
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
        assert!(!svc.cancel("req-/big"));
    }

    #[tokio::test]
    async fn interrupted_transfer_resumes_with_range() {
        let base = serve(|_, raw| {
            if raw.to_ascii_lowercase().contains("range: bytes=5-") {
                Reply {
                    bytes: b"HTTP/1.1 206 Partial Content\r\nContent-Range: bytes 5-9/10\r\nContent-Length: 5\r\nConnection: close\r\n\r\n56789".to_vec(),
                    hold_open: false,
                }
            } else {
                Reply {
                    bytes: b"HTTP/1.1 200 OK\r\nContent-Length: 10\r\nConnection: close\r\n\r\n01234".to_vec(),
                    hold_open: false,
                }
            }
        })
        .await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("flaky.bin");

        let mut req = request(&base, "/flaky", dest.clone());
        req.expected_sha256 = Some(hex::encode(Sha256::digest(b"0123456789")));
        service()
            .download(req, CancelToken::new(), &|_| {})
            .await
            .unwrap();
        assert_eq!(std::fs::read(&dest).unwrap(), b"0123456789");
    }

    #[tokio::test]
    async fn checksum_mismatch_removes_download() {
        let base = serve(|_, _| ok(b"payload")).await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("app.exe");

        let mut req = request(&base, "/app.exe", dest.clone());
        req.expected_sha256 = Some("00".repeat(32));
        let err = service()
            .download(req, CancelToken::new(), &|_| {})
            .await
            .unwrap_err();
        assert!(matches!(err, LauncherError::ChecksumMismatch { .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn duplicate_request_id_is_rejected() {
        let svc = service();
        let token = CancelToken::new();
        let req = DownloadRequest {
            request_id: "same".into(),
            product_id: "1".into(),
            url: "http://127.0.0.1:9/x".into(),
            destination: PathBuf::from("/nonexistent/x"),
            expected_sha256: None,
        };
        let _guard = svc.register(&req, &token).unwrap();
        let err = svc.download(req, CancelToken::new(), &|_| {}).await.unwrap_err();
        assert!(matches!(err, LauncherError::DownloadInProgress(id) if id == "same"));
    }

    #[test]
    fn commit_loses_to_an_earlier_cancel() {
        let svc = service();
        let token = CancelToken::new();
        let req = DownloadRequest {
            request_id: "late".into(),
            product_id: "1".into(),
            url: "http://127.0.0.1:9/x".into(),
            destination: PathBuf::from("/nonexistent/x"),
            expected_sha256: None,
        };
        let guard = svc.register(&req, &token).unwrap();
        assert!(svc.cancel("late"));

        assert!(!guard.commit(&token));
        assert!(svc.live_sessions().is_empty());
        assert!(!svc.cancel("late"));
    }

    #[tokio::test]
    async fn cancel_at_the_last_byte_still_cancels() {
        let base = serve(|_, _| ok(b"hello world")).await;
        let tmp = tempfile::tempdir().unwrap();
        let dest = tmp.path().join("edge.bin");

        let svc = Arc::new(service());
        let (on_stage, stages) = collect();
        let on_progress = {
            let svc = svc.clone();
            move |p: &DownloadProgress| {
                on_stage(p);
                if p.stage == DownloadStage::Progress && p.total_bytes == Some(p.downloaded_bytes) {
                    svc.cancel(&p.request_id);
                }
            }
        };

        let result = svc
            .download(request(&base, "/edge", dest.clone()), CancelToken::new(), &on_progress)
            .await;
        assert!(matches!(result, Err(LauncherError::DownloadCancelled { .. })));
        assert!(!dest.exists());
        assert!(!part_path(&dest).exists());
        assert!(svc.live_sessions().is_empty());

        let stages = stages.lock().unwrap().clone();
        assert_eq!(stages.last(), Some(&DownloadStage::Cancelled));
        assert!(!stages.contains(&DownloadStage::Complete));
    }

    #[test]
    fn progress_maps_to_events() {
        let payload = DownloadProgress {
            request_id: "r".into(),
            product_id: "p".into(),
            stage: DownloadStage::Error,
            downloaded_bytes: 0,
            total_bytes: None,
            percent: None,
            speed: None,
            eta_seconds: None,
            path: None,
            message: Some("boom".into()),
        };
        assert_eq!(
            payload.to_event(),
            Some(LaunchEvent::DownloadError {
                request_id: "r".into(),
                product_id: "p".into(),
                message: "boom".into()
            })
        );
    }
}
