use std::collections::HashMap;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::decision::{DecisionProvider, ExistingAction, MismatchAction};
use crate::core::discovery::InstallLocator;
use crate::core::downloader::{ArtifactFetcher, DownloadProgress, DownloadRequest};
use crate::core::error::LauncherError;
use crate::core::events::{EventEnvelope, EventSink, LaunchEvent};
use crate::core::identity::{
    is_likely_installer, is_likely_installer_by_identity, validate_identity, IdentityValidator,
};
use crate::core::process::{ProcessSupervisor, TrackedHandle};
use crate::core::product::ProductRecord;
use crate::core::registry::LauncherRegistry;

/// How many times the user is asked what to do before the launch gives up.
pub const MAX_DECISION_ROUNDS: usize = 8;

/// Terminal result of one launch attempt.
#[derive(Debug)]
pub enum LaunchOutcome {
    Launched { path: PathBuf, handle: TrackedHandle },
    /// An installer ran but the installed application was never located.
    InstallerLaunchedUnresolved { installer: PathBuf },
    Cancelled,
    Failed { message: String, reasons: Vec<String> },
}

/// Caller-facing summary of a [`LaunchOutcome`].
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LaunchReport {
    pub ok: bool,
    pub launched: bool,
    pub cancelled: bool,
    pub path: Option<PathBuf>,
    pub pid: Option<u32>,
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
}

impl From<&LaunchOutcome> for LaunchReport {
    fn from(outcome: &LaunchOutcome) -> Self {
        match outcome {
            LaunchOutcome::Launched { path, handle } => Self {
                ok: true,
                launched: true,
                cancelled: false,
                path: Some(path.clone()),
                pid: Some(handle.pid),
                message: None,
                reasons: Vec::new(),
            },
            LaunchOutcome::InstallerLaunchedUnresolved { installer } => Self {
                ok: true,
                launched: false,
                cancelled: false,
                path: Some(installer.clone()),
                pid: None,
                message: Some(
                    "Installer launched; the installed application was not located".into(),
                ),
                reasons: Vec::new(),
            },
            LaunchOutcome::Cancelled => Self {
                ok: false,
                launched: false,
                cancelled: true,
                path: None,
                pid: None,
                message: Some("Launch cancelled".into()),
                reasons: Vec::new(),
            },
            LaunchOutcome::Failed { message, reasons } => Self {
                ok: false,
                launched: false,
                cancelled: false,
                path: None,
                pid: None,
                message: Some(message.clone()),
                reasons: reasons.clone(),
            },
        }
    }
}

#[derive(Debug)]
enum Step {
    ResolveRegistry,
    ValidateRegistered(PathBuf),
    AutoDetect,
    Decide,
    PickFile,
    Download,
    Classify(PathBuf),
    RunInstaller(PathBuf),
    Accept(PathBuf),
    /// A candidate the user chose despite a rejection.
    Override(PathBuf),
}

/// Per-launch scratch state.
struct Attempt<'a> {
    product: &'a ProductRecord,
    args: &'a [String],
    decisions: &'a dyn DecisionProvider,
    /// Most recent candidate that failed validation, for `UseExisting`.
    candidate: Option<PathBuf>,
    installer_ran: Option<PathBuf>,
    last_reasons: Vec<String>,
    rounds: usize,
}

type Flow = ControlFlow<LaunchOutcome, Step>;

/// Drives one product from "maybe registered" to a running process.
pub struct Orchestrator {
    registry: Arc<LauncherRegistry>,
    validator: IdentityValidator,
    locator: Arc<dyn InstallLocator>,
    fetcher: Arc<dyn ArtifactFetcher>,
    supervisor: Arc<ProcessSupervisor>,
    events: Arc<dyn EventSink>,
    downloads_dir: PathBuf,
    product_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl Orchestrator {
    pub fn new(
        registry: Arc<LauncherRegistry>,
        validator: IdentityValidator,
        locator: Arc<dyn InstallLocator>,
        fetcher: Arc<dyn ArtifactFetcher>,
        supervisor: Arc<ProcessSupervisor>,
        events: Arc<dyn EventSink>,
        downloads_dir: PathBuf,
    ) -> Self {
        Self {
            registry,
            validator,
            locator,
            fetcher,
            supervisor,
            events,
            downloads_dir,
            product_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Launch `product`, consulting `decisions` when it cannot be resolved
    /// on its own. Launches of the same product id are serialized.
    #[instrument(skip_all, fields(product = %product.id))]
    pub async fn launch(
        &self,
        product: &ProductRecord,
        args: &[String],
        decisions: &dyn DecisionProvider,
    ) -> LaunchOutcome {
        let lock = self.lock_for(&product.id);
        let guard = lock.lock().await;

        let attempt = Attempt {
            product,
            args,
            decisions,
            candidate: None,
            installer_ran: None,
            last_reasons: Vec::new(),
            rounds: 0,
        };
        let outcome = self.drive(attempt).await;
        info!("Launch of {} finished: {:?}", product.id, LaunchReport::from(&outcome));

        drop(guard);
        self.release_lock(&product.id, lock);
        outcome
    }

    async fn drive(&self, mut attempt: Attempt<'_>) -> LaunchOutcome {
        let mut step = Step::ResolveRegistry;
        loop {
            debug!("Launch step {:?}", step);
            let flow = match step {
                Step::ResolveRegistry => self.resolve_registry(&attempt).await,
                Step::ValidateRegistered(path) => self.validate_registered(&attempt, path).await,
                Step::AutoDetect => self.auto_detect(&mut attempt).await,
                Step::Decide => self.decide(&mut attempt).await,
                Step::PickFile => self.pick_file(&mut attempt).await,
                Step::Download => self.download(&attempt).await,
                Step::Classify(path) => self.classify(&mut attempt, path).await,
                Step::RunInstaller(installer) => self.run_installer(&mut attempt, installer).await,
                Step::Accept(path) => self.start(&attempt, path, true).await,
                Step::Override(path) => self.accept_override(&attempt, path).await,
            };

            match flow {
                ControlFlow::Continue(next) => step = next,
                ControlFlow::Break(outcome) => return outcome,
            }
        }
    }

    fn lock_for(&self, product_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        match self.product_locks.lock() {
            Ok(mut locks) => locks.entry(product_id.to_string()).or_default().clone(),
            Err(_) => Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// Drop the per-product lock entry once nobody else holds or waits on it.
    fn release_lock(&self, product_id: &str, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        if let Ok(mut locks) = self.product_locks.lock() {
            if locks
                .get(product_id)
                .is_some_and(|held| Arc::strong_count(held) == 1)
            {
                locks.remove(product_id);
            }
        }
    }

    async fn resolve_registry(&self, attempt: &Attempt<'_>) -> Flow {
        match self.registry.resolve(&attempt.product.id).await {
            Some(path) => ControlFlow::Continue(Step::ValidateRegistered(path)),
            None => ControlFlow::Continue(Step::AutoDetect),
        }
    }

    async fn validate_registered(&self, attempt: &Attempt<'_>, path: PathBuf) -> Flow {
        let result = self.validator.validate(&path, attempt.product).await;
        if result.ok {
            return ControlFlow::Continue(Step::Accept(path));
        }

        info!(
            "Registered {:?} no longer validates ({}); forgetting it",
            path,
            result.reasons.join("; ")
        );
        self.registry.forget(&attempt.product.id).await;
        ControlFlow::Continue(Step::AutoDetect)
    }

    async fn auto_detect(&self, attempt: &mut Attempt<'_>) -> Flow {
        match self.locate(attempt).await {
            Some(found) => ControlFlow::Continue(Step::Accept(found)),
            None => ControlFlow::Continue(Step::Decide),
        }
    }

    /// Run discovery and validate its hit. A hit that fails validation is
    /// kept as the override candidate.
    async fn locate(&self, attempt: &mut Attempt<'_>) -> Option<PathBuf> {
        let product = attempt.product;
        let found = self
            .locator
            .find_installed_executable(&product.name, product.executable_name_hint.as_deref())
            .await?;

        let result = self.validator.validate(&found, product).await;
        if result.ok {
            return Some(found);
        }
        debug!("Discovered {:?} does not validate: {:?}", found, result.reasons);
        attempt.candidate = Some(found);
        attempt.last_reasons = result.reasons;
        None
    }

    async fn decide(&self, attempt: &mut Attempt<'_>) -> Flow {
        attempt.rounds += 1;
        if attempt.rounds > MAX_DECISION_ROUNDS {
            let mut message = format!(
                "No usable executable for {} after {MAX_DECISION_ROUNDS} attempts",
                attempt.product.name
            );
            let reasons = std::mem::take(&mut attempt.last_reasons);
            if !reasons.is_empty() {
                let last = LauncherError::ValidationFailed { reasons };
                message = format!("{message}. {last}");
                return ControlFlow::Break(LaunchOutcome::Failed {
                    message,
                    reasons: last.reasons(),
                });
            }
            return ControlFlow::Break(LaunchOutcome::Failed {
                message,
                reasons: Vec::new(),
            });
        }

        let answer = attempt
            .decisions
            .ask_existing_action(&attempt.product.name)
            .await;
        debug!("Decision round {}: {:?}", attempt.rounds, answer);

        match answer {
            ExistingAction::UseExisting => match attempt.candidate.take() {
                Some(candidate) => ControlFlow::Continue(Step::Override(candidate)),
                None => ControlFlow::Continue(Step::PickFile),
            },
            ExistingAction::PickFile => ControlFlow::Continue(Step::PickFile),
            ExistingAction::Download => ControlFlow::Continue(Step::Download),
            ExistingAction::Cancel => ControlFlow::Break(LaunchOutcome::Cancelled),
        }
    }

    async fn pick_file(&self, attempt: &mut Attempt<'_>) -> Flow {
        let Some(picked) = attempt
            .decisions
            .pick_executable_file(&attempt.product.name)
            .await
        else {
            return match attempt.installer_ran.take() {
                Some(installer) => {
                    ControlFlow::Break(LaunchOutcome::InstallerLaunchedUnresolved { installer })
                }
                None => ControlFlow::Continue(Step::Decide),
            };
        };

        let (identity, result) = self.validator.inspect(&picked, attempt.product).await;
        let exists = tokio::fs::metadata(&picked)
            .await
            .map(|meta| meta.is_file())
            .unwrap_or(false);

        if exists && is_likely_installer(&picked, &identity) {
            if attempt.decisions.confirm_run_installer(&picked).await {
                return ControlFlow::Continue(Step::RunInstaller(picked));
            }
            let mut reasons = vec![format!("{:?} looks like an installer, not the application", picked)];
            reasons.extend(result.reasons);
            attempt.candidate = Some(picked);
            return self.mismatch(attempt, reasons).await;
        }

        if result.ok {
            return ControlFlow::Continue(Step::Accept(picked));
        }
        if exists {
            attempt.candidate = Some(picked);
        }
        self.mismatch(attempt, result.reasons).await
    }

    async fn mismatch(&self, attempt: &mut Attempt<'_>, reasons: Vec<String>) -> Flow {
        warn!("Candidate rejected: {}", reasons.join("; "));
        let answer = attempt.decisions.notify_mismatch(&reasons).await;
        attempt.last_reasons = reasons;
        match answer {
            MismatchAction::Retry => ControlFlow::Continue(Step::Decide),
            MismatchAction::Cancel => ControlFlow::Break(LaunchOutcome::Cancelled),
        }
    }

    async fn download(&self, attempt: &Attempt<'_>) -> Flow {
        let product = attempt.product;
        let request = DownloadRequest {
            request_id: Uuid::new_v4().to_string(),
            product_id: product.id.clone(),
            url: product.download_url.clone(),
            destination: self.downloads_dir.join(product.download_file_name()),
            expected_sha256: product.expected_sha256.clone(),
        };
        info!(
            "Downloading {} ({}) to {:?}",
            product.name, request.request_id, request.destination
        );

        let events = self.events.clone();
        let on_progress = move |progress: &DownloadProgress| {
            if let Some(event) = progress.to_event() {
                events.emit(EventEnvelope::now(event));
            }
        };

        match self.fetcher.fetch(request, &on_progress).await {
            Ok(path) => ControlFlow::Continue(Step::Classify(path)),
            Err(err) if err.is_cancellation() => ControlFlow::Break(LaunchOutcome::Cancelled),
            Err(err) => ControlFlow::Break(LaunchOutcome::Failed {
                message: err.to_string(),
                reasons: err.reasons(),
            }),
        }
    }

    /// Downloaded artifacts always live in the downloads directory, so only
    /// the name and metadata rules apply to them.
    async fn classify(&self, attempt: &mut Attempt<'_>, path: PathBuf) -> Flow {
        let identity = self.validator.probe().probe(&path).await;
        let installer =
            !attempt.product.is_portable || is_likely_installer_by_identity(&path, &identity);

        if installer {
            info!("{:?} classified as an installer", path);
            if attempt.decisions.confirm_run_installer(&path).await {
                return ControlFlow::Continue(Step::RunInstaller(path));
            }
            return ControlFlow::Continue(Step::Decide);
        }

        let result = validate_identity(&path, &identity, attempt.product);
        if result.ok {
            return ControlFlow::Continue(Step::Accept(path));
        }
        attempt.candidate = Some(path);
        self.mismatch(attempt, result.reasons).await
    }

    async fn run_installer(&self, attempt: &mut Attempt<'_>, installer: PathBuf) -> Flow {
        let (program, args, kind) = installer_command(&installer);

        self.emit(LaunchEvent::InstallStarted {
            file: installer.clone(),
            kind: kind.to_string(),
        });
        let handle = match self.supervisor.spawn_tracked(&program, &args) {
            Ok(handle) => handle,
            Err(err) => {
                return ControlFlow::Break(LaunchOutcome::Failed {
                    message: err.to_string(),
                    reasons: Vec::new(),
                })
            }
        };

        let exit_code = handle.wait().await;
        info!("Installer {:?} closed with {:?}", installer, exit_code);
        self.emit(LaunchEvent::InstallClosed {
            file: installer.clone(),
            exit_code,
        });
        attempt.installer_ran = Some(installer);

        match self.locate(attempt).await {
            Some(found) => ControlFlow::Continue(Step::Accept(found)),
            None => ControlFlow::Continue(Step::PickFile),
        }
    }

    /// Only an override that still validates is registered; anything else
    /// is launched for this run alone.
    async fn accept_override(&self, attempt: &Attempt<'_>, path: PathBuf) -> Flow {
        let validates = self.validator.validate(&path, attempt.product).await.ok;
        if validates {
            info!("Using {:?} as chosen", path);
        } else {
            info!("Using {:?} as chosen despite validation; not registering it", path);
        }
        self.start(attempt, path, validates).await
    }

    async fn start(&self, attempt: &Attempt<'_>, path: PathBuf, register: bool) -> Flow {
        let product = attempt.product;
        if register {
            self.registry.remember(&product.id, &path).await;
        }

        match self.supervisor.spawn_tracked(&path, attempt.args) {
            Ok(handle) => {
                self.emit(LaunchEvent::Launched {
                    product_id: product.id.clone(),
                    path: path.clone(),
                    pid: handle.pid,
                });
                ControlFlow::Break(LaunchOutcome::Launched { path, handle })
            }
            Err(err) => {
                if register {
                    self.registry.forget(&product.id).await;
                }
                ControlFlow::Break(LaunchOutcome::Failed {
                    message: err.to_string(),
                    reasons: Vec::new(),
                })
            }
        }
    }

    fn emit(&self, event: LaunchEvent) {
        self.events.emit(EventEnvelope::now(event));
    }
}

/// Program, arguments and kind label for running an installer.
fn installer_command(installer: &Path) -> (PathBuf, Vec<String>, &'static str) {
    let is_msi = installer
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("msi"));

    if is_msi && cfg!(target_os = "windows") {
        return (
            PathBuf::from("msiexec"),
            vec!["/i".into(), installer.to_string_lossy().into_owned()],
            "msi",
        );
    }
    (installer.to_path_buf(), Vec::new(), if is_msi { "msi" } else { "exe" })
}
