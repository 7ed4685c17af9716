// ─── Process Supervisor ───
// Spawns products and installers, tracks them until they exit, and tears
// down every surviving process tree when the host shuts down.

use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Mutex};

#[cfg(target_os = "windows")]
use std::os::windows::process::CommandExt;

#[cfg(unix)]
use std::os::unix::process::CommandExt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::core::error::{LauncherError, LauncherResult};
use crate::core::identity::file_name_of;

/// A live child the supervisor is responsible for.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackedProcess {
    pub pid: u32,
    pub executable: PathBuf,
    pub started_at: DateTime<Utc>,
    pub exit_observed: bool,
}

type TrackedTable = Arc<Mutex<HashMap<u32, TrackedProcess>>>;

/// Handle returned by [`ProcessSupervisor::spawn_tracked`].
#[derive(Debug, Clone)]
pub struct TrackedHandle {
    pub pid: u32,
    exit: watch::Receiver<Option<Option<i32>>>,
}

impl TrackedHandle {
    /// Wait for the process to exit. Yields its exit code, or `None` when
    /// it was killed by a signal or its status could not be collected.
    pub async fn wait(&self) -> Option<i32> {
        let mut exit = self.exit.clone();
        let code = exit
            .wait_for(|state| state.is_some())
            .await
            .map(|state| (*state).flatten());
        code.unwrap_or(None)
    }

    pub fn has_exited(&self) -> bool {
        self.exit.borrow().is_some()
    }
}

#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    tracked: TrackedTable,
}

impl ProcessSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn `executable` with `args` and track it until it exits.
    ///
    /// Must be called from within a tokio runtime: output forwarding and
    /// the exit waiter run on the blocking pool.
    pub fn spawn_tracked(&self, executable: &Path, args: &[String]) -> LauncherResult<TrackedHandle> {
        let mut cmd = Command::new(executable);
        cmd.args(args);
        if let Some(dir) = executable.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            cmd.current_dir(dir);
        }
        configure_platform_spawn(&mut cmd);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        debug!("Command: {:?}", cmd);
        let mut child = cmd.spawn().map_err(|e| LauncherError::LaunchFailed {
            path: executable.to_path_buf(),
            message: e.to_string(),
        })?;
        let pid = child.id();
        let label = file_name_of(executable);
        info!("Spawned {:?} (pid {pid})", executable);

        if let Ok(mut tracked) = self.tracked.lock() {
            tracked.insert(
                pid,
                TrackedProcess {
                    pid,
                    executable: executable.to_path_buf(),
                    started_at: Utc::now(),
                    exit_observed: false,
                },
            );
        }

        if let Some(stdout) = child.stdout.take() {
            let label = label.clone();
            tokio::task::spawn_blocking(move || {
                for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                    debug!("[{label}:{pid}][stdout] {line}");
                }
            });
        }

        if let Some(stderr) = child.stderr.take() {
            let label = label.clone();
            tokio::task::spawn_blocking(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    warn!("[{label}:{pid}][stderr] {line}");
                }
            });
        }

        let (tx, rx) = watch::channel(None);
        let tracked = self.tracked.clone();
        tokio::task::spawn_blocking(move || {
            let code = match child.wait() {
                Ok(status) => {
                    info!("Process {label} (pid {pid}) exited with {status}");
                    status.code()
                }
                Err(err) => {
                    error!("Cannot wait for pid {pid}: {err}");
                    None
                }
            };
            if let Ok(mut tracked) = tracked.lock() {
                if let Some(mut entry) = tracked.remove(&pid) {
                    entry.exit_observed = true;
                    debug!("Deregistered {:?} (pid {pid})", entry.executable);
                }
            }
            let _ = tx.send(Some(code));
        });

        Ok(TrackedHandle { pid, exit: rx })
    }

    pub fn tracked(&self) -> Vec<TrackedProcess> {
        self.tracked
            .lock()
            .map(|tracked| tracked.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Terminate every still-tracked process tree. Entries are drained
    /// under the lock, so each one is terminated exactly once no matter how
    /// many shutdown paths fire. Returns how many trees were signalled.
    pub fn shutdown(&self) -> usize {
        let survivors: Vec<TrackedProcess> = match self.tracked.lock() {
            Ok(mut tracked) => tracked.drain().map(|(_, process)| process).collect(),
            Err(poisoned) => poisoned
                .into_inner()
                .drain()
                .map(|(_, process)| process)
                .collect(),
        };

        for process in &survivors {
            info!(
                "Terminating {:?} (pid {}) on shutdown",
                process.executable, process.pid
            );
            terminate_tree(process.pid);
        }
        survivors.len()
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        let terminated = self.shutdown();
        if terminated > 0 {
            debug!("Supervisor dropped, terminated {terminated} process tree(s)");
        }
    }
}

fn configure_platform_spawn(cmd: &mut Command) {
    #[cfg(target_os = "windows")]
    {
        const CREATE_NEW_PROCESS_GROUP: u32 = 0x0000_0200;
        cmd.creation_flags(CREATE_NEW_PROCESS_GROUP);
    }

    #[cfg(unix)]
    {
        // Own process group, so the whole tree can be signalled at once.
        cmd.process_group(0);
    }
}

/// Best-effort termination of the process tree rooted at `pid`. Failures
/// are logged and swallowed.
pub fn terminate_tree(pid: u32) {
    #[cfg(target_os = "windows")]
    {
        match Command::new("taskkill")
            .args(["/PID", &pid.to_string(), "/T", "/F"])
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
        {
            Ok(status) if status.success() => debug!("taskkill ended tree {pid}"),
            Ok(status) => debug!("taskkill for {pid} returned {:?}", status.code()),
            Err(err) => warn!("Cannot run taskkill for {pid}: {err}"),
        }
    }

    #[cfg(not(target_os = "windows"))]
    {
        let descendants = descendants_of(pid);
        let group = format!("-{pid}");

        let graceful = signal(&["-TERM", "--", &group]);
        for child in &descendants {
            let _ = signal(&["-TERM", &child.to_string()]);
        }

        if graceful {
            std::thread::sleep(std::time::Duration::from_millis(300));
            if !signal(&["-0", "--", &group]) {
                return;
            }
        }

        let _ = signal(&["-KILL", "--", &group]);
        for child in &descendants {
            let _ = signal(&["-KILL", &child.to_string()]);
        }
    }
}

#[cfg(not(target_os = "windows"))]
fn signal(args: &[&str]) -> bool {
    match Command::new("kill")
        .args(args)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
    {
        Ok(status) => status.success(),
        Err(err) => {
            warn!("Cannot run kill {args:?}: {err}");
            false
        }
    }
}

/// Every process whose parent chain leads back to `root`. Catches children
/// that moved to their own process group.
#[cfg(not(target_os = "windows"))]
fn descendants_of(root: u32) -> Vec<u32> {
    let system = sysinfo::System::new_all();
    let parents: HashMap<u32, u32> = system
        .processes()
        .iter()
        .filter_map(|(pid, process)| process.parent().map(|parent| (pid.as_u32(), parent.as_u32())))
        .collect();

    let mut found = Vec::new();
    let mut frontier = vec![root];
    while let Some(current) = frontier.pop() {
        for (child, parent) in &parents {
            if *parent == current && *child != root && !found.contains(child) {
                found.push(*child);
                frontier.push(*child);
            }
        }
    }
    found
}
