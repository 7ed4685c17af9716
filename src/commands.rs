// ─── CLI command handlers ───
// Each handler returns the process exit code; errors bubble up to `run()`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{info, warn};

use crate::cli::{LaunchArgs, ProbeArgs, RegistryCommand, SettingsArgs};
use crate::core::error::{LauncherError, LauncherResult};
use crate::core::events::{EventSink, TracingSink};
use crate::core::identity::is_likely_installer;
use crate::core::orchestrator::{DecisionProvider, LaunchOutcome, LaunchReport, UnattendedDecisions};
use crate::core::paths::LauncherPaths;
use crate::core::product::ProductRecord;
use crate::core::state::AppState;
use crate::core::ui::{ConsoleSink, TerminalDecisions};

const EXIT_FAILURE: i32 = 1;
const EXIT_CANCELLED: i32 = 130;

/// Grace period for an interrupted launch to clean up its partial download.
const INTERRUPT_GRACE: Duration = Duration::from_secs(5);

fn read_product(path: &Path) -> LauncherResult<ProductRecord> {
    let raw = std::fs::read_to_string(path).map_err(|source| LauncherError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(serde_json::from_str(&raw)?)
}

fn print_json<T: Serialize>(value: &T) -> LauncherResult<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(report: &LaunchReport) -> i32 {
    if report.ok {
        0
    } else if report.cancelled {
        EXIT_CANCELLED
    } else {
        EXIT_FAILURE
    }
}

fn print_report(report: &LaunchReport, json: bool) -> LauncherResult<()> {
    if json {
        return print_json(report);
    }
    match (&report.message, report.ok) {
        (Some(message), true) => println!("{message}"),
        (Some(message), false) => eprintln!("{message}"),
        (None, _) => {}
    }
    for reason in &report.reasons {
        eprintln!("  - {reason}");
    }
    Ok(())
}

/// Resolves when the user interrupts (Ctrl-C) or the host asks us to stop.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = terminate.recv() => {}
                }
            }
            Err(err) => {
                warn!("Cannot listen for SIGTERM: {err}");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }

    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

/// Terminate every tracked process tree without stalling the runtime.
async fn shutdown_supervised(state: &AppState) {
    let supervisor = state.supervisor.clone();
    match tokio::task::spawn_blocking(move || supervisor.shutdown()).await {
        Ok(count) if count > 0 => info!("Terminated {count} process tree(s)"),
        Ok(_) => {}
        Err(err) => warn!("Shutdown task failed: {err}"),
    }
}

pub async fn launch(paths: LauncherPaths, args: LaunchArgs) -> LauncherResult<i32> {
    let product = read_product(&args.product)?;
    // JSON output keeps stdout for the final report only.
    let events: Arc<dyn EventSink> = if args.json {
        Arc::new(TracingSink)
    } else {
        Arc::new(ConsoleSink::new())
    };
    let state = AppState::new(paths, events)?;
    let decisions: Box<dyn DecisionProvider> = if args.yes {
        Box::new(UnattendedDecisions)
    } else {
        Box::new(TerminalDecisions)
    };

    info!("Launching {} ({})", product.name, product.id);
    let launch = state
        .orchestrator
        .launch(&product, &args.args, &*decisions);
    tokio::pin!(launch);

    let outcome = tokio::select! {
        outcome = &mut launch => outcome,
        _ = shutdown_signal() => {
            warn!("Interrupted; cancelling launch of {}", product.id);
            state.cancel_all_downloads();
            shutdown_supervised(&state).await;
            match tokio::time::timeout(INTERRUPT_GRACE, &mut launch).await {
                Ok(LaunchOutcome::Launched { .. }) | Err(_) => LaunchOutcome::Cancelled,
                Ok(outcome) => outcome,
            }
        }
    };

    let report = LaunchReport::from(&outcome);
    print_report(&report, args.json)?;

    if let LaunchOutcome::Launched { handle, .. } = outcome {
        // Stay alive with the product so it never outlives the launcher.
        tokio::select! {
            code = handle.wait() => info!("{} exited with {:?}", product.name, code),
            _ = shutdown_signal() => {
                warn!("Interrupted; stopping {}", product.name);
                shutdown_supervised(&state).await;
            }
        }
    }

    shutdown_supervised(&state).await;
    Ok(exit_code(&report))
}

pub async fn registry(paths: LauncherPaths, command: RegistryCommand) -> LauncherResult<i32> {
    let state = AppState::new(paths, Arc::new(TracingSink))?;
    match command {
        RegistryCommand::List => {
            let entries = state.registry.entries().await;
            if entries.is_empty() {
                println!("No registered products ({})", state.registry.path().display());
            }
            for (id, path) in entries {
                let marker = if path.is_file() { "" } else { "  (missing)" };
                println!("{id}\t{}{marker}", path.display());
            }
            Ok(0)
        }
        RegistryCommand::Forget { id } => {
            if state.registry.forget(&id).await {
                println!("Forgot {id}");
                Ok(0)
            } else {
                eprintln!("{id} is not registered");
                Ok(EXIT_FAILURE)
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProbeReport {
    identity: crate::core::identity::ExecutableIdentity,
    likely_installer: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    validation: Option<crate::core::identity::ValidationResult>,
}

pub async fn probe(paths: LauncherPaths, args: ProbeArgs) -> LauncherResult<i32> {
    let state = AppState::new(paths, Arc::new(TracingSink))?;
    if !args.path.is_file() {
        return Err(LauncherError::Other(format!(
            "{} is not a file",
            args.path.display()
        )));
    }

    let report = match args.product.as_deref() {
        Some(product_path) => {
            let product = read_product(product_path)?;
            let (identity, result) = state.validator.inspect(&args.path, &product).await;
            ProbeReport {
                likely_installer: is_likely_installer(&args.path, &identity),
                identity,
                validation: Some(result),
            }
        }
        None => {
            let identity = state.validator.probe().probe(&args.path).await;
            ProbeReport {
                likely_installer: is_likely_installer(&args.path, &identity),
                identity,
                validation: None,
            }
        }
    };

    print_json(&report)?;
    Ok(match &report.validation {
        Some(result) if !result.ok => EXIT_FAILURE,
        _ => 0,
    })
}

pub async fn settings(paths: LauncherPaths, args: SettingsArgs) -> LauncherResult<i32> {
    let state = AppState::new(paths, Arc::new(TracingSink))?;
    if args.save {
        state.save_settings()?;
        eprintln!("Saved {}", state.paths.settings_file().display());
    }
    print_json(&state.launcher_settings)?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_follow_the_report() {
        let mut report = LaunchReport::from(&LaunchOutcome::Cancelled);
        assert_eq!(exit_code(&report), EXIT_CANCELLED);
        report.cancelled = false;
        assert_eq!(exit_code(&report), EXIT_FAILURE);
        report.ok = true;
        assert_eq!(exit_code(&report), 0);
    }

    #[test]
    fn product_file_accepts_numeric_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("product.json");
        std::fs::write(
            &path,
            r#"{"id": 42, "name": "Acme", "downloadUrl": "https://x/app.exe", "isPortable": true}"#,
        )
        .unwrap();
        let product = read_product(&path).unwrap();
        assert_eq!(product.id, "42");
        assert!(product.is_portable);
    }

    #[tokio::test]
    async fn forgetting_an_unknown_product_fails() {
        let tmp = tempfile::tempdir().unwrap();
        let code = registry(
            LauncherPaths::rooted_at(tmp.path()),
            RegistryCommand::Forget { id: "nope".into() },
        )
        .await
        .unwrap();
        assert_eq!(code, EXIT_FAILURE);
    }
}
