// ─── Terminal decision provider ───
// Answers come from `inquire` prompts.

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use inquire::{Confirm, Select, Text};
use tracing::warn;

use crate::core::error::LauncherResult;
use crate::core::orchestrator::{DecisionProvider, ExistingAction, MismatchAction};

#[derive(Debug, Clone, Copy)]
struct Choice<T> {
    value: T,
    label: &'static str,
}

impl<T> fmt::Display for Choice<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}

fn existing_choices() -> Vec<Choice<ExistingAction>> {
    vec![
        Choice {
            value: ExistingAction::Download,
            label: "Download it",
        },
        Choice {
            value: ExistingAction::PickFile,
            label: "Locate the executable myself",
        },
        Choice {
            value: ExistingAction::UseExisting,
            label: "Use the copy that was found anyway",
        },
        Choice {
            value: ExistingAction::Cancel,
            label: "Cancel",
        },
    ]
}

/// Asks the person at the terminal. Escape or a closed terminal counts as
/// the most conservative answer for each question.
#[derive(Debug, Default, Clone)]
pub struct TerminalDecisions;

/// Run a blocking prompt off the async worker threads.
async fn blocking_prompt<T, F>(prompt: F, fallback: T) -> T
where
    T: Send + 'static,
    F: FnOnce() -> LauncherResult<T> + Send + 'static,
{
    match tokio::task::spawn_blocking(prompt).await {
        Ok(Ok(answer)) => answer,
        Ok(Err(err)) => {
            warn!("Prompt failed: {err}");
            fallback
        }
        Err(err) => {
            warn!("Prompt task failed: {err}");
            fallback
        }
    }
}

#[async_trait]
impl DecisionProvider for TerminalDecisions {
    async fn ask_existing_action(&self, product_name: &str) -> ExistingAction {
        let message = format!("{product_name} is not ready to launch. What now?");
        blocking_prompt(
            move || {
                let answer = Select::new(&message, existing_choices())
                    .with_starting_cursor(0)
                    .without_filtering()
                    .with_help_message("↑↓ to move, ENTER to select, ESC to cancel")
                    .prompt_skippable()?;
                Ok(answer.map_or(ExistingAction::Cancel, |choice| choice.value))
            },
            ExistingAction::Cancel,
        )
        .await
    }

    async fn pick_executable_file(&self, product_name: &str) -> Option<PathBuf> {
        let message = format!("Path to the {product_name} executable:");
        blocking_prompt(
            move || {
                let answer = Text::new(&message)
                    .with_help_message("Leave empty or press ESC to skip")
                    .prompt_skippable()?;
                Ok(answer
                    .map(|raw| raw.trim().trim_matches('"').to_string())
                    .filter(|raw| !raw.is_empty())
                    .map(PathBuf::from))
            },
            None,
        )
        .await
    }

    async fn confirm_run_installer(&self, installer: &Path) -> bool {
        let message = format!("{} looks like an installer. Run it?", installer.display());
        blocking_prompt(
            move || {
                Ok(Confirm::new(&message)
                    .with_default(true)
                    .with_help_message("The launcher will ask for the installed program afterwards")
                    .prompt()?)
            },
            false,
        )
        .await
    }

    async fn notify_mismatch(&self, reasons: &[String]) -> MismatchAction {
        let mut message = String::from("That file does not look like the expected product:");
        for reason in reasons {
            message.push_str("\n  - ");
            message.push_str(reason);
        }
        message.push_str("\nTry again?");

        blocking_prompt(
            move || {
                let retry = Confirm::new(&message).with_default(true).prompt()?;
                Ok(if retry {
                    MismatchAction::Retry
                } else {
                    MismatchAction::Cancel
                })
            },
            MismatchAction::Cancel,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_action_is_offered_once() {
        let choices = existing_choices();
        for action in [
            ExistingAction::UseExisting,
            ExistingAction::PickFile,
            ExistingAction::Download,
            ExistingAction::Cancel,
        ] {
            assert_eq!(choices.iter().filter(|c| c.value == action).count(), 1);
        }
        assert_eq!(choices[0].to_string(), "Download it");
    }

    #[tokio::test]
    async fn failed_prompt_falls_back() {
        let answer = blocking_prompt(
            || Err(crate::core::error::LauncherError::Other("no tty".into())),
            MismatchAction::Cancel,
        )
        .await;
        assert_eq!(answer, MismatchAction::Cancel);
    }
}
