use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

/// Answer to "the product was not found ready to launch; what now?".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ExistingAction {
    /// Accept the most recent candidate despite its validation result.
    UseExisting,
    PickFile,
    Download,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MismatchAction {
    Retry,
    Cancel,
}

/// Human-in-the-loop capability consulted at fixed points of a launch.
///
/// Every answer is final for that call; the orchestrator moves to an
/// explicit state before asking again.
#[async_trait]
pub trait DecisionProvider: Send + Sync {
    async fn ask_existing_action(&self, product_name: &str) -> ExistingAction;

    async fn pick_executable_file(&self, product_name: &str) -> Option<PathBuf>;

    async fn confirm_run_installer(&self, installer: &Path) -> bool;

    async fn notify_mismatch(&self, reasons: &[String]) -> MismatchAction;
}

/// Answers without a human: always downloads, always runs installers,
/// never picks a file and gives up on mismatches.
#[derive(Debug, Default, Clone)]
pub struct UnattendedDecisions;

#[async_trait]
impl DecisionProvider for UnattendedDecisions {
    async fn ask_existing_action(&self, product_name: &str) -> ExistingAction {
        info!("Unattended: downloading {product_name}");
        ExistingAction::Download
    }

    async fn pick_executable_file(&self, _product_name: &str) -> Option<PathBuf> {
        None
    }

    async fn confirm_run_installer(&self, installer: &Path) -> bool {
        info!("Unattended: running installer {:?}", installer);
        true
    }

    async fn notify_mismatch(&self, reasons: &[String]) -> MismatchAction {
        info!("Unattended: giving up after mismatch: {}", reasons.join("; "));
        MismatchAction::Cancel
    }
}

#[cfg(test)]
pub(crate) mod scripted {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays canned answers and records what it was asked.
    #[derive(Default)]
    pub struct ScriptedDecisions {
        pub actions: Mutex<VecDeque<ExistingAction>>,
        pub picks: Mutex<VecDeque<Option<PathBuf>>>,
        pub confirms: Mutex<VecDeque<bool>>,
        pub mismatches: Mutex<VecDeque<MismatchAction>>,
        pub mismatch_reasons: Mutex<Vec<Vec<String>>>,
        pub asked: Mutex<Vec<&'static str>>,
    }

    impl ScriptedDecisions {
        pub fn with_actions(actions: impl IntoIterator<Item = ExistingAction>) -> Self {
            let scripted = Self::default();
            scripted.actions.lock().unwrap().extend(actions);
            scripted
        }

        pub fn then_pick(self, pick: Option<PathBuf>) -> Self {
            self.picks.lock().unwrap().push_back(pick);
            self
        }

        pub fn then_confirm(self, answer: bool) -> Self {
            self.confirms.lock().unwrap().push_back(answer);
            self
        }

        pub fn then_on_mismatch(self, answer: MismatchAction) -> Self {
            self.mismatches.lock().unwrap().push_back(answer);
            self
        }

        pub fn asked(&self) -> Vec<&'static str> {
            self.asked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DecisionProvider for ScriptedDecisions {
        async fn ask_existing_action(&self, _product_name: &str) -> ExistingAction {
            self.asked.lock().unwrap().push("existing");
            self.actions
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(ExistingAction::Cancel)
        }

        async fn pick_executable_file(&self, _product_name: &str) -> Option<PathBuf> {
            self.asked.lock().unwrap().push("pick");
            self.picks.lock().unwrap().pop_front().flatten()
        }

        async fn confirm_run_installer(&self, _installer: &Path) -> bool {
            self.asked.lock().unwrap().push("confirm");
            self.confirms.lock().unwrap().pop_front().unwrap_or(false)
        }

        async fn notify_mismatch(&self, reasons: &[String]) -> MismatchAction {
            self.asked.lock().unwrap().push("mismatch");
            self.mismatch_reasons.lock().unwrap().push(reasons.to_vec());
            self.mismatches
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(MismatchAction::Cancel)
        }
    }
}
