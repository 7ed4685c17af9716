// ─── Orchestrator ───
// Decides between launching what is registered, discovering an existing
// install, or downloading and installing the product.

pub mod decision;
pub mod flow;

pub use decision::{DecisionProvider, ExistingAction, MismatchAction, UnattendedDecisions};
pub use flow::{LaunchOutcome, LaunchReport, Orchestrator, MAX_DECISION_ROUNDS};
