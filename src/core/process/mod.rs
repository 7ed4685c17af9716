pub mod supervisor;

pub use supervisor::{terminate_tree, ProcessSupervisor, TrackedHandle, TrackedProcess};
