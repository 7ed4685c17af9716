pub mod store;

pub use store::LauncherRegistry;
