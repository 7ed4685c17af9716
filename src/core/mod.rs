// ─── Launchkeeper Core ───
// Acquisition and launch backend for purchased products.
//
// Architecture:
//   core/
//     product/       Product record handed over by the catalog
//     registry/      Persisted product -> executable map
//     identity/      Metadata probe, installer heuristics, validation
//     discovery/     Bounded scan of install roots and shortcuts
//     downloader/    Resumable, cancellable downloads
//     process/       Tracked child processes and tree termination
//     orchestrator/  Launch state machine and decision provider seam
//     state/         Settings and application wiring
//     ui/            Terminal prompts and progress output

pub mod discovery;
pub mod downloader;
pub mod error;
pub mod events;
pub mod http;
pub mod identity;
pub mod orchestrator;
pub mod paths;
pub mod process;
pub mod product;
pub mod registry;
pub mod state;
pub mod ui;
