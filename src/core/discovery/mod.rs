pub mod roots;
pub mod scanner;
pub mod shortcuts;

pub use roots::default_search_roots;
pub use scanner::{scan_root, DiscoveryScanner, InstallLocator, NameMatcher, ScanBudget, ScanReport};
pub use shortcuts::{PlatformShortcuts, ShortcutResolver};
