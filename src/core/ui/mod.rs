// ─── Terminal front-end ───
// Interactive prompts and download progress bars.

pub mod console;
pub mod prompts;

pub use console::ConsoleSink;
pub use prompts::TerminalDecisions;
