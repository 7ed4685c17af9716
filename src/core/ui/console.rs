// ─── Console event sink ───
// Progress bars for downloads, plain lines for everything else.

use std::collections::HashMap;
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use tracing::trace;

use crate::core::events::{EventEnvelope, EventSink, LaunchEvent};

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}";
const SPINNER_TEMPLATE: &str = "{spinner:.green} {bytes} ({bytes_per_sec}) {msg}";

/// Event sink for the command-line binary.
#[derive(Default)]
pub struct ConsoleSink {
    bars: Mutex<HashMap<String, ProgressBar>>,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_bar(&self, request_id: &str, total: Option<u64>, update: impl FnOnce(&ProgressBar)) {
        let Ok(mut bars) = self.bars.lock() else {
            return;
        };
        let bar = bars
            .entry(request_id.to_string())
            .or_insert_with(|| new_bar(total));
        if let Some(total) = total {
            if bar.length() != Some(total) {
                bar.set_style(style(BAR_TEMPLATE));
                bar.set_length(total);
            }
        }
        update(bar);
    }

    fn take_bar(&self, request_id: &str) -> Option<ProgressBar> {
        self.bars.lock().ok()?.remove(request_id)
    }
}

fn style(template: &str) -> ProgressStyle {
    ProgressStyle::with_template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("#>-")
}

fn new_bar(total: Option<u64>) -> ProgressBar {
    match total {
        Some(total) => {
            let bar = ProgressBar::new(total);
            bar.set_style(style(BAR_TEMPLATE));
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            bar.set_style(style(SPINNER_TEMPLATE));
            bar
        }
    }
}

impl EventSink for ConsoleSink {
    fn emit(&self, envelope: EventEnvelope) {
        trace!(event = ?envelope.event, at = %envelope.at, "console event");
        match envelope.event {
            LaunchEvent::DownloadProgress {
                request_id,
                downloaded_bytes,
                total_bytes,
                ..
            } => self.with_bar(&request_id, total_bytes, |bar| {
                bar.set_position(downloaded_bytes);
            }),
            LaunchEvent::DownloadComplete {
                request_id, path, ..
            } => match self.take_bar(&request_id) {
                Some(bar) => bar.finish_with_message(format!("saved to {}", path.display())),
                None => println!("Downloaded to {}", path.display()),
            },
            LaunchEvent::DownloadError {
                request_id,
                message,
                ..
            } => match self.take_bar(&request_id) {
                Some(bar) => bar.abandon_with_message(format!("failed: {message}")),
                None => eprintln!("Download failed: {message}"),
            },
            LaunchEvent::DownloadCancelled { request_id, .. } => match self.take_bar(&request_id) {
                Some(bar) => bar.abandon_with_message("cancelled"),
                None => eprintln!("Download cancelled"),
            },
            LaunchEvent::InstallStarted { file, kind } => {
                println!("Running {kind} installer {}", file.display());
            }
            LaunchEvent::InstallClosed { file, exit_code } => match exit_code {
                Some(code) => println!("Installer {} exited with code {code}", file.display()),
                None => println!("Installer {} closed", file.display()),
            },
            LaunchEvent::Launched {
                product_id,
                path,
                pid,
            } => println!("Launched {product_id} from {} (pid {pid})", path.display()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn progress(downloaded: u64, total: Option<u64>) -> EventEnvelope {
        EventEnvelope::now(LaunchEvent::DownloadProgress {
            request_id: "r1".into(),
            product_id: "42".into(),
            downloaded_bytes: downloaded,
            total_bytes: total,
            percent: None,
            speed: None,
            eta_seconds: None,
        })
    }

    #[test]
    fn bar_lives_until_the_download_ends() {
        let sink = ConsoleSink::new();
        sink.emit(progress(0, None));
        sink.emit(progress(10, Some(100)));
        {
            let bars = sink.bars.lock().unwrap();
            let bar = bars.get("r1").unwrap();
            assert_eq!(bar.length(), Some(100));
            assert_eq!(bar.position(), 10);
        }

        sink.emit(EventEnvelope::now(LaunchEvent::DownloadComplete {
            request_id: "r1".into(),
            product_id: "42".into(),
            path: PathBuf::from("/d/app.exe"),
        }));
        assert!(sink.bars.lock().unwrap().is_empty());
    }
}
