//! Terminal UI utilities for progress indication and styled output.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};

/// Progress bar over a byte range, hidden when stderr is not a terminal.
pub struct Progress {
    bar: ProgressBar,
}

impl Progress {
    pub fn new(total: u64, message: &str) -> Self {
        let bar = ProgressBar::new(total);
        let style = ProgressStyle::default_bar()
            .template("{msg} [{bar:30.cyan/dim}] {bytes}/{total_bytes}")
            .map_or_else(|_| ProgressStyle::default_bar(), |s| s.progress_chars("━╸━"));
        bar.set_style(style);
        bar.set_message(message.to_string());
        Self { bar }
    }

    pub fn set_position(&self, pos: u64) {
        self.bar.set_position(pos);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Drop for Progress {
    fn drop(&mut self) {
        self.bar.finish_and_clear();
    }
}

// ============================================================================
// Styled output helpers
// ============================================================================

/// Print a success message to stderr.
pub fn success(message: &str) {
    eprintln!("{} {}", style("✓").green().bold(), message);
}

/// Print an error message to stderr.
pub fn error(message: &str) {
    eprintln!("{} {}", style("✗").red().bold(), message);
}

/// Print a warning message to stderr.
pub fn warning(message: &str) {
    eprintln!("{} {}", style("!").yellow().bold(), message);
}

/// Bold label for key/value listings.
pub fn label(text: &str) -> String {
    style(text).bold().to_string()
}
