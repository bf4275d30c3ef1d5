//! CLI progress display utilities
//!
//! Step indicators with emojis, plus a bar that follows the library's
//! [`ExtractProgress`] callbacks across phases.

use std::sync::Mutex;
use std::time::Duration;

use console::{Emoji, style};
use indicatif::{HumanDuration, ProgressBar, ProgressStyle};

use crate::progress::{ExtractPhase, ExtractProgress};

// =============================================================================
// Emoji Constants (with ASCII fallbacks for terminals without emoji support)
// =============================================================================

/// Magnifying glass - for scanning/lookup operations
pub static LOOKING_GLASS: Emoji<'_, '_> = Emoji("🔍 ", "");
/// Package - for bundle decoding
pub static PACKAGE: Emoji<'_, '_> = Emoji("📦 ", "");
/// Link - for indexing operations
pub static LINK: Emoji<'_, '_> = Emoji("🔗 ", "");
/// Picture - for image merging
pub static PICTURE: Emoji<'_, '_> = Emoji("🖼️  ", "");
/// Floppy disk - for writing results
pub static DISK: Emoji<'_, '_> = Emoji("💾 ", "");
/// Warning sign - for diagnostics
pub static WARNING: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
/// Sparkles - for completion
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "");

// =============================================================================
// Step-Based Progress
// =============================================================================

/// Print a step indicator: `[1/3] 📦 Message...`
pub fn print_step(current: usize, total: usize, emoji: Emoji, msg: &str) {
    println!(
        "{} {}{}",
        style(format!("[{current}/{total}]")).bold().dim(),
        emoji,
        msg
    );
}

/// Print completion message: `✨ Done in 2s`
pub fn print_done(elapsed: Duration) {
    println!("{} Done in {}", SPARKLE, HumanDuration(elapsed));
}

// =============================================================================
// Progress Styles
// =============================================================================

/// Progress bar style for determinate progress
///
/// Format: `Merging images [████████░░░░░░░░] 50/100`
#[must_use]
pub fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("{msg} [{bar:40.cyan/blue}] {pos}/{len}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
}

/// Create a simple spinner
#[must_use]
pub fn simple_spinner(msg: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
        pb.set_style(style);
    }
    pb.set_message(msg.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

/// Create a simple progress bar
#[must_use]
pub fn simple_bar(total: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(bar_style());
    pb.set_message(msg.to_string());
    pb
}

// =============================================================================
// Phase-Tracking Bar
// =============================================================================

/// Renders [`ExtractProgress`] updates, restarting the bar on phase change
pub struct PhaseBar {
    bar: ProgressBar,
    phase: Mutex<Option<ExtractPhase>>,
}

impl PhaseBar {
    #[must_use]
    pub fn new() -> Self {
        Self {
            bar: simple_bar(0, ""),
            phase: Mutex::new(None),
        }
    }

    /// Hidden bar for `--quiet`
    #[must_use]
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            phase: Mutex::new(None),
        }
    }

    /// Progress callback body
    pub fn update(&self, progress: &ExtractProgress) {
        if let Ok(mut phase) = self.phase.lock()
            && *phase != Some(progress.phase)
        {
            *phase = Some(progress.phase);
            self.bar.reset();
            self.bar.set_message(progress.phase.as_str());
        }
        self.bar.set_length(progress.total as u64);
        self.bar.set_position(progress.current as u64);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl Default for PhaseBar {
    fn default() -> Self {
        Self::new()
    }
}
