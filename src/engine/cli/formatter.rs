//! CLI Output Formatting Module
//! Provides consistent, colorized output for terminal UX

use crate::engine::updater::UpdateState;
use colored::Colorize;

pub struct CliFormatter;

impl CliFormatter {
    /// Print a success message
    pub fn success(message: &str) {
        println!("{} {}", "✓".green().bold(), message);
    }

    /// Print an error message
    pub fn error(message: &str) {
        eprintln!("{} {}", "✗".red().bold(), message);
    }

    /// Print a warning message
    pub fn warning(message: &str) {
        println!("{} {}", "⚠".yellow().bold(), message);
    }

    /// Print an info message
    pub fn info(message: &str) {
        println!("{} {}", "ℹ".blue().bold(), message);
    }

    /// Print a section header
    pub fn header(title: &str) {
        println!("\n{}", title.bright_cyan().bold());
        println!("{}", "─".repeat(title.chars().count()).bright_black());
    }

    /// Print a key-value pair
    pub fn kv(key: &str, value: &str) {
        println!("  {}: {}", key.bright_white().bold(), value);
    }

    /// Print a list item
    pub fn item(text: &str) {
        println!("  {} {}", "•".bright_black(), text);
    }

    /// Print an update state, colored by outcome
    pub fn state(state: UpdateState) {
        let label = state.as_str();
        let colored = match state {
            UpdateState::Restarting => label.green().bold(),
            UpdateState::Failed => label.red().bold(),
            UpdateState::Scheduled | UpdateState::Downloading | UpdateState::Applying => {
                label.yellow().bold()
            }
            UpdateState::Idle => label.normal(),
        };
        println!("  {}: {}", "State".bright_white().bold(), colored);
    }

    /// Print a progress bar
    pub fn progress(percent: u8, message: &str) {
        let percent = percent.min(100) as usize;
        let filled = percent / 5;
        println!(
            "  [{}{}] {}% {}",
            "█".repeat(filled).bright_green(),
            "░".repeat(20 - filled).bright_black(),
            percent,
            message
        );
    }
}

/// Format file size in human-readable format
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
