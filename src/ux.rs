//! Output formatting utilities for the CLI.
//!
//! Provides table-based and JSON output modes with optional colorization.

use anyhow::Result;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::time::Duration;
use tabled::{settings::Style, Table, Tabled};

/// Output formatter
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    colored: bool,
    pub json_mode: bool,
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self::new(true, false)
    }
}

impl OutputFormatter {
    /// Create a new output formatter
    pub fn new(colored: bool, json_mode: bool) -> Self {
        if !colored {
            colored::control::set_override(false);
        }
        Self { colored, json_mode }
    }

    /// Print success message
    pub fn success(&self, message: &str) {
        if self.colored {
            println!("{} {}", "✓".green().bold(), message.green());
        } else {
            println!("✓ {}", message);
        }
    }

    /// Print error message
    pub fn error(&self, message: &str) {
        if self.colored {
            eprintln!("{} {}", "✗".red().bold(), message.red());
        } else {
            eprintln!("✗ {}", message);
        }
    }

    /// Print warning message
    pub fn warning(&self, message: &str) {
        if self.colored {
            println!("{} {}", "⚠".yellow().bold(), message.yellow());
        } else {
            println!("⚠ {}", message);
        }
    }

    /// Print info message
    pub fn info(&self, message: &str) {
        if self.colored {
            println!("{} {}", "ℹ".blue().bold(), message);
        } else {
            println!("ℹ {}", message);
        }
    }

    pub fn header(&self, title: &str) {
        if self.colored {
            println!("\n{}", title.bold().underline());
        } else {
            println!("\n{}", title);
        }
    }

    /// Print key-value pair
    pub fn kv(&self, key: &str, value: &str) {
        if self.colored {
            println!("  {}: {}", key.bold(), value);
        } else {
            println!("  {}: {}", key, value);
        }
    }

    /// Print as JSON
    pub fn json<T: Serialize + ?Sized>(&self, data: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(data)?;
        println!("{}", json);
        Ok(())
    }

    /// Print a table
    pub fn table<T: Tabled>(&self, data: Vec<T>) {
        if data.is_empty() {
            self.info("No data to display");
            return;
        }
        println!("\n{}", render_table(data));
    }

    /// Output data in the configured format (table or JSON)
    pub fn output<T: Serialize + Tabled>(&self, data: Vec<T>) -> Result<()> {
        if self.json_mode {
            self.json(&data)
        } else {
            self.table(data);
            Ok(())
        }
    }

    /// Status glyph used by node and network listings.
    pub fn status_glyph(&self, status: &str) -> String {
        let glyph = match status {
            "running" | "active" => "✓",
            "error" | "unreachable" | "failed" => "✗",
            _ => "○",
        };
        if !self.colored {
            return glyph.to_string();
        }
        match glyph {
            "✓" => glyph.green().to_string(),
            "✗" => glyph.red().to_string(),
            _ => glyph.dimmed().to_string(),
        }
    }

    /// Spinner for long running steps. Hidden in JSON mode.
    pub fn spinner(&self, message: &str) -> ProgressBar {
        if self.json_mode {
            return ProgressBar::hidden();
        }
        let pb = ProgressBar::new_spinner();
        pb.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        pb
    }
}

/// Render rows as a rounded table.
pub fn render_table<T: Tabled>(data: Vec<T>) -> String {
    let mut table = Table::new(data);
    table.with(Style::rounded());
    table.to_string()
}

/// Format a byte count using 1024-based units.
pub fn format_bytes(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT && exp < 5 {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let units = ["KB", "MB", "GB", "TB", "PB", "EB"];
    format!("{:.1} {}", bytes as f64 / div as f64, units[exp])
}

/// Format a duration as `1h2m3s`, omitting leading zero parts.
pub fn format_duration(secs: i64) -> String {
    let secs = secs.max(0);
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{}h{}m{}s", h, m, s)
    } else if m > 0 {
        format!("{}m{}s", m, s)
    } else {
        format!("{}s", s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.0 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.0 GB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(5), "5s");
        assert_eq!(format_duration(65), "1m5s");
        assert_eq!(format_duration(3723), "1h2m3s");
        assert_eq!(format_duration(-3), "0s");
    }

    #[test]
    fn test_status_glyph_plain() {
        let out = OutputFormatter::new(false, false);
        assert_eq!(out.status_glyph("running"), "✓");
        assert_eq!(out.status_glyph("stopped"), "○");
        assert_eq!(out.status_glyph("error"), "✗");
    }

    #[derive(Tabled)]
    struct Row {
        name: &'static str,
        size: &'static str,
    }

    #[test]
    fn test_render_table_contains_rows() {
        let rendered = render_table(vec![Row { name: "snap-a", size: "1.0 KB" }]);
        assert!(rendered.contains("name"));
        assert!(rendered.contains("snap-a"));
        assert!(rendered.contains("1.0 KB"));
        assert!(rendered.starts_with('╭'));
    }
}
