//! Output formatting for the Portguard CLI.
//!
//! Supports table, JSON, and YAML output formats.

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::*;
use serde::Serialize;
use tabled::{
    settings::{object::Columns, Alignment, Modify, Style},
    Table, Tabled,
};

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Render as a formatted table
    #[default]
    Table,
    /// Render as JSON
    Json,
    /// Render as YAML
    Yaml,
}

pub fn print_success(msg: &str) {
    println!("{} {}", "[OK]".green().bold(), msg);
}

pub fn print_error(msg: &str) {
    eprintln!("{} {}", "[ERROR]".red().bold(), msg);
}

pub fn print_warning(msg: &str) {
    println!("{} {}", "[WARN]".yellow().bold(), msg);
}

pub fn print_info(msg: &str) {
    println!("{} {}", "[INFO]".blue().bold(), msg);
}

/// Print rows as a table; `empty` is shown when there are none.
pub fn print_table<T: Tabled>(rows: &[T], empty: &str) {
    if rows.is_empty() {
        println!("{}", empty.dimmed());
        return;
    }
    let table = Table::new(rows)
        .with(Style::rounded())
        .with(Modify::new(Columns::first()).with(Alignment::left()))
        .to_string();
    println!("{}", table);
}

/// Print a serializable value as JSON or YAML. Table format falls back to JSON.
pub fn print_item<T: Serialize + ?Sized>(item: &T, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            let json = serde_json::to_string_pretty(item).context("Failed to serialize to JSON")?;
            println!("{}", json);
        }
        OutputFormat::Yaml => {
            let yaml = serde_yaml::to_string(item).context("Failed to serialize to YAML")?;
            print!("{}", yaml);
        }
    }
    Ok(())
}

pub fn print_detail(key: &str, value: &str) {
    println!("  {}: {}", key.cyan(), value);
}

pub fn print_header(title: &str) {
    println!();
    println!("{}", title.bold().underline());
    println!();
}

/// Colour a recovery or step state for terminal display.
pub fn paint_state(state: &str) -> String {
    match state {
        "completed" => state.green().to_string(),
        "failed" => state.red().bold().to_string(),
        "diagnosing" | "recovering" | "verifying" | "in-progress" => state.yellow().to_string(),
        _ => state.to_string(),
    }
}

pub fn paint_severity(severity: &str) -> String {
    match severity {
        "high" => severity.red().to_string(),
        "medium" => severity.yellow().to_string(),
        _ => severity.to_string(),
    }
}

/// Render a 0-100 value as a fixed-width bar.
pub fn progress_bar(progress: u8) -> String {
    const WIDTH: usize = 20;
    let progress = progress.min(100);
    let filled = (progress as usize * WIDTH) / 100;
    format!("[{}{}] {:>3}%", "#".repeat(filled), "-".repeat(WIDTH - filled), progress)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar() {
        assert_eq!(progress_bar(0), "[--------------------]   0%");
        assert_eq!(progress_bar(50), "[##########----------]  50%");
        assert_eq!(progress_bar(250), "[####################] 100%");
    }

    #[test]
    fn test_paint_state_plain_without_colour() {
        colored::control::set_override(false);
        assert_eq!(paint_state("completed"), "completed");
        assert_eq!(paint_severity("low"), "low");
    }
}
