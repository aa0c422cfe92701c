//! Output helpers shared by commands

use colored::Colorize;
use comfy_table::{Cell, Color, ContentArrangement, Table};
use serde::Serialize;

/// Print a value as pretty JSON on stdout
pub fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// A table with a highlighted header row
pub fn table(headers: &[&str]) -> Table {
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(headers.iter().map(|h| Cell::new(h).fg(Color::Cyan)));
    table
}

pub fn success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn label(name: &str, value: impl std::fmt::Display) {
    println!("  {:<11} {}", format!("{}:", name), value.to_string().yellow());
}
