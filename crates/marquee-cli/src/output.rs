//! Output formatting for CLI

use console::style;
use serde::Serialize;

pub fn heading(text: &str) {
    println!("{}", style(text).bold());
}

pub fn field(key: &str, value: impl std::fmt::Display) {
    println!("  {}: {}", style(key).dim(), value);
}

pub fn event(at: f64, text: impl std::fmt::Display) {
    println!("  {} {}", style(format!("[{at:>6.1}s]")).cyan(), text);
}

pub fn ok(text: impl std::fmt::Display) {
    println!("{} {}", style("OK").green().bold(), text);
}

pub fn warn(text: impl std::fmt::Display) {
    println!("{} {}", style("WARN").yellow().bold(), text);
}

/// Serialize to pretty JSON for `--format json`
pub fn json<T: Serialize>(data: &T) -> String {
    serde_json::to_string_pretty(data).unwrap_or_else(|_| "{}".to_string())
}

pub fn is_json(format: &str) -> bool {
    format.eq_ignore_ascii_case("json")
}
