//! Terminal output for the respack commands.

use std::time::Duration;

use anyhow::Context;
use owo_colors::{OwoColorize, Stream};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const WARNING: &str = "⚠";
  pub const INFO: &str = "•";
  pub const ARROW: &str = "→";
  pub const ADD: &str = "+";
  pub const MODIFY: &str = "~";
  pub const REMOVE: &str = "-";
}

/// What happened to one target key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
  /// A file the target did not have before.
  Add,
  /// A file that replaced one of the target's own.
  Modify,
  /// A key put back into its pre-overlay state.
  Remove,
}

impl Change {
  pub fn symbol(self) -> &'static str {
    match self {
      Change::Add => symbols::ADD,
      Change::Modify => symbols::MODIFY,
      Change::Remove => symbols::REMOVE,
    }
  }
}

/// First 12 hex digits of a SHA-256.
pub fn short_checksum(checksum: &str) -> &str {
  checksum.get(..12).unwrap_or(checksum)
}

/// Size of the preserved originals, in binary units.
pub fn format_size(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["KiB", "MiB", "GiB", "TiB"];
  if bytes < 1024 {
    return format!("{} B", bytes);
  }
  let mut value = bytes as f64 / 1024.0;
  let mut unit = 0;
  while value >= 1024.0 && unit + 1 < UNITS.len() {
    value /= 1024.0;
    unit += 1;
  }
  format!("{:.1} {}", value, UNITS[unit])
}

/// Elapsed time rounded to milliseconds.
pub fn format_elapsed(elapsed: Duration) -> String {
  let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
  humantime::format_duration(Duration::from_millis(millis)).to_string()
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_info(message: &str) {
  println!(
    "{} {}",
    symbols::INFO.if_supports_color(Stream::Stdout, |s| s.blue()),
    message
  );
}

/// Warnings go to stderr so `status --json` stays parseable.
pub fn print_warning(message: &str) {
  eprintln!(
    "{} {}",
    symbols::WARNING.if_supports_color(Stream::Stderr, |s| s.yellow()),
    message.if_supports_color(Stream::Stderr, |s| s.yellow())
  );
}

pub fn print_change(change: Change, key: &str) {
  let symbol = change.symbol();
  let symbol = match change {
    Change::Add => symbol.if_supports_color(Stream::Stdout, |s| s.green()).to_string(),
    Change::Modify => symbol.if_supports_color(Stream::Stdout, |s| s.yellow()).to_string(),
    Change::Remove => symbol.if_supports_color(Stream::Stdout, |s| s.red()).to_string(),
  };
  println!("  {} {}", symbol, key);
}

pub fn print_stat(label: &str, value: &str) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize status")?;
  println!("{}", json);
  Ok(())
}
