//! Crate-wide constants.

/// Application name, used for platform directory names.
pub const APP_NAME: &str = "respack";

/// Manifest file name within the state directory.
pub const MANIFEST_FILENAME: &str = "manifest.json";

/// Directory holding preserved originals within the state directory.
pub const ORIGINALS_DIR: &str = "originals";

/// Configuration file name within the config directory.
pub const CONFIG_FILENAME: &str = "config.toml";

/// Default coalescing window for watch notifications, in milliseconds.
pub const DEFAULT_COALESCE_WINDOW_MS: u64 = 50;

/// Default polling interval for the polling watch backend, in milliseconds.
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 200;

/// Default number of overlay workers.
pub const DEFAULT_WORKERS: usize = 2;

/// Default cap on the number of members expanded from one archive.
pub const DEFAULT_MAX_ARCHIVE_ENTRIES: usize = 10_000;

/// Default time shutdown waits for the final restore, in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;
