mod apply;
mod discard;
mod restore;
mod status;

use std::path::Path;

use anyhow::{Context, Result};
use respack_lib::config::Config;
use respack_lib::state_lock::{LockMode, StateLock};
use tokio::runtime::Runtime;

pub use apply::cmd_apply;
pub use discard::cmd_discard;
pub use restore::cmd_restore;
pub use status::cmd_status;

/// Load `path`, or the default config file when none is given.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
  match path {
    Some(path) => Config::load(path).with_context(|| format!("Failed to load config {}", path.display())),
    None => Config::load_default().context("Failed to load config"),
  }
}

fn lock_state(state_dir: &Path, command: &str) -> Result<StateLock> {
  StateLock::acquire(state_dir, LockMode::Exclusive, command).context("Failed to lock state directory")
}

fn runtime() -> Result<Runtime> {
  Runtime::new().context("Failed to create async runtime")
}
