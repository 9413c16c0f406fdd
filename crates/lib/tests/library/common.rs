use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use respack_lib::manifest::BackupManifest;
use respack_lib::overlay::{OverlaySettings, StatusEvent};
use respack_lib::watch::{BackendKind, WatchConfig};
use tempfile::TempDir;
use tokio::sync::broadcast;

/// One custom folder, one target and one state directory.
pub struct Workspace {
  pub custom: TempDir,
  pub target: TempDir,
  pub state: TempDir,
}

impl Workspace {
  pub fn new() -> Self {
    Self {
      custom: TempDir::new().unwrap(),
      target: TempDir::new().unwrap(),
      state: TempDir::new().unwrap(),
    }
  }

  pub fn custom(&self) -> &Path {
    self.custom.path()
  }

  pub fn target(&self) -> &Path {
    self.target.path()
  }

  pub fn manifest(&self) -> BackupManifest {
    BackupManifest::load(BackupManifest::path_in(self.state.path())).unwrap()
  }

  /// Static settings: no watching, writable output.
  pub fn settings(&self) -> OverlaySettings {
    let mut settings = OverlaySettings::new(
      self.target().to_path_buf(),
      vec![self.custom().to_path_buf()],
      self.state.path().to_path_buf(),
    );
    settings.live = false;
    settings.read_only = false;
    settings
  }

  /// Settings that follow the custom folder with the platform's backend.
  pub fn live_settings(&self) -> OverlaySettings {
    let mut settings = self.settings();
    settings.live = true;
    settings.watch = WatchConfig {
      coalesce_window: Duration::from_millis(50),
      backend: match BackendKind::default() {
        BackendKind::Poll { .. } => BackendKind::Poll {
          interval: Duration::from_millis(50),
        },
        native => native,
      },
    };
    settings
  }
}

pub fn write(root: &Path, rel: &str, content: &str) -> PathBuf {
  let path = root.join(rel);
  fs::create_dir_all(path.parent().unwrap()).unwrap();
  fs::write(&path, content).unwrap();
  path
}

pub fn read(root: &Path, rel: &str) -> String {
  fs::read_to_string(root.join(rel)).unwrap()
}

/// Every file under `root` with its contents, keyed by forward-slash path.
pub fn tree(root: &Path) -> BTreeMap<String, Vec<u8>> {
  let mut files = BTreeMap::new();
  collect(root, root, &mut files);
  files
}

fn collect(root: &Path, dir: &Path, files: &mut BTreeMap<String, Vec<u8>>) {
  for entry in fs::read_dir(dir).unwrap() {
    let path = entry.unwrap().path();
    if path.is_dir() {
      collect(root, &path, files);
    } else {
      let rel = path.strip_prefix(root).unwrap().to_string_lossy().replace('\\', "/");
      files.insert(rel, fs::read(&path).unwrap());
    }
  }
}

/// Wait until `predicate` holds for some received event.
pub async fn wait_for<F>(rx: &mut broadcast::Receiver<StatusEvent>, mut predicate: F) -> StatusEvent
where
  F: FnMut(&StatusEvent) -> bool,
{
  tokio::time::timeout(Duration::from_secs(10), async {
    loop {
      match rx.recv().await {
        Ok(event) if predicate(&event) => return event,
        Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
        Err(broadcast::error::RecvError::Closed) => panic!("status channel closed"),
      }
    }
  })
  .await
  .expect("timed out waiting for status event")
}

/// Wait until `check` holds, polling the filesystem.
pub async fn eventually<F>(mut check: F)
where
  F: FnMut() -> bool,
{
  tokio::time::timeout(Duration::from_secs(10), async {
    while !check() {
      tokio::time::sleep(Duration::from_millis(25)).await;
    }
  })
  .await
  .expect("condition not reached in time")
}
