//! Directory watching with burst coalescing.
//!
//! A [`PathWatcher`] runs one session at a time. The session owns the native
//! watch handle, registers every watched directory individually, and emits
//! coalesced [`WatchEvent`]s on a [`WatchStream`]. Events for the same path
//! keep their arrival order; events for different paths may interleave.

mod backend;
mod coalesce;
mod types;

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

pub use backend::{NotifyBackend, RawEventSink, WatchBackend, create_backend};
pub use types::{BackendKind, RawEvent, WatchConfig, WatchError, WatchEvent, WatchEventKind, WatchSetupFailure};

use coalesce::Coalescer;

enum WatcherState {
  Ready,
  Running {
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
  },
  Stopped,
}

/// Owner of a watch session.
///
/// Dropping the watcher stops its session.
pub struct PathWatcher {
  config: WatchConfig,
  state: WatcherState,
}

/// Consumer side of a watch session.
pub struct WatchStream {
  events: mpsc::UnboundedReceiver<WatchEvent>,
  setup_failures: Vec<WatchSetupFailure>,
}

impl WatchStream {
  /// Next event, or `None` once the session has stopped.
  pub async fn recv(&mut self) -> Option<WatchEvent> {
    self.events.recv().await
  }

  /// Roots that could not be watched when the session started.
  pub fn setup_failures(&self) -> &[WatchSetupFailure] {
    &self.setup_failures
  }

  pub fn take_setup_failures(&mut self) -> Vec<WatchSetupFailure> {
    std::mem::take(&mut self.setup_failures)
  }
}

impl PathWatcher {
  pub fn new(config: WatchConfig) -> Self {
    Self {
      config,
      state: WatcherState::Ready,
    }
  }

  pub fn config(&self) -> &WatchConfig {
    &self.config
  }

  pub fn is_running(&self) -> bool {
    matches!(&self.state, WatcherState::Running { task, .. } if !task.is_finished())
  }

  /// Start watching `roots` with the configured backend.
  ///
  /// Must be called from within a Tokio runtime.
  pub fn watch(&mut self, roots: &[PathBuf], recursive: bool) -> Result<WatchStream, WatchError> {
    let backend = self.config.backend;
    self.watch_with(roots, recursive, |sink| create_backend(backend, sink))
  }

  /// Start watching `roots` with a backend produced by `factory`.
  pub fn watch_with<F>(&mut self, roots: &[PathBuf], recursive: bool, factory: F) -> Result<WatchStream, WatchError>
  where
    F: FnOnce(RawEventSink) -> Result<Box<dyn WatchBackend>, WatchError>,
  {
    match &self.state {
      WatcherState::Stopped => return Err(WatchError::Stopped),
      WatcherState::Running { task, .. } if !task.is_finished() => return Err(WatchError::AlreadyWatching),
      _ => {}
    }
    if roots.is_empty() {
      return Err(WatchError::NoRoots);
    }

    let (sink, raw_rx) = RawEventSink::channel();
    let backend = factory(sink)?;
    let (event_tx, event_rx) = mpsc::unbounded_channel();

    let mut session = Session {
      backend,
      roots: Vec::new(),
      dirs: BTreeSet::new(),
      recursive,
      coalescer: Coalescer::new(self.config.coalesce_window),
      sequence: 0,
      events: event_tx,
    };

    let mut setup_failures = Vec::new();
    for root in roots {
      if let Err(error) = session.add_root(root) {
        warn!(root = %root.display(), error = %error, "failed to watch root");
        setup_failures.push(WatchSetupFailure {
          root: root.clone(),
          error,
        });
      }
    }
    if session.roots.is_empty() {
      return Err(WatchError::NoRootsWatched(roots.len()));
    }

    info!(
      roots = session.roots.len(),
      directories = session.dirs.len(),
      recursive,
      "watch session started"
    );

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let task = tokio::spawn(session.run(raw_rx, shutdown_rx));
    self.state = WatcherState::Running {
      shutdown: shutdown_tx,
      task,
    };

    Ok(WatchStream {
      events: event_rx,
      setup_failures,
    })
  }

  /// End the session and release the native handles.
  ///
  /// A consumer blocked in [`WatchStream::recv`] wakes up with `None`.
  /// Later calls to [`watch`](Self::watch) fail with [`WatchError::Stopped`].
  pub fn stop(&mut self) {
    if let WatcherState::Running { shutdown, .. } = std::mem::replace(&mut self.state, WatcherState::Stopped) {
      let _ = shutdown.send(());
      debug!("watch session stop requested");
    }
  }
}

impl Drop for PathWatcher {
  fn drop(&mut self) {
    self.stop();
  }
}

struct Session {
  backend: Box<dyn WatchBackend>,
  roots: Vec<PathBuf>,
  /// Registered directories below the roots.
  dirs: BTreeSet<PathBuf>,
  recursive: bool,
  coalescer: Coalescer,
  sequence: u64,
  events: mpsc::UnboundedSender<WatchEvent>,
}

impl Session {
  async fn run(mut self, mut raw: mpsc::UnboundedReceiver<RawEvent>, mut shutdown: oneshot::Receiver<()>) {
    loop {
      let deadline = self.coalescer.next_deadline();

      tokio::select! {
        biased;

        _ = &mut shutdown => break,

        event = raw.recv() => match event {
          Some(event) => self.on_raw(event),
          None => break,
        },

        _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
          if !self.flush(Instant::now()) {
            break;
          }
        }
      }

      if self.roots.is_empty() {
        info!("all watched roots are gone");
        break;
      }
    }

    debug!("watch session ended");
  }

  fn add_root(&mut self, root: &Path) -> Result<(), WatchError> {
    let root = std::path::absolute(root).map_err(|e| WatchError::Resolve {
      path: root.to_path_buf(),
      source: e,
    })?;
    if self.roots.contains(&root) {
      return Ok(());
    }
    if !root.is_dir() {
      return Err(WatchError::NotADirectory(root));
    }

    self.backend.watch(&root)?;
    trace!(root = %root.display(), "registered root");
    if self.recursive {
      self.register_subdirs(&root, false);
    }
    self.roots.push(root);
    Ok(())
  }

  /// Register every directory below `dir`.
  ///
  /// With `announce`, entries found are also reported as created, covering
  /// files that landed in a new directory before it was registered.
  fn register_subdirs(&mut self, dir: &Path, announce: bool) {
    let now = Instant::now();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
      let entry = match entry {
        Ok(entry) => entry,
        Err(e) => {
          warn!(dir = %dir.display(), error = %e, "failed to scan directory");
          continue;
        }
      };
      if entry.file_type().is_dir() {
        self.register_dir(entry.path());
      }
      if announce {
        self.coalescer.push(entry.into_path(), WatchEventKind::Created, now);
      }
    }
  }

  fn register_dir(&mut self, dir: &Path) {
    if self.dirs.contains(dir) {
      return;
    }
    match self.backend.watch(dir) {
      Ok(()) => {
        trace!(dir = %dir.display(), "registered directory");
        self.dirs.insert(dir.to_path_buf());
      }
      Err(e) => warn!(dir = %dir.display(), error = %e, "failed to watch directory"),
    }
  }

  fn unregister_under(&mut self, path: &Path) {
    let gone: Vec<PathBuf> = self.dirs.iter().filter(|d| d.starts_with(path)).cloned().collect();
    for dir in gone {
      // Backends may have dropped the registration with the directory.
      if let Err(e) = self.backend.unwatch(&dir) {
        trace!(dir = %dir.display(), error = %e, "unwatch failed");
      }
      self.dirs.remove(&dir);
    }
  }

  fn root_of(&self, path: &Path) -> Option<&PathBuf> {
    self
      .roots
      .iter()
      .filter(|root| path.starts_with(root))
      .max_by_key(|root| root.as_os_str().len())
  }

  fn on_raw(&mut self, event: RawEvent) {
    let now = Instant::now();
    let Some(root) = self.root_of(&event.path).cloned() else {
      trace!(path = %event.path.display(), "notification outside watched roots");
      return;
    };

    match event.kind {
      WatchEventKind::Deleted => {
        if !root.exists() {
          self.drop_root(&root);
          return;
        }
        self.unregister_under(&event.path);
      }
      WatchEventKind::Created => {
        if self.recursive && event.path != root && event.path.is_dir() && !self.dirs.contains(&event.path) {
          self.register_dir(&event.path);
          self.register_subdirs(&event.path, true);
        }
      }
      WatchEventKind::Modified => {}
    }

    if event.path != root {
      self.coalescer.push(event.path, event.kind, now);
    }
  }

  /// Forget a root that no longer exists and report its deletion.
  fn drop_root(&mut self, root: &Path) {
    info!(root = %root.display(), "watched root was deleted");
    self.coalescer.purge_under(root);
    self.unregister_under(root);
    if let Err(e) = self.backend.unwatch(root) {
      trace!(root = %root.display(), error = %e, "unwatch failed");
    }
    self.roots.retain(|r| r != root);
    self.emit(root.to_path_buf(), root.to_path_buf(), WatchEventKind::Deleted);
  }

  /// Emit every coalesced event whose window has closed.
  ///
  /// Returns false if the consumer has gone away.
  fn flush(&mut self, now: Instant) -> bool {
    for (path, kind) in self.coalescer.drain_due(now) {
      let Some(root) = self.root_of(&path).cloned() else {
        continue;
      };
      if !self.emit(root, path, kind) {
        return false;
      }
    }
    true
  }

  fn emit(&mut self, root: PathBuf, path: PathBuf, kind: WatchEventKind) -> bool {
    self.sequence += 1;
    trace!(path = %path.display(), ?kind, sequence = self.sequence, "emitting event");
    self
      .events
      .send(WatchEvent {
        root,
        path,
        kind,
        sequence: self.sequence,
      })
      .is_ok()
  }
}
