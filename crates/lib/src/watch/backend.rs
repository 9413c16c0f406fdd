//! Native watch mechanisms behind one capability.

use std::path::{Path, PathBuf};

use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{trace, warn};

use super::types::{BackendKind, RawEvent, WatchError, WatchEventKind};

/// Registers single directories with a platform watch mechanism.
///
/// Registrations are non-recursive; the session registers subdirectories
/// itself so that it knows which directories are live.
pub trait WatchBackend: Send + 'static {
  fn watch(&mut self, path: &Path) -> Result<(), WatchError>;

  fn unwatch(&mut self, path: &Path) -> Result<(), WatchError>;
}

/// Where backends deliver raw notifications.
#[derive(Debug, Clone)]
pub struct RawEventSink {
  tx: mpsc::UnboundedSender<RawEvent>,
}

impl RawEventSink {
  pub(super) fn channel() -> (Self, mpsc::UnboundedReceiver<RawEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }

  /// Returns false once the watch session has ended.
  pub fn send(&self, path: PathBuf, kind: WatchEventKind) -> bool {
    self.tx.send(RawEvent { path, kind }).is_ok()
  }
}

/// [`WatchBackend`] over any `notify` watcher.
pub struct NotifyBackend<W> {
  watcher: W,
}

impl<W: Watcher + Send + 'static> WatchBackend for NotifyBackend<W> {
  fn watch(&mut self, path: &Path) -> Result<(), WatchError> {
    self
      .watcher
      .watch(path, RecursiveMode::NonRecursive)
      .map_err(|e| WatchError::Register {
        path: path.to_path_buf(),
        source: e,
      })
  }

  fn unwatch(&mut self, path: &Path) -> Result<(), WatchError> {
    self.watcher.unwatch(path).map_err(|e| WatchError::Unregister {
      path: path.to_path_buf(),
      source: e,
    })
  }
}

/// Build the backend selected by `kind`, delivering into `sink`.
pub fn create_backend(kind: BackendKind, sink: RawEventSink) -> Result<Box<dyn WatchBackend>, WatchError> {
  let handler = move |res: notify::Result<Event>| match res {
    Ok(event) => translate(event, &sink),
    Err(e) => warn!(error = %e, "watch error"),
  };

  match kind {
    BackendKind::Native => {
      let watcher = notify::recommended_watcher(handler).map_err(WatchError::Create)?;
      Ok(Box::new(NotifyBackend::<RecommendedWatcher> { watcher }))
    }
    BackendKind::Poll { interval } => {
      let config = notify::Config::default().with_poll_interval(interval);
      let watcher = PollWatcher::new(handler, config).map_err(WatchError::Create)?;
      Ok(Box::new(NotifyBackend::<PollWatcher> { watcher }))
    }
  }
}

/// Map one notify event onto raw created/modified/deleted notifications.
///
/// Renames become a deletion of the old path followed by a creation of the
/// new one.
pub(super) fn translate(event: Event, sink: &RawEventSink) {
  trace!(kind = ?event.kind, paths = ?event.paths, "raw notification");

  match event.kind {
    EventKind::Create(_) => send_all(sink, event.paths, WatchEventKind::Created),
    EventKind::Remove(_) => send_all(sink, event.paths, WatchEventKind::Deleted),
    EventKind::Modify(ModifyKind::Name(mode)) => match mode {
      RenameMode::From => send_all(sink, event.paths, WatchEventKind::Deleted),
      RenameMode::To => send_all(sink, event.paths, WatchEventKind::Created),
      RenameMode::Both => {
        let mut paths = event.paths.into_iter();
        if let Some(from) = paths.next() {
          sink.send(from, WatchEventKind::Deleted);
        }
        if let Some(to) = paths.next() {
          sink.send(to, WatchEventKind::Created);
        }
      }
      RenameMode::Any | RenameMode::Other => {
        for path in event.paths {
          let kind = if path.exists() {
            WatchEventKind::Created
          } else {
            WatchEventKind::Deleted
          };
          sink.send(path, kind);
        }
      }
    },
    EventKind::Modify(ModifyKind::Metadata(_)) | EventKind::Access(_) => {}
    EventKind::Modify(_) => send_all(sink, event.paths, WatchEventKind::Modified),
    EventKind::Any | EventKind::Other => {}
  }
}

fn send_all(sink: &RawEventSink, paths: Vec<PathBuf>, kind: WatchEventKind) {
  for path in paths {
    sink.send(path, kind);
  }
}
