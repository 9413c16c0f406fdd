//! Bounded worker pool with one outstanding item per route.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::{Semaphore, mpsc, oneshot};
use tokio::task::{Id, JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, trace};

use crate::key::RelativeKey;
use crate::registry::{WorkItem, WorkQueue};

/// Blocking work run for each dequeued item.
pub type WorkHandler = Arc<dyn Fn(WorkItem) + Send + Sync>;

/// Runs [`WorkItem`]s on the blocking pool.
///
/// Items that share a route run one at a time in submission order; items on
/// different routes run concurrently, at most `workers` at once. After
/// [`shutdown`](Self::shutdown) no new items are accepted and queued items
/// are dropped, but items already running finish.
pub struct KeyedExecutor {
  submit: WorkQueue,
  shutdown: Option<oneshot::Sender<()>>,
  dispatcher: Option<JoinHandle<()>>,
}

impl KeyedExecutor {
  /// Start the dispatcher. Must be called from within a Tokio runtime.
  pub fn spawn(workers: usize, handler: WorkHandler) -> Self {
    let (submit, rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let dispatcher = Dispatcher::new(workers, handler);
    let dispatcher = tokio::spawn(dispatcher.run(rx, shutdown_rx));

    Self {
      submit,
      shutdown: Some(shutdown_tx),
      dispatcher: Some(dispatcher),
    }
  }

  /// A handle for submitting work.
  pub fn queue(&self) -> WorkQueue {
    self.submit.clone()
  }

  pub fn submit(&self, item: WorkItem) -> bool {
    self.submit.send(item).is_ok()
  }

  /// Stop accepting work and wait for running items to finish.
  pub async fn shutdown(mut self) {
    if let Some(shutdown) = self.shutdown.take() {
      let _ = shutdown.send(());
    }
    if let Some(dispatcher) = self.dispatcher.take()
      && let Err(e) = dispatcher.await
    {
      error!(error = %e, "executor dispatcher panicked");
    }
  }
}

impl Drop for KeyedExecutor {
  fn drop(&mut self) {
    if let Some(shutdown) = self.shutdown.take() {
      let _ = shutdown.send(());
    }
  }
}

struct Dispatcher {
  semaphore: Arc<Semaphore>,
  handler: WorkHandler,
  queues: HashMap<RelativeKey, VecDeque<WorkItem>>,
  busy: HashSet<RelativeKey>,
  /// Route of each running task, released whether the task finishes or fails.
  routes: HashMap<Id, RelativeKey>,
  running: JoinSet<()>,
}

impl Dispatcher {
  fn new(workers: usize, handler: WorkHandler) -> Self {
    Self {
      semaphore: Arc::new(Semaphore::new(workers.max(1))),
      handler,
      queues: HashMap::new(),
      busy: HashSet::new(),
      routes: HashMap::new(),
      running: JoinSet::new(),
    }
  }

  async fn run(mut self, mut rx: mpsc::UnboundedReceiver<WorkItem>, mut shutdown: oneshot::Receiver<()>) {
    let mut closing = false;
    let mut intake_done = false;

    loop {
      tokio::select! {
        biased;

        _ = &mut shutdown, if !closing => {
          debug!(running = self.running.len(), "executor shutting down");
          closing = true;
          rx.close();
          self.queues.clear();
        }

        item = rx.recv(), if !intake_done => match item {
          Some(item) if closing => trace!(route = %item.route, "dropping item after shutdown"),
          Some(item) => self.enqueue(item),
          None => intake_done = true,
        },

        Some(finished) = self.running.join_next_with_id(), if !self.running.is_empty() => {
          self.finished(finished, closing);
        }
      }

      if (closing || intake_done) && self.running.is_empty() && self.queues.is_empty() {
        break;
      }
    }

    debug!("executor stopped");
  }

  /// Free the route of a task that ended, even one that was aborted.
  fn finished(&mut self, result: Result<(Id, ()), JoinError>, closing: bool) {
    let id = match result {
      Ok((id, ())) => id,
      Err(e) => {
        error!(error = %e, "work task failed");
        e.id()
      }
    };
    if let Some(route) = self.routes.remove(&id) {
      self.busy.remove(&route);
      if !closing {
        self.start_next(&route);
      }
    }
  }

  fn enqueue(&mut self, item: WorkItem) {
    let route = item.route.clone();
    self.queues.entry(route.clone()).or_default().push_back(item);
    if !self.busy.contains(&route) {
      self.start_next(&route);
    }
  }

  fn start_next(&mut self, route: &RelativeKey) {
    let Some(queue) = self.queues.get_mut(route) else {
      return;
    };
    let Some(item) = queue.pop_front() else {
      return;
    };
    if queue.is_empty() {
      self.queues.remove(route);
    }

    self.busy.insert(route.clone());
    let task_route = route.clone();
    let semaphore = self.semaphore.clone();
    let handler = self.handler.clone();
    let task = self.running.spawn(async move {
      let _permit = semaphore.acquire_owned().await;
      if let Err(e) = tokio::task::spawn_blocking(move || handler(item)).await {
        error!(route = %task_route, error = %e, "work item panicked");
      }
    });
    self.routes.insert(task.id(), route.clone());
  }
}
