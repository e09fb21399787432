//! The closure controller: one long-lived task per pool that serializes
//! close requests and walks the pool through its shutdown sequence.
//!
//! The controller is the single owner of every closing transition, so no
//! lock guards the `closed` flag: user-facing `close()` is a thin
//! post-and-wait wrapper around the request mailbox.

use crate::error::JobError;
use crate::quiesce::Quiescence;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures::future::BoxFuture;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// A child pool's quiescence capability, registered with its parent at
/// connect time and invoked during the parent's graceful closure.
pub(crate) type WaitFn = Box<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// One closure request posted to the controller mailbox.
pub(crate) struct CloseRequest {
  /// Skip the drain steps; queued jobs are discarded, jobs already inside
  /// laborers still finish.
  pub(crate) forced: bool,

  /// The request came from this pool's own connector reacting to the
  /// parent's closure broadcast, not from user code.
  pub(crate) from_connector: bool,

  /// Released once the request has been fully handled.
  pub(crate) ack: Option<oneshot::Sender<()>>,
}

/// Everything the controller needs, cloned out of the pool at construction.
/// The controller deliberately does not hold the pool core: an abandoned,
/// never-closed pool must still be droppable, at which point the mailbox
/// disconnects and this task exits.
pub(crate) struct Closer<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  pub(crate) pool_name: Arc<String>,
  pub(crate) requests: kanal::AsyncReceiver<CloseRequest>,
  pub(crate) quiesce: Arc<Quiescence>,
  pub(crate) jobs_completed: Arc<AtomicU64>,
  pub(crate) closed: Arc<AtomicBool>,
  pub(crate) close_requested: Arc<AtomicBool>,
  pub(crate) inputs_tx: kanal::AsyncSender<I>,
  pub(crate) inputs_rx: kanal::AsyncReceiver<I>,
  pub(crate) outputs: Option<(kanal::AsyncSender<O>, kanal::AsyncReceiver<O>)>,
  pub(crate) errors: Option<(kanal::AsyncSender<JobError<I>>, kanal::AsyncReceiver<JobError<I>>)>,
  pub(crate) laborers_stop: CancellationToken,
  pub(crate) laborer_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
  pub(crate) children_close: CancellationToken,
  pub(crate) child_closed_rx: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
  pub(crate) child_wait: Arc<Mutex<Option<WaitFn>>>,
  pub(crate) closed_tx: Arc<Mutex<Option<oneshot::Sender<()>>>>,
  pub(crate) connected: Arc<AtomicBool>,
  pub(crate) parent_name: Arc<Mutex<Option<Arc<String>>>>,
  pub(crate) connector_stop: CancellationToken,
  pub(crate) connector_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl<I, O> Closer<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  pub(crate) async fn run(self) {
    debug!(pool = %self.pool_name, "closure controller started");

    loop {
      let request = match self.requests.recv().await {
        Ok(request) => request,
        // Every request sender is gone; the pool was dropped unclosed.
        Err(_) => return,
      };

      if self.closed.load(Ordering::SeqCst) {
        warn!(pool = %self.pool_name, "pool is already closed");
        release(request.ack);
        continue;
      }

      // A connected pool belongs to its parent: user code may not close
      // it, only the connector relaying the parent's broadcast may.
      if self.connected.load(Ordering::SeqCst) && !request.from_connector {
        let parent = self.parent_name.lock().unwrap().clone();
        let parent = parent.as_deref().map_or("", |name| name.as_str());
        warn!(pool = %self.pool_name, parent, "only the parent pool may close this pool");
        self.close_requested.store(false, Ordering::SeqCst);
        release(request.ack);
        continue;
      }

      self.shutdown(request.forced).await;
      release(request.ack);
      break;
    }

    // Requests that raced the closure get the same warning instead of
    // leaving their callers waiting on an ack that never comes.
    while let Ok(Some(request)) = self.requests.try_recv() {
      warn!(pool = %self.pool_name, "pool is already closed");
      release(request.ack);
    }
    debug!(pool = %self.pool_name, "closure controller finished");
  }

  async fn shutdown(&self, forced: bool) {
    info!(pool = %self.pool_name, forced, "pool closure started");

    // A graceful closure lets the child wrap up its queued work before
    // it is told to leave.
    if !forced {
      let child_wait = self.child_wait.lock().unwrap().take();
      if let Some(child_wait) = child_wait {
        debug!(pool = %self.pool_name, "waiting for the child pool to finish its queued work");
        child_wait().await;
      }
    }

    // The child closes before this pool touches its own laborers: its
    // connector keeps forwarding into this pool's input queue right up
    // to the child's own laborer stop, and those submissions must land
    // in a pool that still accepts them.
    let child_closed_rx = self.child_closed_rx.lock().unwrap().take();
    if let Some(child_closed_rx) = child_closed_rx {
      self.children_close.cancel();
      info!(pool = %self.pool_name, "waiting for the child pool to close");
      let _ = child_closed_rx.await;
      info!(pool = %self.pool_name, "child pool closed, resuming closure");
    }

    // Drain the pool's own backlog through the laborers, unless forced.
    if !forced {
      self.quiesce.wait().await;
    }

    // Stop the laborers and wait for each to finish the job in hand.
    self.laborers_stop.cancel();
    let laborer_handles = std::mem::take(&mut *self.laborer_handles.lock().unwrap());
    let stopped = laborer_handles.len();
    for handle in laborer_handles {
      if let Err(join_error) = handle.await {
        error!(pool = %self.pool_name, "laborer task failed to join: {join_error}");
      }
    }
    debug!(pool = %self.pool_name, laborers = stopped, "all laborers stopped");

    // Stop the connector after the laborers: on its way out it forwards
    // the final outputs the laborers left behind.
    if self.connected.load(Ordering::SeqCst) {
      self.connector_stop.cancel();
      let connector_handle = self.connector_handle.lock().unwrap().take();
      if let Some(handle) = connector_handle {
        if let Err(join_error) = handle.await {
          error!(pool = %self.pool_name, "connector task failed to join: {join_error}");
        }
      }
      debug!(pool = %self.pool_name, "connector stopped");
    }

    // Queues drain before they close so no blocked producer ever trips
    // over a closed queue from inside a send.
    let discarded = drain(&self.inputs_rx);
    let _ = self.inputs_tx.close();
    if discarded > 0 {
      debug!(pool = %self.pool_name, discarded, "queued jobs discarded");
    }
    if let Some((outputs_tx, outputs_rx)) = &self.outputs {
      drain(outputs_rx);
      let _ = outputs_tx.close();
    }
    if let Some((errors_tx, errors_rx)) = &self.errors {
      drain(errors_rx);
      let _ = errors_tx.close();
    }

    // Finalize. The closed signal is the last external event: a parent
    // mid-closure is blocked on it.
    self.closed.store(true, Ordering::SeqCst);
    let closed_tx = self.closed_tx.lock().unwrap().take();
    if let Some(closed_tx) = closed_tx {
      let _ = closed_tx.send(());
    }
    info!(
      pool = %self.pool_name,
      completed = self.jobs_completed.load(Ordering::Relaxed),
      "pool closed"
    );
  }
}

fn release(ack: Option<oneshot::Sender<()>>) {
  if let Some(ack) = ack {
    let _ = ack.send(());
  }
}

/// Removes whatever is immediately available from a queue.
fn drain<T>(rx: &kanal::AsyncReceiver<T>) -> usize {
  let mut removed = 0;
  while let Ok(Some(_)) = rx.try_recv() {
    removed += 1;
  }
  removed
}
