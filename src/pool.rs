//! Pool construction and the user-facing API.

use crate::closer::{CloseRequest, Closer, WaitFn};
use crate::connector::Submitter;
use crate::error::{JobError, PoolError};
use crate::laborer::Laborer;
use crate::quiesce::Quiescence;
use crate::settings::Settings;
use crate::work::Work;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use tokio::runtime::Handle as TokioHandle;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// A typed worker pool: a bounded queue of `I` jobs fanned out to a fixed
/// set of laborers, optionally producing `O` outputs and
/// [`JobError`]s on their own bounded queues.
///
/// Handles are cheap clones over a shared core. Submission blocks while
/// the input queue is full (back-pressure), and the same discipline runs
/// backwards through the output and error queues when their consumers
/// fall behind.
///
/// Pools compose: [`connect`](Pool::connect) forwards this pool's outputs
/// into another pool as submissions, and closure then propagates from the
/// parent down.
pub struct Pool<I, O = ()>
where
  I: Send + 'static,
  O: Send + 'static,
{
  pub(crate) core: Arc<PoolCore<I, O>>,
}

impl<I, O> Clone for Pool<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  fn clone(&self) -> Self {
    Self {
      core: self.core.clone(),
    }
  }
}

pub(crate) struct PoolCore<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  pub(crate) name: Arc<String>,
  settings: Settings,
  pub(crate) submitter: Submitter<I>,
  pub(crate) outputs: Option<(kanal::AsyncSender<O>, kanal::AsyncReceiver<O>)>,
  errors: Option<(kanal::AsyncSender<JobError<I>>, kanal::AsyncReceiver<JobError<I>>)>,
  pub(crate) quiesce: Arc<Quiescence>,
  jobs_completed: Arc<AtomicU64>,
  closed: Arc<AtomicBool>,
  close_requested: Arc<AtomicBool>,
  pub(crate) close_tx: kanal::AsyncSender<CloseRequest>,
  laborers_stop: CancellationToken,
  pub(crate) children_close: CancellationToken,
  child_closed_rx: Arc<Mutex<Option<oneshot::Receiver<()>>>>,
  child_wait: Arc<Mutex<Option<WaitFn>>>,
  pub(crate) closed_rx: Mutex<Option<oneshot::Receiver<()>>>,
  pub(crate) connected: Arc<AtomicBool>,
  pub(crate) parent_name: Arc<Mutex<Option<Arc<String>>>>,
  pub(crate) connector_stop: CancellationToken,
  pub(crate) connector_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
  pub(crate) tokio_handle: TokioHandle,
}

impl<I, O> Pool<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  /// Creates a pool with default [`Settings`] and starts its laborers on
  /// `tokio_handle`.
  pub fn new(work: Work<I, O>, tokio_handle: TokioHandle) -> Self {
    Self::with_settings(work, Settings::default(), tokio_handle)
  }

  /// Creates a pool with custom tunings.
  ///
  /// Construction allocates the queues (outputs and errors only for the
  /// shapes that fill them), starts the closure controller, then starts
  /// the laborers.
  pub fn with_settings(work: Work<I, O>, settings: Settings, tokio_handle: TokioHandle) -> Self {
    let settings = settings.normalized();
    let name = Arc::new(settings.name.clone());

    if settings.debug {
      info!(
        pool = %name,
        laborers = settings.laborers,
        size = settings.size,
        ratio = settings.ratio,
        "pool settings initialized"
      );
    } else {
      debug!(
        pool = %name,
        laborers = settings.laborers,
        size = settings.size,
        ratio = settings.ratio,
        "pool settings initialized"
      );
    }

    let (inputs_tx, inputs_rx) = kanal::bounded_async(settings.size);
    let outputs = work
      .produces_outputs()
      .then(|| kanal::bounded_async(settings.size));
    let errors = work
      .produces_errors()
      .then(|| kanal::bounded_async(settings.size));

    let quiesce = Arc::new(Quiescence::new());
    let jobs_completed = Arc::new(AtomicU64::new(0));
    let closed = Arc::new(AtomicBool::new(false));
    let close_requested = Arc::new(AtomicBool::new(false));
    let (close_tx, close_rx) = kanal::bounded_async(1);
    let (closed_tx, closed_rx) = oneshot::channel();

    let laborers_stop = CancellationToken::new();
    let children_close = CancellationToken::new();
    let connector_stop = CancellationToken::new();

    let laborer_handles = Arc::new(Mutex::new(Vec::with_capacity(settings.laborers)));
    let connector_handle = Arc::new(Mutex::new(None));
    let child_closed_rx = Arc::new(Mutex::new(None));
    let child_wait = Arc::new(Mutex::new(None));
    let closed_tx = Arc::new(Mutex::new(Some(closed_tx)));
    let connected = Arc::new(AtomicBool::new(false));
    let parent_name = Arc::new(Mutex::new(None));

    // The controller gets its own clones of everything it touches.
    // Holding the core instead would keep an abandoned pool alive
    // forever; see `Closer`.
    let closer = Closer {
      pool_name: name.clone(),
      requests: close_rx,
      quiesce: quiesce.clone(),
      jobs_completed: jobs_completed.clone(),
      closed: closed.clone(),
      close_requested: close_requested.clone(),
      inputs_tx: inputs_tx.clone(),
      inputs_rx: inputs_rx.clone(),
      outputs: outputs.clone(),
      errors: errors.clone(),
      laborers_stop: laborers_stop.clone(),
      laborer_handles: laborer_handles.clone(),
      children_close: children_close.clone(),
      child_closed_rx: child_closed_rx.clone(),
      child_wait: child_wait.clone(),
      closed_tx: closed_tx.clone(),
      connected: connected.clone(),
      parent_name: parent_name.clone(),
      connector_stop: connector_stop.clone(),
      connector_handle: connector_handle.clone(),
    };
    tokio_handle.spawn(
      closer
        .run()
        .instrument(info_span!("pool_closer", pool = %name)),
    );

    let work = Arc::new(work);
    {
      let mut handles = laborer_handles.lock().unwrap();
      for laborer_id in 0..settings.laborers {
        let laborer = Laborer {
          pool_name: name.clone(),
          work: work.clone(),
          inputs_rx: inputs_rx.clone(),
          outputs_tx: outputs.as_ref().map(|(outputs_tx, _)| outputs_tx.clone()),
          errors_tx: errors.as_ref().map(|(errors_tx, _)| errors_tx.clone()),
          stop: laborers_stop.clone(),
          quiesce: quiesce.clone(),
          jobs_completed: jobs_completed.clone(),
        };
        handles.push(tokio_handle.spawn(
          laborer
            .run()
            .instrument(info_span!("laborer", pool = %name, id = laborer_id)),
        ));
      }
    }
    debug!(pool = %name, laborers = settings.laborers, "laborers started");

    let submitter = Submitter {
      pool_name: name.clone(),
      closed: closed.clone(),
      quiesce: quiesce.clone(),
      inputs_tx,
    };

    Self {
      core: Arc::new(PoolCore {
        name,
        settings,
        submitter,
        outputs,
        errors,
        quiesce,
        jobs_completed,
        closed,
        close_requested,
        close_tx,
        laborers_stop,
        children_close,
        child_closed_rx,
        child_wait,
        closed_rx: Mutex::new(Some(closed_rx)),
        connected,
        parent_name,
        connector_stop,
        connector_handle,
        tokio_handle,
      }),
    }
  }

  /// Enqueues a job, blocking while the input queue is full.
  ///
  /// Returns [`PoolError::PoolClosed`] (with a warning) once the pool has
  /// closed; the job is not accepted.
  pub async fn submit(&self, job: I) -> Result<(), PoolError> {
    self.core.submitter.submit(job).await
  }

  /// Blocks until the pool is quiescent: no jobs queued or executing.
  ///
  /// Returns immediately on an idle pool, may be called repeatedly, and
  /// tolerates concurrent waiters (they wake in a chain).
  pub async fn wait(&self) {
    self.core.quiesce.wait().await;
  }

  /// Closes the pool gracefully: queued and in-flight jobs are drained
  /// first, then the laborers stop and every queue is closed.
  ///
  /// Closing an already-closed pool, or a pool owned by a parent, logs a
  /// warning and does nothing.
  pub async fn close(&self) {
    self.request_close(false).await;
  }

  /// Closes the pool forcefully: queued jobs are discarded, jobs already
  /// inside laborers still finish.
  pub async fn close_forced(&self) {
    self.request_close(true).await;
  }

  async fn request_close(&self, forced: bool) {
    if self.is_closed() {
      warn!(pool = %self.core.name, "pool is already closed");
      return;
    }
    if self.core.close_requested.swap(true, Ordering::SeqCst) {
      warn!(pool = %self.core.name, "a closure request is already in flight");
      return;
    }

    let (ack_tx, ack_rx) = oneshot::channel();
    let request = CloseRequest {
      forced,
      from_connector: false,
      ack: Some(ack_tx),
    };
    if self.core.close_tx.send(request).await.is_err() {
      return;
    }
    let _ = ack_rx.await;
  }

  /// A receiving view of the output queue.
  ///
  /// Refused for shapes without outputs, and for connected pools, whose
  /// outputs belong to the connector alone.
  pub fn outputs(&self) -> Result<kanal::AsyncReceiver<O>, PoolError> {
    let outputs_rx = match self.core.outputs.as_ref() {
      Some((_, outputs_rx)) => outputs_rx,
      None => {
        warn!(pool = %self.core.name, "pool's work does not produce outputs");
        return Err(PoolError::NoOutputs);
      }
    };
    if self.is_connected() {
      warn!(pool = %self.core.name, "outputs are forwarded to the parent pool");
      return Err(PoolError::OutputsForwarded);
    }
    Ok(outputs_rx.clone())
  }

  /// A receiving view of the error queue. Refused for shapes that cannot
  /// fail.
  pub fn errors(&self) -> Result<kanal::AsyncReceiver<JobError<I>>, PoolError> {
    match self.core.errors.as_ref() {
      Some((_, errors_rx)) => Ok(errors_rx.clone()),
      None => {
        warn!(pool = %self.core.name, "pool's work does not produce errors");
        Err(PoolError::NoErrors)
      }
    }
  }

  /// True once closure has fully completed. Transitions false to true
  /// exactly once.
  pub fn is_closed(&self) -> bool {
    self.core.closed.load(Ordering::SeqCst)
  }

  /// True if this pool forwards its outputs to a parent pool.
  pub fn is_connected(&self) -> bool {
    self.core.connected.load(Ordering::SeqCst)
  }

  /// The pool's name, as carried on its log events.
  pub fn name(&self) -> &str {
    &self.core.name
  }

  /// Number of laborers working this pool in parallel.
  pub fn laborers(&self) -> usize {
    self.core.settings.laborers
  }

  /// Jobs that have finished work, successfully or not. Monotonic.
  pub fn jobs_completed(&self) -> u64 {
    self.core.jobs_completed.load(Ordering::Relaxed)
  }

  /// Jobs currently queued or executing.
  pub fn jobs_waiting(&self) -> i64 {
    self.core.quiesce.jobs_waiting()
  }

  /// Stores the child's closed signal and quiescence capability, making
  /// this pool the parent. Called by the child during `connect`.
  pub(crate) fn register_child(&self, closed_rx: oneshot::Receiver<()>, child_wait: WaitFn) {
    *self.core.child_closed_rx.lock().unwrap() = Some(closed_rx);
    *self.core.child_wait.lock().unwrap() = Some(child_wait);
  }
}

impl<I, O> Drop for PoolCore<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  fn drop(&mut self) {
    if self.closed.load(Ordering::SeqCst) {
      return;
    }
    // Every handle is gone and the pool never closed. Stop its tasks the
    // non-blocking way: cancel the stop tokens, tell any child to leave,
    // and close the input queue. The closure controller exits on its own
    // once the request mailbox disconnects.
    warn!(pool = %self.name, "pool dropped without being closed, stopping its tasks");
    self.laborers_stop.cancel();
    self.connector_stop.cancel();
    self.children_close.cancel();
    let _ = self.submitter.inputs_tx.close();
  }
}
