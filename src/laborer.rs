//! The laborer task: consumes jobs from the input queue and performs the
//! pool's work.

use crate::error::JobError;
use crate::quiesce::Quiescence;
use crate::work::{Outcome, Work};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

/// Everything one laborer needs, cloned out of the pool at construction so
/// the task holds no reference back to the pool handle itself.
pub(crate) struct Laborer<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  pub(crate) pool_name: Arc<String>,
  pub(crate) work: Arc<Work<I, O>>,
  pub(crate) inputs_rx: kanal::AsyncReceiver<I>,
  pub(crate) outputs_tx: Option<kanal::AsyncSender<O>>,
  pub(crate) errors_tx: Option<kanal::AsyncSender<JobError<I>>>,
  pub(crate) stop: CancellationToken,
  pub(crate) quiesce: Arc<Quiescence>,
  pub(crate) jobs_completed: Arc<AtomicU64>,
}

impl<I, O> Laborer<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  pub(crate) async fn run(self) {
    trace!(pool = %self.pool_name, "laborer started");

    loop {
      tokio::select! {
        biased;

        _ = self.stop.cancelled() => {
          trace!(pool = %self.pool_name, "stop signal received, laborer terminating");
          break;
        }

        job = self.inputs_rx.recv() => match job {
          Ok(job) => self.dispatch(job).await,
          Err(_) => {
            debug!(pool = %self.pool_name, "input queue closed, laborer terminating");
            break;
          }
        }
      }
    }
  }

  /// Performs one job, enqueues whatever it produced, then updates the
  /// counters.
  async fn dispatch(&self, job: I) {
    match self.work.run(job) {
      Outcome::Done => {}
      Outcome::Output(output) => {
        if let Some(outputs_tx) = &self.outputs_tx {
          self.deliver(outputs_tx, output, "output").await;
        }
      }
      Outcome::Fault(fault) => {
        if let Some(errors_tx) = &self.errors_tx {
          self.deliver(errors_tx, fault, "error").await;
        }
      }
    }
    self.performed_work();
  }

  /// Enqueues a result, blocking on a full queue. A forced closure cancels
  /// the stop token while results may still be in hand; the send races the
  /// token so the laborer can always terminate, discarding only the
  /// payload of the job it was finishing.
  async fn deliver<T: Send>(&self, tx: &kanal::AsyncSender<T>, value: T, kind: &str) {
    tokio::select! {
      biased;

      sent = tx.send(value) => {
        if sent.is_err() {
          warn!(pool = %self.pool_name, "{kind} queue closed mid-send, {kind} discarded");
        }
      }

      _ = self.stop.cancelled() => {
        debug!(pool = %self.pool_name, "pool is stopping, {kind} discarded");
      }
    }
  }

  /// One job left the in-flight set: decrement the waiting count (pulsing
  /// an armed waiter) and bump the completion counter.
  fn performed_work(&self) {
    self.quiesce.job_finished();
    self.jobs_completed.fetch_add(1, Ordering::Relaxed);
  }
}
