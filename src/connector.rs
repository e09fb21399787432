//! Output forwarding between connected pools.
//!
//! Connecting pool A to pool B turns A's outputs into B's submissions: A
//! becomes the child, B the parent. The connector task is the sole
//! consumer of the child's output queue, and the parent's closure reaches
//! the child through it.

use crate::closer::{CloseRequest, WaitFn};
use crate::error::PoolError;
use crate::pool::Pool;
use crate::quiesce::Quiescence;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// A pool's submission capability: enough to feed it jobs and observe that
/// it closed, nothing more. A child's connector holds one of these instead
/// of the parent pool handle, keeping the parent/child relation weak.
pub(crate) struct Submitter<T> {
  pub(crate) pool_name: Arc<String>,
  pub(crate) closed: Arc<AtomicBool>,
  pub(crate) quiesce: Arc<Quiescence>,
  pub(crate) inputs_tx: kanal::AsyncSender<T>,
}

impl<T> Clone for Submitter<T> {
  fn clone(&self) -> Self {
    Self {
      pool_name: self.pool_name.clone(),
      closed: self.closed.clone(),
      quiesce: self.quiesce.clone(),
      inputs_tx: self.inputs_tx.clone(),
    }
  }
}

impl<T: Send + 'static> Submitter<T> {
  /// Accounts for the job, then enqueues it with back-pressure. The count
  /// leads the enqueue so a `wait` armed in between never under-counts.
  pub(crate) async fn submit(&self, job: T) -> Result<(), PoolError> {
    if self.closed.load(Ordering::SeqCst) {
      warn!(pool = %self.pool_name, "pool is closed, job rejected");
      return Err(PoolError::PoolClosed);
    }
    self.quiesce.job_submitted();
    match self.inputs_tx.send(job).await {
      Ok(()) => Ok(()),
      Err(_) => {
        self.quiesce.job_rescinded();
        warn!(pool = %self.pool_name, "pool closed while a job was being enqueued, job rejected");
        Err(PoolError::PoolClosed)
      }
    }
  }
}

/// The forwarding task spawned by [`Pool::connect`]. Exactly one runs per
/// connected pool.
struct Connector<T: Send + 'static> {
  pool_name: Arc<String>,
  parent_name: Arc<String>,
  outputs_rx: kanal::AsyncReceiver<T>,
  parent: Submitter<T>,
  stop: CancellationToken,
  parent_children_close: CancellationToken,
  close_tx: kanal::AsyncSender<CloseRequest>,
}

impl<T: Send + 'static> Connector<T> {
  async fn run(self) {
    debug!(pool = %self.pool_name, parent = %self.parent_name, "connector started");
    let mut closure_posted = false;

    loop {
      tokio::select! {
        biased;

        _ = self.stop.cancelled() => {
          // The controller fires this only after the laborers have been
          // joined, so the output queue is final: forward the remainder
          // before leaving.
          while let Ok(Some(output)) = self.outputs_rx.try_recv() {
            if self.parent.submit(output).await.is_err() {
              break;
            }
          }
          debug!(pool = %self.pool_name, "stop signal received, connector terminating");
          return;
        }

        _ = self.parent_children_close.cancelled(), if !closure_posted => {
          info!(pool = %self.pool_name, parent = %self.parent_name, "closing because the parent pool is leaving");
          closure_posted = true;
          let request = CloseRequest {
            forced: false,
            from_connector: true,
            ack: None,
          };
          if self.close_tx.send(request).await.is_err() {
            return;
          }
          // Keep forwarding: the closure just posted drains this pool's
          // remaining work through the laborers, and those results still
          // have to reach the parent before the controller stops this
          // task.
        }

        output = self.outputs_rx.recv() => match output {
          Ok(output) => {
            if self.parent.submit(output).await.is_err() {
              warn!(pool = %self.pool_name, parent = %self.parent_name, "parent pool rejected a forwarded output");
            }
          }
          Err(_) => {
            debug!(pool = %self.pool_name, "output queue closed, connector terminating");
            return;
          }
        }
      }
    }
  }
}

impl<I, O> Pool<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  /// Forwards this pool's outputs into `parent` as new submissions,
  /// making `parent` this pool's parent.
  ///
  /// Requires a shape that produces outputs and no existing parent. Once
  /// connected, the connector is the sole consumer of the output queue
  /// ([`outputs`](Pool::outputs) refuses), the user may no longer close
  /// this pool directly, and the parent's closure will first drain and
  /// close this pool.
  pub fn connect<P>(&self, parent: &Pool<O, P>) -> Result<(), PoolError>
  where
    P: Send + 'static,
  {
    let outputs_rx = match self.core.outputs.as_ref() {
      Some((_, outputs_rx)) => outputs_rx.clone(),
      None => {
        warn!(pool = %self.core.name, "cannot connect, this pool's work produces no outputs");
        return Err(PoolError::NoOutputs);
      }
    };
    if self.core.connected.swap(true, Ordering::SeqCst) {
      warn!(pool = %self.core.name, "a connector is already running");
      return Err(PoolError::AlreadyConnected);
    }
    let closed_rx = match self.core.closed_rx.lock().unwrap().take() {
      Some(closed_rx) => closed_rx,
      None => {
        warn!(pool = %self.core.name, "pool was already registered with a parent");
        return Err(PoolError::AlreadyConnected);
      }
    };

    // Hand the parent this pool's closed signal and quiescence
    // capability; the parent's closure blocks on both.
    let quiesce = self.core.quiesce.clone();
    let child_wait: WaitFn = Box::new(move || {
      let quiesce = quiesce.clone();
      Box::pin(async move { quiesce.wait().await })
    });
    parent.register_child(closed_rx, child_wait);

    *self.core.parent_name.lock().unwrap() = Some(parent.core.name.clone());

    let connector = Connector {
      pool_name: self.core.name.clone(),
      parent_name: parent.core.name.clone(),
      outputs_rx,
      parent: parent.core.submitter.clone(),
      stop: self.core.connector_stop.clone(),
      parent_children_close: parent.core.children_close.clone(),
      close_tx: self.core.close_tx.clone(),
    };
    let handle = self.core.tokio_handle.spawn(
      connector
        .run()
        .instrument(info_span!("connector", pool = %self.core.name)),
    );
    *self.core.connector_handle.lock().unwrap() = Some(handle);

    info!(pool = %self.core.name, parent = %parent.core.name, "connected to the parent pool");
    Ok(())
  }
}
