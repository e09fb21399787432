//! Quiescence accounting: the jobs-in-flight counter and the Wait signal.

use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};

/// Tracks jobs between submission and completion and wakes `Wait` callers
/// the moment the count returns to zero.
///
/// The counter/waiters pair is a store-then-load protocol on both sides:
/// `wait` registers itself and loads the job count, a finishing laborer
/// decrements the count and loads the waiter count. Both sides use
/// `SeqCst` so the two loads cannot both observe stale values.
pub(crate) struct Quiescence {
  jobs_waiting: AtomicI64,
  waiters: AtomicUsize,
  pulse_tx: kanal::AsyncSender<()>,
  pulse_rx: kanal::AsyncReceiver<()>,
}

impl Quiescence {
  pub(crate) fn new() -> Self {
    // Capacity 1: the pulse is a level, not a count. An unconsumed pulse
    // is already enough to wake a waiter, and waiters re-pulse for each
    // other on their way out.
    let (pulse_tx, pulse_rx) = kanal::bounded_async(1);
    Self {
      jobs_waiting: AtomicI64::new(0),
      waiters: AtomicUsize::new(0),
      pulse_tx,
      pulse_rx,
    }
  }

  /// Counts a job the moment it is accepted, before the enqueue makes it
  /// visible to a laborer.
  pub(crate) fn job_submitted(&self) {
    self.jobs_waiting.fetch_add(1, Ordering::SeqCst);
  }

  /// Backs out the accounting for a submission the queue rejected.
  pub(crate) fn job_rescinded(&self) {
    self.jobs_waiting.fetch_sub(1, Ordering::SeqCst);
  }

  /// Counts a finished job and pulses a registered waiter when the pool
  /// just went idle.
  pub(crate) fn job_finished(&self) {
    let remaining = self.jobs_waiting.fetch_sub(1, Ordering::SeqCst) - 1;
    if remaining == 0 && self.waiters.load(Ordering::SeqCst) > 0 {
      let _ = self.pulse_tx.try_send(());
    }
  }

  /// Jobs currently queued or executing.
  pub(crate) fn jobs_waiting(&self) -> i64 {
    self.jobs_waiting.load(Ordering::SeqCst)
  }

  /// Blocks until no jobs are queued or executing. Returns immediately on
  /// an idle pool.
  ///
  /// Multiple concurrent waiters wake in a chain: each consumes one pulse
  /// and leaves one behind for the next, so the pool's own closure can
  /// drain alongside a user's `wait`.
  pub(crate) async fn wait(&self) {
    self.waiters.fetch_add(1, Ordering::SeqCst);
    while self.jobs_waiting.load(Ordering::SeqCst) > 0 {
      if self.pulse_rx.recv().await.is_err() {
        break;
      }
    }
    let remaining_waiters = self.waiters.fetch_sub(1, Ordering::SeqCst) - 1;
    if remaining_waiters > 0 && self.jobs_waiting.load(Ordering::SeqCst) == 0 {
      let _ = self.pulse_tx.try_send(());
    } else if remaining_waiters == 0 {
      // Nobody is listening; a stale pulse would make the next waiter
      // spin one extra loop iteration, so tidy it away.
      while let Ok(Some(())) = self.pulse_rx.try_recv() {}
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::sync::Arc;
  use std::time::Duration;

  #[tokio::test]
  async fn wait_returns_immediately_when_idle() {
    let quiesce = Quiescence::new();
    quiesce.wait().await;
    quiesce.wait().await;
    assert_eq!(quiesce.jobs_waiting(), 0);
  }

  #[tokio::test]
  async fn wait_wakes_on_the_last_completion() {
    let quiesce = Arc::new(Quiescence::new());
    quiesce.job_submitted();
    quiesce.job_submitted();

    let finisher = {
      let quiesce = quiesce.clone();
      tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        quiesce.job_finished();
        tokio::time::sleep(Duration::from_millis(20)).await;
        quiesce.job_finished();
      })
    };

    tokio::time::timeout(Duration::from_secs(1), quiesce.wait())
      .await
      .expect("wait should resolve once the count reaches zero");
    assert_eq!(quiesce.jobs_waiting(), 0);
    finisher.await.unwrap();
  }

  #[tokio::test]
  async fn concurrent_waiters_wake_in_a_chain() {
    let quiesce = Arc::new(Quiescence::new());
    quiesce.job_submitted();

    let first = {
      let quiesce = quiesce.clone();
      tokio::spawn(async move { quiesce.wait().await })
    };
    let second = {
      let quiesce = quiesce.clone();
      tokio::spawn(async move { quiesce.wait().await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    quiesce.job_finished();

    tokio::time::timeout(Duration::from_secs(1), async {
      first.await.unwrap();
      second.await.unwrap();
    })
    .await
    .expect("both waiters should wake once the pool is idle");
  }

  #[tokio::test]
  async fn rescinded_submissions_keep_the_count_balanced() {
    let quiesce = Quiescence::new();
    quiesce.job_submitted();
    quiesce.job_rescinded();
    assert_eq!(quiesce.jobs_waiting(), 0);
    quiesce.wait().await;
  }
}
