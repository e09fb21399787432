use std::fmt;

use thiserror::Error;

/// Boxed error type returned by fallible work functions.
pub type WorkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors surfaced by `brigade` pool API calls.
#[derive(Error, Debug, PartialEq)]
pub enum PoolError {
  #[error("pool is closed and does not accept new jobs")]
  PoolClosed,

  #[error("pool's work does not produce outputs")]
  NoOutputs,

  #[error("pool's work does not produce errors")]
  NoErrors,

  #[error("outputs are forwarded to the parent pool and cannot be read directly")]
  OutputsForwarded,

  #[error("pool is already connected to a parent pool")]
  AlreadyConnected,
}

/// A job paired with the error its work function returned, as delivered on
/// the errors queue.
#[derive(Debug)]
pub struct JobError<I> {
  /// The job that failed.
  pub job: I,

  /// The error the work function returned for it.
  pub error: WorkError,
}

impl<I: fmt::Debug> fmt::Display for JobError<I> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "job {:?} failed: {}", self.job, self.error)
  }
}

impl<I: fmt::Debug> std::error::Error for JobError<I> {
  fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
    Some(self.error.as_ref())
  }
}

/// Stand-in error used when a work function panics instead of returning.
#[derive(Error, Debug)]
#[error("work function panicked: {0}")]
pub struct WorkPanic(pub String);
