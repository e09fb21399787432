//! The four shapes of work a pool can perform.
//!
//! The shape is fixed at construction and determines which queues the pool
//! allocates: producing shapes get an output queue, fallible shapes get an
//! error queue. Each constructor wraps the user callable in a single
//! dispatch adapter so the laborer loop stays shape-agnostic.

use crate::error::{JobError, WorkError, WorkPanic};

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use tracing::error;

/// What dispatching one job produced.
pub(crate) enum Outcome<I, O> {
  /// The job finished with nothing to enqueue.
  Done,

  /// The job produced an output for the outputs queue.
  Output(O),

  /// The job failed; the pair goes to the errors queue.
  Fault(JobError<I>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shape {
  Simple,
  SimpleWithErrors,
  Regular,
  RegularWithErrors,
}

/// A user work function bound to one of the four shapes.
///
/// Panics inside the user callable are caught: fallible shapes surface
/// them on the errors queue as a [`WorkPanic`], the others log them at
/// error level. The laborer survives either way.
pub struct Work<I, O> {
  shape: Shape,
  run: Box<dyn Fn(I) -> Outcome<I, O> + Send + Sync>,
}

impl<I> Work<I, ()>
where
  I: Send + 'static,
{
  /// Work that consumes a job and produces neither outputs nor errors.
  pub fn simple<F>(work: F) -> Self
  where
    F: Fn(I) + Send + Sync + 'static,
  {
    Self {
      shape: Shape::Simple,
      run: Box::new(move |job| {
        if panic::catch_unwind(AssertUnwindSafe(|| work(job))).is_err() {
          error!("work function panicked, job dropped");
        }
        Outcome::Done
      }),
    }
  }

  /// Work that consumes a job, produces no outputs, and may fail.
  pub fn simple_with_errors<F, E>(work: F) -> Self
  where
    I: Clone,
    F: Fn(I) -> Result<(), E> + Send + Sync + 'static,
    E: Into<WorkError>,
  {
    Self {
      shape: Shape::SimpleWithErrors,
      run: Box::new(move |job| {
        let retained = job.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| work(job))) {
          Ok(Ok(())) => Outcome::Done,
          Ok(Err(error)) => Outcome::Fault(JobError {
            job: retained,
            error: error.into(),
          }),
          Err(payload) => Outcome::Fault(JobError {
            job: retained,
            error: Box::new(WorkPanic(panic_message(payload))),
          }),
        }
      }),
    }
  }
}

impl<I, O> Work<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  /// Work that maps a job to an output.
  pub fn regular<F>(work: F) -> Self
  where
    F: Fn(I) -> O + Send + Sync + 'static,
  {
    Self {
      shape: Shape::Regular,
      run: Box::new(move |job| {
        match panic::catch_unwind(AssertUnwindSafe(|| work(job))) {
          Ok(output) => Outcome::Output(output),
          Err(_) => {
            error!("work function panicked, output dropped");
            Outcome::Done
          }
        }
      }),
    }
  }

  /// Work that maps a job to an output and may fail.
  pub fn with_errors<F, E>(work: F) -> Self
  where
    I: Clone,
    F: Fn(I) -> Result<O, E> + Send + Sync + 'static,
    E: Into<WorkError>,
  {
    Self {
      shape: Shape::RegularWithErrors,
      run: Box::new(move |job| {
        let retained = job.clone();
        match panic::catch_unwind(AssertUnwindSafe(|| work(job))) {
          Ok(Ok(output)) => Outcome::Output(output),
          Ok(Err(error)) => Outcome::Fault(JobError {
            job: retained,
            error: error.into(),
          }),
          Err(payload) => Outcome::Fault(JobError {
            job: retained,
            error: Box::new(WorkPanic(panic_message(payload))),
          }),
        }
      }),
    }
  }

  /// True if this shape fills the outputs queue.
  pub(crate) fn produces_outputs(&self) -> bool {
    matches!(self.shape, Shape::Regular | Shape::RegularWithErrors)
  }

  /// True if this shape fills the errors queue.
  pub(crate) fn produces_errors(&self) -> bool {
    matches!(self.shape, Shape::SimpleWithErrors | Shape::RegularWithErrors)
  }

  /// Dispatches one job through the bound callable.
  pub(crate) fn run(&self, job: I) -> Outcome<I, O> {
    (self.run)(job)
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(message) = payload.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = payload.downcast_ref::<String>() {
    message.clone()
  } else {
    "opaque panic payload".to_string()
  }
}
