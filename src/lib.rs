//! A typed worker pool with bounded queues, back-pressure, and composable
//! pool pipelines.
//!
//! A [`Pool`] fans jobs out to a fixed set of laborers, optionally
//! collecting typed outputs and errors on their own bounded queues, and
//! [`Pool::connect`] chains pools together so one pool's outputs become
//! another's submissions.
//!
//! ```
//! use brigade::{Pool, Work};
//!
//! #[tokio::main]
//! async fn main() {
//!   let pool = Pool::new(
//!     Work::regular(|v: i64| v * v),
//!     tokio::runtime::Handle::current(),
//!   );
//!   let outputs = pool.outputs().unwrap();
//!
//!   pool.submit(4).await.unwrap();
//!   pool.wait().await;
//!   assert_eq!(outputs.recv().await.unwrap(), 16);
//!
//!   pool.close().await;
//! }
//! ```

mod closer;
mod connector;
mod error;
mod laborer;
mod pool;
mod quiesce;
mod settings;
mod work;

pub use error::{JobError, PoolError, WorkError, WorkPanic};
pub use pool::Pool;
pub use settings::Settings;
pub use work::Work;
