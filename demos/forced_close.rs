use brigade::{Pool, Settings, Work};
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Forced Close Demo ---");

  // One slow laborer and a single-slot queue: submissions back up fast.
  let pool = Pool::with_settings(
    Work::simple(|v: u32| {
      std::thread::sleep(Duration::from_millis(200));
      info!(job = v, "finished");
    }),
    Settings {
      laborers: 1,
      size: 1,
      name: "slow".to_string(),
      ..Settings::default()
    },
    Handle::current(),
  );

  let producer = {
    let pool = pool.clone();
    tokio::spawn(async move {
      for v in 0..10u32 {
        match pool.submit(v).await {
          Ok(()) => info!(job = v, "submitted"),
          Err(error) => {
            info!(job = v, %error, "submission rejected");
            break;
          }
        }
      }
    })
  };

  tokio::time::sleep(Duration::from_millis(300)).await;
  info!(
    waiting = pool.jobs_waiting(),
    "forcing closure with a backlog"
  );

  // The job in hand finishes; the queued backlog is discarded.
  pool.close_forced().await;
  producer.await.expect("producer task failed");

  info!(
    completed = pool.jobs_completed(),
    closed = pool.is_closed(),
    "pool closed forcefully"
  );
  info!("--- Forced Close Demo End ---");
}
