use brigade::{Pool, Settings, Work};
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Basic Usage Demo ---");

  let pool = Pool::with_settings(
    Work::regular(|v: i64| v * v),
    Settings {
      laborers: 4,
      name: "squares".to_string(),
      ..Settings::default()
    },
    Handle::current(),
  );

  let outputs = pool.outputs().expect("a regular pool produces outputs");
  let collector = tokio::spawn(async move {
    // recv() fails once the pool closes the output queue.
    while let Ok(square) = outputs.recv().await {
      info!(square, "received");
    }
    info!("output queue closed");
  });

  for v in 1..=16 {
    pool
      .submit(v)
      .await
      .expect("an open pool accepts submissions");
  }

  pool.wait().await;
  info!(completed = pool.jobs_completed(), "all jobs done");

  pool.close().await;
  collector.await.expect("collector task failed");

  info!("--- Basic Usage Demo End ---");
}
