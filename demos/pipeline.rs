use brigade::{Pool, Settings, Work};
use tokio::runtime::Handle;
use tracing::info;

#[tokio::main]
async fn main() {
  tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_target(false)
    .init();
  info!("--- Pipeline Demo ---");

  // Two stages: incrementing feeds doubling.
  let incrementer = Pool::with_settings(
    Work::regular(|v: i64| v + 1),
    Settings {
      laborers: 2,
      name: "incrementer".to_string(),
      ..Settings::default()
    },
    Handle::current(),
  );
  let doubler = Pool::with_settings(
    Work::regular(|v: i64| v * 2),
    Settings {
      laborers: 2,
      name: "doubler".to_string(),
      ..Settings::default()
    },
    Handle::current(),
  );

  let final_outputs = doubler.outputs().expect("the root pool keeps its outputs");
  incrementer
    .connect(&doubler)
    .expect("an output-producing pool connects once");

  let collector = tokio::spawn(async move {
    while let Ok(value) = final_outputs.recv().await {
      info!(value, "pipeline produced");
    }
  });

  for v in 1..=10 {
    incrementer.submit(v).await.expect("child accepts jobs");
  }
  incrementer.wait().await;

  // A connected pool belongs to its parent; this is refused with a warning.
  incrementer.close().await;
  info!(closed = incrementer.is_closed(), "tried closing the child directly");

  // Closing the root drains and closes the whole chain, child first.
  doubler.close().await;
  info!(
    child_closed = incrementer.is_closed(),
    parent_closed = doubler.is_closed(),
    "pipeline closed"
  );

  collector.await.expect("collector task failed");
  info!("--- Pipeline Demo End ---");
}
