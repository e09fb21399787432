use brigade::{Pool, PoolError, Settings, Work};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::timeout;

fn setup_tracing_for_test() {
  use std::sync::Once;
  use tracing_subscriber::{fmt, EnvFilter};
  static TRACING_INIT: Once = Once::new();

  TRACING_INIT.call_once(|| {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,brigade=debug"));

    fmt::Subscriber::builder()
      .with_env_filter(filter)
      .with_test_writer()
      .try_init()
      .ok();
  });
}

fn small_pool<I, O>(work: Work<I, O>, name: &str) -> Pool<I, O>
where
  I: Send + 'static,
  O: Send + 'static,
{
  Pool::with_settings(
    work,
    Settings {
      laborers: 2,
      name: name.to_string(),
      ..Settings::default()
    },
    Handle::current(),
  )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pipeline_forwards_child_outputs_to_the_parent() {
  setup_tracing_for_test();
  let child = small_pool(Work::regular(|v: i64| v + 1), "incrementer");
  let parent = small_pool(Work::regular(|v: i64| v * 2), "doubler");

  let parent_outputs = parent.outputs().unwrap();
  child.connect(&parent).unwrap();
  assert!(child.is_connected());
  assert!(!parent.is_connected());

  // Once connected, the child's outputs belong to the connector.
  assert!(matches!(child.outputs(), Err(PoolError::OutputsForwarded)));

  let collector = tokio::spawn(async move {
    let mut seen = Vec::new();
    for _ in 0..10 {
      seen.push(parent_outputs.recv().await.unwrap());
    }
    seen
  });

  for v in 1..=10 {
    child.submit(v).await.unwrap();
  }
  child.wait().await;
  let mut seen = timeout(Duration::from_secs(5), collector)
    .await
    .expect("all ten results should cross the pipeline")
    .unwrap();

  // The child belongs to its parent now; user closes are refused.
  child.close().await;
  assert!(!child.is_closed());

  timeout(Duration::from_secs(5), parent.close())
    .await
    .expect("a graceful pipeline close should finish");
  assert!(child.is_closed(), "the child closes as part of the parent's closure");
  assert!(parent.is_closed());

  assert_eq!(child.jobs_completed(), 10);
  assert_eq!(parent.jobs_completed(), 10);

  seen.sort_unstable();
  let expected: Vec<i64> = (1..=10).map(|v| (v + 1) * 2).collect();
  assert_eq!(seen, expected, "nothing is lost crossing the pipeline");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn a_three_stage_pipeline_closes_from_the_root_without_loss() {
  setup_tracing_for_test();
  let head = small_pool(Work::regular(|v: i64| v + 1), "head");
  let middle = small_pool(Work::regular(|v: i64| v * 2), "middle");
  let tail = small_pool(Work::regular(|v: i64| v + 3), "tail");

  let tail_outputs = tail.outputs().unwrap();
  head.connect(&middle).unwrap();
  middle.connect(&tail).unwrap();

  let collector = tokio::spawn(async move {
    let mut seen = Vec::new();
    for _ in 0..5 {
      seen.push(tail_outputs.recv().await.unwrap());
    }
    seen
  });

  for v in 1..=5 {
    head.submit(v).await.unwrap();
  }
  head.wait().await;
  let mut seen = timeout(Duration::from_secs(5), collector)
    .await
    .expect("all five results should cross both stages")
    .unwrap();

  // Closing the root walks the whole chain down: head before middle,
  // middle before tail.
  timeout(Duration::from_secs(5), tail.close())
    .await
    .expect("the cascade should finish");
  assert!(head.is_closed());
  assert!(middle.is_closed());
  assert!(tail.is_closed());

  seen.sort_unstable();
  let expected: Vec<i64> = (1..=5).map(|v| (v + 1) * 2 + 3).collect();
  assert_eq!(seen, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn forced_close_still_walks_the_pipeline_down() {
  setup_tracing_for_test();
  let child = small_pool(Work::regular(|v: i64| v + 1), "forced_child");
  let parent = small_pool(Work::regular(|v: i64| v * 2), "forced_parent");

  // A tolerant consumer: drains until the parent closes its output
  // queue, so back-pressure never wedges the cascade.
  let parent_outputs = parent.outputs().unwrap();
  let collector = tokio::spawn(async move {
    let mut count = 0u64;
    while parent_outputs.recv().await.is_ok() {
      count += 1;
    }
    count
  });

  child.connect(&parent).unwrap();
  for v in 1..=10 {
    child.submit(v).await.unwrap();
  }

  timeout(Duration::from_secs(5), parent.close_forced())
    .await
    .expect("a forced pipeline close should finish");
  assert!(child.is_closed());
  assert!(parent.is_closed());

  // Forced closure may discard queued jobs, never duplicate them.
  let delivered = collector.await.unwrap();
  assert!(child.jobs_completed() <= 10);
  assert!(parent.jobs_completed() <= child.jobs_completed());
  assert!(delivered <= parent.jobs_completed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn connect_requires_outputs_and_a_free_pool() {
  setup_tracing_for_test();
  let parent = small_pool(Work::regular(|v: i64| v * 2), "lone_parent");

  // A pool whose work produces nothing cannot feed another pool, even
  // one whose input type lines up with the phantom output.
  let sink = small_pool(Work::simple(|_: ()| {}), "sink");
  let silent = small_pool(Work::simple(|_: i64| {}), "silent");
  assert!(matches!(silent.connect(&sink), Err(PoolError::NoOutputs)));
  assert!(!silent.is_connected());
  silent.close().await;
  sink.close().await;

  // A pool forwards to at most one parent.
  let child = small_pool(Work::regular(|v: i64| v + 1), "busy_child");
  child.connect(&parent).unwrap();
  let other = small_pool(Work::regular(|v: i64| v - 1), "other_parent");
  assert!(matches!(child.connect(&other), Err(PoolError::AlreadyConnected)));

  // The error queue stays with the child even when connected.
  let fallible = small_pool(
    Work::with_errors(|v: i64| -> Result<i64, brigade::WorkError> {
      if v < 0 {
        Err("negative".into())
      } else {
        Ok(v)
      }
    }),
    "fallible_child",
  );
  fallible.connect(&other).unwrap();
  assert!(fallible.errors().is_ok());

  timeout(Duration::from_secs(5), parent.close())
    .await
    .expect("closing the first parent should finish");
  timeout(Duration::from_secs(5), other.close())
    .await
    .expect("closing the second parent should finish");
  assert!(child.is_closed());
  assert!(fallible.is_closed());
}
