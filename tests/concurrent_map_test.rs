use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use fluentmap::engine::Job;
use fluentmap::{Arguments, CallError, CallSpecs, Engine, EngineError, Pipeline, ThreadPool, TokioEngine};
use futures::{StreamExt, TryStreamExt};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use rand::Rng;

/// Sleeps for `wait_ms` (taken from the keyword arguments) and returns the argument
fn sleepy(call: Arguments<u64>) -> Result<u64, Infallible> {
    let wait_ms = call.kwarg_as::<u64>("wait_ms").unwrap_or(0);
    std::thread::sleep(Duration::from_millis(wait_ms));
    Ok(call.args)
}

/// Calls whose delays shrink as the index grows, so later calls finish first
fn decreasing_delays(n: u64) -> Vec<Arguments<u64>> {
    (0..n)
        .map(|i| Arguments::new(i).kwarg("wait_ms", (n - i) * 60))
        .collect()
}

fn tokio_engine(max_workers: usize) -> Arc<dyn Engine> {
    Arc::new(
        TokioEngine::new()
            .and_then(|engine| engine.with_max_workers(max_workers))
            .expect("tokio engine"),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_submission_order_with_engine() {
    let out: Vec<u64> = Pipeline::new(sleepy)
        .with_engine(tokio_engine(256))
        .run(CallSpecs::explicit(decreasing_delays(3)))
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(out, vec![0, 1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_order_with_engine() {
    let out: Vec<u64> = Pipeline::new(sleepy)
        .with_engine(tokio_engine(256))
        .with_sort_by_completion(true)
        .run(CallSpecs::explicit(decreasing_delays(3)))
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(out, vec![2, 1, 0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_completion_order_with_on_return() {
    let out: Vec<u64> = Pipeline::new(sleepy)
        .with_engine(tokio_engine(256))
        .with_sort_by_completion(true)
        .on_return(|value| value + 1)
        .run(CallSpecs::explicit(decreasing_delays(3)))
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(out, vec![3, 2, 1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_engine_runs_calls_concurrently() {
    let calls = (0..8).map(|i| Arguments::new(i).kwarg("wait_ms", 100));

    let start = Instant::now();
    let out: Vec<u64> = Pipeline::new(sleepy)
        .with_engine(tokio_engine(8))
        .with_num_prepare(8)
        .run(CallSpecs::explicit(calls))
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    assert_eq!(out, (0..8).collect::<Vec<_>>());
    // Eight sequential calls would take 800ms
    assert!(start.elapsed() < Duration::from_millis(600));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_delays_keep_submission_order() {
    let mut rng = rand::thread_rng();
    let calls: Vec<Arguments<u64>> = (0..1024)
        .map(|i| Arguments::new(i).kwarg("wait_ms", rng.gen_range(0..5u64)))
        .collect();

    let stream = Pipeline::new(sleepy)
        .with_engine(tokio_engine(256))
        .with_num_prepare(64)
        .on_return(|value| value + 1)
        .run(CallSpecs::explicit(calls))
        .unwrap();

    let out: Vec<u64> = stream.try_collect().await.unwrap();
    assert_eq!(out, (1..=1024).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_delays_completion_order_is_a_permutation() {
    let mut rng = rand::thread_rng();
    let calls: Vec<Arguments<u64>> = (0..256)
        .map(|i| Arguments::new(i).kwarg("wait_ms", rng.gen_range(0..5u64)))
        .collect();

    let mut out: Vec<u64> = Pipeline::new(sleepy)
        .with_engine(tokio_engine(64))
        .with_num_prepare(32)
        .with_sort_by_completion(true)
        .run(CallSpecs::explicit(calls))
        .unwrap()
        .try_collect()
        .await
        .unwrap();

    out.sort_unstable();
    assert_eq!(out, (0..256).collect::<Vec<_>>());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_failure_with_engine_ends_stream() {
    let stream = Pipeline::new(|call: Arguments<u64>| {
        if call.args == 5 {
            Err("mock")
        } else {
            Ok(call.args)
        }
    })
    .with_engine(tokio_engine(16))
    .with_num_prepare(4)
    .run(CallSpecs::plain(0..1000))
    .unwrap();

    let items: Vec<_> = stream.collect().await;
    let (last, values) = items.split_last().expect("at least one item");

    let values: Vec<u64> = values.iter().map(|item| *item.as_ref().unwrap()).collect();
    assert_eq!(values, vec![0, 1, 2, 3, 4]);
    match last {
        Err(error) => assert_eq!(error.index(), 5),
        Ok(value) => panic!("expected the failure last, got {}", value),
    }
}

/// Holds jobs until `batch` have arrived, then runs them newest first
struct ReversingEngine {
    batch: usize,
    pending: Mutex<Vec<Job>>,
}

impl ReversingEngine {
    fn new(batch: usize) -> Self {
        Self {
            batch,
            pending: Mutex::new(Vec::new()),
        }
    }
}

impl Engine for ReversingEngine {
    fn name(&self) -> &str {
        "reversing"
    }

    fn submit(&self, job: Job) -> Result<(), EngineError> {
        let ready = {
            let mut pending = self.pending.lock();
            pending.push(job);
            if pending.len() < self.batch {
                return Ok(());
            }
            std::mem::take(&mut *pending)
        };

        std::thread::spawn(move || ready.into_iter().rev().for_each(|job| job()));
        Ok(())
    }
}

#[test]
fn test_out_of_order_engine_keeps_values_before_failure() {
    let stream = Pipeline::new(|call: Arguments<u64>| {
        if call.args == 2 {
            Err("boom")
        } else {
            Ok(call.args)
        }
    })
    .with_engine(Arc::new(ReversingEngine::new(3)))
    .with_num_prepare(3)
    .run(CallSpecs::plain(0..3))
    .unwrap();

    let mut iter = stream.blocking_iter();
    assert_eq!(iter.next().unwrap().unwrap(), 0);
    assert_eq!(iter.next().unwrap().unwrap(), 1);
    match iter.next() {
        Some(Err(CallError::Failed { index, source })) => {
            assert_eq!(index, 2);
            assert_eq!(source, "boom");
        }
        other => panic!("expected call 2 to fail, got {:?}", other.map(|item| item.is_ok())),
    }
    assert!(iter.next().is_none());
}

#[test]
fn test_out_of_order_engine_reports_earliest_failure() {
    let started = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&started);

    let stream = Pipeline::new(move |call: Arguments<u64>| {
        record.lock().push(call.args);
        if call.args == 1 {
            Err("boom")
        } else {
            Ok(call.args)
        }
    })
    .with_engine(Arc::new(ReversingEngine::new(4)))
    .with_num_prepare(4)
    .run(CallSpecs::plain(0..4))
    .unwrap();

    let items: Vec<_> = stream.blocking_iter().collect();

    assert_eq!(items.len(), 2);
    assert_eq!(*items[0].as_ref().unwrap(), 0);
    assert!(matches!(items[1], Err(CallError::Failed { index: 1, .. })));
    // 3 and 2 finished before 1 failed; 0 is ahead of the failure and still ran
    assert_eq!(*started.lock(), vec![3, 2, 1, 0]);
}

#[test]
fn test_blocking_consumer_with_runtime_handle() {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap();
    let engine = TokioEngine::with_handle(runtime.handle().clone(), 4).unwrap();

    let out: Vec<u64> = Pipeline::new(sleepy)
        .with_engine(Arc::new(engine))
        .with_num_prepare(4)
        .run(CallSpecs::plain(0..10))
        .unwrap()
        .blocking_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(out, (0..10).collect::<Vec<_>>());
}

#[test]
fn test_shared_thread_pool_engine() {
    let pool: Arc<dyn Engine> = Arc::new(ThreadPool::with_name("shared", 4).unwrap());

    // The same engine serves several runs
    for run in 0..3u64 {
        let out: Vec<u64> = Pipeline::new(move |call: Arguments<u64>| Ok::<_, Infallible>(call.args + run))
            .with_engine(Arc::clone(&pool))
            .with_num_prepare(2)
            .run(CallSpecs::plain(0..5))
            .unwrap()
            .blocking_iter()
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(out, (run..run + 5).collect::<Vec<_>>());
    }
}

#[test]
fn test_lost_call_after_engine_shutdown() {
    let pool = Arc::new(ThreadPool::new(1).unwrap());
    pool.shutdown();

    let mut iter = Pipeline::new(|call: Arguments<u64>| Ok::<_, Infallible>(call.args))
        .with_engine(pool)
        .run(CallSpecs::plain(0..3))
        .unwrap()
        .blocking_iter();

    assert!(matches!(iter.next(), Some(Err(CallError::Lost { index: 0 }))));
    assert!(iter.next().is_none());
}
