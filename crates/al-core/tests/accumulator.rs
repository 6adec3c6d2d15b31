//! Accumulator behaviour under controlled time.

use al_config::FailurePolicy;
use al_core::{
    Accumulator, AccumulatorState, AccumulatorStats, BatchSettings, FlushError, ManualClock,
    SystemClock,
};
use al_telemetry::{BulkSink, MemorySink, Record, Value};
use crossbeam_channel::{unbounded, Receiver};
use proptest::prelude::*;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

fn collecting() -> (
    impl Fn(&[String]) -> Result<(), FlushError> + Send + 'static,
    Receiver<Vec<String>>,
) {
    let (tx, rx) = unbounded();
    let handler = move |batch: &[String]| -> Result<(), FlushError> {
        let _ = tx.send(batch.to_vec());
        Ok(())
    };
    (handler, rx)
}

fn wait_for_timer(clock: &ManualClock) {
    let deadline = Instant::now() + WAIT;
    while clock.pending_timers() == 0 {
        assert!(Instant::now() < deadline, "worker never armed its timer");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_threshold_flush_without_timer() {
    let (handler, rx) = collecting();
    let clock = Arc::new(ManualClock::new());
    let acc = Accumulator::spawn(
        "threshold",
        BatchSettings::new(3, Duration::from_secs(5)),
        handler,
        clock,
    )
    .expect("spawn");

    for item in ["a", "b", "c"] {
        acc.append(item.to_string()).expect("append");
    }

    let batch = rx.recv_timeout(WAIT).expect("threshold flush");
    assert_eq!(batch, vec!["a", "b", "c"]);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    acc.shutdown();
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_timer_flush_after_period() {
    let (handler, rx) = collecting();
    let clock = Arc::new(ManualClock::new());
    let acc = Accumulator::spawn(
        "timer",
        BatchSettings::new(100, Duration::from_secs(1)),
        handler,
        clock.clone(),
    )
    .expect("spawn");
    wait_for_timer(&clock);

    acc.append("x".to_string()).expect("append");
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    clock.advance(Duration::from_millis(1200));
    assert_eq!(rx.recv_timeout(WAIT).expect("timer flush"), vec!["x"]);
    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());

    acc.shutdown();
    assert!(rx.try_recv().is_err());
    assert_eq!(acc.stats().batches_written, 1);
}

#[test]
fn test_shutdown_drains_buffer_once() {
    let (handler, rx) = collecting();
    let acc = Accumulator::spawn(
        "drain",
        BatchSettings::new(100, Duration::from_secs(60)),
        handler,
        Arc::new(ManualClock::new()),
    )
    .expect("spawn");

    acc.append("one".to_string()).expect("append");
    acc.append("two".to_string()).expect("append");
    acc.shutdown();
    acc.shutdown();

    assert_eq!(rx.try_recv().expect("drain flush"), vec!["one", "two"]);
    assert!(rx.try_recv().is_err());
}

#[test]
fn test_flush_then_shutdown_writes_nothing_twice() {
    let (handler, rx) = collecting();
    let acc = Accumulator::spawn(
        "explicit",
        BatchSettings::new(100, Duration::from_secs(60)),
        handler,
        Arc::new(ManualClock::new()),
    )
    .expect("spawn");

    acc.append("only".to_string()).expect("append");
    acc.flush();
    assert_eq!(rx.try_recv().expect("explicit flush"), vec!["only"]);

    acc.shutdown();
    acc.flush();
    assert!(rx.try_recv().is_err());
    assert_eq!(acc.stats().items_written, 1);
}

#[test]
fn test_failed_batch_is_discarded_and_next_batch_succeeds() {
    let sink = Arc::new(MemorySink::new());
    let schema = al_common::LocationRecord::schema("Locations");
    sink.ensure_table(&schema).expect("ensure");
    sink.fail_next_writes(1);

    let handler = {
        let sink = Arc::clone(&sink);
        let schema = schema.clone();
        move |batch: &[String]| -> Result<(), FlushError> {
            let rows: Vec<_> = batch
                .iter()
                .map(|a| al_common::LocationRecord::unresolved(a.as_str()).project())
                .collect();
            sink.write_batch(&schema, &rows)?;
            Ok(())
        }
    };
    let acc = Accumulator::spawn(
        "recovering",
        BatchSettings::new(100, Duration::from_secs(60)),
        handler,
        Arc::new(ManualClock::new()),
    )
    .expect("spawn");

    acc.append("10.0.0.1".to_string()).expect("append");
    acc.flush();
    assert_eq!(sink.row_count("Locations"), 0);

    acc.append("10.0.0.2".to_string()).expect("append");
    acc.flush();
    assert_eq!(sink.batch_sizes("Locations"), vec![1]);
    assert_eq!(sink.rows("Locations")[0][0], Value::from("10.0.0.2"));

    let stats: AccumulatorStats = acc.stats();
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.items_dropped, 1);
    assert_eq!(stats.batches_written, 1);
}

#[test]
fn test_retry_policy_rewrites_same_batch() {
    let (tx, rx) = unbounded();
    let mut failures = 2;
    let handler = move |batch: &[String]| -> Result<(), FlushError> {
        if failures > 0 {
            failures -= 1;
            return Err(FlushError::Handler("busy".to_string()));
        }
        let _ = tx.send(batch.to_vec());
        Ok(())
    };
    let settings = BatchSettings::new(100, Duration::from_secs(60)).with_failure_policy(
        FailurePolicy::Retry {
            max_retries: 3,
            backoff_ms: 5,
        },
    );
    let acc = Accumulator::spawn("retry", settings, handler, Arc::new(SystemClock::new()))
        .expect("spawn");

    acc.append("x".to_string()).expect("append");
    acc.flush();
    assert_eq!(rx.try_recv().expect("written after retries"), vec!["x"]);

    let stats = acc.stats();
    assert_eq!(stats.retries, 2);
    assert_eq!(stats.batches_failed, 0);
    assert_eq!(stats.batches_written, 1);
}

#[test]
fn test_threshold_during_flush_waits_for_next_batch() {
    let (started_tx, started_rx) = unbounded();
    let (gate_tx, gate_rx) = unbounded::<()>();
    let (tx, rx) = unbounded();
    let in_flight = Arc::new(AtomicBool::new(false));
    let overlapped = Arc::new(AtomicBool::new(false));

    let handler = {
        let in_flight = Arc::clone(&in_flight);
        let overlapped = Arc::clone(&overlapped);
        move |batch: &[String]| -> Result<(), FlushError> {
            if in_flight.swap(true, Ordering::SeqCst) {
                overlapped.store(true, Ordering::SeqCst);
            }
            let _ = started_tx.send(());
            let _ = gate_rx.recv();
            let _ = tx.send(batch.to_vec());
            in_flight.store(false, Ordering::SeqCst);
            Ok(())
        }
    };
    let acc = Accumulator::spawn(
        "gated",
        BatchSettings::new(2, Duration::from_secs(60)),
        handler,
        Arc::new(ManualClock::new()),
    )
    .expect("spawn");

    acc.append("a".to_string()).expect("append");
    acc.append("b".to_string()).expect("append");
    started_rx.recv_timeout(WAIT).expect("first flush started");
    assert_eq!(acc.state(), AccumulatorState::Flushing);

    // Crosses the threshold again while the first batch is still being written.
    for item in ["c", "d", "e"] {
        acc.append(item.to_string()).expect("append");
    }
    assert_eq!(acc.pending(), 3);

    gate_tx.send(()).expect("release first");
    assert_eq!(rx.recv_timeout(WAIT).expect("first batch"), vec!["a", "b"]);
    started_rx.recv_timeout(WAIT).expect("second flush started");
    gate_tx.send(()).expect("release second");
    assert_eq!(rx.recv_timeout(WAIT).expect("second batch"), vec!["c", "d", "e"]);

    acc.shutdown();
    assert!(!overlapped.load(Ordering::SeqCst));
    assert_eq!(acc.stats().batches_written, 2);
}

#[test]
fn test_failed_shutdown_flush_is_not_escalated() {
    let sink = Arc::new(MemorySink::new());
    let schema = al_common::LocationRecord::schema("Locations");
    sink.ensure_table(&schema).expect("ensure");

    let handler = {
        let sink = Arc::clone(&sink);
        move |batch: &[String]| -> Result<(), FlushError> {
            let rows: Vec<_> = batch
                .iter()
                .map(|a| al_common::LocationRecord::unresolved(a.as_str()).project())
                .collect();
            sink.write_batch(&schema, &rows)?;
            Ok(())
        }
    };
    let acc = Accumulator::spawn(
        "closing",
        BatchSettings::new(100, Duration::from_secs(60)),
        handler,
        Arc::new(ManualClock::new()),
    )
    .expect("spawn");

    acc.append("10.0.0.1".to_string()).expect("append");
    acc.append("10.0.0.2".to_string()).expect("append");
    sink.fail_next_writes(1);
    acc.shutdown();

    assert_eq!(acc.state(), AccumulatorState::Disposed);
    let stats = acc.stats();
    assert_eq!(stats.batches_failed, 1);
    assert_eq!(stats.items_dropped, 2);
    assert_eq!(sink.row_count("Locations"), 0);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_concurrent_producers_lose_nothing(
        producers in 1usize..6,
        per_producer in 1usize..60,
        batch_size in 1usize..16,
    ) {
        let (handler, rx) = collecting();
        let acc = Accumulator::spawn(
            "concurrent",
            BatchSettings::new(batch_size, Duration::from_secs(60)),
            handler,
            Arc::new(ManualClock::new()),
        )
        .expect("spawn");

        std::thread::scope(|scope| {
            for p in 0..producers {
                let acc = &acc;
                scope.spawn(move || {
                    for i in 0..per_producer {
                        acc.append(format!("{}:{}", p, i)).expect("append");
                    }
                });
            }
        });
        acc.shutdown();

        let written: Vec<String> = rx.try_iter().flatten().collect();
        prop_assert_eq!(written.len(), producers * per_producer);

        // Items from one producer keep their append order.
        let mut next = vec![0usize; producers];
        for item in &written {
            let (p, i) = item.split_once(':').expect("item format");
            let p: usize = p.parse().expect("producer");
            let i: usize = i.parse().expect("index");
            prop_assert_eq!(i, next[p]);
            next[p] += 1;
        }
    }
}
