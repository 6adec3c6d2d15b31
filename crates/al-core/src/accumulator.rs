//! Batch accumulator.
//!
//! Producers call [`Accumulator::append`], which validates the item and pushes
//! it onto a shared buffer; it never performs I/O. A dedicated worker thread
//! detaches the whole buffer (swapping in an empty one under the lock) and
//! hands it to a [`BatchHandler`] when either:
//! - the buffer reaches `batch_size` (checked on every append), or
//! - `period` has elapsed since the last flush.
//!
//! Only the worker flushes, so flushes of one accumulator never overlap.
//! Threshold signals raised while a flush is pending are coalesced into one.
//! Shutdown closes the buffer to new items, lets any in-flight flush finish,
//! then drains what is left in one final flush.

use al_common::Validate;
use al_config::{FailurePolicy, PipelineConfig};
use al_telemetry::SinkError;
use crossbeam_channel::{select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use serde::Serialize;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::clock::Clock;

/// Batching knobs for one accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchSettings {
    pub batch_size: usize,
    pub period: Duration,
    pub failure_policy: FailurePolicy,
}

impl BatchSettings {
    pub fn new(batch_size: usize, period: Duration) -> Self {
        Self {
            batch_size,
            period,
            failure_policy: FailurePolicy::Discard,
        }
    }

    pub fn with_failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.failure_policy = policy;
        self
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(config.batch_size, config.flush_period())
            .with_failure_policy(config.failure_policy)
    }
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

#[derive(Debug, Error)]
pub enum AccumulatorError {
    #[error("accumulator {0} is shut down")]
    Closed(String),

    #[error(transparent)]
    Invalid(#[from] al_common::Error),

    #[error("failed to start accumulator worker: {0}")]
    Spawn(#[from] std::io::Error),
}

impl From<AccumulatorError> for al_common::Error {
    fn from(err: AccumulatorError) -> Self {
        match err {
            AccumulatorError::Closed(_) => al_common::Error::Closed,
            AccumulatorError::Invalid(e) => e,
            AccumulatorError::Spawn(e) => al_common::Error::Io(e),
        }
    }
}

/// Failure reported by a batch handler.
#[derive(Debug, Error)]
pub enum FlushError {
    #[error(transparent)]
    Sink(#[from] SinkError),

    #[error("{0}")]
    Handler(String),
}

/// Consumes detached batches on the worker thread.
pub trait BatchHandler<T>: Send + 'static {
    fn handle(&mut self, batch: &[T]) -> Result<(), FlushError>;
}

impl<T, F> BatchHandler<T> for F
where
    F: FnMut(&[T]) -> Result<(), FlushError> + Send + 'static,
{
    fn handle(&mut self, batch: &[T]) -> Result<(), FlushError> {
        self(batch)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccumulatorState {
    Idle,
    Accumulating,
    Flushing,
    Disposed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AccumulatorStats {
    pub appended: u64,
    pub batches_written: u64,
    pub items_written: u64,
    pub batches_failed: u64,
    pub items_dropped: u64,
    pub retries: u64,
}

#[derive(Default)]
struct Counters {
    appended: AtomicU64,
    batches_written: AtomicU64,
    items_written: AtomicU64,
    batches_failed: AtomicU64,
    items_dropped: AtomicU64,
    retries: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> AccumulatorStats {
        AccumulatorStats {
            appended: self.appended.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            items_written: self.items_written.load(Ordering::Relaxed),
            batches_failed: self.batches_failed.load(Ordering::Relaxed),
            items_dropped: self.items_dropped.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
        }
    }
}

struct Buffer<T> {
    items: Vec<T>,
    closed: bool,
}

struct Shared<T> {
    name: String,
    buffer: Mutex<Buffer<T>>,
    flush_requested: AtomicBool,
    flushing: AtomicBool,
    counters: Counters,
}

enum Control {
    /// Buffer crossed the threshold.
    FlushNow,
    /// Explicit flush; the sender is dropped once the flush completes.
    Flush(Sender<()>),
    Shutdown,
}

#[derive(Debug, Clone, Copy)]
enum Trigger {
    Threshold,
    Timer,
    Explicit,
    Shutdown,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Trigger::Threshold => "threshold",
            Trigger::Timer => "timer",
            Trigger::Explicit => "explicit",
            Trigger::Shutdown => "shutdown",
        })
    }
}

/// Buffering and scheduling for one entry type.
pub struct Accumulator<T: Send + 'static> {
    shared: Arc<Shared<T>>,
    control: Sender<Control>,
    worker: Mutex<Option<JoinHandle<()>>>,
    batch_size: usize,
}

impl<T: Send + 'static> Accumulator<T> {
    /// Start the worker thread and return the append surface.
    pub fn spawn<H>(
        name: impl Into<String>,
        settings: BatchSettings,
        handler: H,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, AccumulatorError>
    where
        H: BatchHandler<T>,
    {
        let name = name.into();
        let shared = Arc::new(Shared {
            name: name.clone(),
            buffer: Mutex::new(Buffer {
                items: Vec::new(),
                closed: false,
            }),
            flush_requested: AtomicBool::new(false),
            flushing: AtomicBool::new(false),
            counters: Counters::default(),
        });
        let (control, inbox) = unbounded();

        let worker = Worker {
            shared: Arc::clone(&shared),
            inbox,
            handler,
            clock,
            period: settings.period,
            policy: settings.failure_policy,
        };
        let handle = std::thread::Builder::new()
            .name(format!("accumulator-{}", name))
            .spawn(move || worker.run())?;

        debug!(
            accumulator = %name,
            batch_size = settings.batch_size,
            period_ms = settings.period.as_millis() as u64,
            "accumulator started"
        );

        Ok(Self {
            shared,
            control,
            worker: Mutex::new(Some(handle)),
            batch_size: settings.batch_size.max(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Items currently buffered and not yet detached.
    pub fn pending(&self) -> usize {
        self.shared.buffer.lock().items.len()
    }

    pub fn state(&self) -> AccumulatorState {
        let buffer = self.shared.buffer.lock();
        if buffer.closed {
            AccumulatorState::Disposed
        } else if self.shared.flushing.load(Ordering::Acquire) {
            AccumulatorState::Flushing
        } else if buffer.items.is_empty() {
            AccumulatorState::Idle
        } else {
            AccumulatorState::Accumulating
        }
    }

    pub fn stats(&self) -> AccumulatorStats {
        self.shared.counters.snapshot()
    }

    /// Flush whatever is buffered and wait for the write to finish.
    /// A no-op once the accumulator is shut down.
    pub fn flush(&self) {
        let (ack, done) = crossbeam_channel::bounded::<()>(0);
        if self.control.send(Control::Flush(ack)).is_ok() {
            // Disconnects when the worker drops the ack after flushing.
            let _ = done.recv();
        }
    }

    /// Stop scheduling, drain the buffer in one final flush and join the
    /// worker. Safe to call more than once.
    pub fn shutdown(&self) {
        {
            let mut buffer = self.shared.buffer.lock();
            if !buffer.closed {
                buffer.closed = true;
                let _ = self.control.send(Control::Shutdown);
            }
        }
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                error!(accumulator = %self.shared.name, "accumulator worker panicked");
            }
            debug!(accumulator = %self.shared.name, "accumulator stopped");
        }
    }

    fn request_flush(&self, buffered: usize) {
        if buffered >= self.batch_size && !self.shared.flush_requested.swap(true, Ordering::AcqRel)
        {
            let _ = self.control.send(Control::FlushNow);
        }
    }
}

impl<T: Validate + Send + 'static> Accumulator<T> {
    /// Validate and buffer one item. Never blocks on I/O.
    pub fn append(&self, item: T) -> Result<(), AccumulatorError> {
        item.validate()?;
        let buffered = {
            let mut buffer = self.shared.buffer.lock();
            if buffer.closed {
                return Err(AccumulatorError::Closed(self.shared.name.clone()));
            }
            buffer.items.push(item);
            buffer.items.len()
        };
        self.shared.counters.appended.fetch_add(1, Ordering::Relaxed);
        self.request_flush(buffered);
        Ok(())
    }

    /// Validate every item, then buffer all of them in order. If any item is
    /// invalid nothing is buffered.
    pub fn append_many<I>(&self, items: I) -> Result<usize, AccumulatorError>
    where
        I: IntoIterator<Item = T>,
    {
        let items: Vec<T> = items.into_iter().collect();
        for item in &items {
            item.validate()?;
        }
        let count = items.len();
        if count == 0 {
            return Ok(0);
        }
        let buffered = {
            let mut buffer = self.shared.buffer.lock();
            if buffer.closed {
                return Err(AccumulatorError::Closed(self.shared.name.clone()));
            }
            buffer.items.extend(items);
            buffer.items.len()
        };
        self.shared
            .counters
            .appended
            .fetch_add(count as u64, Ordering::Relaxed);
        self.request_flush(buffered);
        Ok(count)
    }
}

impl<T: Send + 'static> Drop for Accumulator<T> {
    fn drop(&mut self) {
        self.shutdown();
    }
}

struct Worker<T, H> {
    shared: Arc<Shared<T>>,
    inbox: Receiver<Control>,
    handler: H,
    clock: Arc<dyn Clock>,
    period: Duration,
    policy: FailurePolicy,
}

impl<T: Send + 'static, H: BatchHandler<T>> Worker<T, H> {
    fn run(mut self) {
        let inbox = self.inbox.clone();
        let mut last_flush = self.clock.now();
        loop {
            let since = self.clock.now().saturating_sub(last_flush);
            let timer = self.clock.after(self.period.saturating_sub(since));

            select! {
                recv(inbox) -> msg => match msg {
                    Ok(Control::FlushNow) => {
                        self.shared.flush_requested.store(false, Ordering::Release);
                        self.flush(Trigger::Threshold);
                    }
                    Ok(Control::Flush(ack)) => {
                        self.flush(Trigger::Explicit);
                        drop(ack);
                    }
                    Ok(Control::Shutdown) | Err(_) => break,
                },
                recv(timer) -> _ => self.flush(Trigger::Timer),
            }
            last_flush = self.clock.now();
        }

        self.flush(Trigger::Shutdown);
    }

    fn flush(&mut self, trigger: Trigger) {
        let batch = mem::take(&mut self.shared.buffer.lock().items);
        if batch.is_empty() {
            return;
        }

        self.shared.flushing.store(true, Ordering::Release);
        let size = batch.len();
        let counters = &self.shared.counters;
        let mut attempt = 0u32;
        loop {
            match self.handler.handle(&batch) {
                Ok(()) => {
                    counters.batches_written.fetch_add(1, Ordering::Relaxed);
                    counters
                        .items_written
                        .fetch_add(size as u64, Ordering::Relaxed);
                    debug!(
                        accumulator = %self.shared.name,
                        batch_size = size,
                        %trigger,
                        "flushed batch"
                    );
                    break;
                }
                Err(e) if attempt < self.policy.max_retries() => {
                    attempt += 1;
                    counters.retries.fetch_add(1, Ordering::Relaxed);
                    let backoff = self.policy.backoff(attempt);
                    warn!(
                        accumulator = %self.shared.name,
                        batch_size = size,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = %e,
                        "batch write failed; retrying"
                    );
                    let _ = self.clock.after(backoff).recv();
                }
                Err(e) => {
                    counters.batches_failed.fetch_add(1, Ordering::Relaxed);
                    counters
                        .items_dropped
                        .fetch_add(size as u64, Ordering::Relaxed);
                    error!(
                        accumulator = %self.shared.name,
                        batch_size = size,
                        %trigger,
                        error = %e,
                        "batch write failed; batch discarded"
                    );
                    break;
                }
            }
        }
        self.shared.flushing.store(false, Ordering::Release);
    }
}
