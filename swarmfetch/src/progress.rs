//! Per-worker progress counters and the telemetry reporter.
//!
//! Workers record received bytes into atomic counters; nothing on the fetch
//! path ever blocks on a telemetry consumer. A `ProgressReporter` thread
//! periodically snapshots the counters and feeds timestamped samples to an
//! injected callback (the CLI renders them; a plotting tool can log them).

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

/// One telemetry sample: cumulative bytes received by a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerSample {
    /// Worker slot ordinal.
    pub worker: usize,
    /// Cumulative bytes received by this worker so far.
    pub bytes: u64,
    /// Time since the counters were created.
    pub elapsed: Duration,
}

/// Callback receiving one sample per worker at each reporting tick.
pub type ProgressCallback = Box<dyn Fn(&[WorkerSample]) + Send + Sync>;

/// Shared per-worker byte counters.
#[derive(Debug)]
pub struct ProgressCounters {
    per_worker: Vec<AtomicU64>,
    started: Instant,
    done: AtomicBool,
}

impl ProgressCounters {
    /// Create counters for the given number of worker slots.
    pub fn new(workers: usize) -> Self {
        Self {
            per_worker: (0..workers).map(|_| AtomicU64::new(0)).collect(),
            started: Instant::now(),
            done: AtomicBool::new(false),
        }
    }

    /// Record `n` more received bytes for a worker. Never blocks.
    pub fn add(&self, worker: usize, n: u64) {
        if let Some(counter) = self.per_worker.get(worker) {
            counter.fetch_add(n, Ordering::Relaxed);
        }
    }

    /// Cumulative bytes for one worker.
    pub fn bytes(&self, worker: usize) -> u64 {
        self.per_worker
            .get(worker)
            .map_or(0, |c| c.load(Ordering::Relaxed))
    }

    /// Total bytes across all workers.
    pub fn total_bytes(&self) -> u64 {
        self.per_worker
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .sum()
    }

    /// Snapshot all counters with a shared timestamp.
    pub fn sample(&self) -> Vec<WorkerSample> {
        let elapsed = self.started.elapsed();
        self.per_worker
            .iter()
            .enumerate()
            .map(|(worker, counter)| WorkerSample {
                worker,
                bytes: counter.load(Ordering::Relaxed),
                elapsed,
            })
            .collect()
    }

    /// Cumulative bytes per worker, in slot order.
    pub fn snapshot_bytes(&self) -> Vec<u64> {
        self.per_worker
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    /// Signal the reporter to stop.
    pub fn signal_done(&self) {
        self.done.store(true, Ordering::SeqCst);
    }

    /// Whether the run has been signalled done.
    pub fn is_done(&self) -> bool {
        self.done.load(Ordering::SeqCst)
    }
}

/// Background thread feeding progress samples to a callback.
pub struct ProgressReporter {
    handle: Option<JoinHandle<()>>,
    counters: Arc<ProgressCounters>,
}

impl ProgressReporter {
    /// Start a reporter polling at `poll_interval`.
    pub fn start(
        counters: Arc<ProgressCounters>,
        poll_interval: Duration,
        callback: Arc<ProgressCallback>,
    ) -> Self {
        let counters_clone = Arc::clone(&counters);

        let handle = thread::spawn(move || {
            while !counters_clone.is_done() {
                callback(&counters_clone.sample());
                thread::sleep(poll_interval);
            }

            // Final sample so consumers see the end state.
            callback(&counters_clone.sample());
        });

        Self {
            handle: Some(handle),
            counters,
        }
    }

    /// Start a reporter with the default 100ms poll interval.
    pub fn start_default(counters: Arc<ProgressCounters>, callback: Arc<ProgressCallback>) -> Self {
        Self::start(counters, Duration::from_millis(100), callback)
    }

    /// Stop the reporter and wait for it to finish.
    #[cfg(test)]
    pub fn stop(mut self) {
        self.counters.signal_done();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.counters.signal_done();
        if let Some(handle) = self.handle.take() {
            handle.join().ok();
        }
    }
}
