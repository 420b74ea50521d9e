//! Run coordination: wire the engine together and drive it to completion.
//!
//! `RangeDownloader` owns a validated configuration and runs one download:
//! probe the length, build the chunk plan, scheduler, and reassembly buffer,
//! spawn one worker thread per connection slot, wait for all of them, then
//! finalize and optionally verify the output.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::info;

use crate::buffer::ReassemblyBuffer;
use crate::checksum::verify_sha256;
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult};
use crate::probe::probe_total_length;
use crate::progress::{ProgressCallback, ProgressCounters, ProgressReporter};
use crate::scheduler::{ChunkPlan, ChunkScheduler};
use crate::worker::{ConnectionWorker, WorkerSlot};

/// Summary of a completed download run.
#[derive(Debug, Clone)]
pub struct DownloadReport {
    /// Total resource length in bytes.
    pub total_len: u64,
    /// Number of chunks committed.
    pub chunk_count: u64,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Cumulative bytes received per worker slot, in slot order.
    pub worker_bytes: Vec<u64>,
}

/// The run coordinator.
pub struct RangeDownloader {
    config: EngineConfig,
}

impl RangeDownloader {
    /// Create a downloader over the given configuration.
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    /// The configuration this downloader runs with.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Run the download to completion.
    pub fn run(&self) -> EngineResult<DownloadReport> {
        self.run_with_progress(None)
    }

    /// Run the download, feeding progress samples to `on_progress`.
    pub fn run_with_progress(
        &self,
        on_progress: Option<ProgressCallback>,
    ) -> EngineResult<DownloadReport> {
        self.config.validate()?;
        let started = Instant::now();

        let first = &self.config.sources[0];
        info!(host = %first.host, path = %first.path, "probing resource length");
        let total_len =
            probe_total_length(first, self.config.timeout, self.config.probe_retry_delay);

        let plan = ChunkPlan::new(total_len, self.config.chunk_size);
        info!(
            total_len,
            chunks = plan.count(),
            slots = self.config.slot_count(),
            "starting download"
        );

        let scheduler = Arc::new(ChunkScheduler::new(plan));
        let buffer = Arc::new(ReassemblyBuffer::create(&self.config.output_path, plan)?);
        let counters = Arc::new(ProgressCounters::new(self.config.slot_count()));

        let _reporter = on_progress
            .map(|cb| ProgressReporter::start_default(Arc::clone(&counters), Arc::new(cb)));

        let mut handles = Vec::new();
        for slot in self.worker_slots() {
            let worker = ConnectionWorker::new(
                slot,
                Arc::clone(&scheduler),
                Arc::clone(&buffer),
                Arc::clone(&counters),
                self.config.timeout,
                self.config.retry.clone(),
            );
            handles.push(thread::spawn(move || worker.run()));
        }

        // Join everything before surfacing the first failure, so no worker
        // outlives the run.
        let mut first_error = None;
        for handle in handles {
            let outcome = match handle.join() {
                Ok(result) => result,
                Err(_) => Err(EngineError::WorkerPanic),
            };
            if let Err(err) = outcome {
                first_error.get_or_insert(err);
            }
        }
        counters.signal_done();

        if let Some(err) = first_error {
            return Err(err);
        }

        let committed = buffer.finish()?;
        if committed != plan.count() {
            return Err(EngineError::Incomplete {
                committed,
                expected: plan.count(),
            });
        }

        if let Some(expected) = &self.config.expected_sha256 {
            verify_sha256(&self.config.output_path, expected)?;
            info!("checksum verified");
        }

        let report = DownloadReport {
            total_len,
            chunk_count: plan.count(),
            elapsed: started.elapsed(),
            worker_bytes: counters.snapshot_bytes(),
        };
        info!(
            total_len,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "download complete"
        );
        Ok(report)
    }

    /// Expand configured sources into worker slots, one per connection.
    /// Slot assignment is static for the whole run.
    fn worker_slots(&self) -> Vec<WorkerSlot> {
        let mut slots = Vec::with_capacity(self.config.slot_count());
        for source in &self.config.sources {
            for _ in 0..source.connections {
                slots.push(WorkerSlot {
                    id: slots.len(),
                    host: source.host.clone(),
                    port: source.port,
                    path: source.path.clone(),
                });
            }
        }
        slots
    }
}
