//! Ordered reassembly of out-of-order chunk arrivals.
//!
//! Workers finish chunks in whatever order the network allows; the output
//! file must receive bytes in strict index order. `ReassemblyBuffer` holds
//! fetched-but-not-yet-committable chunks in a min-heap and maintains a
//! watermark of the next index the file expects. Each commit drains every
//! entry that has become contiguous with the watermark, so the file only
//! ever grows by in-order appends.
//!
//! Invariant: every chunk below the watermark is fully written, in order,
//! with no gaps; nothing at or above the watermark has been written.

use std::collections::BinaryHeap;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing::trace;

use crate::error::{EngineError, EngineResult};
use crate::scheduler::ChunkPlan;

/// A fetched chunk waiting for its turn to be written.
struct PendingChunk {
    index: u64,
    bytes: Vec<u8>,
}

// Reversed index comparison: BinaryHeap is a max-heap, so the smallest
// index must compare greatest to come out first.
impl PartialEq for PendingChunk {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
    }
}

impl Eq for PendingChunk {}

impl PartialOrd for PendingChunk {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PendingChunk {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.index.cmp(&self.index)
    }
}

struct BufferInner {
    pending: BinaryHeap<PendingChunk>,
    /// Next chunk index the output file expects.
    lowest_uncommitted: u64,
    /// Chunks written to the file so far.
    committed: u64,
    writer: BufWriter<File>,
}

/// The ordered commit buffer in front of the output file.
///
/// Shared by all workers; a single internal mutex serializes commits. The
/// lock is held only for heap operations and the write call, never across
/// network I/O.
pub struct ReassemblyBuffer {
    path: PathBuf,
    plan: ChunkPlan,
    inner: Mutex<BufferInner>,
}

impl ReassemblyBuffer {
    /// Create the output file and an empty buffer over the given plan.
    pub fn create(path: impl Into<PathBuf>, plan: ChunkPlan) -> EngineResult<Self> {
        let path = path.into();
        let file = File::create(&path).map_err(|e| EngineError::WriteFailed {
            path: path.clone(),
            source: e,
        })?;

        Ok(Self {
            path,
            plan,
            inner: Mutex::new(BufferInner {
                pending: BinaryHeap::new(),
                lowest_uncommitted: 0,
                committed: 0,
                writer: BufWriter::new(file),
            }),
        })
    }

    /// Path of the output file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Accept a fetched chunk, writing it and any now-contiguous successors.
    ///
    /// May flush zero, one, or many pending chunks depending on which gap
    /// this arrival fills. Safe to call from any number of workers in any
    /// arrival order; each index must be committed at most once (the
    /// scheduler guarantees this).
    pub fn commit(&self, index: u64, bytes: Vec<u8>) -> EngineResult<()> {
        let mut inner = self.inner.lock().unwrap();

        debug_assert!(
            index >= inner.lowest_uncommitted
                && !inner.pending.iter().any(|chunk| chunk.index == index),
            "chunk {index} committed twice"
        );
        debug_assert_eq!(bytes.len() as u64, self.plan.len(index));

        inner.pending.push(PendingChunk { index, bytes });

        while inner
            .pending
            .peek()
            .map_or(false, |chunk| chunk.index == inner.lowest_uncommitted)
        {
            let chunk = inner.pending.pop().unwrap();
            inner
                .writer
                .write_all(&chunk.bytes)
                .map_err(|e| EngineError::WriteFailed {
                    path: self.path.clone(),
                    source: e,
                })?;
            inner.lowest_uncommitted += 1;
            inner.committed += 1;
            trace!(index = chunk.index, "chunk committed");
        }

        Ok(())
    }

    /// Next chunk index the output file expects.
    pub fn lowest_uncommitted(&self) -> u64 {
        self.inner.lock().unwrap().lowest_uncommitted
    }

    /// Number of chunks written so far.
    pub fn committed(&self) -> u64 {
        self.inner.lock().unwrap().committed
    }

    /// Flush the output file and return how many chunks were committed.
    pub fn finish(&self) -> EngineResult<u64> {
        let mut inner = self.inner.lock().unwrap();
        inner.writer.flush().map_err(|e| EngineError::WriteFailed {
            path: self.path.clone(),
            source: e,
        })?;
        Ok(inner.committed)
    }
}
