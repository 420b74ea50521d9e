//! The connection worker state machine.
//!
//! One worker per configured connection slot. A worker loops pulling chunk
//! indices from the scheduler, fetching each over its own keep-alive
//! connection, and committing the bytes to the reassembly buffer, until the
//! scheduler is exhausted.
//!
//! Failure handling: transport errors (connect/send/receive, timeouts,
//! peer resets) and protocol errors (non-success status, unusable length
//! header) are treated identically: discard the connection, keep the chunk,
//! back off, try again. A chunk is only ever released by committing it.

use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::{debug, warn};

use crate::buffer::ReassemblyBuffer;
use crate::config::RetryPolicy;
use crate::conn::Connection;
use crate::error::{EngineError, EngineResult};
use crate::progress::ProgressCounters;
use crate::scheduler::ChunkScheduler;
use crate::wire;

/// Receive buffer size for response reads (64KB).
pub const RECV_BUFFER_SIZE: usize = 64 * 1024;

/// Static binding of a worker to its mirror.
#[derive(Debug, Clone)]
pub struct WorkerSlot {
    /// Ordinal id, unique across the run.
    pub id: usize,
    /// Mirror host this slot always connects to.
    pub host: String,
    /// Mirror port.
    pub port: u16,
    /// Resource path on this mirror.
    pub path: String,
}

/// Why a single chunk attempt failed. Both kinds take the same retry path.
enum AttemptError {
    /// Socket-level failure: connect, send, receive, timeout, reset.
    Transport(EngineError),
    /// The response arrived but was unusable.
    Protocol(String),
}

impl fmt::Display for AttemptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttemptError::Transport(err) => write!(f, "transport: {err}"),
            AttemptError::Protocol(msg) => write!(f, "protocol: {msg}"),
        }
    }
}

/// A worker driving one connection slot to completion.
pub struct ConnectionWorker {
    slot: WorkerSlot,
    scheduler: Arc<ChunkScheduler>,
    buffer: Arc<ReassemblyBuffer>,
    progress: Arc<ProgressCounters>,
    timeout: Duration,
    retry: RetryPolicy,
    conn: Option<Connection>,
}

impl ConnectionWorker {
    pub fn new(
        slot: WorkerSlot,
        scheduler: Arc<ChunkScheduler>,
        buffer: Arc<ReassemblyBuffer>,
        progress: Arc<ProgressCounters>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            slot,
            scheduler,
            buffer,
            progress,
            timeout,
            retry,
            conn: None,
        }
    }

    /// Drain the scheduler, then terminate.
    ///
    /// Returns an error only when a chunk exhausts a bounded retry policy
    /// or the output file cannot be written; with the default unbounded
    /// policy a worker either finishes or keeps retrying.
    pub fn run(mut self) -> EngineResult<()> {
        debug!(worker = self.slot.id, host = %self.slot.host, "worker started");

        while let Some(index) = self.scheduler.acquire() {
            self.fetch_chunk(index)?;
        }

        if let Some(conn) = self.conn.take() {
            conn.close();
        }
        debug!(worker = self.slot.id, "scheduler exhausted; worker finished");
        Ok(())
    }

    /// Fetch and commit one chunk, retrying under the policy until it lands.
    fn fetch_chunk(&mut self, index: u64) -> EngineResult<()> {
        let mut attempts: u32 = 0;
        loop {
            match self.attempt(index) {
                Ok(bytes) => {
                    self.buffer.commit(index, bytes)?;
                    return Ok(());
                }
                Err(err) => {
                    attempts += 1;
                    warn!(
                        worker = self.slot.id,
                        chunk = index,
                        attempt = attempts,
                        error = %err,
                        "chunk attempt failed"
                    );
                    if !self.retry.allows(attempts) {
                        return Err(EngineError::ChunkFailed { index, attempts });
                    }
                    thread::sleep(self.retry.delay_for(attempts));
                }
            }
        }
    }

    /// One attempt: send the ranged request, read and validate the response,
    /// accumulate the body. On failure the connection has already been
    /// dropped; the next attempt reconnects.
    fn attempt(&mut self, index: u64) -> Result<Vec<u8>, AttemptError> {
        let plan = self.scheduler.plan();
        let (start, end) = plan.span(index);
        let request =
            wire::encode_range_request(&self.slot.host, &self.slot.path, start, end, true);

        let mut conn = self.checked_send(&request)?;
        match self.read_body(&mut conn, plan.len(index)) {
            Ok(bytes) => {
                // Keep the connection for the next chunk.
                self.conn = Some(conn);
                Ok(bytes)
            }
            Err(err) => Err(err),
        }
    }

    /// Send on the kept-alive connection if there is one; if that send
    /// fails, or no connection is open, connect fresh and send once more.
    fn checked_send(&mut self, request: &[u8]) -> Result<Connection, AttemptError> {
        if let Some(mut conn) = self.conn.take() {
            if conn.send(request).is_ok() {
                return Ok(conn);
            }
            debug!(worker = self.slot.id, "keep-alive connection went stale; reconnecting");
        }

        let mut conn = Connection::open(&self.slot.host, self.slot.port, self.timeout)
            .map_err(AttemptError::Transport)?;
        conn.send(request)
            .map_err(|e| AttemptError::Transport(EngineError::Io(e)))?;
        Ok(conn)
    }

    /// Read one response off the connection and return its body.
    ///
    /// Keeps reading and re-splitting until the header block is complete,
    /// validates status and `Content-Length`, then accumulates body bytes
    /// until the announced length is reached. A peer close anywhere short
    /// of that is a transport failure; the partial body is discarded.
    fn read_body(
        &self,
        conn: &mut Connection,
        expected_chunk_len: u64,
    ) -> Result<Vec<u8>, AttemptError> {
        let mut received = Vec::new();
        let mut buf = [0u8; RECV_BUFFER_SIZE];

        let (mut body, announced) = loop {
            let n = self.recv_some(conn, &mut buf, "header")?;
            received.extend_from_slice(&buf[..n]);

            let (header, body) = wire::split_header_body(&received);
            if header.is_empty() {
                continue;
            }
            if !wire::is_success_status(header) {
                return Err(AttemptError::Protocol(format!(
                    "non-success status: {}",
                    wire::status_line(header)
                )));
            }
            let announced = wire::body_length(header).ok_or_else(|| {
                AttemptError::Protocol("missing or unparseable Content-Length".to_string())
            })?;
            break (body.to_vec(), announced);
        };

        if announced != expected_chunk_len {
            return Err(AttemptError::Protocol(format!(
                "server announced {announced} body bytes where {expected_chunk_len} were requested"
            )));
        }

        while (body.len() as u64) < announced {
            let n = self.recv_some(conn, &mut buf, "body")?;
            body.extend_from_slice(&buf[..n]);
        }
        body.truncate(announced as usize);

        Ok(body)
    }

    /// Receive at least one byte, recording it in the progress counters.
    fn recv_some(
        &self,
        conn: &mut Connection,
        buf: &mut [u8],
        phase: &str,
    ) -> Result<usize, AttemptError> {
        let n = conn
            .recv(buf)
            .map_err(|e| AttemptError::Transport(EngineError::Io(e)))?;
        if n == 0 {
            return Err(AttemptError::Transport(EngineError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("connection closed mid-{phase}"),
            ))));
        }
        self.progress.add(self.slot.id, n as u64);
        Ok(n)
    }
}
