//! Resource length discovery.
//!
//! Before any range work can be scheduled, the engine needs the resource's
//! total byte length. The prober issues a single 1-byte ranged request
//! (`bytes=0-0`) against the first configured source, without keep-alive,
//! and reads the total from the `Content-Range` denominator, never from
//! `Content-Length`, which would report only the probed byte.
//!
//! The probe retries indefinitely with a fixed back-off. This is the only
//! unbounded retry in the system: without a known length there is nothing
//! the engine can do, so it keeps asking.

use std::io;
use std::thread;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::SourceConfig;
use crate::conn::Connection;
use crate::error::{EngineError, EngineResult};
use crate::wire;

/// Receive buffer size for the probe response.
const PROBE_BUFFER_SIZE: usize = 4096;

/// Discover the resource's total length, retrying until a probe succeeds.
pub fn probe_total_length(source: &SourceConfig, timeout: Duration, retry_delay: Duration) -> u64 {
    let mut attempt: u64 = 0;
    loop {
        attempt += 1;
        match probe_once(source, timeout) {
            Ok(total_len) => {
                info!(host = %source.host, total_len, "resource length discovered");
                return total_len;
            }
            Err(err) => {
                warn!(host = %source.host, attempt, error = %err, "length probe failed; retrying");
                thread::sleep(retry_delay);
            }
        }
    }
}

/// One probe attempt over a fresh, non-keep-alive connection.
fn probe_once(source: &SourceConfig, timeout: Duration) -> EngineResult<u64> {
    let mut conn = Connection::open(&source.host, source.port, timeout)?;
    let request = wire::encode_range_request(&source.host, &source.path, 0, 0, false);
    conn.send(&request)?;

    let mut received = Vec::new();
    let mut buf = [0u8; PROBE_BUFFER_SIZE];
    loop {
        let n = conn.recv(&mut buf)?;
        if n == 0 {
            return Err(EngineError::Io(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "connection closed before the probe header arrived",
            )));
        }
        received.extend_from_slice(&buf[..n]);

        let (header, _) = wire::split_header_body(&received);
        if header.is_empty() {
            continue;
        }
        if !wire::is_success_status(header) {
            return Err(EngineError::BadStatus(wire::status_line(header)));
        }
        return wire::total_length(header).ok_or(EngineError::MissingHeader("Content-Range"));
    }
}
