//! Integration tests for the download engine.
//!
//! These tests run the full engine against an in-process HTTP/1.1 range
//! server: probe, parallel workers over keep-alive connections, reassembly,
//! and checksum verification. Fault injection covers dropped connections,
//! error statuses, and probe responses without `Content-Range`.

use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sha2::{Digest, Sha256};
use tempfile::TempDir;

use swarmfetch::{EngineConfig, EngineError, RangeDownloader, RetryPolicy, SourceConfig};

// ============================================================================
// Test Server
// ============================================================================

/// Fault-injection knobs for a test server.
#[derive(Clone, Default)]
struct ServerFaults {
    /// Close the connection without answering for the first N requests.
    drop_first: usize,
    /// Answer the first N requests with 503.
    error_first: usize,
    /// Omit `Content-Range` from the first N responses.
    omit_content_range_first: usize,
    /// Close the connection after serving N responses on it (keep-alive
    /// violation), `0` meaning never.
    close_after: usize,
}

/// An in-process HTTP/1.1 range server over a deterministic resource.
struct TestServer {
    port: u16,
    requests: Arc<AtomicUsize>,
}

impl TestServer {
    fn start(resource: Arc<Vec<u8>>, faults: ServerFaults) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let requests = Arc::new(AtomicUsize::new(0));
        let requests_clone = Arc::clone(&requests);

        thread::spawn(move || {
            for stream in listener.incoming() {
                let Ok(stream) = stream else { break };
                let resource = Arc::clone(&resource);
                let faults = faults.clone();
                let requests = Arc::clone(&requests_clone);
                thread::spawn(move || serve(stream, &resource, &faults, &requests));
            }
        });

        Self { port, requests }
    }

    fn source(&self) -> SourceConfig {
        SourceConfig::new("127.0.0.1", "/resource.bin").with_port(self.port)
    }
}

fn serve(mut stream: TcpStream, resource: &[u8], faults: &ServerFaults, requests: &AtomicUsize) {
    let mut served_on_conn = 0;
    loop {
        let Some(request) = read_request(&mut stream) else {
            return;
        };
        let seen = requests.fetch_add(1, Ordering::SeqCst);

        if seen < faults.drop_first {
            return;
        }
        if seen < faults.drop_first + faults.error_first {
            let _ = stream.write_all(b"HTTP/1.1 503 Service Unavailable\r\nContent-Length: 0\r\n\r\n");
            continue;
        }

        let Some((start, end)) = parse_range(&request) else {
            let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\nContent-Length: 0\r\n\r\n");
            continue;
        };
        let end = end.min(resource.len().saturating_sub(1));
        let body = &resource[start..=end];

        let mut header = format!(
            "HTTP/1.1 206 Partial Content\r\nContent-Length: {}\r\n",
            body.len()
        );
        if seen >= faults.omit_content_range_first {
            header.push_str(&format!(
                "Content-Range: bytes {}-{}/{}\r\n",
                start,
                end,
                resource.len()
            ));
        }
        header.push_str("\r\n");

        if stream.write_all(header.as_bytes()).is_err() || stream.write_all(body).is_err() {
            return;
        }

        served_on_conn += 1;
        if faults.close_after > 0 && served_on_conn >= faults.close_after {
            return;
        }
    }
}

fn read_request(stream: &mut TcpStream) -> Option<Vec<u8>> {
    let mut request = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return None,
            Ok(n) => {
                request.extend_from_slice(&buf[..n]);
                if request.windows(4).any(|w| w == b"\r\n\r\n") {
                    return Some(request);
                }
            }
            Err(_) => return None,
        }
    }
}

fn parse_range(request: &[u8]) -> Option<(usize, usize)> {
    let text = String::from_utf8_lossy(request);
    let range = text.lines().find_map(|l| l.strip_prefix("Range: bytes="))?;
    let (start, end) = range.split_once('-')?;
    Some((start.parse().ok()?, end.parse().ok()?))
}

// ============================================================================
// Helpers
// ============================================================================

/// Deterministic pseudo-random resource content.
fn make_resource(len: usize) -> Arc<Vec<u8>> {
    Arc::new(
        (0..len as u64)
            .map(|i| (i.wrapping_mul(2654435761).rotate_left(7) % 256) as u8)
            .collect(),
    )
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn test_config(output: std::path::PathBuf) -> EngineConfig {
    EngineConfig::new(output)
        .with_timeout(Duration::from_secs(5))
        .with_retry(RetryPolicy::limited(10, Duration::from_millis(10)))
        .with_probe_retry_delay(Duration::from_millis(10))
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn test_round_trip_parallel_download() {
    let resource = make_resource(100_000);
    let server = TestServer::start(Arc::clone(&resource), ServerFaults::default());
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.bin");

    let config = test_config(output.clone())
        .with_source(server.source().with_connections(3))
        .with_chunk_size(4096)
        .with_expected_sha256(sha256_hex(&resource));

    let report = RangeDownloader::new(config).run().unwrap();

    assert_eq!(report.total_len, 100_000);
    assert_eq!(report.chunk_count, 25);
    assert_eq!(std::fs::read(&output).unwrap(), *resource);
}

#[test]
fn test_single_worker_short_last_chunk() {
    // L=25000, C=10000: N=3 with a 5000-byte final chunk.
    let resource = make_resource(25_000);
    let server = TestServer::start(Arc::clone(&resource), ServerFaults::default());
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.bin");

    let config = test_config(output.clone())
        .with_source(server.source().with_connections(1))
        .with_chunk_size(10_000);

    let report = RangeDownloader::new(config).run().unwrap();

    assert_eq!(report.chunk_count, 3);
    assert_eq!(std::fs::read(&output).unwrap(), *resource);
}

#[test]
fn test_two_mirrors_cover_all_chunks_exactly_once() {
    // Two hosts, two connections each, N=10: every chunk committed exactly
    // once no matter which mirror fetched it.
    let resource = make_resource(10 * 2048);
    let server_a = TestServer::start(Arc::clone(&resource), ServerFaults::default());
    let server_b = TestServer::start(Arc::clone(&resource), ServerFaults::default());
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.bin");

    let config = test_config(output.clone())
        .with_source(server_a.source().with_connections(2))
        .with_source(server_b.source().with_connections(2))
        .with_chunk_size(2048)
        .with_expected_sha256(sha256_hex(&resource));

    let report = RangeDownloader::new(config).run().unwrap();

    assert_eq!(report.chunk_count, 10);
    assert_eq!(report.worker_bytes.len(), 4);
    assert_eq!(std::fs::read(&output).unwrap(), *resource);
    // Both mirrors saw traffic: 1 probe + 10 chunks at minimum.
    assert!(server_a.requests.load(Ordering::SeqCst) + server_b.requests.load(Ordering::SeqCst) >= 11);
}

#[test]
fn test_recovers_from_dropped_connections() {
    // The first two requests after the probe die without a response; the
    // affected chunks are retried on fresh connections and committed once.
    let resource = make_resource(30_000);
    let server_ok = TestServer::start(Arc::clone(&resource), ServerFaults::default());
    let server_flaky = TestServer::start(
        Arc::clone(&resource),
        ServerFaults {
            drop_first: 3, // includes probe attempts
            ..Default::default()
        },
    );
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.bin");

    // Probe goes to the healthy mirror; the flaky one only serves chunks.
    let config = test_config(output.clone())
        .with_source(server_ok.source().with_connections(1))
        .with_source(server_flaky.source().with_connections(2))
        .with_chunk_size(5000)
        .with_expected_sha256(sha256_hex(&resource));

    RangeDownloader::new(config).run().unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), *resource);
}

#[test]
fn test_recovers_from_error_statuses() {
    let resource = make_resource(20_000);
    let server = TestServer::start(
        Arc::clone(&resource),
        ServerFaults {
            error_first: 2,
            ..Default::default()
        },
    );
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.bin");

    let config = test_config(output.clone())
        .with_source(server.source().with_connections(2))
        .with_chunk_size(4000);

    RangeDownloader::new(config).run().unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), *resource);
}

#[test]
fn test_survives_keep_alive_violations() {
    // The server closes every connection after a single response. Workers
    // must transparently reconnect for each chunk.
    let resource = make_resource(40_000);
    let server = TestServer::start(
        Arc::clone(&resource),
        ServerFaults {
            close_after: 1,
            ..Default::default()
        },
    );
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.bin");

    let config = test_config(output.clone())
        .with_source(server.source().with_connections(2))
        .with_chunk_size(4096)
        .with_expected_sha256(sha256_hex(&resource));

    RangeDownloader::new(config).run().unwrap();
    assert_eq!(std::fs::read(&output).unwrap(), *resource);
}

#[test]
fn test_probe_retries_until_content_range_appears() {
    // The first two responses lack Content-Range; the prober must retry
    // rather than proceed with an unknown length.
    let resource = make_resource(8192);
    let server = TestServer::start(
        Arc::clone(&resource),
        ServerFaults {
            omit_content_range_first: 2,
            ..Default::default()
        },
    );
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.bin");

    let config = test_config(output.clone())
        .with_source(server.source().with_connections(1))
        .with_chunk_size(4096);

    let report = RangeDownloader::new(config).run().unwrap();

    assert_eq!(report.total_len, 8192);
    assert!(server.requests.load(Ordering::SeqCst) >= 3 + 2);
    assert_eq!(std::fs::read(&output).unwrap(), *resource);
}

#[test]
fn test_progress_samples_reach_the_callback() {
    let resource = make_resource(50_000);
    let server = TestServer::start(Arc::clone(&resource), ServerFaults::default());
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.bin");

    let config = test_config(output)
        .with_source(server.source().with_connections(2))
        .with_chunk_size(8192);

    let peak = Arc::new(AtomicUsize::new(0));
    let peak_clone = Arc::clone(&peak);
    let callback: swarmfetch::ProgressCallback = Box::new(move |samples| {
        let total: u64 = samples.iter().map(|s| s.bytes).sum();
        peak_clone.fetch_max(total as usize, Ordering::SeqCst);
    });

    RangeDownloader::new(config)
        .run_with_progress(Some(callback))
        .unwrap();

    // The final reporter tick sees all body bytes, plus headers.
    assert!(peak.load(Ordering::SeqCst) >= 50_000);
}

#[test]
fn test_checksum_mismatch_is_reported() {
    let resource = make_resource(10_000);
    let server = TestServer::start(Arc::clone(&resource), ServerFaults::default());
    let temp = TempDir::new().unwrap();
    let output = temp.path().join("out.bin");

    let config = test_config(output)
        .with_source(server.source().with_connections(1))
        .with_chunk_size(4096)
        .with_expected_sha256("definitely-not-the-digest");

    let result = RangeDownloader::new(config).run();
    assert!(matches!(
        result,
        Err(EngineError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_empty_source_list_fails_fast() {
    let temp = TempDir::new().unwrap();
    let config = test_config(temp.path().join("out.bin"));

    let result = RangeDownloader::new(config).run();
    assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
}
