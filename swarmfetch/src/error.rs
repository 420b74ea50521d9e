//! Error types for the download engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors that can occur during a download run.
///
/// Transport and protocol failures inside a single chunk attempt are retried
/// by the worker and never surface here directly; these variants are what
/// escapes the engine once a run cannot continue or has finished incorrectly.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Configuration rejected before any worker started.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// TCP connection to a source could not be established.
    #[error("failed to connect to {host}:{port}: {source}")]
    Connect {
        host: String,
        port: u16,
        source: io::Error,
    },

    /// Socket-level I/O failure.
    #[error("socket I/O failed: {0}")]
    Io(#[from] io::Error),

    /// Server answered with a status line other than 200 or 206.
    #[error("server returned non-success status: {0}")]
    BadStatus(String),

    /// A required response header was missing or unparseable.
    #[error("response is missing a usable {0} header")]
    MissingHeader(&'static str),

    /// A chunk exhausted its bounded retry budget.
    #[error("chunk {index} failed after {attempts} attempts")]
    ChunkFailed { index: u64, attempts: u32 },

    /// The run finished with fewer chunks committed than scheduled.
    #[error("download incomplete: {committed} of {expected} chunks committed")]
    Incomplete { committed: u64, expected: u64 },

    /// Failed to write the output file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to read a file.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Output file digest does not match the expected value.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// A worker thread panicked.
    #[error("worker thread panicked")]
    WorkerPanic,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display() {
        let err = EngineError::InvalidConfig("no sources configured".to_string());
        assert!(err.to_string().contains("invalid configuration"));
        assert!(err.to_string().contains("no sources configured"));
    }

    #[test]
    fn test_chunk_failed_display() {
        let err = EngineError::ChunkFailed {
            index: 7,
            attempts: 3,
        };
        assert_eq!(err.to_string(), "chunk 7 failed after 3 attempts");
    }

    #[test]
    fn test_checksum_mismatch_display() {
        let err = EngineError::ChecksumMismatch {
            expected: "abc123".to_string(),
            actual: "def456".to_string(),
        };
        assert!(err.to_string().contains("abc123"));
        assert!(err.to_string().contains("def456"));
    }

    #[test]
    fn test_connect_carries_source() {
        use std::error::Error;

        let err = EngineError::Connect {
            host: "mirror.example.net".to_string(),
            port: 80,
            source: io::Error::new(io::ErrorKind::ConnectionRefused, "refused"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("mirror.example.net:80"));
    }
}
