//! Engine configuration.
//!
//! This module defines the normalized configuration the engine consumes:
//! mirror sources, chunk sizing, socket timeout, retry policy, and the
//! optional expected output digest. It also provides `ConfigFile`, an INI
//! loader for persisted defaults; the CLI resolves settings in the order
//! CLI argument > config file > built-in default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use crate::error::{EngineError, EngineResult};

/// Default chunk size in bytes (1 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// Default socket timeout for connect/send/receive, in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default delay between retry attempts, in milliseconds.
pub const DEFAULT_RETRY_DELAY_MS: u64 = 500;

/// Default number of connections per mirror.
pub const DEFAULT_CONNECTIONS: usize = 4;

/// Default HTTP port.
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// One mirror of the target resource.
///
/// Each source contributes `connections` worker slots, all bound to the same
/// (host, port, path) for the duration of a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceConfig {
    /// Host name or address of the mirror.
    pub host: String,
    /// TCP port, usually 80.
    pub port: u16,
    /// Absolute resource path on this mirror, starting with `/`.
    pub path: String,
    /// Number of concurrent connections to open against this mirror.
    pub connections: usize,
}

impl SourceConfig {
    /// Create a source with the default port and connection count.
    pub fn new(host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_HTTP_PORT,
            path: path.into(),
            connections: DEFAULT_CONNECTIONS,
        }
    }

    /// Set the TCP port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the connection count for this mirror.
    pub fn with_connections(mut self, connections: usize) -> Self {
        self.connections = connections;
        self
    }

    /// Parse a mirror spec of the form `host[:port]/path[=connections]`.
    ///
    /// Examples: `mirror.example.net/pub/big.iso`,
    /// `127.0.0.1:8080/big.txt=4`.
    pub fn parse(spec: &str, default_connections: usize) -> EngineResult<Self> {
        let (spec, connections) = match spec.rsplit_once('=') {
            Some((head, count)) => {
                let connections = count.parse().map_err(|_| {
                    EngineError::InvalidConfig(format!(
                        "invalid connection count {count:?} in mirror spec {spec:?}"
                    ))
                })?;
                (head, connections)
            }
            None => (spec, default_connections),
        };

        let slash = spec.find('/').ok_or_else(|| {
            EngineError::InvalidConfig(format!("mirror spec {spec:?} has no resource path"))
        })?;
        let (authority, path) = spec.split_at(slash);

        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse().map_err(|_| {
                    EngineError::InvalidConfig(format!(
                        "invalid port {port:?} in mirror spec {spec:?}"
                    ))
                })?;
                (host, port)
            }
            None => (authority, DEFAULT_HTTP_PORT),
        };

        if host.is_empty() {
            return Err(EngineError::InvalidConfig(format!(
                "mirror spec {spec:?} has no host"
            )));
        }

        Ok(Self {
            host: host.to_string(),
            port,
            path: path.to_string(),
            connections,
        })
    }
}

/// Back-off schedule between chunk retry attempts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Same delay before every retry.
    Fixed(Duration),
    /// Delay doubles per attempt, up to a cap.
    Exponential { base: Duration, cap: Duration },
}

/// Retry policy for failed chunk attempts.
///
/// The default never gives up on a chunk. Bounding `max_attempts` lets
/// callers and tests put a ceiling on worst-case run time, at the cost of a
/// failed run when a chunk stays unfetchable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts per chunk; `None` retries forever.
    pub max_attempts: Option<u32>,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::unbounded(Duration::from_millis(DEFAULT_RETRY_DELAY_MS))
    }
}

impl RetryPolicy {
    /// Retry forever with a fixed delay.
    pub fn unbounded(delay: Duration) -> Self {
        Self {
            max_attempts: None,
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Retry at most `max_attempts` times with a fixed delay.
    pub fn limited(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts: Some(max_attempts),
            backoff: Backoff::Fixed(delay),
        }
    }

    /// Retry with exponential back-off, doubling from `base` up to `cap`.
    pub fn exponential(max_attempts: Option<u32>, base: Duration, cap: Duration) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::Exponential { base, cap },
        }
    }

    /// Whether another attempt may start after `attempts_made` failures.
    pub fn allows(&self, attempts_made: u32) -> bool {
        self.max_attempts.map_or(true, |max| attempts_made < max)
    }

    /// Delay to sleep after the given 1-based failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed(delay) => delay,
            Backoff::Exponential { base, cap } => {
                let exponent = attempt.saturating_sub(1).min(16);
                base.saturating_mul(1 << exponent).min(cap)
            }
        }
    }
}

/// Complete configuration for one download run.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Mirror sources; the first one answers the length probe.
    pub sources: Vec<SourceConfig>,

    /// Where the reassembled resource is written.
    pub output_path: PathBuf,

    /// Fixed chunk size in bytes (the last chunk may be shorter).
    pub chunk_size: u64,

    /// Socket timeout applied to connect, send, and receive.
    pub timeout: Duration,

    /// Retry policy for failed chunk attempts.
    pub retry: RetryPolicy,

    /// Delay between length-probe attempts.
    pub probe_retry_delay: Duration,

    /// Expected SHA-256 of the output, verified after the run when set.
    pub expected_sha256: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sources: Vec::new(),
            output_path: PathBuf::from("download.out"),
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            retry: RetryPolicy::default(),
            probe_retry_delay: Duration::from_millis(DEFAULT_RETRY_DELAY_MS),
            expected_sha256: None,
        }
    }
}

impl EngineConfig {
    /// Create a configuration writing to the given output path.
    pub fn new(output_path: impl Into<PathBuf>) -> Self {
        Self {
            output_path: output_path.into(),
            ..Default::default()
        }
    }

    /// Add a mirror source.
    pub fn with_source(mut self, source: SourceConfig) -> Self {
        self.sources.push(source);
        self
    }

    /// Set the chunk size in bytes.
    pub fn with_chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Set the socket timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the retry policy.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Set the delay between length-probe attempts.
    pub fn with_probe_retry_delay(mut self, delay: Duration) -> Self {
        self.probe_retry_delay = delay;
        self
    }

    /// Set the expected output digest.
    pub fn with_expected_sha256(mut self, digest: impl Into<String>) -> Self {
        self.expected_sha256 = Some(digest.into());
        self
    }

    /// Total number of worker slots across all sources.
    pub fn slot_count(&self) -> usize {
        self.sources.iter().map(|s| s.connections).sum()
    }

    /// Reject configurations the engine cannot run with.
    ///
    /// This is the fail-fast gate: nothing is probed and no worker is
    /// spawned when validation fails.
    pub fn validate(&self) -> EngineResult<()> {
        if self.sources.is_empty() {
            return Err(EngineError::InvalidConfig(
                "no mirror sources configured".to_string(),
            ));
        }
        if self.chunk_size == 0 {
            return Err(EngineError::InvalidConfig(
                "chunk size must be non-zero".to_string(),
            ));
        }
        if self.slot_count() == 0 {
            return Err(EngineError::InvalidConfig(
                "every source has zero connections".to_string(),
            ));
        }
        for source in &self.sources {
            if !source.path.starts_with('/') {
                return Err(EngineError::InvalidConfig(format!(
                    "resource path {:?} must start with '/'",
                    source.path
                )));
            }
        }
        Ok(())
    }
}

/// Persisted defaults loaded from an INI config file.
///
/// ```ini
/// [download]
/// chunk_size = 1048576
/// timeout = 30
/// connections = 4
///
/// [output]
/// path = big.iso
/// sha256 = 9f86d08...
///
/// [mirrors]
/// primary = mirror-a.example.net/pub/big.iso
/// backup = mirror-b.example.net:8080/pub/big.iso=2
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub chunk_size: Option<u64>,
    pub timeout_secs: Option<u64>,
    pub connections: Option<usize>,
    pub output: Option<PathBuf>,
    pub sha256: Option<String>,
    /// Mirror spec strings in file order, parsed by [`SourceConfig::parse`].
    pub mirrors: Vec<String>,
}

impl ConfigFile {
    /// Load settings from an INI file.
    pub fn load(path: &Path) -> EngineResult<Self> {
        let ini = Ini::load_from_file(path).map_err(|e| {
            EngineError::InvalidConfig(format!("failed to load {}: {}", path.display(), e))
        })?;

        let mut file = Self::default();

        if let Some(download) = ini.section(Some("download")) {
            file.chunk_size = parse_key(download.get("chunk_size"), path, "chunk_size")?;
            file.timeout_secs = parse_key(download.get("timeout"), path, "timeout")?;
            file.connections = parse_key(download.get("connections"), path, "connections")?;
        }

        if let Some(output) = ini.section(Some("output")) {
            file.output = output.get("path").map(PathBuf::from);
            file.sha256 = output.get("sha256").map(str::to_string);
        }

        if let Some(mirrors) = ini.section(Some("mirrors")) {
            file.mirrors = mirrors.iter().map(|(_, spec)| spec.to_string()).collect();
        }

        Ok(file)
    }
}

fn parse_key<T: std::str::FromStr>(
    value: Option<&str>,
    path: &Path,
    key: &str,
) -> EngineResult<Option<T>> {
    value
        .map(|raw| {
            raw.parse().map_err(|_| {
                EngineError::InvalidConfig(format!(
                    "invalid value {raw:?} for {key} in {}",
                    path.display()
                ))
            })
        })
        .transpose()
}
