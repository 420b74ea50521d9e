//! Swarmfetch - parallel ranged-GET download engine.
//!
//! Fetches a single large resource over HTTP by splitting it into fixed-size
//! byte ranges, pulling those ranges concurrently over multiple raw TCP
//! connections (optionally spread across mirror hosts), and reassembling them
//! into a byte-identical output file.
//!
//! # Architecture
//!
//! ```text
//! RangeDownloader (orchestrator)
//!         │
//!         ├── probe           length discovery (bytes=0-0, Content-Range)
//!         ├── ChunkScheduler  hands out each chunk index exactly once
//!         ├── ConnectionWorker × N
//!         │       └── Connection + wire codec (hand-rolled HTTP/1.1)
//!         ├── ReassemblyBuffer  in-order commits to the output file
//!         └── checksum        optional SHA-256 verification
//! ```
//!
//! Workers pull chunk indices from the scheduler until it is exhausted,
//! retrying failed chunks on fresh connections under a configurable policy.
//! The reassembly buffer accepts chunks in any arrival order and guarantees
//! the output file only ever grows by in-order appends.
//!
//! # Example
//!
//! ```no_run
//! use swarmfetch::{EngineConfig, RangeDownloader, SourceConfig};
//!
//! let config = EngineConfig::new("big.iso")
//!     .with_source(SourceConfig::new("mirror-a.example.net", "/pub/big.iso"))
//!     .with_source(SourceConfig::new("mirror-b.example.net", "/pub/big.iso"));
//!
//! let report = RangeDownloader::new(config).run()?;
//! println!("fetched {} bytes", report.total_len);
//! # Ok::<(), swarmfetch::EngineError>(())
//! ```

pub mod buffer;
pub mod checksum;
pub mod config;
pub mod conn;
pub mod error;
pub mod orchestrator;
pub mod probe;
pub mod progress;
pub mod scheduler;
pub mod wire;
pub mod worker;

pub use config::{Backoff, ConfigFile, EngineConfig, RetryPolicy, SourceConfig};
pub use error::{EngineError, EngineResult};
pub use orchestrator::{DownloadReport, RangeDownloader};
pub use progress::{ProgressCallback, WorkerSample};

/// Crate version, surfaced for CLI banners.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
