//! Swarmfetch CLI - parallel ranged-GET downloader.
//!
//! Resolves settings in the order CLI argument > config file > default,
//! runs the download engine, and renders progress via indicatif.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::EnvFilter;

use swarmfetch::{
    ConfigFile, EngineConfig, EngineError, EngineResult, ProgressCallback, RangeDownloader,
    SourceConfig,
};

/// Default connections per mirror when neither CLI nor config file says.
const DEFAULT_CONNECTIONS: usize = 4;

#[derive(Parser)]
#[command(name = "swarmfetch", version = swarmfetch::VERSION)]
#[command(about = "Fetch one large file over many connections and mirrors")]
struct Cli {
    /// Mirror to fetch from, repeatable: host[:port]/path[=connections]
    #[arg(long = "mirror", value_name = "SPEC")]
    mirrors: Vec<String>,

    /// Output file path (defaults to the resource's file name)
    #[arg(long, short, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Connections per mirror, for mirrors without an explicit count
    #[arg(long, value_name = "N")]
    connections: Option<usize>,

    /// Chunk size in bytes
    #[arg(long, value_name = "BYTES")]
    chunk_size: Option<u64>,

    /// Socket timeout in seconds
    #[arg(long, value_name = "SECS")]
    timeout: Option<u64>,

    /// Expected SHA-256 of the output, verified after the download
    #[arg(long, value_name = "HEX")]
    sha256: Option<String>,

    /// INI config file with persisted defaults
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Suppress the progress bar
    #[arg(long)]
    quiet: bool,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> EngineResult<()> {
    let file = match &cli.config {
        Some(path) => ConfigFile::load(path)?,
        None => ConfigFile::default(),
    };

    let config = resolve_config(&cli, file)?;
    let output_path = config.output_path.clone();
    tracing::debug!(
        mirrors = config.sources.len(),
        slots = config.slot_count(),
        output = %output_path.display(),
        "configuration resolved"
    );

    let progress = if cli.quiet {
        None
    } else {
        Some(progress_callback())
    };

    let downloader = RangeDownloader::new(config);
    let report = downloader.run_with_progress(progress)?;

    let digest = swarmfetch::checksum::file_sha256(&output_path)?;
    let secs = report.elapsed.as_secs_f64();
    let rate = if secs > 0.0 {
        report.total_len as f64 / secs / (1024.0 * 1024.0)
    } else {
        0.0
    };

    println!(
        "Fetched {} bytes in {} chunks over {} connections ({:.1}s, {:.2} MiB/s)",
        report.total_len,
        report.chunk_count,
        report.worker_bytes.len(),
        secs,
        rate
    );
    println!("SHA-256: {digest}");

    Ok(())
}

/// Merge CLI arguments over config-file values over built-in defaults.
fn resolve_config(cli: &Cli, file: ConfigFile) -> EngineResult<EngineConfig> {
    let specs = if cli.mirrors.is_empty() {
        file.mirrors
    } else {
        cli.mirrors.clone()
    };
    if specs.is_empty() {
        return Err(EngineError::InvalidConfig(
            "no mirrors given; pass --mirror or a config file with a [mirrors] section"
                .to_string(),
        ));
    }

    let default_connections = cli
        .connections
        .or(file.connections)
        .unwrap_or(DEFAULT_CONNECTIONS);

    let sources = specs
        .iter()
        .map(|spec| SourceConfig::parse(spec, default_connections))
        .collect::<EngineResult<Vec<_>>>()?;

    let output = cli
        .output
        .clone()
        .or(file.output)
        .unwrap_or_else(|| derive_output_path(&sources[0].path));

    let mut config = EngineConfig::new(output);
    for source in sources {
        config = config.with_source(source);
    }
    if let Some(chunk_size) = cli.chunk_size.or(file.chunk_size) {
        config = config.with_chunk_size(chunk_size);
    }
    if let Some(secs) = cli.timeout.or(file.timeout_secs) {
        config = config.with_timeout(Duration::from_secs(secs));
    }
    if let Some(digest) = cli.sha256.clone().or(file.sha256) {
        config = config.with_expected_sha256(digest);
    }

    config.validate()?;
    Ok(config)
}

/// Last path segment of the resource, or a generic name for bare roots.
fn derive_output_path(resource_path: &str) -> PathBuf {
    let name = resource_path.rsplit('/').next().unwrap_or_default();
    if name.is_empty() {
        PathBuf::from("download.out")
    } else {
        PathBuf::from(name)
    }
}

/// A byte-count progress bar fed from the engine's telemetry samples.
///
/// The total length is unknown until the probe returns, so the bar tracks
/// cumulative bytes and throughput rather than a percentage.
fn progress_callback() -> ProgressCallback {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {bytes} received ({bytes_per_sec})")
            .expect("static progress template"),
    );

    Box::new(move |samples| {
        let total: u64 = samples.iter().map(|s| s.bytes).sum();
        bar.set_position(total);
    })
}
