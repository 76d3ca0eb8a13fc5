//! Ingest daemon: wires the pool economy, per-source normalizers, the
//! SCTE-35 latch, the frame synchronizer, and the supervisor into the
//! one-thread-per-stage pipeline this workspace's crates implement, then
//! drives it until asked to stop or until a fatal signal exits it.

mod demux;
mod pipeline;
mod scte_decode;

use std::net::SocketAddrV4;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use ts_config::IngestConfig;
use ts_signal::{SignalBus, SignalKind};
use ts_sync::FrameSynchronizer;
use ts_udp_input::{CountingSink, PackagerSink};

use pipeline::PoolSet;

/// Command-line flags. A `--config` TOML file supplies the full runtime
/// configuration; the flags below let the common source/output settings
/// be overridden (or supplied entirely) without a file on disk.
#[derive(Parser, Debug)]
#[command(name = "ingestd", about = "Live MPEG-TS ingest, frame sync, and packaging daemon")]
struct Cli {
    /// TOML configuration file.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Video source addresses, `IP:port`, up to 10. Multicast is
    /// auto-detected by first octet >= 224.
    #[arg(long = "vip", value_delimiter = ',')]
    video_sources: Vec<SocketAddrV4>,

    /// Audio source addresses, `IP:port`, up to 10.
    #[arg(long = "aip", value_delimiter = ',')]
    audio_sources: Vec<SocketAddrV4>,

    /// Network interface multicast joins bind on.
    #[arg(long)]
    interface: Option<String>,

    /// Segment length in seconds, 2..60.
    #[arg(long)]
    segment: Option<u32>,

    /// Window length in segments, 3..10.
    #[arg(long)]
    window: Option<u32>,

    /// Output manifest directory.
    #[arg(long)]
    manifest: Option<PathBuf>,

    #[arg(long)]
    hls: bool,

    #[arg(long)]
    dash: bool,

    /// Enable the SCTE-35 splice latch on the video path.
    #[arg(long)]
    scte35: bool,

    /// Number of configured video sources actively feeding the
    /// synchronizer.
    #[arg(long)]
    active_video_sources: Option<usize>,

    /// CDN/WebDAV base URL. Absent means packaged output is written to
    /// the manifest directory on local disk instead of uploaded.
    #[arg(long)]
    cdnserver: Option<String>,

    #[arg(long)]
    cdnusername: Option<String>,

    #[arg(long)]
    cdnpassword: Option<String>,
}

impl Cli {
    fn apply_to(&self, mut config: IngestConfig) -> IngestConfig {
        if !self.video_sources.is_empty() {
            config.sources.video_sources = self.video_sources.clone();
        }
        if !self.audio_sources.is_empty() {
            config.sources.audio_sources = self.audio_sources.clone();
        }
        if let Some(interface) = &self.interface {
            config.sources.interface = interface.clone();
        }
        if let Some(segment) = self.segment {
            config.packaging.segment_seconds = segment;
        }
        if let Some(window) = self.window {
            config.packaging.window_segments = window;
        }
        if let Some(manifest) = &self.manifest {
            config.packaging.manifest_dir = manifest.clone();
        }
        if self.hls {
            config.packaging.hls = true;
        }
        if self.dash {
            config.packaging.dash = true;
        }
        if self.scte35 {
            config.transcode.scte35 = true;
        }
        if let Some(active) = self.active_video_sources {
            config.active_video_sources = active;
        }
        if let Some(server) = &self.cdnserver {
            config.packaging.cdn_server = Some(server.clone());
        }
        if let Some(user) = &self.cdnusername {
            config.packaging.cdn_username = Some(user.clone());
        }
        if let Some(pass) = &self.cdnpassword {
            config.packaging.cdn_password = Some(pass.clone());
        }
        config
    }
}

/// Cadence (in supervisor poll iterations) at which pool and queue health
/// is logged — roughly every 500 iterations of a 10ms poll, i.e. ~5s.
const SUPERVISOR_POLL_INTERVAL: Duration = Duration::from_millis(10);
const SUPERVISOR_LOG_EVERY: u32 = 500;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let cli = Cli::parse();

    let base_config = match &cli.config {
        Some(path) => IngestConfig::load(path).with_context(|| format!("loading config from {}", path.display()))?,
        None => IngestConfig::default(),
    };
    let config = cli.apply_to(base_config);
    config.validate().context("invalid configuration")?;

    if config.sources.video_sources.is_empty() && config.sources.audio_sources.is_empty() {
        eprintln!("ingestd: at least one --vip or --aip source is required");
        std::process::exit(1);
    }

    info!(
        video_sources = config.sources.video_sources.len(),
        audio_sources = config.sources.audio_sources.len(),
        "starting ingest daemon"
    );

    run(config)
}

fn run(config: IngestConfig) -> Result<()> {
    let (signal_bus, signal_rx) = SignalBus::channel();
    let pools = Arc::new(PoolSet::new());
    let stop = Arc::new(AtomicBool::new(false));

    // Window capacities are sized well above `active_video_sources` so a
    // healthy pipeline never approaches the overflow-triggered restart;
    // the ratio to source count mirrors the "strictly more entries than
    // active_video_sources" release guard.
    let window_capacity = (config.active_video_sources + 1) * 64;
    let synchronizer = Arc::new(FrameSynchronizer::new(
        window_capacity,
        window_capacity,
        config.active_video_sources,
        signal_bus.clone(),
    ));

    // The HLS/DASH mux and CDN PUT are out of this repository's scope
    // (see the collaborator boundary in `ts-udp-input`); `CountingSink`
    // stands in for the real packager here. A production wiring would
    // swap it for the muxer's own `PackagerSink` impl, which would in
    // turn drive a `WebdavUploader` — `LocalFilesystemUploader` is that
    // trait's reference implementation, covered by its own unit test.
    let packager: Box<dyn PackagerSink> = Box::new(CountingSink::default());

    let mut handles = Vec::new();

    for (index, addr) in config.sources.video_sources.iter().enumerate() {
        let pools = pools.clone();
        let signal_bus = signal_bus.clone();
        let synchronizer = synchronizer.clone();
        let stop = stop.clone();
        let addr = *addr;
        let scte35_enabled = config.transcode.scte35;
        handles.push(std::thread::spawn(move || {
            pipeline::run_video_source(index as u32, addr, pools, signal_bus, synchronizer, scte35_enabled, stop);
        }));
    }

    for (index, addr) in config.sources.audio_sources.iter().enumerate() {
        let pools = pools.clone();
        let signal_bus = signal_bus.clone();
        let synchronizer = synchronizer.clone();
        let stop = stop.clone();
        let addr = *addr;
        handles.push(std::thread::spawn(move || {
            pipeline::run_audio_source(index as u32, addr, pools, signal_bus, synchronizer, stop);
        }));
    }

    {
        let synchronizer = synchronizer.clone();
        let stop = stop.clone();
        handles.push(std::thread::spawn(move || {
            pipeline::run_dispatcher(synchronizer, packager, stop);
        }));
    }

    {
        let pools = pools.clone();
        let signal_bus = signal_bus.clone();
        let stop = stop.clone();
        handles.push(std::thread::spawn(move || {
            run_supervisor(pools, signal_bus, stop);
        }));
    }

    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            info!("stop requested, draining pipeline");
            stop.store(true, Ordering::Relaxed);
        })
        .context("installing Ctrl-C handler")?;
    }

    // Main thread: the signal-bus observer. A fatal signal from any stage
    // terminates the process immediately, relying on an external
    // supervisor (container orchestrator) to restart it; Ctrl-C sets the
    // shared stop flag, which this loop notices and turns into a clean
    // drain-and-join.
    while !stop.load(Ordering::Relaxed) {
        match signal_rx.try_recv() {
            Some(signal) if signal.kind.is_fatal() => std::process::exit(0),
            Some(_) => {}
            None => std::thread::sleep(Duration::from_millis(20)),
        }
    }

    for handle in handles {
        let _ = handle.join();
    }
    Ok(())
}

fn run_supervisor(pools: Arc<PoolSet>, signal_bus: SignalBus, stop: Arc<AtomicBool>) {
    use ts_supervisor::Supervisor;

    let pool_handles = vec![
        pools.frame_headers.clone(),
        pools.compressed_video.clone(),
        pools.compressed_audio.clone(),
        pools.captions.clone(),
    ];
    let supervisor = match Supervisor::new(pool_handles, signal_bus.clone()) {
        Ok(s) => s,
        Err(e) => {
            signal_bus.emit(SignalKind::ErrorUnknown, e.to_string());
            std::process::exit(0);
        }
    };

    let mut iterations: u32 = 0;
    while !stop.load(Ordering::Relaxed) {
        iterations = iterations.wrapping_add(1);
        if iterations % SUPERVISOR_LOG_EVERY == 0 {
            supervisor.log_pool_health();
            for (name, unused, capacity) in pools.unused_counts() {
                tracing::debug!(pool = name, unused, capacity, "supervisor poll");
            }
        }
        std::thread::sleep(SUPERVISOR_POLL_INTERVAL);
    }
}
