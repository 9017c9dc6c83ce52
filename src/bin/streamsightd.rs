//! streamsightd - live-stream detection daemon
//!
//! This daemon:
//! 1. Builds the detection graph for the configured ingest transport
//! 2. Resolves sub-streams as the ingest reveals them (video only)
//! 3. Provisions SRTP key material on demand for encrypted ingest
//! 4. Samples per-frame detection metadata between inference and render
//! 5. Drives the graph through its run states until stream end, failure,
//!    or operator interrupt

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use streamsight::{
    Config, GraphSpec, IngestTransport, KeyProvider, LifecycleController, MetadataSampler,
    PipelineEvent, RunOutcome,
};

#[derive(Debug, Parser)]
#[command(name = "streamsightd", about = "Live-stream object detection daemon")]
struct Cli {
    /// JSON config file.
    #[arg(long, env = "STREAMSIGHT_CONFIG")]
    config: Option<PathBuf>,

    /// RTMP source URL (selects the pull transport).
    #[arg(long)]
    source: Option<String>,

    /// Local UDP port for encrypted SRTP push (selects the listen transport).
    #[arg(long, conflicts_with = "source")]
    listen: Option<u16>,

    /// Emit a detection summary every Nth frame.
    #[arg(long)]
    cadence: Option<u64>,

    /// Inference engine config artifact (generated if absent).
    #[arg(long)]
    model_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut cfg = Config::load_from(cli.config.as_deref())?;
    if let Some(url) = cli.source {
        cfg.ingest.transport = IngestTransport::RtmpPull { url };
    }
    if let Some(port) = cli.listen {
        let payload_type = match cfg.ingest.transport {
            IngestTransport::SrtpListen { payload_type, .. } => payload_type,
            IngestTransport::RtmpPull { .. } => 96,
        };
        cfg.ingest.transport = IngestTransport::SrtpListen { port, payload_type };
    }
    if let Some(cadence) = cli.cadence {
        cfg.sampler.cadence = cadence;
    }
    if let Some(path) = cli.model_config {
        cfg.infer.config_path = path;
    }
    cfg.validate()?;

    streamsight::model::ensure_model_config(&cfg.infer.config_path)?;
    let keys = Arc::new(KeyProvider::from_entries(&cfg.keys)?);
    let sampler = MetadataSampler::new(cfg.sampler.cadence);

    let (events, inbox) = mpsc::channel();
    let interrupt = events.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt.send(PipelineEvent::Interrupt);
    })?;

    match &cfg.ingest.transport {
        IngestTransport::RtmpPull { url } => log::info!("ingest: rtmp pull from {}", url),
        IngestTransport::SrtpListen { port, .. } => {
            log::info!("ingest: srtp listen on udp port {}", port)
        }
    }
    log::info!(
        "batcher {}x{} batch={}, sampling every {} frames",
        cfg.batcher.width,
        cfg.batcher.height,
        cfg.batcher.batch_size,
        cfg.sampler.cadence
    );

    let spec = GraphSpec::detection_pipeline(&cfg);
    let mut controller = LifecycleController::new(inbox);
    let outcome = run_pipeline(&spec, keys, sampler, events, &mut controller)?;

    match outcome {
        RunOutcome::CleanStop => {
            log::info!("pipeline stopped cleanly");
            Ok(())
        }
        RunOutcome::Failed { reason } => {
            log::error!("pipeline failed: {}", reason);
            std::process::exit(1);
        }
    }
}

#[cfg(feature = "runtime-gstreamer")]
fn run_pipeline(
    spec: &GraphSpec,
    keys: Arc<KeyProvider>,
    sampler: MetadataSampler,
    events: streamsight::EventSender,
    controller: &mut LifecycleController,
) -> Result<RunOutcome> {
    let mut runtime = streamsight::runtime::GstRuntime::new(spec, keys, sampler, events)?;
    controller.run(&mut runtime)
}

#[cfg(not(feature = "runtime-gstreamer"))]
fn run_pipeline(
    _spec: &GraphSpec,
    _keys: Arc<KeyProvider>,
    _sampler: MetadataSampler,
    _events: streamsight::EventSender,
    _controller: &mut LifecycleController,
) -> Result<RunOutcome> {
    anyhow::bail!("streamsightd requires the runtime-gstreamer feature")
}
