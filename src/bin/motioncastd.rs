//! motioncastd - motion-tracking MJPEG camera server
//!
//! This daemon:
//! 1. Reads an MJPEG stream from the camera pipeline, stdin, a file, or a recording
//! 2. Decodes frames on a dedicated thread and publishes them raw
//! 3. Runs background-subtraction motion tracking on a worker thread
//! 4. Serves raw, annotated, mask and background streams over HTTP
//! 5. Optionally records every decoded frame to disk

use anyhow::{Context, Result};
use clap::Parser;
use crossbeam_channel::{bounded, select};
use std::path::PathBuf;
use std::thread;

use motioncast::{
    config::{CamConfig, Overrides},
    ingest::{FrameSource, SourceConfig},
    pipeline::{run_decoder, MotionWorker},
    server::{ServerConfig, StreamServer},
    Broadcaster, Recorder, Stats, StatsCollector,
};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Motion-tracking MJPEG camera server",
    long_about = None
)]
struct Args {
    /// TOML configuration file.
    #[arg(long, env = "MOTIONCAST_CONFIG")]
    config: Option<PathBuf>,

    /// Video device for the capture pipeline.
    #[arg(long)]
    dev: Option<String>,

    /// Capture frame rate.
    #[arg(long)]
    fps: Option<u32>,

    /// Capture width in pixels.
    #[arg(long = "width", short = 'w')]
    width: Option<u32>,

    /// Capture height in pixels.
    #[arg(long = "height", short = 'H')]
    height: Option<u32>,

    /// HTTP listen address (`:PORT` binds every interface).
    #[arg(long)]
    http: Option<String>,

    /// JPEG quality for capture and streaming (1-100).
    #[arg(long)]
    quality: Option<u8>,

    /// Frame source: `-` for stdin, an MJPEG file or FIFO, or a recording directory.
    #[arg(long)]
    src: Option<String>,

    /// Record every decoded frame into this directory.
    #[arg(long)]
    rec: Option<PathBuf>,

    /// Log a stats report at info level.
    #[arg(long, short = 'v', num_args = 0..=1, default_missing_value = "true")]
    verbose: Option<bool>,

    /// Motion threshold on the normalized color distance.
    #[arg(long)]
    threshold: Option<f32>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            device: self.dev.clone(),
            fps: self.fps,
            width: self.width,
            height: self.height,
            http_addr: self.http.clone(),
            quality: self.quality,
            source: self.src.clone(),
            record_dir: self.rec.clone(),
            verbose: self.verbose,
            threshold: self.threshold,
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut cfg = CamConfig::load(args.config.as_deref())?;
    cfg.apply_overrides(args.overrides());
    cfg.validate()?;

    let stats = Stats::new();
    let broadcaster = Broadcaster::new(stats.clone());

    let source_cfg = SourceConfig::from_arg(cfg.source.as_deref(), cfg.capture());
    let mut source = FrameSource::open(&source_cfg, stats.clone())?;
    let recorder = cfg
        .record_dir
        .as_ref()
        .map(|dir| Recorder::start(dir, cfg.quality, stats.clone()))
        .transpose()?;

    let server = StreamServer::new(
        ServerConfig {
            addr: cfg.http_addr.clone(),
            quality: cfg.quality,
            write_timeout: cfg.write_timeout,
        },
        broadcaster.clone(),
        stats.clone(),
    )
    .spawn()?;
    log::info!("motioncastd listening on {}", server.addr);

    let (handoff_tx, handoff_rx) = bounded(0);
    let worker = MotionWorker::new(cfg.motion.clone(), broadcaster.clone(), stats.clone());
    let worker_join = thread::Builder::new()
        .name("motion".to_string())
        .spawn(move || worker.run(handoff_rx))
        .context("spawn motion worker")?;

    let (done_tx, done_rx) = bounded(1);
    let decoder_broadcaster = broadcaster.clone();
    let decoder_stats = stats.clone();
    let mut collector = StatsCollector::new(stats.clone(), cfg.stats_interval, cfg.verbose);
    thread::Builder::new()
        .name("decoder".to_string())
        .spawn(move || {
            let result = run_decoder(
                &mut source,
                handoff_tx,
                &decoder_broadcaster,
                &decoder_stats,
                recorder.as_ref(),
                || {
                    collector.tick();
                },
            );
            if let Some(recorder) = recorder {
                if let Err(err) = recorder.finish() {
                    log::warn!("recording incomplete: {:#}", err);
                }
            }
            let _ = done_tx.send(result);
        })
        .context("spawn decoder thread")?;

    let (stop_tx, stop_rx) = bounded(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("set Ctrl-C handler")?;

    select! {
        recv(done_rx) -> result => {
            let result = result.context("decoder thread exited without a result")?;
            if let Err(err) = &result {
                log::error!("decoder failed: {:#}", err);
            }
            if worker_join.join().is_err() {
                log::warn!("motion worker panicked");
            }
            server.stop()?;
            result
        }
        recv(stop_rx) -> _ => {
            log::info!("shutdown signal received, stopping stream server...");
            server.stop()?;
            Ok(())
        }
    }
}
