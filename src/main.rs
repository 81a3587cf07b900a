// src/main.rs

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::Context;
use crossbeam::channel::RecvTimeoutError;
use log::{error, info, warn};

use airlift_recorder::api::ApiServer;
use airlift_recorder::config::Config;
use airlift_recorder::recorder::{FfmpegEncoder, Recorder, RecorderEvent};
use airlift_recorder::source::system_source;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    // ------------------------------------------------------------
    // Config
    // ------------------------------------------------------------
    let cfg_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".into());

    let cfg = Config::load(&cfg_path)?;
    info!("[airlift] loaded {}", cfg_path);

    // ------------------------------------------------------------
    // Graceful shutdown
    // ------------------------------------------------------------
    let running = Arc::new(AtomicBool::new(true));
    {
        let r = running.clone();
        ctrlc::set_handler(move || {
            info!("[airlift] shutdown requested");
            r.store(false, Ordering::SeqCst);
        })?;
    }

    // ------------------------------------------------------------
    // Recorder
    // ------------------------------------------------------------
    let encoder = Arc::new(FfmpegEncoder::new(cfg.encoder.ffmpeg_path.clone()));
    let recorder = Arc::new(
        Recorder::new(cfg.recorder_config(), system_source(), encoder)
            .context("initialising recorder")?,
    );
    let events = recorder.events();

    let mut api = match cfg.control.http_bind.as_deref() {
        Some(bind) => Some(ApiServer::start(bind, recorder.clone())?),
        None => None,
    };

    recorder.start().context("starting capture")?;

    // ------------------------------------------------------------
    // Main loop
    // ------------------------------------------------------------
    info!("[airlift] recording – Ctrl+C to stop");

    let mut halted: Option<String> = None;
    while running.load(Ordering::Relaxed) {
        match events.recv_timeout(Duration::from_millis(200)) {
            Ok(RecorderEvent::CaptureHalted { error }) => {
                error!("[airlift] capture halted: {}", error);
                halted = Some(error);
                break;
            }
            Ok(RecorderEvent::SegmentFinalized { artifact, .. }) => {
                info!("[airlift] segment ready: {:?}", artifact);
            }
            Ok(RecorderEvent::SegmentFailed { segment, error: err }) => {
                error!("[airlift] segment {:?} lost: {}", segment.path, err);
            }
            Ok(RecorderEvent::EncodeFailed { segment, detail }) => {
                warn!("[airlift] encoding {:?} failed: {}", segment.path, detail);
            }
            Ok(_) => {}
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // ------------------------------------------------------------
    // Shutdown
    // ------------------------------------------------------------
    info!("[airlift] shutting down…");
    if let Some(api) = api.as_mut() {
        api.shutdown();
    }
    recorder.shutdown().context("finalising last segment")?;

    if let Some(err) = halted {
        anyhow::bail!("capture halted: {}", err);
    }
    Ok(())
}
