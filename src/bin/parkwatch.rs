//! parkwatch - watch one or more video sources until a parking space frees up
//!
//! Each `--source` runs as an independent session on its own thread. The
//! process prints a JSON summary per source and exits once every session has
//! ended (source exhausted, alert emitted, or Ctrl-C).

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use parkwatch::session::{build_session, open_configured_source};
use parkwatch::{run_parallel, CancelToken, ParkwatchConfig, SessionOutcome, SpaceReading};

#[derive(Parser, Debug)]
#[command(author, version, about = "Alert when a parking space becomes available")]
struct Args {
    /// JSON config file.
    #[arg(long, env = "PARKWATCH_CONFIG")]
    config: Option<PathBuf>,

    /// Video source (local file or stub:// lot). Repeat to watch several in parallel.
    #[arg(long = "source")]
    sources: Vec<String>,

    /// Minimum IoU for a parking space to count as occupied.
    #[arg(long)]
    iou_threshold: Option<f32>,

    /// Alert once a space stays free for more than this many frames.
    #[arg(long)]
    debounce_frames: Option<u32>,

    /// Detector backend name (stub, tract).
    #[arg(long)]
    detector: Option<String>,

    /// Keep every N-th decoded frame.
    #[arg(long)]
    frame_stride: Option<u32>,

    /// Log every space's IoU and occupancy on every frame.
    #[arg(long)]
    overlay_log: bool,
}

#[derive(Serialize)]
struct SourceSummary {
    source: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    outcome: Option<SessionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = ParkwatchConfig::load_from(args.config.as_deref())?;
    if let Some(threshold) = args.iou_threshold {
        config.tracker.iou_threshold = threshold;
    }
    if let Some(frames) = args.debounce_frames {
        config.tracker.debounce_frames = frames;
    }
    if let Some(detector) = args.detector.clone() {
        config.detector.backend = detector;
    }
    if let Some(stride) = args.frame_stride {
        config.source.frame_stride = stride;
    }
    config.validate()?;

    let sources = if args.sources.is_empty() {
        vec![config.source.path.clone()]
    } else {
        args.sources.clone()
    };

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        log::info!("shutdown signal received, stopping sessions...");
        handler_token.cancel();
    })
    .context("error setting Ctrl-C handler")?;

    let overlay_log = args.overlay_log;
    let jobs: Vec<_> = sources
        .iter()
        .map(|source| {
            let mut session_config = config.clone();
            session_config.source.path = source.clone();
            move |cancel: &CancelToken| {
                let mut session = build_session(&session_config)?;
                if overlay_log {
                    let label = session_config.source.path.clone();
                    session = session.with_observer(move |frame: u64, reading: &SpaceReading| {
                        log::info!(
                            "{} frame {} space #{} [{:.0},{:.0},{:.0},{:.0}] iou {:.3} {}",
                            label,
                            frame,
                            reading.index,
                            reading.space.top(),
                            reading.space.left(),
                            reading.space.bottom(),
                            reading.space.right(),
                            reading.max_iou,
                            if reading.occupied { "occupied" } else { "free" }
                        );
                    });
                }
                session.run(|| open_configured_source(&session_config), cancel)
            }
        })
        .collect();

    let results = run_parallel(jobs, &cancel);
    let failures = results.iter().filter(|r| r.is_err()).count();
    let summaries: Vec<SourceSummary> = sources
        .into_iter()
        .zip(results)
        .map(|(source, result)| match result {
            Ok(outcome) => SourceSummary {
                source,
                outcome: Some(outcome),
                error: None,
            },
            Err(err) => {
                log::error!("session {} failed: {:#}", source, err);
                SourceSummary {
                    source,
                    outcome: None,
                    error: Some(format!("{:#}", err)),
                }
            }
        })
        .collect();
    println!("{}", serde_json::to_string_pretty(&summaries)?);

    if failures > 0 {
        return Err(anyhow!(
            "{} of {} sessions failed",
            failures,
            summaries.len()
        ));
    }
    Ok(())
}
