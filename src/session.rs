//! Session driver: one source, one detector, one tracker, run to completion.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::alert::{AlertEmitter, LogSink, MqttSink, SpaceAvailable};
use crate::config::ParkwatchConfig;
use crate::detect::{BackendRegistry, DetectorBackend};
use crate::ingest::{FileConfig, FileSource, FrameSource};
use crate::tracker::{FrameObservation, FrameOutcome, OccupancyTracker, SpaceObserver};

/// Cooperative stop flag, checked between frames.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Owns an open source and releases it when dropped.
pub struct SourceGuard<S: FrameSource> {
    source: S,
}

impl<S: FrameSource> SourceGuard<S> {
    pub fn acquire<F>(open: F) -> Result<Self>
    where
        F: FnOnce() -> Result<S>,
    {
        Ok(Self { source: open()? })
    }
}

impl<S: FrameSource> Deref for SourceGuard<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.source
    }
}

impl<S: FrameSource> DerefMut for SourceGuard<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.source
    }
}

impl<S: FrameSource> Drop for SourceGuard<S> {
    fn drop(&mut self) {
        self.source.release();
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionEnd {
    Exhausted,
    Alerted,
    Cancelled,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SessionOutcome {
    pub end: SessionEnd,
    pub frames_processed: u64,
    pub detector_failures: u64,
    /// Parking spaces in the baseline (0 when no baseline was captured).
    pub spaces: usize,
    pub empty_baseline: bool,
    pub alert: Option<SpaceAvailable>,
    /// Free spaces on the alerting frame, 0 without an alert.
    pub free_spaces: usize,
}

pub struct Session {
    label: String,
    detector: Box<dyn DetectorBackend>,
    tracker: OccupancyTracker,
}

impl Session {
    pub fn new(label: impl Into<String>, detector: Box<dyn DetectorBackend>, tracker: OccupancyTracker) -> Self {
        Self {
            label: label.into(),
            detector,
            tracker,
        }
    }

    pub fn with_observer<O: SpaceObserver + 'static>(mut self, observer: O) -> Self {
        self.tracker = self.tracker.with_observer(observer);
        self
    }

    /// Open the source, feed every frame through detector and tracker, and
    /// stop on exhaustion, alert or cancellation.
    ///
    /// The source is released before this returns, on every path.
    pub fn run<S, F>(mut self, open: F, cancel: &CancelToken) -> Result<SessionOutcome>
    where
        S: FrameSource,
        F: FnOnce() -> Result<S>,
    {
        let mut source = SourceGuard::acquire(open)
            .with_context(|| format!("session {}: failed to open source", self.label))?;
        log::info!(
            "session {}: source open, detector {}",
            self.label,
            self.detector.name()
        );

        let mut frames_processed = 0u64;
        let mut detector_failures = 0u64;
        let end = loop {
            if cancel.is_cancelled() {
                break SessionEnd::Cancelled;
            }
            let frame = source
                .next_frame()
                .with_context(|| format!("session {}: failed to read frame", self.label))?;
            let Some(frame) = frame else {
                break SessionEnd::Exhausted;
            };

            let observation = match self.detector.detect(frame.pixels(), frame.width, frame.height) {
                Ok(detections) => FrameObservation::Detected(detections),
                Err(err) => {
                    detector_failures += 1;
                    log::warn!(
                        "session {}: detector failed on frame {}: {:#}",
                        self.label,
                        frame.index,
                        err
                    );
                    FrameObservation::Skipped
                }
            };
            frames_processed += 1;

            if let FrameOutcome::Alerted(_) = self.tracker.update(frame.index, observation) {
                break SessionEnd::Alerted;
            }
        };
        drop(source);

        let state = self.tracker.state();
        let alert = self.tracker.emitter().fired().cloned();
        let outcome = SessionOutcome {
            end,
            frames_processed,
            detector_failures,
            spaces: state.baseline().map_or(0, |b| b.len()),
            empty_baseline: state.empty_baseline(),
            free_spaces: alert.as_ref().map_or(0, |a| a.free_spaces),
            alert,
        };
        log::info!(
            "session {}: ended ({:?}) after {} frames, {} detector failures",
            self.label,
            outcome.end,
            outcome.frames_processed,
            outcome.detector_failures
        );
        Ok(outcome)
    }
}

/// Build a session from configuration: registry-selected detector, log sink
/// plus the MQTT sink when a broker is configured.
pub fn build_session(config: &ParkwatchConfig) -> Result<Session> {
    let registry = BackendRegistry::from_settings(&config.detector, &config.weights)?;
    let detector = registry.create_default()?;

    let mut emitter = AlertEmitter::new().with_sink(LogSink);
    if let Some(mqtt) = config.alert.mqtt.as_ref() {
        match MqttSink::connect(mqtt) {
            Ok(sink) => emitter.add_sink(Box::new(sink)),
            Err(err) => log::warn!("mqtt alerts disabled: {:#}", err),
        }
    }

    let tracker = OccupancyTracker::new(config.tracker, emitter);
    Ok(Session::new(config.source.path.clone(), detector, tracker))
}

pub fn open_configured_source(config: &ParkwatchConfig) -> Result<FileSource> {
    FileSource::open(FileConfig {
        path: config.source.path.clone(),
        frame_stride: config.source.frame_stride,
    })
}

/// One full session over the configured source.
pub fn run_configured_session(config: &ParkwatchConfig, cancel: &CancelToken) -> Result<SessionOutcome> {
    build_session(config)?.run(|| open_configured_source(config), cancel)
}

/// Run independent sessions on their own threads and collect the results
/// in input order.
pub fn run_parallel<J>(jobs: Vec<J>, cancel: &CancelToken) -> Vec<Result<SessionOutcome>>
where
    J: FnOnce(&CancelToken) -> Result<SessionOutcome> + Send,
{
    std::thread::scope(|scope| {
        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| scope.spawn(move || job(cancel)))
            .collect();
        handles
            .into_iter()
            .map(|handle| {
                handle
                    .join()
                    .unwrap_or_else(|_| Err(anyhow!("session thread panicked")))
            })
            .collect()
    })
}
