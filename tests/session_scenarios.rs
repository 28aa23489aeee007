use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};

use parkwatch::config::ParkwatchConfig;
use parkwatch::{
    run_configured_session, AlertEmitter, BoundingBox, CancelToken, ChannelSink, Detection,
    DetectorBackend, Frame, FrameSource, MemorySource, ObjectClass, OccupancyTracker,
    ScriptedBackend, Session, SessionEnd, SessionOutcome, SpaceAvailable, SpaceReading,
    TrackerConfig,
};

/// Memory source that records when it is released.
struct WatchedSource {
    inner: MemorySource,
    released: Arc<AtomicBool>,
}

impl FrameSource for WatchedSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        self.inner.next_frame()
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
        self.inner.release();
    }

    fn frames_captured(&self) -> u64 {
        self.inner.frames_captured()
    }
}

fn frames(count: u64) -> Vec<Frame> {
    (0..count)
        .map(|index| Frame::new(vec![0; 4 * 4 * 3], 4, 4, index).unwrap())
        .collect()
}

fn car_at(left: f32) -> Detection {
    Detection::new(
        BoundingBox::new(0.0, left, 100.0, left + 100.0).unwrap(),
        ObjectClass::Car,
        0.9,
    )
}

fn full_lot() -> Vec<Detection> {
    vec![car_at(0.0), car_at(200.0)]
}

/// Space 1's car has moved 90px over: IoU with its baseline box is ~0.05.
fn space_one_free() -> Vec<Detection> {
    vec![car_at(0.0), car_at(290.0)]
}

/// Observation side of a scripted session: release flag and alert channel.
struct Watch {
    released: Arc<AtomicBool>,
    alerts: std::sync::mpsc::Receiver<SpaceAvailable>,
}

fn scripted_session(detector: ScriptedBackend) -> (Session, Watch) {
    scripted_session_with(detector, TrackerConfig::default())
}

fn scripted_session_with(detector: ScriptedBackend, config: TrackerConfig) -> (Session, Watch) {
    let (sink, alerts) = ChannelSink::new();
    let tracker = OccupancyTracker::new(config, AlertEmitter::new().with_sink(sink));
    let watch = Watch {
        released: Arc::new(AtomicBool::new(false)),
        alerts,
    };
    (Session::new("scenario", Box::new(detector), tracker), watch)
}

fn run_frames(
    session: Session,
    watch: &Watch,
    count: u64,
    cancel: &CancelToken,
) -> Result<SessionOutcome> {
    let released = Arc::clone(&watch.released);
    session.run(
        move || {
            Ok(WatchedSource {
                inner: MemorySource::new(frames(count)),
                released,
            })
        },
        cancel,
    )
}

#[test]
fn scenario_a_alert_fires_on_frame_21() -> Result<()> {
    let detector = ScriptedBackend::new()
        .then(full_lot())
        .then_repeat(full_lot(), 10)
        .otherwise(space_one_free());
    let (session, rest) = scripted_session(detector);
    let outcome = run_frames(session, &rest, 100, &CancelToken::new())?;

    assert_eq!(outcome.end, SessionEnd::Alerted);
    assert_eq!(outcome.spaces, 2);
    assert_eq!(outcome.frames_processed, 22);
    assert_eq!(outcome.free_spaces, 1);
    let alert = outcome.alert.expect("alert");
    assert_eq!(alert.frame_index, 21);
    assert_eq!(alert.space_index, 1);
    assert_eq!(alert.consecutive_free_frames, 11);

    assert!(rest.released.load(Ordering::SeqCst));
    assert_eq!(rest.alerts.try_iter().count(), 1);
    Ok(())
}

#[test]
fn scenario_b_empty_baseline_runs_to_exhaustion() -> Result<()> {
    let detector = ScriptedBackend::new()
        .then(vec![Detection::new(
            BoundingBox::new(0.0, 0.0, 50.0, 20.0)?,
            ObjectClass::Person,
            0.9,
        )])
        .otherwise(full_lot());
    let (session, rest) = scripted_session(detector);
    let outcome = run_frames(session, &rest, 1001, &CancelToken::new())?;

    assert_eq!(outcome.end, SessionEnd::Exhausted);
    assert_eq!(outcome.frames_processed, 1001);
    assert!(outcome.empty_baseline);
    assert_eq!(outcome.spaces, 0);
    assert!(outcome.alert.is_none());
    assert_eq!(outcome.free_spaces, 0);
    assert!(rest.released.load(Ordering::SeqCst));
    assert!(rest.alerts.try_recv().is_err());
    Ok(())
}

#[test]
fn scenario_c_detector_failure_skips_one_frame() -> Result<()> {
    let detector = ScriptedBackend::new()
        .then_repeat(full_lot(), 4)
        .then_fail("inference timeout")
        .otherwise(full_lot());
    let (session, rest) = scripted_session(detector);
    let readings: Arc<Mutex<Vec<(u64, bool)>>> = Arc::default();
    let sink = Arc::clone(&readings);
    let session = session.with_observer(move |frame: u64, reading: &SpaceReading| {
        sink.lock().unwrap().push((frame, reading.occupied));
    });
    let outcome = run_frames(session, &rest, 20, &CancelToken::new())?;

    assert_eq!(outcome.end, SessionEnd::Exhausted);
    assert_eq!(outcome.frames_processed, 20);
    assert_eq!(outcome.detector_failures, 1);
    assert_eq!(outcome.spaces, 2);
    assert!(outcome.alert.is_none());
    assert!(rest.released.load(Ordering::SeqCst));

    // The failed frame reads every space free; the next frame is full again.
    let readings = readings.lock().unwrap();
    let occupied_on = |frame: u64| -> Vec<bool> {
        readings
            .iter()
            .filter(|(f, _)| *f == frame)
            .map(|(_, occupied)| *occupied)
            .collect()
    };
    assert_eq!(occupied_on(4), vec![false, false]);
    assert_eq!(occupied_on(5), vec![true, true]);
    assert_eq!(readings.len(), 19 * 2);
    Ok(())
}

#[test]
fn full_frame_after_failure_resets_the_counter() -> Result<()> {
    // Debounce of 1: the alert needs two free frames in a row. Frame 1 fails
    // and counts as free, frame 2 is full and must reset, so the alert
    // lands on frame 4 rather than frame 2.
    let detector = ScriptedBackend::new()
        .then(full_lot())
        .then_fail("inference timeout")
        .then(full_lot())
        .otherwise(space_one_free());
    let config = TrackerConfig {
        debounce_frames: 1,
        ..TrackerConfig::default()
    };
    let (session, rest) = scripted_session_with(detector, config);
    let outcome = run_frames(session, &rest, 10, &CancelToken::new())?;

    assert_eq!(outcome.end, SessionEnd::Alerted);
    assert_eq!(outcome.detector_failures, 1);
    let alert = outcome.alert.expect("alert");
    assert_eq!(alert.frame_index, 4);
    assert_eq!(alert.consecutive_free_frames, 2);
    assert_eq!(alert.space_index, 1);
    Ok(())
}

#[test]
fn repeated_failures_count_toward_debounce() -> Result<()> {
    let detector = ScriptedBackend::new()
        .then(full_lot())
        .then_fail("a")
        .then_fail("b")
        .then_repeat(space_one_free(), 9);
    let (session, rest) = scripted_session(detector);
    let outcome = run_frames(session, &rest, 50, &CancelToken::new())?;

    assert_eq!(outcome.end, SessionEnd::Alerted);
    assert_eq!(outcome.detector_failures, 2);
    let alert = outcome.alert.expect("alert");
    assert_eq!(alert.frame_index, 11);
    // Failed frames see no vehicles, so both spaces read free there; the
    // alerting frame itself only has space 1 free.
    assert_eq!(alert.free_spaces, 1);
    Ok(())
}

/// Detector that cancels the session after a fixed number of frames.
struct CancellingDetector {
    cancel: CancelToken,
    after: usize,
    calls: Arc<AtomicUsize>,
}

impl DetectorBackend for CancellingDetector {
    fn name(&self) -> &'static str {
        "cancelling"
    }

    fn detect(&mut self, _pixels: &[u8], _width: u32, _height: u32) -> Result<Vec<Detection>> {
        let calls = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if calls == self.after {
            self.cancel.cancel();
        }
        Ok(full_lot())
    }
}

#[test]
fn cancellation_is_honored_between_frames_and_releases_source() -> Result<()> {
    let cancel = CancelToken::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let detector = CancellingDetector {
        cancel: cancel.clone(),
        after: 7,
        calls: Arc::clone(&calls),
    };
    let session = Session::new(
        "cancel",
        Box::new(detector),
        OccupancyTracker::new(TrackerConfig::default(), AlertEmitter::new()),
    );
    let released = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&released);

    let outcome = session.run(
        move || {
            Ok(WatchedSource {
                inner: MemorySource::new(frames(100)),
                released: flag,
            })
        },
        &cancel,
    )?;

    assert_eq!(outcome.end, SessionEnd::Cancelled);
    assert_eq!(outcome.frames_processed, 7);
    assert_eq!(calls.load(Ordering::SeqCst), 7);
    assert!(released.load(Ordering::SeqCst));
    Ok(())
}

/// Source whose reads fail after the first frame.
struct BrokenSource {
    served: bool,
    released: Arc<AtomicBool>,
}

impl FrameSource for BrokenSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.served {
            return Err(anyhow!("corrupt packet"));
        }
        self.served = true;
        Ok(Some(Frame::new(vec![0; 12], 2, 2, 0)?))
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }

    fn frames_captured(&self) -> u64 {
        u64::from(self.served)
    }
}

#[test]
fn read_error_propagates_after_release() {
    let (session, watch) = scripted_session(ScriptedBackend::new().otherwise(full_lot()));
    let released = Arc::clone(&watch.released);
    let result = session.run(
        move || {
            Ok(BrokenSource {
                served: false,
                released,
            })
        },
        &CancelToken::new(),
    );
    let err = result.unwrap_err();
    assert!(format!("{err:#}").contains("corrupt packet"));
    assert!(watch.released.load(Ordering::SeqCst));
    assert!(watch.alerts.try_recv().is_err());
}

#[test]
fn configured_stub_session_alerts_when_car_leaves() -> Result<()> {
    let mut config = ParkwatchConfig::load_from(None)?;
    config.source.path = "stub://lot?frames=120&width=320&height=240".to_string();
    config.alert.mqtt = None;

    let outcome = run_configured_session(&config, &CancelToken::new())?;

    assert_eq!(outcome.end, SessionEnd::Alerted);
    assert_eq!(outcome.spaces, 8);
    assert_eq!(outcome.detector_failures, 0);
    let alert = outcome.alert.expect("alert");
    assert_eq!(alert.space_index, 0);
    assert_eq!(alert.frame_index, 40);
    assert_eq!(outcome.free_spaces, 1);
    Ok(())
}

#[test]
fn configured_session_with_full_lot_exhausts() -> Result<()> {
    let mut config = ParkwatchConfig::load_from(None)?;
    config.source.path = "stub://lot?frames=60".to_string();
    config.detector.stub.vacate_after = None;

    let outcome = run_configured_session(&config, &CancelToken::new())?;

    assert_eq!(outcome.end, SessionEnd::Exhausted);
    assert_eq!(outcome.frames_processed, 60);
    assert_eq!(outcome.free_spaces, 0);
    Ok(())
}

#[test]
fn unopenable_source_is_fatal() {
    let mut config = ParkwatchConfig::load_from(None).unwrap();
    config.source.path = "rtsp://camera/stream".to_string();
    assert!(run_configured_session(&config, &CancelToken::new()).is_err());
}
