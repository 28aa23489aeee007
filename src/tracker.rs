//! Occupancy state machine.
//!
//! The first frame with a detector result fixes the set of parking spaces
//! (the baseline). Every later frame compares the current vehicle boxes
//! against that baseline and counts how many frames in a row at least one
//! space looked free. Once the count passes the debounce window the
//! tracker emits a single alert and stops evaluating.

use anyhow::{anyhow, Result};
use serde::Serialize;

use crate::alert::{AlertEmitter, SpaceAvailable};
use crate::detect::Detection;
use crate::filter::vehicle_boxes;
use crate::geometry::BoundingBox;
use crate::overlap::compute_overlaps;

pub const DEFAULT_IOU_THRESHOLD: f32 = 0.15;
pub const DEFAULT_DEBOUNCE_FRAMES: u32 = 10;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct TrackerConfig {
    /// A space with max IoU at or above this value is occupied.
    pub iou_threshold: f32,
    /// Alert once the free-frame counter exceeds this value.
    pub debounce_frames: u32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: DEFAULT_IOU_THRESHOLD,
            debounce_frames: DEFAULT_DEBOUNCE_FRAMES,
        }
    }
}

impl TrackerConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.iou_threshold.is_finite()
            || self.iou_threshold <= 0.0
            || self.iou_threshold > 1.0
        {
            return Err(anyhow!(
                "iou threshold must be within (0, 1], got {}",
                self.iou_threshold
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerPhase {
    Uninitialized,
    Tracking,
    Alerted,
}

#[derive(Clone, Debug, Default)]
pub struct TrackerState {
    baseline: Option<Vec<BoundingBox>>,
    consecutive_free_frames: u32,
    alerted: bool,
}

impl TrackerState {
    pub fn phase(&self) -> TrackerPhase {
        match (&self.baseline, self.alerted) {
            (_, true) => TrackerPhase::Alerted,
            (Some(_), false) => TrackerPhase::Tracking,
            (None, false) => TrackerPhase::Uninitialized,
        }
    }

    pub fn baseline(&self) -> Option<&[BoundingBox]> {
        self.baseline.as_deref()
    }

    pub fn consecutive_free_frames(&self) -> u32 {
        self.consecutive_free_frames
    }

    pub fn alerted(&self) -> bool {
        self.alerted
    }

    /// Baseline was captured but held no vehicles; nothing can ever be free.
    pub fn empty_baseline(&self) -> bool {
        self.baseline.as_ref().is_some_and(|b| b.is_empty())
    }
}

/// What the detector produced for one frame.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameObservation {
    Detected(Vec<Detection>),
    /// Detector failed on this frame.
    Skipped,
}

/// Per-space result of one evaluated frame.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SpaceReading {
    pub index: usize,
    pub space: BoundingBox,
    pub max_iou: f32,
    pub occupied: bool,
}

/// Receives every space reading as it is computed.
pub trait SpaceObserver: Send {
    fn observe(&mut self, frame_index: u64, reading: &SpaceReading);
}

impl<F> SpaceObserver for F
where
    F: FnMut(u64, &SpaceReading) + Send,
{
    fn observe(&mut self, frame_index: u64, reading: &SpaceReading) {
        self(frame_index, reading)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    BaselineCaptured {
        spaces: usize,
    },
    /// Detector failed before a baseline existed; the next frame is tried.
    BaselineDeferred,
    Evaluated {
        free_spaces: usize,
        consecutive_free_frames: u32,
        detector_skipped: bool,
    },
    Alerted(SpaceAvailable),
    /// Tracker already alerted; the frame was not looked at.
    Ignored,
}

pub struct OccupancyTracker {
    config: TrackerConfig,
    state: TrackerState,
    emitter: AlertEmitter,
    observer: Option<Box<dyn SpaceObserver>>,
}

impl OccupancyTracker {
    pub fn new(config: TrackerConfig, emitter: AlertEmitter) -> Self {
        Self {
            config,
            state: TrackerState::default(),
            emitter,
            observer: None,
        }
    }

    pub fn with_observer<O: SpaceObserver + 'static>(mut self, observer: O) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> &TrackerState {
        &self.state
    }

    pub fn phase(&self) -> TrackerPhase {
        self.state.phase()
    }

    pub fn emitter(&self) -> &AlertEmitter {
        &self.emitter
    }

    /// Advance the state machine by one frame.
    pub fn update(&mut self, frame_index: u64, observation: FrameObservation) -> FrameOutcome {
        if self.state.alerted {
            return FrameOutcome::Ignored;
        }

        let (vehicles, detector_skipped) = match observation {
            FrameObservation::Detected(detections) => (vehicle_boxes(&detections), false),
            FrameObservation::Skipped => (Vec::new(), true),
        };

        let Some(baseline) = self.state.baseline.as_ref() else {
            if detector_skipped {
                log::warn!(
                    "frame {}: no detector result, deferring baseline capture",
                    frame_index
                );
                return FrameOutcome::BaselineDeferred;
            }
            let spaces = vehicles.len();
            if spaces == 0 {
                log::warn!(
                    "frame {}: baseline holds no vehicles; no parking space can be tracked",
                    frame_index
                );
            } else {
                log::info!("frame {}: baseline captured with {} spaces", frame_index, spaces);
            }
            self.state.baseline = Some(vehicles);
            return FrameOutcome::BaselineCaptured { spaces };
        };

        let overlaps = compute_overlaps(baseline, &vehicles);
        let mut free_spaces = 0usize;
        let mut first_free = None;
        for (index, space) in baseline.iter().enumerate() {
            let max_iou = overlaps.row_max(index);
            let occupied = max_iou >= self.config.iou_threshold;
            if !occupied {
                free_spaces += 1;
                first_free.get_or_insert(index);
            }
            if let Some(observer) = self.observer.as_mut() {
                observer.observe(
                    frame_index,
                    &SpaceReading {
                        index,
                        space: *space,
                        max_iou,
                        occupied,
                    },
                );
            }
        }

        if free_spaces > 0 {
            self.state.consecutive_free_frames = self.state.consecutive_free_frames.saturating_add(1);
        } else {
            self.state.consecutive_free_frames = 0;
        }
        let consecutive_free_frames = self.state.consecutive_free_frames;
        log::debug!(
            "frame {}: {}/{} spaces free, counter {}",
            frame_index,
            free_spaces,
            baseline.len(),
            consecutive_free_frames
        );

        if consecutive_free_frames > self.config.debounce_frames {
            if let Some(space_index) = first_free {
                let alert = SpaceAvailable {
                    space_index,
                    frame_index,
                    free_spaces,
                    consecutive_free_frames,
                };
                self.state.alerted = true;
                self.emitter.emit(&alert);
                return FrameOutcome::Alerted(alert);
            }
        }

        FrameOutcome::Evaluated {
            free_spaces,
            consecutive_free_frames,
            detector_skipped,
        }
    }
}
