//! Parkwatch: parking space watcher for a fixed camera.
//!
//! A session reads frames from a video source, asks a detector for the
//! vehicles in each frame, and compares them against the vehicles seen on
//! the first frame (the baseline, one box per parking space). When at least
//! one space has looked free for more than a configured number of
//! consecutive frames, a single space-available alert goes out and the
//! session ends.
//!
//! # Module Structure
//!
//! - `geometry`: BoundingBox and intersection-over-union
//! - `detect`: Detection, ObjectClass, detector backends and their registry
//! - `filter`: reduce detections to vehicle boxes
//! - `overlap`: baseline-vs-current IoU matrix
//! - `tracker`: occupancy state machine and debounce
//! - `alert`: at-most-once alert emitter and sinks (log, channel, MQTT)
//! - `frame`, `ingest`: RGB frames and the sources producing them
//! - `session`: drives one source through detector and tracker
//! - `api`: `GET /` answers `{"vagas": n}`
//! - `config`, `weights`: layered configuration and model provisioning

pub mod alert;
pub mod api;
pub mod config;
pub mod detect;
pub mod filter;
pub mod frame;
pub mod geometry;
pub mod ingest;
pub mod overlap;
pub mod session;
pub mod tracker;
pub mod weights;

pub use alert::{AlertEmitter, AlertSink, ChannelSink, LogSink, MqttSink, SpaceAvailable};
pub use config::ParkwatchConfig;
pub use detect::{
    BackendRegistry, Detection, DetectorBackend, ObjectClass, ScriptedBackend, StubBackend,
    StubLotConfig,
};
pub use frame::Frame;
pub use geometry::BoundingBox;
pub use ingest::{FileConfig, FileSource, FrameSource, MemorySource, PixelFormat};
pub use overlap::{compute_overlaps, OverlapMatrix};
pub use session::{
    run_configured_session, run_parallel, CancelToken, Session, SessionEnd, SessionOutcome,
};
pub use tracker::{
    FrameObservation, FrameOutcome, OccupancyTracker, SpaceObserver, SpaceReading, TrackerConfig,
    TrackerPhase, TrackerState,
};
