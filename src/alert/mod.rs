//! Space-available notification.
//!
//! The tracker hands a `SpaceAvailable` event to an `AlertEmitter`, which
//! latches after the first event and fans it out to its sinks. A session
//! therefore produces at most one notification no matter how many sinks
//! are attached or how many frames follow.

mod mqtt;

use std::sync::mpsc;

use anyhow::{anyhow, Result};
use serde::Serialize;

pub use mqtt::{parse_broker, MqttSink};

/// A known parking space has stayed free past the debounce window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SpaceAvailable {
    /// Baseline index of the lowest-numbered free space on the alerting frame.
    pub space_index: usize,
    pub frame_index: u64,
    /// Free spaces on the alerting frame.
    pub free_spaces: usize,
    pub consecutive_free_frames: u32,
}

/// Destination for the space-available event.
pub trait AlertSink: Send {
    fn name(&self) -> &'static str;

    fn notify(&mut self, alert: &SpaceAvailable) -> Result<()>;
}

/// Writes the event to the log.
#[derive(Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn notify(&mut self, alert: &SpaceAvailable) -> Result<()> {
        log::info!(
            "SPACE AVAILABLE: space #{} free ({} free, {} consecutive frames) at frame {}",
            alert.space_index,
            alert.free_spaces,
            alert.consecutive_free_frames,
            alert.frame_index
        );
        Ok(())
    }
}

/// Forwards the event over a channel.
pub struct ChannelSink {
    tx: mpsc::Sender<SpaceAvailable>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::Receiver<SpaceAvailable>) {
        let (tx, rx) = mpsc::channel();
        (Self { tx }, rx)
    }
}

impl AlertSink for ChannelSink {
    fn name(&self) -> &'static str {
        "channel"
    }

    fn notify(&mut self, alert: &SpaceAvailable) -> Result<()> {
        self.tx
            .send(alert.clone())
            .map_err(|_| anyhow!("alert receiver dropped"))
    }
}

/// At-most-once fan-out of the space-available event.
#[derive(Default)]
pub struct AlertEmitter {
    sinks: Vec<Box<dyn AlertSink>>,
    fired: Option<SpaceAvailable>,
}

impl AlertEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sink<S: AlertSink + 'static>(mut self, sink: S) -> Self {
        self.add_sink(Box::new(sink));
        self
    }

    pub fn add_sink(&mut self, sink: Box<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    /// Deliver `alert` unless an alert already went out.
    ///
    /// Returns true when this call delivered. A failing sink is logged and
    /// does not un-latch the emitter.
    pub fn emit(&mut self, alert: &SpaceAvailable) -> bool {
        if self.fired.is_some() {
            log::debug!("alert already emitted; ignoring frame {}", alert.frame_index);
            return false;
        }
        self.fired = Some(alert.clone());
        for sink in &mut self.sinks {
            if let Err(err) = sink.notify(alert) {
                log::error!("alert sink {} failed: {}", sink.name(), err);
            }
        }
        true
    }

    pub fn fired(&self) -> Option<&SpaceAvailable> {
        self.fired.as_ref()
    }
}
