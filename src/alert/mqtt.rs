use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::JoinHandle;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rumqttc::v5::{mqttbytes::QoS, Client, MqttOptions};
use serde::Serialize;

use super::{AlertSink, SpaceAvailable};
use crate::config::MqttSettings;

const DEFAULT_MQTT_PORT: u16 = 1883;
/// Longest wait for queued publishes to flush when the sink is dropped.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Serialize)]
struct AlertPayload<'a> {
    event: &'static str,
    #[serde(flatten)]
    alert: &'a SpaceAvailable,
}

/// Publishes the event to an MQTT topic (QoS 1, not retained).
pub struct MqttSink {
    client: Client,
    topic: String,
    event_loop: Option<EventLoop>,
}

struct EventLoop {
    handle: JoinHandle<()>,
    finished: Receiver<()>,
}

impl MqttSink {
    pub fn connect(settings: &MqttSettings) -> Result<Self> {
        let (host, port) = parse_broker(&settings.broker)?;
        let mut options = MqttOptions::new(settings.client_id.clone(), host.clone(), port);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_start(true);

        let (client, mut connection) = Client::new(options, 10);
        let (finished_tx, finished) = mpsc::channel();
        let handle = std::thread::Builder::new()
            .name("parkwatch-mqtt".to_string())
            .spawn(move || {
                for notification in connection.iter() {
                    if let Err(err) = notification {
                        log::debug!("mqtt connection closed: {}", err);
                        break;
                    }
                }
                let _ = finished_tx.send(());
            })
            .context("spawn mqtt event loop")?;

        log::info!(
            "alerts will be published to mqtt://{}:{}/{}",
            host,
            port,
            settings.topic
        );
        Ok(Self {
            client,
            topic: settings.topic.clone(),
            event_loop: Some(EventLoop { handle, finished }),
        })
    }

    /// Request a disconnect and wait up to `timeout` for the event loop to
    /// write out queued packets and exit. Returns whether it finished.
    pub fn shutdown(&mut self, timeout: Duration) -> bool {
        let Some(event_loop) = self.event_loop.take() else {
            return true;
        };
        if let Err(err) = self.client.disconnect() {
            log::debug!("mqtt disconnect failed: {}", err);
        }
        match event_loop.finished.recv_timeout(timeout) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                if event_loop.handle.join().is_err() {
                    log::warn!("mqtt event loop panicked");
                }
                true
            }
            Err(RecvTimeoutError::Timeout) => {
                log::warn!(
                    "mqtt event loop still running after {:?}, alert delivery to {} unconfirmed",
                    timeout,
                    self.topic
                );
                false
            }
        }
    }
}

impl AlertSink for MqttSink {
    fn name(&self) -> &'static str {
        "mqtt"
    }

    fn notify(&mut self, alert: &SpaceAvailable) -> Result<()> {
        let payload = serde_json::to_vec(&AlertPayload {
            event: "space_available",
            alert,
        })?;
        self.client
            .publish(self.topic.clone(), QoS::AtLeastOnce, false, payload)
            .map_err(|e| anyhow!("mqtt publish to {} failed: {}", self.topic, e))
    }
}

impl Drop for MqttSink {
    fn drop(&mut self) {
        self.shutdown(SHUTDOWN_TIMEOUT);
    }
}

/// Split `host[:port]` or `mqtt://host[:port]` into host and port.
pub fn parse_broker(broker: &str) -> Result<(String, u16)> {
    let trimmed = broker.trim();
    let addr = trimmed.strip_prefix("mqtt://").unwrap_or(trimmed);
    if addr.is_empty() || addr.contains("://") {
        return Err(anyhow!("invalid mqtt broker address '{}'", broker));
    }
    match addr.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && !host.ends_with(':') => {
            let port = port
                .parse::<u16>()
                .with_context(|| format!("invalid mqtt broker port in '{}'", broker))?;
            Ok((host.to_string(), port))
        }
        _ => Ok((addr.to_string(), DEFAULT_MQTT_PORT)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_broker_addresses() -> Result<()> {
        assert_eq!(parse_broker("localhost")?, ("localhost".to_string(), 1883));
        assert_eq!(parse_broker("10.0.0.5:8883")?, ("10.0.0.5".to_string(), 8883));
        assert_eq!(
            parse_broker("mqtt://broker.local:1884")?,
            ("broker.local".to_string(), 1884)
        );
        assert!(parse_broker("").is_err());
        assert!(parse_broker("tcp://broker").is_err());
        assert!(parse_broker("broker:notaport").is_err());
        Ok(())
    }

    fn settings(port: u16) -> MqttSettings {
        MqttSettings {
            broker: format!("127.0.0.1:{port}"),
            topic: "parkwatch/test".to_string(),
            client_id: "parkwatch-test".to_string(),
        }
    }

    #[test]
    fn shutdown_joins_event_loop_when_broker_is_gone() -> Result<()> {
        let port = std::net::TcpListener::bind("127.0.0.1:0")?.local_addr()?.port();
        let mut sink = MqttSink::connect(&settings(port))?;

        assert!(sink.shutdown(Duration::from_secs(10)));
        assert!(sink.event_loop.is_none());
        // Second call is a no-op, as in drop after an explicit shutdown.
        assert!(sink.shutdown(Duration::from_millis(1)));
        Ok(())
    }

    #[test]
    fn shutdown_wait_is_bounded_when_broker_never_answers() -> Result<()> {
        // Accepts the TCP connection but never sends CONNACK.
        let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
        let mut sink = MqttSink::connect(&settings(listener.local_addr()?.port()))?;

        let started = std::time::Instant::now();
        assert!(!sink.shutdown(Duration::from_millis(200)));
        assert!(started.elapsed() < Duration::from_secs(3));
        drop(listener);
        Ok(())
    }

    #[test]
    fn payload_flattens_alert_fields() -> Result<()> {
        let alert = SpaceAvailable {
            space_index: 2,
            frame_index: 40,
            free_spaces: 1,
            consecutive_free_frames: 11,
        };
        let json = serde_json::to_value(AlertPayload {
            event: "space_available",
            alert: &alert,
        })?;
        assert_eq!(json["event"], "space_available");
        assert_eq!(json["space_index"], 2);
        assert_eq!(json["frame_index"], 40);
        Ok(())
    }
}
