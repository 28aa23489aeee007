use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::detect::StubLotConfig;
use crate::tracker::{TrackerConfig, DEFAULT_DEBOUNCE_FRAMES, DEFAULT_IOU_THRESHOLD};

const DEFAULT_SOURCE_PATH: &str = "stub://parking_lot";
const DEFAULT_FRAME_STRIDE: u32 = 1;
const DEFAULT_API_ADDR: &str = "127.0.0.1:8798";
const DEFAULT_DETECTOR: &str = "stub";
const DEFAULT_MODEL_PATH: &str = "yolov8n.onnx";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_MIN_CONFIDENCE: f32 = 0.6;
const DEFAULT_NMS_IOU: f32 = 0.45;
const DEFAULT_MQTT_TOPIC: &str = "parkwatch/space_available";
const DEFAULT_MQTT_CLIENT_ID: &str = "parkwatch";

#[derive(Debug, Deserialize, Default)]
struct ParkwatchConfigFile {
    source: Option<SourceConfigFile>,
    tracker: Option<TrackerConfigFile>,
    detector: Option<DetectorConfigFile>,
    weights: Option<WeightsConfigFile>,
    api: Option<ApiConfigFile>,
    alert: Option<AlertConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    path: Option<String>,
    frame_stride: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct TrackerConfigFile {
    iou_threshold: Option<f32>,
    debounce_frames: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectorConfigFile {
    backend: Option<String>,
    model_path: Option<PathBuf>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    min_confidence: Option<f32>,
    nms_iou: Option<f32>,
    stub: Option<StubConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct StubConfigFile {
    rows: Option<u32>,
    cols: Option<u32>,
    vacate_space: Option<usize>,
    /// `null` keeps the synthetic lot full.
    #[serde(default, deserialize_with = "explicit_option")]
    vacate_after: Option<Option<u64>>,
    flicker: Option<f64>,
    seed: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct WeightsConfigFile {
    url: Option<String>,
    sha256: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiConfigFile {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertConfigFile {
    mqtt: Option<MqttConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct MqttConfigFile {
    broker: Option<String>,
    topic: Option<String>,
    client_id: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ParkwatchConfig {
    pub source: SourceSettings,
    pub tracker: TrackerConfig,
    pub detector: DetectorSettings,
    pub weights: WeightsSettings,
    pub api_addr: String,
    pub alert: AlertSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub path: String,
    pub frame_stride: u32,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub backend: String,
    pub model_path: PathBuf,
    pub input_width: u32,
    pub input_height: u32,
    pub min_confidence: f32,
    pub nms_iou: f32,
    pub stub: StubLotConfig,
}

impl Default for DetectorSettings {
    fn default() -> Self {
        Self {
            backend: DEFAULT_DETECTOR.to_string(),
            model_path: PathBuf::from(DEFAULT_MODEL_PATH),
            input_width: DEFAULT_INPUT_SIZE,
            input_height: DEFAULT_INPUT_SIZE,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            nms_iou: DEFAULT_NMS_IOU,
            stub: StubLotConfig::default(),
        }
    }
}

/// Where to fetch detector weights when the model file is missing.
#[derive(Debug, Clone, Default)]
pub struct WeightsSettings {
    pub url: Option<String>,
    pub sha256: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AlertSettings {
    pub mqtt: Option<MqttSettings>,
}

#[derive(Debug, Clone)]
pub struct MqttSettings {
    pub broker: String,
    pub topic: String,
    pub client_id: String,
}

impl ParkwatchConfig {
    /// Defaults, overlaid by the JSON file named in `PARKWATCH_CONFIG`, then
    /// by `PARKWATCH_*` variables.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PARKWATCH_CONFIG").ok();
        Self::load_from(config_path.as_deref().map(Path::new))
    }

    pub fn load_from(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ParkwatchConfigFile) -> Self {
        let source = file.source.unwrap_or_default();
        let tracker = file.tracker.unwrap_or_default();
        let detector = file.detector.unwrap_or_default();
        let weights = file.weights.unwrap_or_default();
        let stub_defaults = StubLotConfig::default();
        let stub = detector.stub.unwrap_or_default();

        let mqtt = file
            .alert
            .and_then(|alert| alert.mqtt)
            .and_then(|mqtt| {
                let broker = mqtt.broker?;
                Some(MqttSettings {
                    broker,
                    topic: mqtt.topic.unwrap_or_else(|| DEFAULT_MQTT_TOPIC.to_string()),
                    client_id: mqtt
                        .client_id
                        .unwrap_or_else(|| DEFAULT_MQTT_CLIENT_ID.to_string()),
                })
            });

        Self {
            source: SourceSettings {
                path: source
                    .path
                    .unwrap_or_else(|| DEFAULT_SOURCE_PATH.to_string()),
                frame_stride: source.frame_stride.unwrap_or(DEFAULT_FRAME_STRIDE),
            },
            tracker: TrackerConfig {
                iou_threshold: tracker.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                debounce_frames: tracker.debounce_frames.unwrap_or(DEFAULT_DEBOUNCE_FRAMES),
            },
            detector: DetectorSettings {
                backend: detector
                    .backend
                    .unwrap_or_else(|| DEFAULT_DETECTOR.to_string()),
                model_path: detector
                    .model_path
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
                input_width: detector.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
                input_height: detector.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
                min_confidence: detector.min_confidence.unwrap_or(DEFAULT_MIN_CONFIDENCE),
                nms_iou: detector.nms_iou.unwrap_or(DEFAULT_NMS_IOU),
                stub: StubLotConfig {
                    rows: stub.rows.unwrap_or(stub_defaults.rows),
                    cols: stub.cols.unwrap_or(stub_defaults.cols),
                    vacate_space: stub.vacate_space.unwrap_or(stub_defaults.vacate_space),
                    vacate_after: stub.vacate_after.unwrap_or(stub_defaults.vacate_after),
                    flicker: stub.flicker.unwrap_or(stub_defaults.flicker),
                    seed: stub.seed.unwrap_or(stub_defaults.seed),
                },
            },
            weights: WeightsSettings {
                url: weights.url,
                sha256: weights.sha256,
            },
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            alert: AlertSettings { mqtt },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("PARKWATCH_SOURCE") {
            self.source.path = path;
        }
        if let Some(stride) = non_empty_env("PARKWATCH_FRAME_STRIDE") {
            self.source.frame_stride = stride
                .parse()
                .map_err(|_| anyhow!("PARKWATCH_FRAME_STRIDE must be a positive integer"))?;
        }
        if let Some(threshold) = non_empty_env("PARKWATCH_IOU_THRESHOLD") {
            self.tracker.iou_threshold = threshold
                .parse()
                .map_err(|_| anyhow!("PARKWATCH_IOU_THRESHOLD must be a number"))?;
        }
        if let Some(frames) = non_empty_env("PARKWATCH_DEBOUNCE_FRAMES") {
            self.tracker.debounce_frames = frames
                .parse()
                .map_err(|_| anyhow!("PARKWATCH_DEBOUNCE_FRAMES must be a non-negative integer"))?;
        }
        if let Some(backend) = non_empty_env("PARKWATCH_DETECTOR") {
            self.detector.backend = backend;
        }
        if let Some(path) = non_empty_env("PARKWATCH_MODEL_PATH") {
            self.detector.model_path = PathBuf::from(path);
        }
        if let Some(confidence) = non_empty_env("PARKWATCH_MIN_CONFIDENCE") {
            self.detector.min_confidence = confidence
                .parse()
                .map_err(|_| anyhow!("PARKWATCH_MIN_CONFIDENCE must be a number"))?;
        }
        if let Some(url) = non_empty_env("PARKWATCH_WEIGHTS_URL") {
            self.weights.url = Some(url);
        }
        if let Some(digest) = non_empty_env("PARKWATCH_WEIGHTS_SHA256") {
            self.weights.sha256 = Some(digest);
        }
        if let Some(addr) = non_empty_env("PARKWATCH_API_ADDR") {
            self.api_addr = addr;
        }
        if let Some(broker) = non_empty_env("PARKWATCH_MQTT_BROKER") {
            match self.alert.mqtt.as_mut() {
                Some(mqtt) => mqtt.broker = broker,
                None => {
                    self.alert.mqtt = Some(MqttSettings {
                        broker,
                        topic: DEFAULT_MQTT_TOPIC.to_string(),
                        client_id: DEFAULT_MQTT_CLIENT_ID.to_string(),
                    })
                }
            }
        }
        if let Some(topic) = non_empty_env("PARKWATCH_MQTT_TOPIC") {
            if let Some(mqtt) = self.alert.mqtt.as_mut() {
                mqtt.topic = topic;
            }
        }
        Ok(())
    }

    /// Check ranges and normalize values. `load` already calls this; call it
    /// again after overriding fields by hand.
    pub fn validate(&mut self) -> Result<()> {
        self.tracker.validate()?;
        if self.source.path.trim().is_empty() {
            return Err(anyhow!("source path must not be empty"));
        }
        if self.source.frame_stride == 0 {
            return Err(anyhow!("frame stride must be greater than zero"));
        }
        if !(0.0..=1.0).contains(&self.detector.min_confidence) {
            return Err(anyhow!("min confidence must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.detector.nms_iou) {
            return Err(anyhow!("nms iou must be within [0, 1]"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be non-zero"));
        }
        if self.detector.backend == DEFAULT_DETECTOR {
            self.detector.stub.validate()?;
        }
        if let Some(digest) = self.weights.sha256.as_mut() {
            *digest = digest.trim().to_lowercase();
            if digest.len() != 64 || !digest.chars().all(|c| c.is_ascii_hexdigit()) {
                return Err(anyhow!("weights sha256 must be 64 hex characters"));
            }
        }
        if let Some(mqtt) = self.alert.mqtt.as_ref() {
            crate::alert::parse_broker(&mqtt.broker)?;
            if mqtt.topic.trim().is_empty() {
                return Err(anyhow!("mqtt topic must not be empty"));
            }
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ParkwatchConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

/// Tells an absent key (outer `None`) apart from an explicit `null`.
fn explicit_option<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}
