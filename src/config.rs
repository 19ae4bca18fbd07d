use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::api::ApiConfig;
use crate::distance::DistanceCalibration;
use crate::pipeline::PipelineSettings;
use crate::AlertPolicy;

const DEFAULT_DB_PATH: &str = "sentinel.db";
const DEFAULT_CAPTURES_DIR: &str = "captured_alerts";
const DEFAULT_API_ADDR: &str = "127.0.0.1:8360";
const DEFAULT_CAMERA_DEVICE: &str = "stub://road";
const DEFAULT_CAMERA_FPS: u32 = 10;
const DEFAULT_CAMERA_WIDTH: u32 = 640;
const DEFAULT_CAMERA_HEIGHT: u32 = 480;
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.25;
const DEFAULT_IOU_THRESHOLD: f32 = 0.45;
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_JPEG_QUALITY: u8 = 80;

#[derive(Debug, Deserialize, Default)]
struct SentinelConfigFile {
    db_path: Option<String>,
    captures_dir: Option<PathBuf>,
    jpeg_quality: Option<u8>,
    api: Option<ApiSection>,
    camera: Option<CameraSection>,
    detection: Option<DetectionSection>,
    alerting: Option<AlertingSection>,
}

#[derive(Debug, Deserialize, Default)]
struct ApiSection {
    addr: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct CameraSection {
    device: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectionSection {
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    input_size: Option<u32>,
    model_path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct AlertingSection {
    proximity_threshold_m: Option<f32>,
    cooldown_s: Option<f64>,
    known_width_m: Option<f32>,
    focal_length_px: Option<f32>,
    relevant_classes: Option<Vec<String>>,
}

#[derive(Debug, Clone)]
pub struct SentinelConfig {
    pub db_path: String,
    pub captures_dir: PathBuf,
    pub api_addr: String,
    pub jpeg_quality: u8,
    pub camera: CameraSettings,
    pub detection: DetectionSettings,
    pub alerting: AlertingSettings,
}

#[derive(Debug, Clone)]
pub struct CameraSettings {
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone)]
pub struct DetectionSettings {
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub input_size: u32,
    /// ONNX model path for the tract backend; `None` runs the stub.
    pub model_path: Option<String>,
}

#[derive(Debug, Clone)]
pub struct AlertingSettings {
    pub proximity_threshold_m: f32,
    pub cooldown_s: f64,
    pub known_width_m: f32,
    pub focal_length_px: f32,
    pub relevant_classes: Vec<String>,
}

impl SentinelConfig {
    /// Load configuration: optional TOML file named by `SENTINEL_CONFIG`,
    /// overlaid with `SENTINEL_*` environment variables, then validated.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("SENTINEL_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: SentinelConfigFile) -> Self {
        let default_policy = AlertPolicy::default();
        let camera = file.camera.unwrap_or_default();
        let detection = file.detection.unwrap_or_default();
        let alerting = file.alerting.unwrap_or_default();
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            captures_dir: file
                .captures_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURES_DIR)),
            api_addr: file
                .api
                .and_then(|api| api.addr)
                .unwrap_or_else(|| DEFAULT_API_ADDR.to_string()),
            jpeg_quality: file.jpeg_quality.unwrap_or(DEFAULT_JPEG_QUALITY),
            camera: CameraSettings {
                device: camera
                    .device
                    .unwrap_or_else(|| DEFAULT_CAMERA_DEVICE.to_string()),
                target_fps: camera.target_fps.unwrap_or(DEFAULT_CAMERA_FPS),
                width: camera.width.unwrap_or(DEFAULT_CAMERA_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_CAMERA_HEIGHT),
            },
            detection: DetectionSettings {
                confidence_threshold: detection
                    .confidence_threshold
                    .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
                iou_threshold: detection.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                input_size: detection.input_size.unwrap_or(DEFAULT_INPUT_SIZE),
                model_path: detection.model_path,
            },
            alerting: AlertingSettings {
                proximity_threshold_m: alerting
                    .proximity_threshold_m
                    .unwrap_or(default_policy.proximity_threshold_m),
                cooldown_s: alerting.cooldown_s.unwrap_or(default_policy.cooldown_s),
                known_width_m: alerting.known_width_m.unwrap_or(1.8),
                focal_length_px: alerting.focal_length_px.unwrap_or(1000.0),
                relevant_classes: alerting.relevant_classes.unwrap_or_else(|| {
                    default_policy.relevant_classes.into_iter().collect()
                }),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("SENTINEL_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Ok(dir) = std::env::var("SENTINEL_CAPTURES_DIR") {
            if !dir.trim().is_empty() {
                self.captures_dir = PathBuf::from(dir);
            }
        }
        if let Ok(addr) = std::env::var("SENTINEL_API_ADDR") {
            if !addr.trim().is_empty() {
                self.api_addr = addr;
            }
        }
        if let Ok(device) = std::env::var("SENTINEL_CAMERA_DEVICE") {
            if !device.trim().is_empty() {
                self.camera.device = device;
            }
        }
        if let Ok(model) = std::env::var("SENTINEL_MODEL_PATH") {
            if !model.trim().is_empty() {
                self.detection.model_path = Some(model);
            }
        }
        if let Ok(classes) = std::env::var("SENTINEL_RELEVANT_CLASSES") {
            let parsed = split_csv(&classes);
            if !parsed.is_empty() {
                self.alerting.relevant_classes = parsed;
            }
        }
        if let Ok(cooldown) = std::env::var("SENTINEL_ALERT_COOLDOWN_S") {
            self.alerting.cooldown_s = cooldown
                .parse()
                .map_err(|_| anyhow!("SENTINEL_ALERT_COOLDOWN_S must be a number of seconds"))?;
        }
        Ok(())
    }

    fn validate(&mut self) -> Result<()> {
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!("camera dimensions must be greater than zero"));
        }
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(anyhow!("jpeg_quality must be in 1..=100"));
        }
        if self.alerting.proximity_threshold_m <= 0.0 {
            return Err(anyhow!("proximity_threshold_m must be greater than zero"));
        }
        if self.alerting.cooldown_s < 0.0 {
            return Err(anyhow!("cooldown_s must not be negative"));
        }
        if self.alerting.known_width_m <= 0.0 || self.alerting.focal_length_px <= 0.0 {
            return Err(anyhow!("distance calibration constants must be positive"));
        }
        if self.alerting.relevant_classes.is_empty() {
            return Err(anyhow!("relevant_classes must not be empty"));
        }
        for class in &mut self.alerting.relevant_classes {
            *class = class.to_lowercase();
        }
        Ok(())
    }

    pub fn policy(&self) -> AlertPolicy {
        AlertPolicy {
            proximity_threshold_m: self.alerting.proximity_threshold_m,
            cooldown_s: self.alerting.cooldown_s,
            relevant_classes: self.alerting.relevant_classes.iter().cloned().collect(),
        }
    }

    pub fn calibration(&self) -> DistanceCalibration {
        DistanceCalibration {
            known_width_m: self.alerting.known_width_m,
            focal_length_px: self.alerting.focal_length_px,
        }
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            calibration: self.calibration(),
            policy: self.policy(),
            target_fps: self.camera.target_fps,
            jpeg_quality: self.jpeg_quality,
        }
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            addr: self.api_addr.clone(),
            db_path: self.db_path.clone(),
            captures_dir: self.captures_dir.clone(),
        }
    }
}

fn read_config_file(path: &Path) -> Result<SentinelConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_configuration() {
        let cfg = SentinelConfig::from_file(SentinelConfigFile::default());
        assert_eq!(cfg.db_path, "sentinel.db");
        assert_eq!(cfg.camera.device, "stub://road");
        assert_eq!(cfg.alerting.proximity_threshold_m, 50.0);
        assert_eq!(cfg.alerting.cooldown_s, 3.0);
        assert_eq!(cfg.alerting.known_width_m, 1.8);
        assert_eq!(cfg.alerting.focal_length_px, 1000.0);
        assert_eq!(cfg.detection.confidence_threshold, 0.25);
        assert_eq!(cfg.detection.iou_threshold, 0.45);
    }

    #[test]
    fn toml_sections_override_defaults() -> Result<()> {
        let file: SentinelConfigFile = toml::from_str(
            r#"
            db_path = "other.db"

            [camera]
            device = "/dev/video2"
            target_fps = 15

            [alerting]
            proximity_threshold_m = 30.0
            relevant_classes = ["Car", "Bus"]
            "#,
        )?;
        let mut cfg = SentinelConfig::from_file(file);
        cfg.validate()?;
        assert_eq!(cfg.db_path, "other.db");
        assert_eq!(cfg.camera.device, "/dev/video2");
        assert_eq!(cfg.camera.target_fps, 15);
        assert_eq!(cfg.alerting.proximity_threshold_m, 30.0);
        // Classes are normalized to lowercase.
        assert_eq!(cfg.alerting.relevant_classes, vec!["car", "bus"]);
        Ok(())
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut cfg = SentinelConfig::from_file(SentinelConfigFile::default());
        cfg.alerting.proximity_threshold_m = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = SentinelConfig::from_file(SentinelConfigFile::default());
        cfg.jpeg_quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = SentinelConfig::from_file(SentinelConfigFile::default());
        cfg.alerting.relevant_classes.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn policy_and_calibration_carry_configured_values() {
        let mut cfg = SentinelConfig::from_file(SentinelConfigFile::default());
        cfg.alerting.proximity_threshold_m = 25.0;
        cfg.alerting.focal_length_px = 800.0;
        let policy = cfg.policy();
        assert_eq!(policy.proximity_threshold_m, 25.0);
        assert!(policy.is_relevant("truck"));
        assert_eq!(cfg.calibration().focal_length_px, 800.0);
    }
}
