// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/watchbarn

//! Configuration module

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::alerts::{AlertAction, AlertRule, Condition, DispatcherConfig};
use crate::db::DatabaseConfig;
use crate::distance::{CameraCalibration, Zone};
use crate::error::Error;
use crate::tracking::TrackerConfig;

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Application name
    pub app_name: String,

    /// Application version
    pub version: String,

    /// Data directory
    pub data_dir: PathBuf,

    /// Log level
    pub log_level: String,

    /// Enable demo mode (simulated cameras and detector)
    pub demo_mode: bool,

    /// Camera list
    pub cameras: Vec<CameraConfig>,

    /// Tracker tuning
    pub tracking: TrackerConfig,

    /// Queue sizes, worker pool, timeouts
    pub pipeline: PipelineConfig,

    /// Alert rules and delivery
    pub alerts: AlertsConfig,

    /// Audio sinks and TTS
    pub audio: AudioConfig,

    /// Database configuration
    pub database: DatabaseConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            app_name: "Watchbarn".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            data_dir: PathBuf::from("./data"),
            log_level: "info".to_string(),
            demo_mode: true,
            cameras: vec![CameraConfig::demo()],
            tracking: TrackerConfig::default(),
            pipeline: PipelineConfig::default(),
            alerts: AlertsConfig::default(),
            audio: AudioConfig::default(),
            database: DatabaseConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Load or create default configuration
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            let config = Self::default();

            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }

            config.save(path)?;
            Ok(config)
        }
    }

    /// Get configuration directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|d| d.join("watchbarn"))
            .unwrap_or_else(|| PathBuf::from("./config"))
    }

    /// Get default configuration path
    pub fn default_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Reject configurations whose rules reference unknown cameras,
    /// reference points, zones or sinks. Runs before the pipeline
    /// starts; what passes here can only fail at runtime through
    /// isolate-and-disable.
    pub fn validate(&self) -> Result<()> {
        let camera_ids: HashSet<&str> = self.cameras.iter().map(|c| c.id.as_str()).collect();
        if camera_ids.len() != self.cameras.len() {
            return Err(Error::Config("duplicate camera ids".to_string()).into());
        }

        let mut rule_names = HashSet::new();
        let references: HashSet<&str> = self
            .cameras
            .iter()
            .filter_map(|c| c.calibration.as_ref())
            .flat_map(|cal| cal.reference_points.iter().map(|r| r.name.as_str()))
            .collect();
        let zones: HashSet<&str> = self
            .cameras
            .iter()
            .flat_map(|c| c.zones.iter().map(|z| z.name.as_str()))
            .collect();
        let sinks: HashSet<&str> = self.audio.sinks.iter().map(|s| s.name.as_str()).collect();

        for rule in &self.alerts.rules {
            if !rule_names.insert(rule.name.as_str()) {
                return Err(
                    Error::Config(format!("duplicate rule name '{}'", rule.name)).into(),
                );
            }

            let step_conditions = rule.sequence.iter().flat_map(|s| s.conditions.iter());
            for condition in rule.conditions.iter().chain(step_conditions) {
                match condition {
                    Condition::Camera { ids } => {
                        for id in ids {
                            if !camera_ids.contains(id.as_str()) {
                                return Err(Error::Config(format!(
                                    "rule '{}' references unknown camera '{}'",
                                    rule.name, id
                                ))
                                .into());
                            }
                        }
                    }
                    Condition::Distance { reference, .. } => {
                        if !references.contains(reference.as_str()) {
                            return Err(Error::Config(format!(
                                "rule '{}' references unknown reference point '{}'",
                                rule.name, reference
                            ))
                            .into());
                        }
                    }
                    Condition::InZone { zone } => {
                        if !zones.contains(zone.as_str()) {
                            return Err(Error::Config(format!(
                                "rule '{}' references unknown zone '{}'",
                                rule.name, zone
                            ))
                            .into());
                        }
                    }
                    Condition::CameraOffline { camera_id } => {
                        if !camera_ids.contains(camera_id.as_str()) {
                            return Err(Error::Config(format!(
                                "rule '{}' watches unknown camera '{}'",
                                rule.name, camera_id
                            ))
                            .into());
                        }
                    }
                    _ => {}
                }
            }

            for action in &rule.actions {
                if let AlertAction::AudioAlert { sinks: targets, .. } = action {
                    for target in targets {
                        if target != "all" && !sinks.contains(target.as_str()) {
                            return Err(Error::Config(format!(
                                "rule '{}' targets unknown sink '{}'",
                                rule.name, target
                            ))
                            .into());
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// One camera's connection, calibration and zones
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CameraConfig {
    pub id: String,

    pub name: String,

    /// Stream URL (rtsp://, http://, or device path)
    pub url: String,

    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_fps")]
    pub fps: f64,

    /// Resolved distance calibration; absent means no distance
    /// annotation for this camera
    #[serde(default)]
    pub calibration: Option<CameraCalibration>,

    #[serde(default)]
    pub zones: Vec<Zone>,
}

impl CameraConfig {
    /// The camera the default demo configuration ships with
    fn demo() -> Self {
        Self {
            id: "front".to_string(),
            name: "Front Door".to_string(),
            url: "sim://front".to_string(),
            enabled: true,
            fps: 15.0,
            calibration: Some(CameraCalibration {
                camera_id: "front".to_string(),
                height_m: 2.5,
                tilt_deg: 30.0,
                focal_px: 1000.0,
                image_width: 1920,
                image_height: 1080,
                reference_points: vec![crate::distance::ReferencePoint {
                    name: "front_door".to_string(),
                    pixel: (960.0, 800.0),
                    distance_m: 5.0,
                }],
            }),
            zones: Vec::new(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_fps() -> f64 {
    15.0
}

/// Queue sizes, worker pool size and timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Per-camera frame queue capacity (full queues drop oldest)
    pub frame_queue_size: usize,

    /// Concurrent detector/tracker workers; 0 = number of cores
    pub worker_threads: usize,

    /// Tick-batch queue between workers and the rule engine
    pub batch_queue_size: usize,

    /// Alert queue between the rule engine and the dispatcher; full
    /// means backpressure, never drops
    pub alert_queue_size: usize,

    /// Detector call timeout, milliseconds
    pub detector_timeout_ms: u64,

    /// Frame read timeout per camera, milliseconds
    pub read_timeout_ms: u64,

    /// No frames for this long marks a camera silent
    pub silence_window_secs: u64,

    /// Shutdown grace per stage, milliseconds
    pub shutdown_grace_ms: u64,

    /// Stats log interval, seconds
    pub stats_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_queue_size: 64,
            worker_threads: 0,
            batch_queue_size: 128,
            alert_queue_size: 256,
            detector_timeout_ms: 2000,
            read_timeout_ms: 10_000,
            silence_window_secs: 10,
            shutdown_grace_ms: 5000,
            stats_interval_secs: 60,
        }
    }
}

impl PipelineConfig {
    pub fn worker_count(&self) -> usize {
        if self.worker_threads > 0 {
            self.worker_threads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        }
    }
}

/// Alert rules and delivery settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AlertsConfig {
    #[serde(default)]
    pub rules: Vec<AlertRule>,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

/// Audio sinks and TTS settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Rendered-message cache entries
    pub tts_cache_capacity: usize,

    #[serde(default)]
    pub sinks: Vec<SinkConfig>,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            tts_cache_capacity: 64,
            sinks: vec![SinkConfig {
                name: "porch".to_string(),
                kind: SinkKind::Console,
                enabled: true,
            }],
        }
    }
}

/// One configured audio output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SinkConfig {
    pub name: String,

    #[serde(default)]
    pub kind: SinkKind,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// Logs the spoken text; the built-in fallback
    #[default]
    Console,
    /// Wired speaker driven by an injected `AudioSink` backend
    Wired,
    /// Bluetooth speaker driven by an injected `AudioSink` backend
    Bluetooth,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::{DistanceCheck, Priority};

    #[test]
    fn test_default_config_validates() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed.cameras.len(), config.cameras.len());
        assert_eq!(parsed.pipeline.frame_queue_size, 64);
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let mut config = Config::default();
        config.alerts.rules.push(AlertRule {
            name: "Bad Rule".to_string(),
            enabled: true,
            priority: Priority::High,
            conditions: vec![Condition::Distance {
                reference: "no_such_point".to_string(),
                check: DistanceCheck::LessThan { value: 5.0 },
            }],
            sequence: vec![],
            cooldown_secs: 60,
            max_alerts_per_hour: 10,
            cooldown_scope: Default::default(),
            actions: vec![],
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duplicate_rule_names_rejected() {
        let mut config = Config::default();
        let rule = AlertRule {
            name: "Twin".to_string(),
            enabled: true,
            priority: Priority::Low,
            conditions: vec![],
            sequence: vec![],
            cooldown_secs: 60,
            max_alerts_per_hour: 10,
            cooldown_scope: Default::default(),
            actions: vec![],
        };
        config.alerts.rules.push(rule.clone());
        config.alerts.rules.push(rule);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_sink_rejected() {
        let mut config = Config::default();
        config.alerts.rules.push(AlertRule {
            name: "Loud Rule".to_string(),
            enabled: true,
            priority: Priority::High,
            conditions: vec![],
            sequence: vec![],
            cooldown_secs: 60,
            max_alerts_per_hour: 10,
            cooldown_scope: Default::default(),
            actions: vec![AlertAction::AudioAlert {
                message: "hi".to_string(),
                sinks: vec!["attic".to_string()],
            }],
        });
        assert!(config.validate().is_err());
    }
}
