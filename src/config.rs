//! Daemon configuration.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! `MOTIONCAST_*` environment variables. The daemon applies its command-line
//! flags on top with `CamConfig::apply_overrides` and validates again.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::codec::DEFAULT_QUALITY;
use crate::detect::MotionConfig;
use crate::ingest::capture::DEFAULT_PROGRAM;
use crate::ingest::CaptureConfig;
use crate::stats::DEFAULT_REPORT_INTERVAL;

const DEFAULT_HTTP_ADDR: &str = ":8080";
const DEFAULT_DEVICE: &str = "/dev/video0";
const DEFAULT_FPS: u32 = 15;
const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5000;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CamConfigFile {
    http: Option<String>,
    quality: Option<u8>,
    src: Option<String>,
    rec: Option<PathBuf>,
    verbose: Option<bool>,
    stats_interval: Option<u64>,
    write_timeout_ms: Option<u64>,
    camera: Option<CameraConfigFile>,
    motion: Option<MotionConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CameraConfigFile {
    program: Option<String>,
    device: Option<String>,
    fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MotionConfigFile {
    threshold: Option<f32>,
    filter: Option<f32>,
    small_region_fraction: Option<f32>,
    slow_rate: Option<f32>,
    fast_rate_x: Option<f32>,
    fast_rate_y: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CamConfig {
    pub http_addr: String,
    /// JPEG quality for the camera encoder and for re-encoded stream frames.
    pub quality: u8,
    /// Frame source: unset for the camera, `-` for stdin, otherwise a path.
    pub source: Option<String>,
    pub record_dir: Option<PathBuf>,
    pub verbose: bool,
    pub stats_interval: u64,
    pub write_timeout: Duration,
    pub camera: CameraSettings,
    pub motion: MotionConfig,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CameraSettings {
    pub program: String,
    pub device: String,
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

/// Command-line values that take precedence over file and environment.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub device: Option<String>,
    pub fps: Option<u32>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub http_addr: Option<String>,
    pub quality: Option<u8>,
    pub source: Option<String>,
    pub record_dir: Option<PathBuf>,
    pub verbose: Option<bool>,
    pub threshold: Option<f32>,
}

impl Default for CamConfig {
    fn default() -> Self {
        Self::from_file(CamConfigFile::default())
    }
}

impl CamConfig {
    /// Defaults, then `path` (if any), then the environment; validated.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file_cfg = match path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: CamConfigFile) -> Self {
        let camera = file.camera.unwrap_or_default();
        let motion = file.motion.unwrap_or_default();
        let defaults = MotionConfig::default();
        Self {
            http_addr: file.http.unwrap_or_else(|| DEFAULT_HTTP_ADDR.to_string()),
            quality: file.quality.unwrap_or(DEFAULT_QUALITY),
            source: file.src.filter(|src| !src.trim().is_empty()),
            record_dir: file.rec,
            verbose: file.verbose.unwrap_or(true),
            stats_interval: file.stats_interval.unwrap_or(DEFAULT_REPORT_INTERVAL),
            write_timeout: Duration::from_millis(
                file.write_timeout_ms.unwrap_or(DEFAULT_WRITE_TIMEOUT_MS),
            ),
            camera: CameraSettings {
                program: camera.program.unwrap_or_else(|| DEFAULT_PROGRAM.to_string()),
                device: camera.device.unwrap_or_else(|| DEFAULT_DEVICE.to_string()),
                fps: camera.fps.unwrap_or(DEFAULT_FPS),
                width: camera.width.unwrap_or(DEFAULT_WIDTH),
                height: camera.height.unwrap_or(DEFAULT_HEIGHT),
            },
            motion: MotionConfig {
                threshold: motion.threshold.unwrap_or(defaults.threshold),
                filter: motion.filter.unwrap_or(defaults.filter),
                small_region_fraction: motion
                    .small_region_fraction
                    .unwrap_or(defaults.small_region_fraction),
                slow_rate: motion.slow_rate.unwrap_or(defaults.slow_rate),
                fast_rate_x: motion.fast_rate_x.unwrap_or(defaults.fast_rate_x),
                fast_rate_y: motion.fast_rate_y.unwrap_or(defaults.fast_rate_y),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(device) = env_string("MOTIONCAST_DEV") {
            self.camera.device = device;
        }
        if let Some(fps) = env_parse("MOTIONCAST_FPS")? {
            self.camera.fps = fps;
        }
        if let Some(width) = env_parse("MOTIONCAST_WIDTH")? {
            self.camera.width = width;
        }
        if let Some(height) = env_parse("MOTIONCAST_HEIGHT")? {
            self.camera.height = height;
        }
        if let Some(addr) = env_string("MOTIONCAST_HTTP") {
            self.http_addr = addr;
        }
        if let Some(quality) = env_parse("MOTIONCAST_QUALITY")? {
            self.quality = quality;
        }
        if let Some(src) = env_string("MOTIONCAST_SRC") {
            self.source = Some(src);
        }
        if let Some(rec) = env_string("MOTIONCAST_REC") {
            self.record_dir = Some(PathBuf::from(rec));
        }
        if let Some(verbose) = env_string("MOTIONCAST_VERBOSE") {
            self.verbose = parse_bool(&verbose).ok_or_else(|| {
                anyhow!("MOTIONCAST_VERBOSE must be true/false, 1/0 or yes/no")
            })?;
        }
        if let Some(threshold) = env_parse("MOTIONCAST_THRESHOLD")? {
            self.motion.threshold = threshold;
        }
        if let Some(interval) = env_parse("MOTIONCAST_STATS_INTERVAL")? {
            self.stats_interval = interval;
        }
        Ok(())
    }

    pub fn apply_overrides(&mut self, overrides: Overrides) {
        if let Some(device) = overrides.device {
            self.camera.device = device;
        }
        if let Some(fps) = overrides.fps {
            self.camera.fps = fps;
        }
        if let Some(width) = overrides.width {
            self.camera.width = width;
        }
        if let Some(height) = overrides.height {
            self.camera.height = height;
        }
        if let Some(addr) = overrides.http_addr {
            self.http_addr = addr;
        }
        if let Some(quality) = overrides.quality {
            self.quality = quality;
        }
        if let Some(src) = overrides.source {
            self.source = Some(src).filter(|src| !src.trim().is_empty());
        }
        if let Some(rec) = overrides.record_dir {
            self.record_dir = Some(rec);
        }
        if let Some(verbose) = overrides.verbose {
            self.verbose = verbose;
        }
        if let Some(threshold) = overrides.threshold {
            self.motion.threshold = threshold;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=100).contains(&self.quality) {
            return Err(anyhow!("quality must be within 1..=100, got {}", self.quality));
        }
        if self.camera.fps == 0 {
            return Err(anyhow!("fps must be greater than zero"));
        }
        if self.camera.width == 0 || self.camera.height == 0 {
            return Err(anyhow!(
                "frame size must be non-zero, got {}x{}",
                self.camera.width,
                self.camera.height
            ));
        }
        if self.http_addr.trim().is_empty() {
            return Err(anyhow!("http listen address must not be empty"));
        }
        if self.stats_interval == 0 {
            return Err(anyhow!("stats_interval must be greater than zero"));
        }
        if self.write_timeout.is_zero() {
            return Err(anyhow!("write_timeout_ms must be greater than zero"));
        }

        let motion = &self.motion;
        if !(0.0..=1.0).contains(&motion.threshold) {
            return Err(anyhow!("motion threshold must be within [0, 1]"));
        }
        if !(0.0..=1.0).contains(&motion.small_region_fraction) {
            return Err(anyhow!("small_region_fraction must be within [0, 1]"));
        }
        for (name, value) in [
            ("filter", motion.filter),
            ("slow_rate", motion.slow_rate),
            ("fast_rate_x", motion.fast_rate_x),
            ("fast_rate_y", motion.fast_rate_y),
        ] {
            if !(value > 0.0 && value <= 1.0) {
                return Err(anyhow!("motion {} must be within (0, 1], got {}", name, value));
            }
        }
        Ok(())
    }

    pub fn capture(&self) -> CaptureConfig {
        CaptureConfig {
            program: self.camera.program.clone(),
            device: self.camera.device.clone(),
            fps: self.camera.fps,
            width: self.camera.width,
            height: self.camera.height,
            quality: self.quality,
        }
    }
}

fn read_config_file(path: &Path) -> Result<CamConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_string(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>> {
    match env_string(key) {
        Some(value) => value
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} has invalid value '{}'", key, value)),
        None => Ok(None),
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_camera_defaults() {
        let cfg = CamConfig::default();
        assert_eq!(cfg.http_addr, ":8080");
        assert_eq!(cfg.quality, 50);
        assert_eq!(cfg.source, None);
        assert!(cfg.verbose);
        assert_eq!(cfg.stats_interval, 16);
        assert_eq!(cfg.capture(), CaptureConfig::default());
        assert_eq!(cfg.motion, MotionConfig::default());
        cfg.validate().unwrap();
    }

    #[test]
    fn validation_rejects_out_of_range_values() {
        let mut cfg = CamConfig::default();
        cfg.quality = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = CamConfig::default();
        cfg.camera.width = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = CamConfig::default();
        cfg.motion.threshold = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = CamConfig::default();
        cfg.motion.filter = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = CamConfig::default();
        cfg.motion.fast_rate_y = f32::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overrides_win_and_empty_source_means_camera() {
        let mut cfg = CamConfig::default();
        cfg.apply_overrides(Overrides {
            fps: Some(30),
            source: Some(String::new()),
            threshold: Some(0.2),
            verbose: Some(false),
            ..Overrides::default()
        });
        assert_eq!(cfg.camera.fps, 30);
        assert_eq!(cfg.source, None);
        assert_eq!(cfg.motion.threshold, 0.2);
        assert!(!cfg.verbose);
    }

    #[test]
    fn bool_values() {
        assert_eq!(parse_bool("Yes"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
