use crate::calibration::EyeCalibration;
use crate::fusion::SyncMode;
use anyhow::Result;
use api::PerEye;
use log::info;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OscConfig {
    #[serde(alias = "address")]
    pub send_address: String,
    #[serde(alias = "port")]
    pub send_port: u16,
}

impl Default for OscConfig {
    fn default() -> Self {
        Self {
            send_address: default_osc_address(),
            send_port: default_osc_port(),
        }
    }
}

fn default_osc_address() -> String {
    "127.0.0.1".to_string()
}

fn default_osc_port() -> u16 {
    8889
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Fixed scheduler cadence in ticks per second.
    pub rate_hz: f32,
    /// Interpolation sub-frames between real samples.
    pub interp_steps: u32,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            rate_hz: 60.0,
            interp_steps: 3,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub dt: f32,
    pub q: f32,
    pub r: f32,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            dt: 1.0 / 60.0,
            q: 1.0,
            r: 1.5,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EyesConfig {
    pub flip_x_left: bool,
    pub flip_x_right: bool,
    /// One shared vertical flip for both channels.
    pub flip_y: bool,
    pub sync_mode: SyncMode,
}

impl Default for EyesConfig {
    fn default() -> Self {
        Self {
            flip_x_left: false,
            flip_x_right: false,
            flip_y: false,
            sync_mode: SyncMode::Independent,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub plugins_dir: String,
    /// Filename of the backend to activate, e.g. `uvc_backend.so`.
    pub active: String,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            plugins_dir: "plugins".to_string(),
            active: String::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationConfig {
    /// Episode length used when a start request carries no duration.
    pub default_duration_secs: f32,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            default_duration_secs: 20.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub http_port: u16,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self { http_port: 5425 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct TrackingConfig {
    pub osc: OscConfig,
    pub output: OutputConfig,
    pub filter: FilterConfig,
    pub eyes: EyesConfig,
    pub backend: BackendConfig,
    pub calibration: CalibrationConfig,
    pub control: ControlConfig,
}

impl TrackingConfig {
    /// Load from `path`, creating a default file there when absent.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            info!("Loading config from {:?}", path);
            let file = fs::File::open(path)?;
            let reader = std::io::BufReader::new(file);
            let config = serde_json::from_reader(reader)?;
            Ok(config)
        } else {
            info!("Config not found. Creating default at {:?}", path);
            let config = Self::default();
            let file = fs::File::create(path)?;
            let writer = std::io::BufWriter::new(file);
            serde_json::to_writer_pretty(writer, &config)?;
            Ok(config)
        }
    }
}

/// Persist both eyes' calibration as a flat JSON document.
pub fn save_calibration(path: &Path, calibration: &PerEye<EyeCalibration>) -> Result<()> {
    let file = fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer_pretty(writer, calibration)?;
    Ok(())
}

/// Restore persisted calibration. Missing or unknown fields fall back
/// to the uncalibrated sentinels.
pub fn load_calibration(path: &Path) -> Result<PerEye<EyeCalibration>> {
    let file = fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    let calibration = serde_json::from_reader(reader)?;
    Ok(calibration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips() {
        let config = TrackingConfig::default();
        let json = serde_json::to_string_pretty(&config).unwrap();
        let back: TrackingConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.output.rate_hz, 60.0);
        assert_eq!(back.output.interp_steps, 3);
        assert_eq!(back.osc.send_port, 8889);
    }

    #[test]
    fn missing_sections_take_defaults() {
        let back: TrackingConfig =
            serde_json::from_str(r#"{"osc": {"send_port": 9000}}"#).unwrap();
        assert_eq!(back.osc.send_port, 9000);
        assert_eq!(back.osc.send_address, "127.0.0.1");
        assert_eq!(back.filter.q, 1.0);
        assert_eq!(back.eyes.sync_mode, SyncMode::Independent);
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let back: TrackingConfig = serde_json::from_str(
            r#"{"legacy_field": true, "eyes": {"flip_y": true, "theme": "dark"}}"#,
        )
        .unwrap();
        assert!(back.eyes.flip_y);
    }

    #[test]
    fn sync_mode_accepts_aliases() {
        let back: EyesConfig =
            serde_json::from_str(r#"{"sync_mode": "left"}"#).unwrap();
        assert_eq!(back.sync_mode, SyncMode::LeftControlsBoth);
    }
}
