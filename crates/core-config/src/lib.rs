//! Configuration loading and parsing.
//!
//! `fringe.toml` describes the rig: where acquisitions land on disk, the
//! display timing defaults, the acquisition mode flags, and one table
//! entry per projector and per camera. Discovery prefers an explicit
//! path, then the working directory, then the platform config dir.
//! Unknown fields are ignored (TOML deserialization tolerance) so the
//! file format can grow without breaking older configs; numeric inputs
//! are clamped into valid ranges in [`Config::validated`] rather than
//! rejected.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// Default pattern queue capacity.
const DEFAULT_QUEUE_HIGH: usize = 18;

#[derive(Debug, Deserialize, Clone)]
pub struct EngineSection {
    #[serde(default = "EngineSection::default_output_root")]
    pub output_root: PathBuf,
    #[serde(default = "EngineSection::default_session")]
    pub session: String,
    #[serde(default = "EngineSection::default_true")]
    pub save_png: bool,
    #[serde(default)]
    pub save_raw: bool,
    #[serde(default = "EngineSection::default_sl_method")]
    pub sl_method: String,
    /// Pattern queue high watermark; low defaults to half.
    #[serde(default = "EngineSection::default_queue_high")]
    pub queue_high_watermark: usize,
    #[serde(default)]
    pub queue_low_watermark: Option<usize>,
}

impl EngineSection {
    fn default_output_root() -> PathBuf {
        PathBuf::from("./data")
    }
    fn default_session() -> String {
        "session".to_string()
    }
    fn default_sl_method() -> String {
        "psgc_col".to_string()
    }
    fn default_queue_high() -> usize {
        DEFAULT_QUEUE_HIGH
    }
    fn default_true() -> bool {
        true
    }
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            output_root: Self::default_output_root(),
            session: Self::default_session(),
            save_png: true,
            save_raw: false,
            sl_method: Self::default_sl_method(),
            queue_high_watermark: Self::default_queue_high(),
            queue_low_watermark: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct AcquisitionSection {
    #[serde(default = "AcquisitionSection::default_true")]
    pub blocking: bool,
    #[serde(default)]
    pub concurrent_delay: bool,
    #[serde(default)]
    pub delay_ms: f64,
    #[serde(default = "AcquisitionSection::default_present_interval")]
    pub present_interval_vblanks: i64,
    #[serde(default = "AcquisitionSection::default_exposure_us")]
    pub exposure_us: f64,
}

impl AcquisitionSection {
    fn default_present_interval() -> i64 {
        1
    }
    fn default_exposure_us() -> f64 {
        10_000.0
    }
    fn default_true() -> bool {
        true
    }
}

impl Default for AcquisitionSection {
    fn default() -> Self {
        Self {
            blocking: true,
            concurrent_delay: false,
            delay_ms: 0.0,
            present_interval_vblanks: Self::default_present_interval(),
            exposure_us: Self::default_exposure_us(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DisplaySection {
    #[serde(default = "DisplaySection::default_refresh_hz")]
    pub refresh_hz: f64,
    #[serde(default = "DisplaySection::default_width")]
    pub width: u32,
    #[serde(default = "DisplaySection::default_height")]
    pub height: u32,
}

impl DisplaySection {
    fn default_refresh_hz() -> f64 {
        60.0
    }
    fn default_width() -> u32 {
        1024
    }
    fn default_height() -> u32 {
        768
    }
}

impl Default for DisplaySection {
    fn default() -> Self {
        Self {
            refresh_hz: Self::default_refresh_hz(),
            width: Self::default_width(),
            height: Self::default_height(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProjectorSection {
    pub pattern_directory: PathBuf,
    #[serde(default = "ProjectorSection::default_true")]
    pub cycle: bool,
}

impl ProjectorSection {
    fn default_true() -> bool {
        true
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct CameraSection {
    /// Index into the `projectors` table this camera is bound to.
    #[serde(default)]
    pub projector: usize,
    #[serde(default = "CameraSection::default_backend")]
    pub backend: String,
    #[serde(default = "CameraSection::default_identifier")]
    pub identifier: String,
    #[serde(default = "CameraSection::default_width")]
    pub width: u32,
    #[serde(default = "CameraSection::default_height")]
    pub height: u32,
    /// Input directory for the from-file backend.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl CameraSection {
    fn default_backend() -> String {
        "software".to_string()
    }
    fn default_identifier() -> String {
        "camera".to_string()
    }
    fn default_width() -> u32 {
        640
    }
    fn default_height() -> u32 {
        480
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct ConfigFile {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub acquisition: AcquisitionSection,
    #[serde(default)]
    pub display: DisplaySection,
    #[serde(default)]
    pub projectors: Vec<ProjectorSection>,
    #[serde(default)]
    pub cameras: Vec<CameraSection>,
}

/// Parsed configuration plus the source it came from.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub raw: Option<String>,
    pub file: ConfigFile,
}

impl Config {
    /// Apply range clamps and cross-field fixups.
    pub fn validated(mut self) -> Self {
        let engine = &mut self.file.engine;
        if engine.queue_high_watermark == 0 {
            engine.queue_high_watermark = DEFAULT_QUEUE_HIGH;
        }
        let high = engine.queue_high_watermark;
        let low = engine
            .queue_low_watermark
            .unwrap_or(high / 2)
            .min(high.saturating_sub(1));
        engine.queue_low_watermark = Some(low);

        let acq = &mut self.file.acquisition;
        acq.delay_ms = acq.delay_ms.max(0.0);
        acq.exposure_us = acq.exposure_us.max(0.0);
        acq.present_interval_vblanks = acq.present_interval_vblanks.max(1);

        let projector_count = self.file.projectors.len();
        for camera in &mut self.file.cameras {
            if camera.projector >= projector_count && projector_count > 0 {
                tracing::warn!(
                    target: "config",
                    projector = camera.projector,
                    "camera bound to missing projector; rebinding to 0"
                );
                camera.projector = 0;
            }
        }
        self
    }

    /// Effective (low, high) pattern queue watermarks.
    pub fn queue_watermarks(&self) -> (usize, usize) {
        let high = self.file.engine.queue_high_watermark;
        (
            self.file.engine.queue_low_watermark.unwrap_or(high / 2),
            high,
        )
    }
}

/// Best-effort config path following platform conventions: the working
/// directory `fringe.toml` wins, then the platform config dir.
pub fn discover() -> PathBuf {
    let local = PathBuf::from("fringe.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("fringe").join("fringe.toml");
    }
    PathBuf::from("fringe.toml")
}

/// Load from an explicit path or discovery. A missing file yields the
/// defaults; a present-but-malformed file is an error.
pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    match std::fs::read_to_string(&path) {
        Ok(content) => {
            let file: ConfigFile = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            info!(target: "config", path = %path.display(), "configuration loaded");
            Ok(Config {
                raw: Some(content),
                file,
            }
            .validated())
        }
        Err(_) => {
            info!(target: "config", path = %path.display(), "no configuration file; using defaults");
            Ok(Config::default().validated())
        }
    }
}

/// Parse configuration from an in-memory string.
pub fn load_str(content: &str) -> Result<Config> {
    let file: ConfigFile = toml::from_str(content).context("failed to parse configuration")?;
    Ok(Config {
        raw: Some(content.to_string()),
        file,
    }
    .validated())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_apply_when_file_missing() {
        let config = load_from(Some(PathBuf::from("/nonexistent/fringe.toml"))).unwrap();
        assert!(config.file.engine.save_png);
        assert!(!config.file.engine.save_raw);
        assert_eq!(config.queue_watermarks(), (9, 18));
        assert!(config.file.projectors.is_empty());
    }

    #[test]
    fn full_file_parses() {
        let config = load_str(
            r#"
            [engine]
            output_root = "/data/scans"
            session = "turbine"
            save_raw = true
            queue_high_watermark = 12

            [acquisition]
            blocking = false
            delay_ms = 20.0
            exposure_us = 8000.0

            [display]
            refresh_hz = 120.0

            [[projectors]]
            pattern_directory = "/patterns/a"

            [[projectors]]
            pattern_directory = "/patterns/b"
            cycle = false

            [[cameras]]
            projector = 1
            backend = "from-file"
            identifier = "replay0"
            directory = "/frames"
            "#,
        )
        .unwrap();

        assert_eq!(config.file.engine.session, "turbine");
        assert!(config.file.engine.save_raw);
        assert_eq!(config.queue_watermarks(), (6, 12));
        assert!(!config.file.acquisition.blocking);
        assert_eq!(config.file.display.refresh_hz, 120.0);
        assert_eq!(config.file.projectors.len(), 2);
        assert!(!config.file.projectors[1].cycle);
        assert_eq!(config.file.cameras[0].projector, 1);
        assert_eq!(config.file.cameras[0].backend, "from-file");
    }

    #[test]
    fn unknown_fields_are_tolerated() {
        let config = load_str(
            r#"
            [engine]
            session = "x"
            future_knob = 42
            "#,
        )
        .unwrap();
        assert_eq!(config.file.engine.session, "x");
    }

    #[test]
    fn camera_bound_to_missing_projector_is_rebound() {
        let config = load_str(
            r#"
            [[projectors]]
            pattern_directory = "/p"

            [[cameras]]
            projector = 5
            "#,
        )
        .unwrap();
        assert_eq!(config.file.cameras[0].projector, 0);
    }

    #[test]
    fn clamps_apply() {
        let config = load_str(
            r#"
            [acquisition]
            delay_ms = -3.0
            present_interval_vblanks = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.file.acquisition.delay_ms, 0.0);
        assert_eq!(config.file.acquisition.present_interval_vblanks, 1);
    }

    #[test]
    fn config_file_on_disk_loads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fringe.toml");
        std::fs::write(&path, "[engine]\nsession = \"disk\"\n").unwrap();
        let config = load_from(Some(path)).unwrap();
        assert_eq!(config.file.engine.session, "disk");
        assert!(config.raw.is_some());
    }
}
