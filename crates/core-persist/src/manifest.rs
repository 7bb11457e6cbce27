//! Acquisition session manifest.
//!
//! One JSON document per session records what the rig looked like when
//! the data was taken: attached projectors with their timing, attached
//! cameras with their backends and exposures, and the structured-light
//! method. Reconstruction reads this instead of guessing from filenames.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::PersistError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProjectorManifest {
    pub id: usize,
    pub refresh_hz: f64,
    pub delay_ms: f64,
    pub present_interval_vblanks: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CameraManifest {
    pub id: usize,
    pub projector_id: usize,
    pub backend: String,
    pub identifier: String,
    pub exposure_us: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionManifest {
    pub session: String,
    pub recording: String,
    /// RFC 3339 local creation timestamp.
    pub created: String,
    /// Structured-light method tag (e.g. `psgc_col`, `mps2_all`).
    pub sl_method: String,
    pub projectors: Vec<ProjectorManifest>,
    pub cameras: Vec<CameraManifest>,
}

impl SessionManifest {
    pub fn new(session: impl Into<String>, recording: impl Into<String>, sl_method: impl Into<String>) -> Self {
        Self {
            session: session.into(),
            recording: recording.into(),
            created: chrono::Local::now().to_rfc3339(),
            sl_method: sl_method.into(),
            projectors: Vec::new(),
            cameras: Vec::new(),
        }
    }

    /// Write `manifest.json` into `dir`.
    pub fn write_to(&self, dir: &Path) -> Result<(), PersistError> {
        std::fs::create_dir_all(dir).map_err(crate::io_err(dir))?;
        let path = dir.join("manifest.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json).map_err(crate::io_err(&path))?;
        Ok(())
    }

    pub fn read_from(dir: &Path) -> Result<Self, PersistError> {
        let path = dir.join("manifest.json");
        let json = std::fs::read_to_string(&path).map_err(crate::io_err(&path))?;
        Ok(serde_json::from_str(&json)?)
    }
}
