//! Frame persistence: raw and PNG writers, the on-disk session layout,
//! the acquisition manifest, and the per-camera worker that drains the
//! frame store to disk.
//!
//! Disk layout per acquisition:
//!
//! ```text
//! <root>/<session>/<timestamp+tag>/camera_<k>/NNN_<pattern_id>.png|.raw
//! ```
//!
//! Directories are created lazily on the first write for each camera, so
//! aborted runs leave nothing behind.

mod manifest;
mod raw;
mod worker;

pub use manifest::{CameraManifest, ProjectorManifest, SessionManifest};
pub use raw::{read_raw_file, write_raw_file, RawFrame, RAW_MAGIC, RAW_VERSION};
pub use worker::PersistenceWorker;

use std::io::BufWriter;
use std::path::{Path, PathBuf};

use core_frame::FrameRecord;
use core_image::PixelFormat;

/// Persistence failures.
#[derive(Debug, thiserror::Error)]
pub enum PersistError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("png encode error on {path}: {source}")]
    PngEncode {
        path: PathBuf,
        #[source]
        source: png::EncodingError,
    },
    #[error("malformed raw file {path}: {detail}")]
    MalformedRaw { path: PathBuf, detail: String },
    #[error("manifest serialization failed: {0}")]
    Manifest(#[from] serde_json::Error),
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> PersistError + '_ {
    move |source| PersistError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Output directory naming for one acquisition session.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    session: String,
    recording: String,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        let mut layout = Self {
            root: root.into(),
            session: session.into(),
            recording: String::new(),
        };
        layout.set_recording_to_timestamp("");
        layout
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session(&self) -> &str {
        &self.session
    }

    pub fn set_session(&mut self, session: impl Into<String>) {
        self.session = session.into();
    }

    pub fn recording(&self) -> &str {
        &self.recording
    }

    /// Recording subdirectories always begin with a timestamp; `tag` is
    /// appended when non-empty.
    pub fn set_recording_to_timestamp(&mut self, tag: &str) {
        let stamp = chrono::Local::now().format("%Y%m%dT%H%M%S");
        self.recording = if tag.is_empty() {
            stamp.to_string()
        } else {
            format!("{stamp}_{tag}")
        };
    }

    pub fn recording_dir(&self) -> PathBuf {
        self.root.join(&self.session).join(&self.recording)
    }

    pub fn camera_dir(&self, camera_id: usize) -> PathBuf {
        self.recording_dir().join(format!("camera_{camera_id}"))
    }
}

/// Write a frame record's PNG file.
///
/// Pixel formats map directly: Gray8/Gray16 to grayscale, Bgr8/Bgra8 back
/// to RGB/RGBA byte order on the way out.
pub fn write_png_file(path: &Path, record: &FrameRecord) -> Result<(), PersistError> {
    let pixels = &record.pixels;
    let file = std::fs::File::create(path).map_err(io_err(path))?;
    let mut encoder = png::Encoder::new(BufWriter::new(file), pixels.width, pixels.height);

    let encode_err = |source| PersistError::PngEncode {
        path: path.to_path_buf(),
        source,
    };

    let data: std::borrow::Cow<'_, [u8]> = match pixels.format {
        PixelFormat::Gray8 => {
            encoder.set_color(png::ColorType::Grayscale);
            encoder.set_depth(png::BitDepth::Eight);
            std::borrow::Cow::Borrowed(&pixels.data)
        }
        PixelFormat::Gray16 => {
            encoder.set_color(png::ColorType::Grayscale);
            encoder.set_depth(png::BitDepth::Sixteen);
            // Native little-endian back to PNG's big-endian samples.
            let mut out = pixels.data.clone();
            for px in out.chunks_exact_mut(2) {
                px.swap(0, 1);
            }
            std::borrow::Cow::Owned(out)
        }
        PixelFormat::Bgr8 => {
            encoder.set_color(png::ColorType::Rgb);
            encoder.set_depth(png::BitDepth::Eight);
            let mut out = pixels.data.clone();
            for px in out.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            std::borrow::Cow::Owned(out)
        }
        PixelFormat::Bgra8 => {
            encoder.set_color(png::ColorType::Rgba);
            encoder.set_depth(png::BitDepth::Eight);
            let mut out = pixels.data.clone();
            for px in out.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            std::borrow::Cow::Owned(out)
        }
    };

    let mut writer = encoder.write_header().map_err(encode_err)?;
    writer.write_image_data(&data).map_err(encode_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_frame::FrameMetadata;
    use core_image::Bitmap;

    #[test]
    fn layout_paths_compose() {
        let mut layout = OutputLayout::new("/data", "scan01");
        layout.set_recording_to_timestamp("calib");
        assert!(layout.recording().contains('_'));
        let dir = layout.camera_dir(2);
        let s = dir.to_string_lossy();
        assert!(s.starts_with("/data/scan01/"));
        assert!(s.ends_with("camera_2"));
    }

    #[test]
    fn png_round_trips_gray8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.png");
        let mut pixels = Bitmap::zeroed(4, 2, PixelFormat::Gray8);
        pixels.data.copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        let record = FrameRecord::new(FrameMetadata::new(0, 0, 0), pixels.clone());

        write_png_file(&path, &record).unwrap();
        let decoded = core_image::decode_png_file(&path).unwrap();
        assert_eq!(decoded.format, PixelFormat::Gray8);
        assert_eq!(decoded.data, pixels.data);
    }

    #[test]
    fn png_round_trips_gray16() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame16.png");
        let mut pixels = Bitmap::zeroed(2, 1, PixelFormat::Gray16);
        pixels.data.clear();
        pixels.data.extend_from_slice(&0x0102u16.to_le_bytes());
        pixels.data.extend_from_slice(&0xfffeu16.to_le_bytes());
        let record = FrameRecord::new(FrameMetadata::new(0, 0, 0), pixels.clone());

        write_png_file(&path, &record).unwrap();
        let decoded = core_image::decode_png_file(&path).unwrap();
        assert_eq!(decoded.format, PixelFormat::Gray16);
        assert_eq!(decoded.data, pixels.data);
    }
}
