//! Bitmap storage and pattern image loading.
//!
//! Cameras and projectors trade pixel data in a handful of normalized
//! formats: 8- and 16-bit grayscale for sensor data, BGR/BGRA for rendered
//! patterns. Anything a decoder or vendor ring buffer hands over is
//! converted into one of these before the rest of the engine sees it, so
//! downstream code (frame store, persistence) never branches on exotic
//! wire formats.

mod decode;
mod filelist;

pub use decode::{decode_png_file, solid_bitmap};
pub use filelist::FileList;

use std::path::PathBuf;

/// Normalized pixel storage formats.
///
/// The `code` values are stable and written into raw frame headers; they
/// must never be renumbered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Gray8,
    Gray16,
    Bgr8,
    Bgra8,
}

impl PixelFormat {
    /// Stable on-disk format code.
    pub fn code(self) -> u8 {
        match self {
            PixelFormat::Gray8 => 2,
            PixelFormat::Gray16 => 5,
            PixelFormat::Bgr8 => 35,
            PixelFormat::Bgra8 => 37,
        }
    }

    /// Inverse of [`PixelFormat::code`].
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(PixelFormat::Gray8),
            5 => Some(PixelFormat::Gray16),
            35 => Some(PixelFormat::Bgr8),
            37 => Some(PixelFormat::Bgra8),
            _ => None,
        }
    }

    pub fn bytes_per_pixel(self) -> u32 {
        match self {
            PixelFormat::Gray8 => 1,
            PixelFormat::Gray16 => 2,
            PixelFormat::Bgr8 => 3,
            PixelFormat::Bgra8 => 4,
        }
    }

    pub fn bits_per_pixel(self) -> u32 {
        self.bytes_per_pixel() * 8
    }

    pub fn is_grayscale(self) -> bool {
        matches!(self, PixelFormat::Gray8 | PixelFormat::Gray16)
    }
}

/// Solid color used for generated patterns. Components in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Rgba {
    pub const BLACK: Rgba = Rgba {
        red: 0.0,
        green: 0.0,
        blue: 0.0,
        alpha: 1.0,
    };

    pub const WHITE: Rgba = Rgba {
        red: 1.0,
        green: 1.0,
        blue: 1.0,
        alpha: 1.0,
    };

    pub fn new(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    /// Quantize to BGRA byte order.
    pub fn to_bgra8(self) -> [u8; 4] {
        let q = |c: f32| (c.clamp(0.0, 1.0) * 255.0).round() as u8;
        [q(self.blue), q(self.green), q(self.red), q(self.alpha)]
    }
}

/// An owned pixel buffer with geometry and format.
#[derive(Debug, Clone, PartialEq)]
pub struct Bitmap {
    pub width: u32,
    pub height: u32,
    /// Bytes per row, `>= width * bytes_per_pixel`.
    pub stride: u32,
    pub format: PixelFormat,
    pub data: Vec<u8>,
}

impl Bitmap {
    /// Allocate a zero-filled bitmap with tight stride.
    pub fn zeroed(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width * format.bytes_per_pixel();
        Self {
            width,
            height,
            stride,
            format,
            data: vec![0; (stride * height) as usize],
        }
    }

    /// All-black fill, the padding pattern for simultaneous batches.
    pub fn black(width: u32, height: u32) -> Self {
        Self::zeroed(width, height, PixelFormat::Gray8)
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }
}

/// Image handling failures.
#[derive(Debug, thiserror::Error)]
pub enum ImageError {
    #[error("i/o error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("png decode error for {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: png::DecodingError,
    },
    #[error("unsupported pixel layout in {path}: {detail}")]
    UnsupportedLayout { path: PathBuf, detail: String },
    #[error("directory {0} contains no pattern images")]
    EmptyDirectory(PathBuf),
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),
}
