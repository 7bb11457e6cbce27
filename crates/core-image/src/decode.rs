//! PNG decoding into normalized bitmaps.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use crate::{Bitmap, ImageError, PixelFormat, Rgba};

/// Decode a PNG file into a normalized [`Bitmap`].
///
/// Grayscale stays grayscale (8- or 16-bit, sixteen-bit samples converted
/// to native little-endian), RGB becomes BGR, RGBA becomes BGRA, and
/// grayscale-with-alpha drops the alpha channel. Palette and sub-byte
/// images are expanded by the decoder before conversion.
pub fn decode_png_file(path: &Path) -> Result<Bitmap, ImageError> {
    let file = File::open(path).map_err(|source| ImageError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let mut decoder = png::Decoder::new(BufReader::new(file));
    decoder.set_transformations(png::Transformations::EXPAND);
    let mut reader = decoder.read_info().map_err(|source| ImageError::Decode {
        path: path.to_path_buf(),
        source,
    })?;
    let mut buf = vec![0u8; reader.output_buffer_size()];
    let info = reader
        .next_frame(&mut buf)
        .map_err(|source| ImageError::Decode {
            path: path.to_path_buf(),
            source,
        })?;
    buf.truncate(info.buffer_size());

    let width = info.width;
    let height = info.height;
    let pixels = (width as usize) * (height as usize);

    let unsupported = |detail: &str| ImageError::UnsupportedLayout {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    };

    let (format, data) = match (info.color_type, info.bit_depth) {
        (png::ColorType::Grayscale, png::BitDepth::Eight) => (PixelFormat::Gray8, buf),
        (png::ColorType::Grayscale, png::BitDepth::Sixteen) => {
            // PNG streams 16-bit samples big-endian; flip to native order.
            let mut out = buf;
            for px in out.chunks_exact_mut(2) {
                px.swap(0, 1);
            }
            (PixelFormat::Gray16, out)
        }
        (png::ColorType::GrayscaleAlpha, png::BitDepth::Eight) => {
            let mut out = Vec::with_capacity(pixels);
            for px in buf.chunks_exact(2) {
                out.push(px[0]);
            }
            (PixelFormat::Gray8, out)
        }
        (png::ColorType::Rgb, png::BitDepth::Eight) => {
            let mut out = buf;
            for px in out.chunks_exact_mut(3) {
                px.swap(0, 2);
            }
            (PixelFormat::Bgr8, out)
        }
        (png::ColorType::Rgba, png::BitDepth::Eight) => {
            let mut out = buf;
            for px in out.chunks_exact_mut(4) {
                px.swap(0, 2);
            }
            (PixelFormat::Bgra8, out)
        }
        (color, depth) => {
            return Err(unsupported(&format!("{color:?}/{depth:?}")));
        }
    };

    let stride = width * format.bytes_per_pixel();
    if data.len() != (stride as usize) * (height as usize) {
        return Err(unsupported("row stride mismatch after conversion"));
    }

    tracing::trace!(
        target: "image.decode",
        path = %path.display(),
        width,
        height,
        ?format,
        "decoded pattern image"
    );

    Ok(Bitmap {
        width,
        height,
        stride,
        format,
        data,
    })
}

/// Generate a solid-color BGRA bitmap.
pub fn solid_bitmap(color: Rgba, width: u32, height: u32) -> Bitmap {
    let px = color.to_bgra8();
    let mut bmp = Bitmap::zeroed(width, height, PixelFormat::Bgra8);
    for chunk in bmp.data.chunks_exact_mut(4) {
        chunk.copy_from_slice(&px);
    }
    bmp
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufWriter;

    fn write_png(
        path: &Path,
        width: u32,
        height: u32,
        color: png::ColorType,
        depth: png::BitDepth,
        data: &[u8],
    ) {
        let file = File::create(path).unwrap();
        let mut encoder = png::Encoder::new(BufWriter::new(file), width, height);
        encoder.set_color(color);
        encoder.set_depth(depth);
        let mut writer = encoder.write_header().unwrap();
        writer.write_image_data(data).unwrap();
    }

    #[test]
    fn decodes_gray8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g8.png");
        let data: Vec<u8> = (0..16).collect();
        write_png(&path, 4, 4, png::ColorType::Grayscale, png::BitDepth::Eight, &data);

        let bmp = decode_png_file(&path).unwrap();
        assert_eq!(bmp.format, PixelFormat::Gray8);
        assert_eq!(bmp.width, 4);
        assert_eq!(bmp.height, 4);
        assert_eq!(bmp.data, data);
    }

    #[test]
    fn decodes_gray16_to_native_endian() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g16.png");
        // One pixel with value 0x0102, big-endian on the wire.
        write_png(
            &path,
            1,
            1,
            png::ColorType::Grayscale,
            png::BitDepth::Sixteen,
            &[0x01, 0x02],
        );

        let bmp = decode_png_file(&path).unwrap();
        assert_eq!(bmp.format, PixelFormat::Gray16);
        let value = u16::from_le_bytes([bmp.data[0], bmp.data[1]]);
        assert_eq!(value, 0x0102);
    }

    #[test]
    fn decodes_rgb_as_bgr() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rgb.png");
        write_png(
            &path,
            1,
            1,
            png::ColorType::Rgb,
            png::BitDepth::Eight,
            &[10, 20, 30],
        );

        let bmp = decode_png_file(&path).unwrap();
        assert_eq!(bmp.format, PixelFormat::Bgr8);
        assert_eq!(bmp.data, vec![30, 20, 10]);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = decode_png_file(Path::new("/nonexistent/p.png")).unwrap_err();
        assert!(matches!(err, ImageError::Io { .. }));
    }

    #[test]
    fn solid_fill_repeats_color() {
        let bmp = solid_bitmap(Rgba::new(1.0, 0.0, 0.0, 1.0), 2, 2);
        assert_eq!(bmp.format, PixelFormat::Bgra8);
        assert_eq!(bmp.data.len(), 16);
        for px in bmp.data.chunks_exact(4) {
            assert_eq!(px, &[0, 0, 255, 255]);
        }
    }
}
