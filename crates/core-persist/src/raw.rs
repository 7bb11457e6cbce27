//! Raw frame files.
//!
//! A raw file is the fixed little-endian header below followed by the
//! pixel bytes exactly as they sit in the frame record. Reconstruction
//! tooling reads these without any image library, so the header layout is
//! frozen:
//!
//! ```text
//! magic(4) version(u8) width(u32) height(u32) stride(u32)
//! pixel_format_code(u8) pattern_index(u32) projector_id(u16)
//! camera_id(u16) qpc_before_trigger(i64) qpc_after_trigger(i64) flags(u8)
//! ```

use std::io::{Read, Write};
use std::path::Path;

use core_frame::FrameRecord;
use core_image::{Bitmap, PixelFormat};

use crate::{io_err, PersistError};

pub const RAW_MAGIC: [u8; 4] = *b"FRNG";
pub const RAW_VERSION: u8 = 1;

/// Header size in bytes.
const HEADER_LEN: usize = 4 + 1 + 4 + 4 + 4 + 1 + 4 + 2 + 2 + 8 + 8 + 1;

/// A raw file read back into memory.
#[derive(Debug, Clone, PartialEq)]
pub struct RawFrame {
    pub pixels: Bitmap,
    pub pattern_index: u32,
    pub projector_id: u16,
    pub camera_id: u16,
    pub qpc_before_trigger: i64,
    pub qpc_after_trigger: i64,
    pub flags: u8,
}

/// Write a frame record to `path`.
pub fn write_raw_file(path: &Path, record: &FrameRecord) -> Result<(), PersistError> {
    let md = &record.metadata;
    let px = &record.pixels;

    let mut header = Vec::with_capacity(HEADER_LEN);
    header.extend_from_slice(&RAW_MAGIC);
    header.push(RAW_VERSION);
    header.extend_from_slice(&px.width.to_le_bytes());
    header.extend_from_slice(&px.height.to_le_bytes());
    header.extend_from_slice(&px.stride.to_le_bytes());
    header.push(px.format.code());
    header.extend_from_slice(&md.pattern_index.to_le_bytes());
    header.extend_from_slice(&(md.projector_id as u16).to_le_bytes());
    header.extend_from_slice(&(md.camera_id as u16).to_le_bytes());
    header.extend_from_slice(&md.qpc_before_trigger.to_le_bytes());
    header.extend_from_slice(&md.qpc_after_trigger.to_le_bytes());
    header.push(md.flags.bits());
    debug_assert_eq!(header.len(), HEADER_LEN);

    let file = std::fs::File::create(path).map_err(io_err(path))?;
    let mut writer = std::io::BufWriter::new(file);
    writer.write_all(&header).map_err(io_err(path))?;
    writer.write_all(&px.data).map_err(io_err(path))?;
    writer.flush().map_err(io_err(path))?;
    Ok(())
}

/// Read a raw file back; the inverse of [`write_raw_file`].
pub fn read_raw_file(path: &Path) -> Result<RawFrame, PersistError> {
    let malformed = |detail: &str| PersistError::MalformedRaw {
        path: path.to_path_buf(),
        detail: detail.to_string(),
    };

    let file = std::fs::File::open(path).map_err(io_err(path))?;
    let mut reader = std::io::BufReader::new(file);

    let mut header = [0u8; HEADER_LEN];
    reader.read_exact(&mut header).map_err(io_err(path))?;

    if header[0..4] != RAW_MAGIC {
        return Err(malformed("bad magic"));
    }
    if header[4] != RAW_VERSION {
        return Err(malformed("unsupported version"));
    }

    let u32_at = |off: usize| u32::from_le_bytes(header[off..off + 4].try_into().unwrap());
    let u16_at = |off: usize| u16::from_le_bytes(header[off..off + 2].try_into().unwrap());
    let i64_at = |off: usize| i64::from_le_bytes(header[off..off + 8].try_into().unwrap());

    let width = u32_at(5);
    let height = u32_at(9);
    let stride = u32_at(13);
    let format =
        PixelFormat::from_code(header[17]).ok_or_else(|| malformed("unknown pixel format code"))?;
    let pattern_index = u32_at(18);
    let projector_id = u16_at(22);
    let camera_id = u16_at(24);
    let qpc_before_trigger = i64_at(26);
    let qpc_after_trigger = i64_at(34);
    let flags = header[42];

    let expected = (stride as usize) * (height as usize);
    let mut data = vec![0u8; expected];
    reader.read_exact(&mut data).map_err(io_err(path))?;

    Ok(RawFrame {
        pixels: Bitmap {
            width,
            height,
            stride,
            format,
            data,
        },
        pattern_index,
        projector_id,
        camera_id,
        qpc_before_trigger,
        qpc_after_trigger,
        flags,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_frame::{FrameFlags, FrameMetadata};

    fn record() -> FrameRecord {
        let mut md = FrameMetadata::new(3, 7, 42);
        md.qpc_before_trigger = 123_456_789;
        md.qpc_after_trigger = 123_456_999;
        md.flags = FrameFlags::BATCH | FrameFlags::LAST;
        let mut pixels = Bitmap::zeroed(4, 3, PixelFormat::Gray8);
        for (i, px) in pixels.data.iter_mut().enumerate() {
            *px = i as u8;
        }
        FrameRecord::new(md, pixels)
    }

    #[test]
    fn raw_round_trip_is_byte_identical() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("frame.raw");
        let rec = record();

        write_raw_file(&path, &rec).unwrap();
        let back = read_raw_file(&path).unwrap();

        assert_eq!(back.pixels.data, rec.pixels.data);
        assert_eq!(back.pixels.width, 4);
        assert_eq!(back.pixels.height, 3);
        assert_eq!(back.pixels.stride, 4);
        assert_eq!(back.pixels.format, PixelFormat::Gray8);
        assert_eq!(back.pattern_index, 42);
        assert_eq!(back.projector_id, 3);
        assert_eq!(back.camera_id, 7);
        assert_eq!(back.qpc_before_trigger, 123_456_789);
        assert_eq!(back.qpc_after_trigger, 123_456_999);
        assert_eq!(
            back.flags,
            (FrameFlags::BATCH | FrameFlags::LAST).bits()
        );
    }

    #[test]
    fn bad_magic_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("junk.raw");
        std::fs::write(&path, b"NOPE_and_then_some_padding_bytes_to_fill_header____").unwrap();
        assert!(matches!(
            read_raw_file(&path),
            Err(PersistError::MalformedRaw { .. })
        ));
    }

    #[test]
    fn truncated_pixels_are_an_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("short.raw");
        let rec = record();
        write_raw_file(&path, &rec).unwrap();

        // Chop off the last pixel byte.
        let bytes = std::fs::read(&path).unwrap();
        std::fs::write(&path, &bytes[..bytes.len() - 1]).unwrap();
        assert!(matches!(read_raw_file(&path), Err(PersistError::Io { .. })));
    }
}
