//! Header encode/decode.
//!
//! A v3 header is self-describing: it carries the full format (geometry,
//! depths, sector size, optional palette) ahead of the block-info table.
//! Legacy v2 headers hold only magic, version and the table; their geometry
//! must be staged by the caller before the file is opened.

use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use voxel::{Depth, Vec3u};

use crate::format::{BlockInfo, RegionFormat, FORMAT_MAGIC, FORMAT_VERSION};
use crate::RegionError;

/// In-memory image of a region file's header.
#[derive(Debug, Clone)]
pub struct RegionHeader {
    pub version: u8,
    pub format: RegionFormat,
    /// One entry per grid cell, in zxy index order.
    pub blocks: Vec<BlockInfo>,
}

impl RegionHeader {
    /// A fresh current-version header with an all-absent table.
    pub fn with_format(format: RegionFormat) -> Self {
        let volume = format.region_size.volume();
        Self {
            version: FORMAT_VERSION,
            format,
            blocks: vec![BlockInfo::ABSENT; volume],
        }
    }

    /// Encoded byte size at the current version; sector 0 starts here.
    pub fn encoded_size(&self) -> u64 {
        self.format.encoded_header_size()
    }

    /// Writes the full header, magic first. The writer must be positioned
    /// at the start of the file.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(FORMAT_MAGIC)?;
        w.write_u8(self.version)?;

        w.write_u8(self.format.block_size_po2)?;
        w.write_u8(self.format.region_size.x as u8)?;
        w.write_u8(self.format.region_size.y as u8)?;
        w.write_u8(self.format.region_size.z as u8)?;
        for depth in &self.format.channel_depths {
            w.write_u8(depth.to_tag())?;
        }
        w.write_u16::<LittleEndian>(self.format.sector_size)?;
        match &self.format.palette {
            Some(palette) => {
                w.write_u8(0xff)?;
                for color in palette.iter() {
                    w.write_all(color)?;
                }
            }
            None => w.write_u8(0x00)?,
        }

        for info in &self.blocks {
            w.write_u32::<LittleEndian>(info.raw())?;
        }
        Ok(())
    }

    /// Reads a header from the start of a region file.
    ///
    /// `staged` supplies the geometry for legacy versions whose headers do
    /// not carry format information; for v3 it is ignored in favor of the
    /// fields read from the file.
    pub fn read_from<R: Read>(r: &mut R, staged: &RegionFormat) -> Result<Self, RegionError> {
        let mut magic = [0u8; 4];
        r.read_exact(&mut magic).map_err(truncated)?;
        if magic != *FORMAT_MAGIC {
            return Err(RegionError::Parse("bad magic".into()));
        }
        let version = r.read_u8().map_err(truncated)?;
        if !(1..=FORMAT_VERSION).contains(&version) {
            return Err(RegionError::Parse(format!("unknown version {}", version)));
        }

        let mut format = staged.clone();
        if version == FORMAT_VERSION {
            format.block_size_po2 = r.read_u8().map_err(truncated)?;
            format.region_size = Vec3u::new(
                r.read_u8().map_err(truncated)? as u32,
                r.read_u8().map_err(truncated)? as u32,
                r.read_u8().map_err(truncated)? as u32,
            );
            for depth in format.channel_depths.iter_mut() {
                let tag = r.read_u8().map_err(truncated)?;
                *depth = Depth::from_tag(tag)
                    .ok_or_else(|| RegionError::Parse(format!("unknown channel depth {}", tag)))?;
            }
            format.sector_size = r.read_u16::<LittleEndian>().map_err(truncated)?;
            if format.sector_size == 0 {
                return Err(RegionError::Parse("zero sector size".into()));
            }
            let marker = r.read_u8().map_err(truncated)?;
            format.palette = match marker {
                0xff => {
                    let mut palette = [[0u8; 4]; 256];
                    for color in palette.iter_mut() {
                        r.read_exact(color).map_err(truncated)?;
                    }
                    Some(palette)
                }
                0x00 => None,
                _ => {
                    return Err(RegionError::Parse(format!(
                        "unexpected palette marker {:#04x}",
                        marker
                    )))
                }
            };
        }

        let volume = format.region_size.volume();
        let mut blocks = Vec::with_capacity(volume);
        for _ in 0..volume {
            blocks.push(BlockInfo::from_raw(
                r.read_u32::<LittleEndian>().map_err(truncated)?,
            ));
        }

        Ok(Self {
            version,
            format,
            blocks,
        })
    }
}

fn truncated(e: io::Error) -> RegionError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        RegionError::Parse("truncated header".into())
    } else {
        RegionError::Io(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use voxel::MAX_CHANNELS;

    fn sample_header() -> RegionHeader {
        let format = RegionFormat {
            block_size_po2: 4,
            region_size: Vec3u::new(2, 3, 4),
            channel_depths: [
                Depth::Bits8,
                Depth::Bits16,
                Depth::Bits8,
                Depth::Bits64,
                Depth::Bits8,
                Depth::Bits8,
                Depth::Bits32,
                Depth::Bits8,
            ],
            sector_size: 512,
            palette: None,
        };
        let mut header = RegionHeader::with_format(format);
        header.blocks[0] = BlockInfo::new(0, 2);
        header.blocks[5] = BlockInfo::new(2, 1);
        header
    }

    // -------------------- Fixed point --------------------

    #[test]
    fn write_then_read_is_identity() {
        let header = sample_header();
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, header.encoded_size());

        let restored =
            RegionHeader::read_from(&mut Cursor::new(&bytes), &RegionFormat::default()).unwrap();
        assert_eq!(restored.version, header.version);
        assert_eq!(restored.format, header.format);
        assert_eq!(restored.blocks, header.blocks);
    }

    #[test]
    fn write_then_read_with_palette() {
        let mut header = sample_header();
        let mut palette = [[0u8; 4]; 256];
        for (i, color) in palette.iter_mut().enumerate() {
            *color = [i as u8, 255 - i as u8, (i * 7) as u8, 0xff];
        }
        header.format.palette = Some(palette);

        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        assert_eq!(bytes.len() as u64, header.encoded_size());

        let restored =
            RegionHeader::read_from(&mut Cursor::new(&bytes), &RegionFormat::default()).unwrap();
        assert_eq!(restored.format.palette, header.format.palette);
    }

    // -------------------- Encoding details --------------------

    #[test]
    fn header_starts_with_magic_and_version() {
        let mut bytes = Vec::new();
        sample_header().write_to(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], b"VXR_");
        assert_eq!(bytes[4], FORMAT_VERSION);
    }

    #[test]
    fn sector_size_is_little_endian() {
        let mut header = sample_header();
        header.format.sector_size = 0x1234;
        let mut bytes = Vec::new();
        header.write_to(&mut bytes).unwrap();
        // After magic+version, po2, and 3 size bytes come 8 depth tags.
        let at = 5 + 4 + MAX_CHANNELS;
        assert_eq!(&bytes[at..at + 2], &[0x34, 0x12]);
    }

    // -------------------- Rejections --------------------

    #[test]
    fn bad_magic_is_a_parse_error() {
        let mut bytes = Vec::new();
        sample_header().write_to(&mut bytes).unwrap();
        bytes[0] = b'X';
        let err = RegionHeader::read_from(&mut Cursor::new(&bytes), &RegionFormat::default())
            .unwrap_err();
        assert!(matches!(err, RegionError::Parse(_)));
    }

    #[test]
    fn truncated_header_is_a_parse_error() {
        let mut bytes = Vec::new();
        sample_header().write_to(&mut bytes).unwrap();
        bytes.truncate(10);
        let err = RegionHeader::read_from(&mut Cursor::new(&bytes), &RegionFormat::default())
            .unwrap_err();
        assert!(matches!(err, RegionError::Parse(_)));
    }

    #[test]
    fn unknown_depth_tag_is_a_parse_error() {
        let mut bytes = Vec::new();
        sample_header().write_to(&mut bytes).unwrap();
        bytes[9] = 0x77;
        let err = RegionHeader::read_from(&mut Cursor::new(&bytes), &RegionFormat::default())
            .unwrap_err();
        assert!(matches!(err, RegionError::Parse(_)));
    }

    #[test]
    fn unknown_palette_marker_is_a_parse_error() {
        let mut bytes = Vec::new();
        sample_header().write_to(&mut bytes).unwrap();
        let at = 5 + 4 + MAX_CHANNELS + 2;
        bytes[at] = 0x01;
        let err = RegionHeader::read_from(&mut Cursor::new(&bytes), &RegionFormat::default())
            .unwrap_err();
        assert!(matches!(err, RegionError::Parse(_)));
    }

    #[test]
    fn unknown_version_is_a_parse_error() {
        let mut bytes = Vec::new();
        sample_header().write_to(&mut bytes).unwrap();
        bytes[4] = 9;
        let err = RegionHeader::read_from(&mut Cursor::new(&bytes), &RegionFormat::default())
            .unwrap_err();
        assert!(matches!(err, RegionError::Parse(_)));
    }

    // -------------------- Legacy v2 --------------------

    #[test]
    fn v2_header_uses_staged_geometry() {
        let staged = RegionFormat {
            region_size: Vec3u::new(2, 2, 2),
            ..Default::default()
        };
        let mut bytes = Vec::new();
        bytes.extend_from_slice(FORMAT_MAGIC);
        bytes.push(2);
        for i in 0..8u32 {
            let raw = if i == 3 { BlockInfo::new(0, 1).raw() } else { 0 };
            bytes.extend_from_slice(&raw.to_le_bytes());
        }

        let header = RegionHeader::read_from(&mut Cursor::new(&bytes), &staged).unwrap();
        assert_eq!(header.version, 2);
        assert_eq!(header.format, staged);
        assert_eq!(header.blocks.len(), 8);
        assert!(header.blocks[3].sector_count() == 1);
    }
}
