//! # Region
//!
//! Single-file containers for 3D grids of voxel blocks.
//!
//! A region file persists one fixed-size 3D grid of blocks, addressed by
//! their integer grid coordinates. Many region files tile an unbounded
//! world; this crate is the container for one region.
//!
//! Stored blocks live in fixed-size *sectors* after the header, packed
//! without gaps. Saving a block overwrites it in place when it still fits,
//! compacts followers when it shrank, and relocates it to the end when it
//! grew. An in-memory sector map (one owner per in-use sector) is rebuilt
//! from the header on every open and kept consistent with the file after
//! every operation.
//!
//! ## File layout (v3)
//!
//! ```text
//! ┌─────────────────────────────────────────────────┐
//! │ HEADER                                          │
//! │                                                 │
//! │ magic "VXR_" | version (u8)                     │
//! │ block_size_po2 (u8) | region_size x,y,z (u8 ×3) │
//! │ channel depth tags (u8 × 8)                     │
//! │ sector_size (u16 LE) | palette marker (u8)      │
//! │ [palette: 256 × RGBA8, if marker = 0xff]        │
//! │ block-info table (u32 LE × region volume)       │
//! ├─────────────────────────────────────────────────┤
//! │ SECTOR AREA (sector-aligned block payloads)     │
//! │                                                 │
//! │ payload_len (u32 LE) | payload | zero padding   │
//! │ ... one run of consecutive sectors per block ...│
//! └─────────────────────────────────────────────────┘
//! ```
//!
//! All multi-byte integers are little-endian. A block-info entry packs a
//! 24-bit sector index and an 8-bit sector count into one u32; the value 0
//! means the grid cell holds no block.
//!
//! Region files are single-owner and single-threaded; all I/O is blocking.

use std::io;

use thiserror::Error;

mod file_utils;
mod format;
mod header;
mod region;

pub use format::{
    BlockInfo, Palette, RegionFormat, FILE_EXTENSION, FORMAT_MAGIC, FORMAT_VERSION,
    FORMAT_VERSION_LEGACY_1, FORMAT_VERSION_LEGACY_2, MAX_BLOCKS_ACROSS,
};
pub use header::RegionHeader;
pub use region::RegionFile;

/// Errors surfaced by region file operations.
#[derive(Debug, Error)]
pub enum RegionError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    /// The requested block has no payload in this region. A normal control
    /// signal, not a failure.
    #[error("block does not exist")]
    DoesNotExist,
    #[error("could not create parent directories")]
    CantCreate,
    #[error("region file is not open")]
    NotOpen,
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
}
