//! The region file proper: open/close, block load/save, the sector
//! allocator, and lazy header migration.

use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use voxel::{serializer, Vec3u, VoxelBuffer, MAX_CHANNELS};

use crate::file_utils;
use crate::format::{
    BlockInfo, RegionFormat, FORMAT_VERSION, FORMAT_VERSION_LEGACY_2, MAGIC_AND_VERSION_SIZE,
};
use crate::header::RegionHeader;
use crate::RegionError;

/// One open region file.
///
/// The instance exclusively owns the file handle between [`open`](Self::open)
/// and [`close`](Self::close); dropping an open instance closes it,
/// persisting a dirty header best-effort.
pub struct RegionFile {
    path: PathBuf,
    file: Option<File>,
    header: RegionHeader,
    /// Owner of each in-use sector, in file order. Rebuilt from the header
    /// on open; the in-use sectors always form the gapless prefix
    /// `[0, sectors.len())`.
    sectors: Vec<Vec3u>,
    /// Byte offset where sector 0 begins; equals the encoded header size.
    blocks_begin_offset: u64,
    header_modified: bool,
}

impl RegionFile {
    pub fn new() -> Self {
        Self {
            path: PathBuf::new(),
            file: None,
            header: RegionHeader::with_format(RegionFormat::default()),
            sectors: Vec::new(),
            blocks_begin_offset: 0,
            header_modified: false,
        }
    }

    /// Opens the region file at `path`, creating it (and its parent
    /// directories) when missing and `create_if_not_found` is set. A created
    /// file gets a fresh header from the staged format (see
    /// [`set_format`](Self::set_format)).
    pub fn open(&mut self, path: &Path, create_if_not_found: bool) -> Result<(), RegionError> {
        if let Err(e) = self.close() {
            log::warn!("discarding close error while reopening: {}", e);
        }
        self.path = path.to_path_buf();

        match OpenOptions::new().read(true).write(true).open(path) {
            Ok(mut f) => {
                let header = RegionHeader::read_from(&mut f, &self.header.format)?;
                self.blocks_begin_offset = f.stream_position()?;
                self.header = header;
                self.file = Some(f);
            }
            Err(open_err) => {
                if !create_if_not_found {
                    return Err(RegionError::Io(open_err));
                }
                file_utils::ensure_parent_dir(path).map_err(|_| RegionError::CantCreate)?;
                let mut f = OpenOptions::new()
                    .read(true)
                    .write(true)
                    .create(true)
                    .open(path)?;
                // A fresh file starts at the current version even if this
                // instance last held a legacy header.
                self.header.version = FORMAT_VERSION;
                self.save_header_to(&mut f)?;
                log::info!("created region file {}", path.display());
                self.file = Some(f);
            }
        }

        self.rebuild_sector_map();
        Ok(())
    }

    /// Closes the file, first persisting the header if any operation dirtied
    /// it. Safe to call when already closed.
    pub fn close(&mut self) -> Result<(), RegionError> {
        let mut result = Ok(());
        if let Some(mut f) = self.file.take() {
            if self.header_modified {
                result = self.save_header_to(&mut f);
            }
        }
        self.sectors.clear();
        result
    }

    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stages the format used when the next [`open`](Self::open) creates a
    /// file. Returns `false` (and stages nothing) when a file is open or the
    /// format fails validation.
    pub fn set_format(&mut self, format: RegionFormat) -> bool {
        if self.file.is_some() {
            log::warn!("can't set the format while a file is open");
            return false;
        }
        if let Err(reason) = format.validate() {
            log::warn!("rejected region format: {}", reason);
            return false;
        }
        self.header = RegionHeader::with_format(format);
        true
    }

    pub fn format(&self) -> &RegionFormat {
        &self.header.format
    }

    pub fn version(&self) -> u8 {
        self.header.version
    }

    /// Number of slots in the block-info table, or 0 when closed.
    pub fn header_block_count(&self) -> usize {
        if !self.is_open() {
            return 0;
        }
        self.header.blocks.len()
    }

    pub fn has_block(&self, position: Vec3u) -> bool {
        if !self.is_open() {
            return false;
        }
        match self.block_index_in_header(position) {
            Ok(i) => !self.header.blocks[i].is_absent(),
            Err(_) => false,
        }
    }

    /// Like [`has_block`](Self::has_block) but by linear header index.
    ///
    /// # Panics
    ///
    /// Panics if `index` is outside the block-info table.
    pub fn has_block_at_index(&self, index: usize) -> bool {
        assert!(index < self.header.blocks.len(), "header index out of range");
        self.is_open() && !self.header.blocks[index].is_absent()
    }

    /// The sector range `(sector_index, sector_count)` a present block
    /// occupies.
    pub fn block_sectors(&self, position: Vec3u) -> Option<(u32, u32)> {
        let info = self.header.blocks[self.block_index_in_header(position).ok()?];
        if info.is_absent() {
            None
        } else {
            Some((info.sector_index(), info.sector_count()))
        }
    }

    /// Present blocks with their sector ranges, in table order.
    pub fn present_blocks(&self) -> impl Iterator<Item = (Vec3u, u32, u32)> + '_ {
        let region_size = self.header.format.region_size;
        self.header
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, info)| !info.is_absent())
            .map(move |(i, info)| {
                (
                    Vec3u::from_zxy_index(i, region_size),
                    info.sector_index(),
                    info.sector_count(),
                )
            })
    }

    /// Total sectors currently referenced by the header.
    pub fn sectors_in_use(&self) -> usize {
        self.sectors.len()
    }

    /// Reads the block at `position` into `out`, resizing it and setting its
    /// channel depths to the region's format first.
    pub fn load_block(&mut self, position: Vec3u, out: &mut VoxelBuffer) -> Result<(), RegionError> {
        let mut f = self.file.take().ok_or(RegionError::NotOpen)?;
        let result = self.load_block_inner(&mut f, position, out);
        self.file = Some(f);
        result
    }

    fn load_block_inner(
        &mut self,
        f: &mut File,
        position: Vec3u,
        out: &mut VoxelBuffer,
    ) -> Result<(), RegionError> {
        let index = self.block_index_in_header(position)?;
        let info = self.header.blocks[index];
        if info.is_absent() {
            return Err(RegionError::DoesNotExist);
        }

        out.resize(self.header.format.block_size());
        for (channel, depth) in self.header.format.channel_depths.iter().enumerate() {
            out.set_channel_depth(channel, *depth);
        }

        let sector_size = self.header.format.sector_size as u64;
        f.seek(SeekFrom::Start(
            self.blocks_begin_offset + info.sector_index() as u64 * sector_size,
        ))?;
        let payload_len = f.read_u32::<LittleEndian>()?;
        if 4 + payload_len as u64 > info.sector_count() as u64 * sector_size {
            return Err(RegionError::Parse(
                "block payload length exceeds its sectors".into(),
            ));
        }
        let mut payload = vec![0u8; payload_len as usize];
        f.read_exact(&mut payload)?;

        serializer::deserialize(&payload, out).map_err(|e| RegionError::Parse(e.to_string()))
    }

    /// Saves a block at `position`, allocating, overwriting in place, or
    /// relocating as needed. Triggers a header migration first when the file
    /// is at a legacy version.
    pub fn save_block(&mut self, position: Vec3u, block: &VoxelBuffer) -> Result<(), RegionError> {
        let mut f = self.file.take().ok_or(RegionError::NotOpen)?;
        let result = self.save_block_inner(&mut f, position, block);
        self.file = Some(f);
        result
    }

    fn save_block_inner(
        &mut self,
        f: &mut File,
        position: Vec3u,
        block: &VoxelBuffer,
    ) -> Result<(), RegionError> {
        self.verify_block_format(block)?;

        if self.header.version != FORMAT_VERSION {
            self.migrate_to_latest(f)?;
        }

        let index = self.block_index_in_header(position)?;
        let sector_size = self.header.format.sector_size as u64;
        let payload = serializer::serialize(block);
        let written_size = 4 + payload.len() as u64;
        let new_count = self.header.format.sector_count_from_bytes(written_size);

        let info = self.header.blocks[index];
        if info.is_absent() {
            // The block isn't in the file yet, append at the end.
            let block_offset = self.blocks_begin_offset + self.sectors.len() as u64 * sector_size;
            f.seek(SeekFrom::Start(block_offset))?;
            f.write_u32::<LittleEndian>(payload.len() as u32)?;
            f.write_all(&payload)?;
            self.pad_to_sector_size(f)?;

            self.header.blocks[index] = BlockInfo::new(self.sectors.len() as u32, new_count);
            for _ in 0..new_count {
                self.sectors.push(position);
            }
            self.header_modified = true;
        } else {
            debug_assert!(!self.sectors.is_empty());
            let old_sector_index = info.sector_index();
            let old_count = info.sector_count();

            if new_count <= old_count {
                // It still fits where it is.
                if new_count < old_count {
                    // The block shrank; give the freed tail back and compact.
                    self.remove_sectors(f, position, old_count - new_count)?;
                    self.header_modified = true;
                }
                let block_offset = self.blocks_begin_offset + old_sector_index as u64 * sector_size;
                f.seek(SeekFrom::Start(block_offset))?;
                f.write_u32::<LittleEndian>(payload.len() as u32)?;
                f.write_all(&payload)?;
                // No padding: the length prefix bounds any read, stale tail
                // bytes in the last sector are unreachable.
            } else {
                // The block grew. Instead of shifting followers forward,
                // drop its sectors entirely and rewrite it at the end.
                self.remove_sectors(f, position, old_count)?;

                let block_offset =
                    self.blocks_begin_offset + self.sectors.len() as u64 * sector_size;
                f.seek(SeekFrom::Start(block_offset))?;
                f.write_u32::<LittleEndian>(payload.len() as u32)?;
                f.write_all(&payload)?;
                self.pad_to_sector_size(f)?;

                self.header.blocks[index].set_sector_index(self.sectors.len() as u32);
                for _ in 0..new_count {
                    self.sectors.push(position);
                }
                self.header_modified = true;
            }
            self.header.blocks[index].set_sector_count(new_count);
        }
        Ok(())
    }

    fn verify_block_format(&self, block: &VoxelBuffer) -> Result<(), RegionError> {
        if block.size() != self.header.format.block_size() {
            return Err(RegionError::InvalidParameter(
                "block size does not match the region format",
            ));
        }
        for channel in 0..MAX_CHANNELS {
            if block.channel_depth(channel) != self.header.format.channel_depths[channel] {
                return Err(RegionError::InvalidParameter(
                    "channel depths do not match the region format",
                ));
            }
        }
        Ok(())
    }

    /// Removes the last `n` sectors owned by the block at `block_pos`, then
    /// slides every sector after the removed run leftward to close the gap,
    /// in the file and in the sector map.
    fn remove_sectors(
        &mut self,
        f: &mut File,
        block_pos: Vec3u,
        n: u32,
    ) -> Result<(), RegionError> {
        assert!(n > 0);
        let sector_size = self.header.format.sector_size as u64;
        let old_end_offset = self.blocks_begin_offset + self.sectors.len() as u64 * sector_size;

        let index = self.block_index_in_header(block_pos)?;
        let info = self.header.blocks[index];
        assert!(n <= info.sector_count());
        debug_assert!((info.sector_index() + info.sector_count()) as usize <= self.sectors.len());
        // Removing the last sectors of the whole region is not a known use
        // case; the allocator never ends up here with an emptied map.
        assert!(self.sectors.len() as u64 > n as u64);

        let mut src = self.blocks_begin_offset
            + (info.sector_index() + info.sector_count()) as u64 * sector_size;
        let mut dst = src - n as u64 * sector_size;
        assert!(dst >= self.blocks_begin_offset);

        let mut buf = vec![0u8; sector_size as usize];
        while src < old_end_offset {
            f.seek(SeekFrom::Start(src))?;
            f.read_exact(&mut buf)?;
            f.seek(SeekFrom::Start(dst))?;
            f.write_all(&buf)?;
            src += sector_size;
            dst += sector_size;
        }

        // The sector area is n sectors shorter now; drop the stale tail.
        f.set_len(old_end_offset - n as u64 * sector_size)?;

        let erase_end = (info.sector_index() + info.sector_count()) as usize;
        self.sectors.drain(erase_end - n as usize..erase_end);

        let old_sector_index = info.sector_index();
        let entry = &mut self.header.blocks[index];
        if entry.sector_count() > n {
            entry.set_sector_count(entry.sector_count() - n);
        } else {
            *entry = BlockInfo::ABSENT;
        }

        if (old_sector_index as usize) < self.sectors.len() {
            for entry in &mut self.header.blocks {
                if !entry.is_absent() && entry.sector_index() > old_sector_index {
                    entry.set_sector_index(entry.sector_index() - n);
                }
            }
        }
        Ok(())
    }

    /// Writes zero bytes up to the next sector boundary, measured from the
    /// start of the sector area.
    fn pad_to_sector_size(&self, f: &mut File) -> io::Result<()> {
        let sector_size = self.header.format.sector_size as u64;
        let relative = f.stream_position()? - self.blocks_begin_offset;
        let pad = (sector_size - relative % sector_size) % sector_size;
        if pad > 0 {
            f.write_all(&vec![0u8; pad as usize])?;
        }
        Ok(())
    }

    fn save_header_to(&mut self, f: &mut File) -> Result<(), RegionError> {
        if self.header.version != FORMAT_VERSION {
            self.migrate_to_latest(f)?;
        }
        f.seek(SeekFrom::Start(0))?;
        self.header.write_to(f)?;
        self.blocks_begin_offset = f.stream_position()?;
        debug_assert_eq!(self.blocks_begin_offset, self.header.encoded_size());
        self.header_modified = false;
        Ok(())
    }

    fn migrate_to_latest(&mut self, f: &mut File) -> Result<(), RegionError> {
        match self.header.version {
            FORMAT_VERSION => Ok(()),
            FORMAT_VERSION_LEGACY_2 => self.migrate_from_v2_to_v3(f),
            v => Err(RegionError::Unavailable(format!(
                "no migration path from version {}",
                v
            ))),
        }
    }

    /// Widens the header in place: the tail of the file (old table + sector
    /// area) shifts forward to make room for the v3 format fields, then the
    /// full v3 header is rewritten over the front.
    fn migrate_from_v2_to_v3(&mut self, f: &mut File) -> Result<(), RegionError> {
        log::info!(
            "migrating region file {} from v2 to v3",
            self.path.display()
        );

        if self.header.format.block_size_po2 == 0 {
            return Err(RegionError::Unavailable(
                "cannot migrate without a staged format".into(),
            ));
        }

        let old_header_size = self.header.format.region_size.volume() as u64 * 4;
        let new_header_size = self.header.encoded_size() - MAGIC_AND_VERSION_SIZE;
        debug_assert!(new_header_size >= old_header_size);
        let extra = new_header_size - old_header_size;

        file_utils::insert_bytes(f, MAGIC_AND_VERSION_SIZE, extra)?;

        // Flip the version before saving, otherwise save_header_to would
        // enter migration again and recurse.
        self.header.version = FORMAT_VERSION;
        self.save_header_to(f)
    }

    fn block_index_in_header(&self, position: Vec3u) -> Result<usize, RegionError> {
        if !position.is_inside(self.header.format.region_size) {
            return Err(RegionError::InvalidParameter(
                "block position outside the region",
            ));
        }
        Ok(position.zxy_index(self.header.format.region_size))
    }

    /// Rebuilds the sector map from the block-info table. Blocks are laid
    /// down in ascending sector order, so a well-formed table yields the
    /// gapless ownership prefix by construction.
    fn rebuild_sector_map(&mut self) {
        debug_assert!(self.sectors.is_empty());
        let mut present: Vec<(BlockInfo, usize)> = self
            .header
            .blocks
            .iter()
            .enumerate()
            .filter(|(_, info)| !info.is_absent())
            .map(|(i, info)| (*info, i))
            .collect();
        present.sort_by_key(|(info, _)| info.sector_index());

        for (info, i) in present {
            let pos = Vec3u::from_zxy_index(i, self.header.format.region_size);
            for _ in 0..info.sector_count() {
                self.sectors.push(pos);
            }
        }
    }
}

impl Default for RegionFile {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for RegionFile {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close() {
                log::warn!(
                    "error while closing region file {}: {}",
                    self.path.display(),
                    e
                );
            }
        }
    }
}
