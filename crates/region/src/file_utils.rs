//! File plumbing shared by the region core.

use std::fs::{self, File};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

const SHIFT_CHUNK_SIZE: u64 = 16 * 1024;

/// Creates the directory chain above `path`. Region forests nest their
/// files in per-world folders that may not exist yet.
pub fn ensure_parent_dir(path: &Path) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Grows the file by `count` bytes at `offset`: everything at and after
/// `offset` moves toward the end, working chunk-wise from the tail so the
/// shifted ranges never overlap a pending read.
///
/// The `count` bytes opened up at `offset` keep stale data; the caller is
/// expected to overwrite them.
pub fn insert_bytes(f: &mut File, offset: u64, count: u64) -> io::Result<()> {
    if count == 0 {
        return Ok(());
    }
    let file_len = f.seek(SeekFrom::End(0))?;
    debug_assert!(offset <= file_len);

    let mut buf = vec![0u8; SHIFT_CHUNK_SIZE as usize];
    let mut pos = file_len;
    while pos > offset {
        let take = (pos - offset).min(SHIFT_CHUNK_SIZE) as usize;
        pos -= take as u64;
        f.seek(SeekFrom::Start(pos))?;
        f.read_exact(&mut buf[..take])?;
        f.seek(SeekFrom::Start(pos + count))?;
        f.write_all(&buf[..take])?;
    }
    Ok(())
}
