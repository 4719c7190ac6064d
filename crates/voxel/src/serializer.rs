//! Block payload codec: [`VoxelBuffer`] <-> opaque compressed bytes.
//!
//! One payload is `[crc32: u32 LE][lz4 block]` where the lz4 block (size
//! prepended) decompresses to one dump per channel:
//!
//! ```text
//! [mode: u8]   0 = uniform, 1 = backed
//! mode 0: [default value, depth-sized LE integer]
//! mode 1: [volume * depth bytes, raw channel elements]
//! ```
//!
//! The destination buffer of [`deserialize`] must already carry the expected
//! size and channel depths; region files configure it from their header
//! format before decoding.

use byteorder::{ByteOrder, LittleEndian};
use crc32fast::Hasher as Crc32;
use thiserror::Error;

use crate::{VoxelBuffer, MAX_CHANNELS};

const CHANNEL_UNIFORM: u8 = 0;
const CHANNEL_BACKED: u8 = 1;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("corrupt block payload: {0}")]
    Corrupt(&'static str),
}

/// Serializes and compresses a block into one opaque payload.
pub fn serialize(block: &VoxelBuffer) -> Vec<u8> {
    let mut body = Vec::with_capacity(MAX_CHANNELS * (1 + 8));
    for channel in 0..MAX_CHANNELS {
        let depth = block.channel_depth(channel);
        match block.channel_data(channel) {
            None => {
                body.push(CHANNEL_UNIFORM);
                let mut elem = [0u8; 8];
                LittleEndian::write_u64(&mut elem, block.channel_default_value(channel));
                body.extend_from_slice(&elem[..depth.byte_count()]);
            }
            Some(data) => {
                body.push(CHANNEL_BACKED);
                body.extend_from_slice(data);
            }
        }
    }

    let compressed = lz4_flex::compress_prepend_size(&body);

    let mut hasher = Crc32::new();
    hasher.update(&compressed);
    let crc = hasher.finalize();

    let mut payload = Vec::with_capacity(4 + compressed.len());
    payload.extend_from_slice(&crc.to_le_bytes());
    payload.extend_from_slice(&compressed);
    payload
}

/// Decompresses and decodes one payload into `out`.
///
/// `out` must be sized and depth-configured for the expected block; a
/// mismatch between its geometry and the payload surfaces as corruption.
pub fn deserialize(payload: &[u8], out: &mut VoxelBuffer) -> Result<(), CodecError> {
    if payload.len() < 4 {
        return Err(CodecError::Corrupt("payload shorter than checksum"));
    }
    let crc = LittleEndian::read_u32(&payload[..4]);
    let compressed = &payload[4..];

    let mut hasher = Crc32::new();
    hasher.update(compressed);
    if hasher.finalize() != crc {
        return Err(CodecError::Corrupt("checksum mismatch"));
    }

    let body = lz4_flex::decompress_size_prepended(compressed)
        .map_err(|_| CodecError::Corrupt("lz4 decompression failed"))?;

    let volume = out.volume();
    let mut at = 0usize;
    for channel in 0..MAX_CHANNELS {
        let depth = out.channel_depth(channel);
        let mode = *body
            .get(at)
            .ok_or(CodecError::Corrupt("truncated channel header"))?;
        at += 1;
        match mode {
            CHANNEL_UNIFORM => {
                let n = depth.byte_count();
                let bytes = body
                    .get(at..at + n)
                    .ok_or(CodecError::Corrupt("truncated uniform value"))?;
                let mut elem = [0u8; 8];
                elem[..n].copy_from_slice(bytes);
                out.fill(LittleEndian::read_u64(&elem), channel);
                at += n;
            }
            CHANNEL_BACKED => {
                let n = volume * depth.byte_count();
                let bytes = body
                    .get(at..at + n)
                    .ok_or(CodecError::Corrupt("truncated channel data"))?;
                out.set_channel_raw(channel, bytes.to_vec());
                at += n;
            }
            _ => return Err(CodecError::Corrupt("unknown channel mode")),
        }
    }
    if at != body.len() {
        return Err(CodecError::Corrupt("trailing bytes after last channel"));
    }
    Ok(())
}
