//! Printable summaries of an open region file.

use std::fmt::Write;

use region::RegionFile;

pub fn format_info(r: &RegionFile, file_len: u64) -> String {
    let format = r.format();
    let mut out = String::new();
    let _ = writeln!(out, "version:        {}", r.version());
    let _ = writeln!(
        out,
        "block size:     {}^3 (po2 {})",
        format.block_edge(),
        format.block_size_po2
    );
    let _ = writeln!(
        out,
        "region size:    {}x{}x{} ({} slots)",
        format.region_size.x,
        format.region_size.y,
        format.region_size.z,
        r.header_block_count()
    );
    let depths: Vec<String> = format
        .channel_depths
        .iter()
        .map(|d| d.bit_count().to_string())
        .collect();
    let _ = writeln!(out, "channel depths: [{}]", depths.join(", "));
    let _ = writeln!(out, "sector size:    {}", format.sector_size);
    let _ = writeln!(
        out,
        "palette:        {}",
        if format.palette.is_some() {
            "256 colors"
        } else {
            "none"
        }
    );
    let _ = writeln!(out, "header size:    {} bytes", format.encoded_header_size());
    let _ = writeln!(out, "present blocks: {}", r.present_blocks().count());
    let _ = writeln!(
        out,
        "sectors in use: {} ({} bytes)",
        r.sectors_in_use(),
        r.sectors_in_use() as u64 * format.sector_size as u64
    );
    let _ = writeln!(out, "file size:      {} bytes", file_len);
    out
}

pub fn format_blocks(r: &RegionFile) -> String {
    let mut out = String::new();
    for (pos, sector_index, sector_count) in r.present_blocks() {
        let _ = writeln!(
            out,
            "({}, {}, {}): sectors {}..{} ({})",
            pos.x,
            pos.y,
            pos.z,
            sector_index,
            sector_index + sector_count,
            sector_count
        );
    }
    out
}
