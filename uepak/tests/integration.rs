//! End-to-end archive scenarios exercised through the public API only.

use std::io::{Cursor, Write};

use uepak::{Compression, Entry, Footer, Index, PakBuilder, Version, MAGIC};

/// S2: reading back a small archive whose only entry is a run of zero
/// bytes. No third-party-produced fixture ships with this crate, so the
/// archive is synthesized with the writer instead of loaded from disk.
#[test]
fn s2_read_archive_with_single_zero_filled_entry() {
    let buf = Cursor::new(Vec::new());
    let mut writer = PakBuilder::new().writer(buf, Version::V5, "../../../".to_string(), None);
    writer.add_file("zeros.bin", vec![0u8; 1024]);
    let mut archive = writer.write().unwrap();

    archive.set_position(0);
    let reader = PakBuilder::new().reader(&mut archive).unwrap();
    assert_eq!(reader.version(), Version::V5);
    assert_eq!(reader.read_file("zeros.bin", &mut archive).unwrap(), vec![0u8; 1024]);
}

/// S4: a V9 archive with a single Zlib-compressed 1 MiB file split into
/// 64 KiB blocks decompresses back to the exact original bytes.
#[cfg(feature = "compression")]
#[test]
fn s4_multi_block_zlib_entry_round_trips_byte_identical() {
    use flate2::write::ZlibEncoder;

    let version = Version::V9;
    let names = vec![Compression::Zlib];
    const BLOCK_SIZE: usize = 65536;
    let raw: Vec<u8> = (0..1024 * 1024).map(|i| (i % 251) as u8).collect();

    let mut compressed_blocks = Vec::new();
    for chunk in raw.chunks(BLOCK_SIZE) {
        let mut enc = ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(chunk).unwrap();
        compressed_blocks.push(enc.finish().unwrap());
    }

    let header_size = Entry::serialized_size(version, Compression::Zlib, compressed_blocks.len() as u64);
    let mut blocks = Vec::with_capacity(compressed_blocks.len());
    let mut cursor = header_size;
    for block in &compressed_blocks {
        let end = cursor + block.len() as u64;
        blocks.push(uepak::Block { start: cursor, end });
        cursor = end;
    }
    let compressed_size: u64 = compressed_blocks.iter().map(|b| b.len() as u64).sum();

    let mut archive = Cursor::new(Vec::new());
    let offset = archive.position();
    let entry = Entry {
        offset,
        compressed_size,
        size: raw.len() as u64,
        compression: Compression::Zlib,
        timestamp: None,
        hash: [0u8; 20],
        blocks,
        is_encrypted: false,
        compression_block_size: BLOCK_SIZE as u32,
    };
    entry.write(&mut archive, version, &names, false).unwrap();
    for block in &compressed_blocks {
        archive.write_all(block).unwrap();
    }

    let index = Index {
        mount_point: "../../../".to_string(),
        path_hash_seed: None,
        path_hash_index: None,
        full_directory_index: None,
        entries: vec![("giant.bin".to_string(), entry)],
    };
    let (index_offset, index_size, index_hash) = index.write(&mut archive, version, &names).unwrap();
    Footer::write(&mut archive, version, index_offset, index_size, index_hash, &names).unwrap();

    archive.set_position(0);
    let reader = PakBuilder::new().reader(&mut archive).unwrap();
    let out = reader.read_file("giant.bin", &mut archive).unwrap();
    assert_eq!(out, raw);
}

/// S6: when the trailing 205 bytes of a file contain the magic constant
/// at both the EOF-44 and EOF-205 probe distances, the EOF-44 bucket wins
/// because probing proceeds in that order and stops at the first match.
#[test]
fn s6_first_matching_footer_probe_wins() {
    let mut buf = vec![0u8; 205];

    // EOF-205 bucket: magic alone, never actually parsed as a footer.
    buf[0..4].copy_from_slice(&MAGIC.to_le_bytes());

    // EOF-44 bucket: a complete, valid V1 footer.
    let v1_footer_start = 205 - 44;
    buf[v1_footer_start..v1_footer_start + 4].copy_from_slice(&MAGIC.to_le_bytes());
    buf[v1_footer_start + 4..v1_footer_start + 8].copy_from_slice(&1u32.to_le_bytes()); // Version::V1 ordinal
    buf[v1_footer_start + 8..v1_footer_start + 16].copy_from_slice(&0u64.to_le_bytes()); // index_offset
    buf[v1_footer_start + 16..v1_footer_start + 24].copy_from_slice(&0u64.to_le_bytes()); // index_size
    // remaining 20 bytes (index_hash) stay zeroed

    let mut cursor = Cursor::new(buf);
    let footer = Footer::read(&mut cursor).unwrap();
    assert_eq!(footer.version, Version::V1);
    assert_eq!(footer.index_offset, 0);
    assert_eq!(footer.index_size, 0);
}
