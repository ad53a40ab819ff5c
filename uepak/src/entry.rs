//! Entry codec: full form and bit-packed encoded form (`SPEC_FULL.md` §4.3),
//! plus payload extraction (§4.4, §4.5).

use std::io::{Read, Seek, SeekFrom, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};

use crate::compression::{self, Oodle};
use crate::crypto::{self, Key};
use crate::ext::{ReadExt, WriteExt};
use crate::{Compression, Error, Result, Version};

/// One compressed/encrypted chunk's byte range, in whatever origin the
/// entry's version uses (see [`Entry::read_file`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Block {
    pub start: u64,
    pub end: u64,
}

impl Block {
    fn read<R: Read>(reader: &mut R) -> Result<Block> {
        Ok(Block {
            start: reader.read_u64::<LE>()?,
            end: reader.read_u64::<LE>()?,
        })
    }

    fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_u64::<LE>(self.start)?;
        writer.write_u64::<LE>(self.end)?;
        Ok(())
    }
}

/// One archive entry: where its payload lives and how to decode it.
///
/// The pre-V10 inline index and every entry's own payload header use the
/// full form ([`Entry::read`]/[`Entry::write`]); the V10+ index stores the
/// bit-packed encoded form instead ([`Entry::read_encoded`]/
/// [`Entry::write_encoded`]). Both forms describe the same entry and agree
/// on every field once decoded.
#[derive(Debug, Clone)]
pub struct Entry {
    pub offset: u64,
    pub compressed_size: u64,
    pub size: u64,
    pub compression: Compression,
    pub timestamp: Option<u64>,
    pub hash: [u8; 20],
    pub blocks: Vec<Block>,
    pub is_encrypted: bool,
    pub compression_block_size: u32,
}

impl Entry {
    /// Exact full-form wire size for the given parameters. Used to validate
    /// reads (Testable Property 4) and as the block-offset origin constant
    /// when reconstructing blocks from the encoded form.
    pub fn serialized_size(version: Version, compression: Compression, block_count: u64) -> u64 {
        let mut size = 8 + 8 + 8; // offset, compressed_size, size
        size += if version == Version::V8A { 1 } else { 4 };
        if version == Version::V1 {
            size += 8; // timestamp
        }
        size += 20; // hash
        if compression != Compression::None {
            size += 4 + 16 * block_count; // count + (start, end) pairs
        }
        if version >= Version::V3 {
            size += 1 + 4; // is_encrypted, compression_block_size
        }
        size
    }

    fn compression_index(compression: Compression, compression_names: &[Compression]) -> Result<u32> {
        if compression == Compression::None {
            return Ok(0);
        }
        compression_names
            .iter()
            .position(|&c| c == compression)
            .map(|i| i as u32 + 1)
            .ok_or(Error::CompressionUnsupported(compression))
    }

    fn compression_from_index(index: u32, compression_names: &[Compression]) -> Result<Compression> {
        if index == 0 {
            return Ok(Compression::None);
        }
        compression_names
            .get(index as usize - 1)
            .copied()
            .ok_or(Error::CorruptEntry("compression index out of range"))
    }

    /// Reads the full form: the pre-V10 inline index record, or any
    /// version's payload header at `entry.offset`.
    pub fn read<R: Read>(
        reader: &mut R,
        version: Version,
        compression_names: &[Compression],
    ) -> Result<Entry> {
        let offset = reader.read_u64::<LE>()?;
        let compressed_size = reader.read_u64::<LE>()?;
        let size = reader.read_u64::<LE>()?;
        let compression_index = if version == Version::V8A {
            reader.read_u8()? as u32
        } else {
            reader.read_u32::<LE>()?
        };
        let compression = Self::compression_from_index(compression_index, compression_names)?;
        let timestamp = if version == Version::V1 {
            Some(reader.read_u64::<LE>()?)
        } else {
            None
        };
        let hash = reader.read_hash()?;

        let mut blocks = Vec::new();
        let mut is_encrypted = false;
        let mut compression_block_size = 0;
        if version >= Version::V3 {
            if compression != Compression::None {
                blocks = reader.read_array(Block::read)?;
            }
            is_encrypted = reader.read_bool()?;
            compression_block_size = reader.read_u32::<LE>()?;
        }

        Ok(Entry {
            offset,
            compressed_size,
            size,
            compression,
            timestamp,
            hash,
            blocks,
            is_encrypted,
            compression_block_size,
        })
    }

    /// Writes the full form. Payload headers always write `0` for the
    /// offset field (a reader already knows its own position); the inline
    /// pre-V10 index writes the real offset via `write_real_offset`.
    pub fn write<W: Write>(
        &self,
        writer: &mut W,
        version: Version,
        compression_names: &[Compression],
        write_real_offset: bool,
    ) -> Result<()> {
        writer.write_u64::<LE>(if write_real_offset { self.offset } else { 0 })?;
        writer.write_u64::<LE>(self.compressed_size)?;
        writer.write_u64::<LE>(self.size)?;
        let compression_index = Self::compression_index(self.compression, compression_names)?;
        if version == Version::V8A {
            writer.write_u8(compression_index as u8)?;
        } else {
            writer.write_u32::<LE>(compression_index)?;
        }
        if version == Version::V1 {
            writer.write_u64::<LE>(self.timestamp.unwrap_or_default())?;
        }
        writer.write_hash(self.hash)?;

        if version >= Version::V3 {
            if self.compression != Compression::None {
                writer.write_u32::<LE>(self.blocks.len() as u32)?;
                for block in &self.blocks {
                    block.write(writer)?;
                }
            }
            writer.write_bool(self.is_encrypted)?;
            writer.write_u32::<LE>(self.compression_block_size)?;
        }
        Ok(())
    }

    /// Reads the bit-packed encoded form used by the V10+ index.
    pub fn read_encoded<R: Read>(
        reader: &mut R,
        version: Version,
        compression_names: &[Compression],
    ) -> Result<Entry> {
        let bits = reader.read_u32::<LE>()?;
        let compression_index = (bits >> 23) & 0x3f;
        let compression = Self::compression_from_index(compression_index, compression_names)?;
        let is_encrypted = (bits & (1 << 22)) != 0;
        let block_count = (bits >> 6) & 0xffff;

        let mut compression_block_size = bits & 0x3f;
        compression_block_size = if compression_block_size == 0x3f {
            reader.read_u32::<LE>()?
        } else {
            compression_block_size << 11
        };

        let mut var_int = |bit: u32| -> Result<u64> {
            Ok(if (bits & (1 << bit)) != 0 {
                reader.read_u32::<LE>()? as u64
            } else {
                reader.read_u64::<LE>()?
            })
        };
        let offset = var_int(31)?;
        let size = var_int(30)?;
        let compressed_size = if compression == Compression::None {
            size
        } else {
            var_int(29)?
        };

        let offset_base = Entry::serialized_size(version, compression, block_count as u64);
        let blocks = if block_count == 1 && !is_encrypted {
            vec![Block {
                start: offset_base,
                end: offset_base + compressed_size,
            }]
        } else if block_count > 0 {
            let mut cursor = offset_base;
            let mut blocks = Vec::with_capacity(block_count as usize);
            for _ in 0..block_count {
                let mut block_size = reader.read_u32::<LE>()? as u64;
                blocks.push(Block {
                    start: cursor,
                    end: cursor + block_size,
                });
                if is_encrypted {
                    block_size = crypto::align16(block_size);
                }
                cursor += block_size;
            }
            blocks
        } else {
            Vec::new()
        };

        Ok(Entry {
            offset,
            compressed_size,
            size,
            compression,
            timestamp: None,
            // The encoded form carries no hash; callers that need it must
            // read the entry's own payload header.
            hash: [0u8; 20],
            blocks,
            is_encrypted,
            compression_block_size,
        })
    }

    /// Writes the bit-packed encoded form.
    pub fn write_encoded<W: Write>(&self, writer: &mut W, compression_names: &[Compression]) -> Result<()> {
        let mut block_size_bits = (self.compression_block_size >> 11) & 0x3f;
        if (block_size_bits << 11) != self.compression_block_size {
            block_size_bits = 0x3f;
        }
        let block_count = if self.compression != Compression::None {
            self.blocks.len() as u32
        } else {
            0
        };
        let is_compressed_size_32 = self.compressed_size <= u32::MAX as u64;
        let is_size_32 = self.size <= u32::MAX as u64;
        let is_offset_32 = self.offset <= u32::MAX as u64;
        let compression_index = Self::compression_index(self.compression, compression_names)?;

        let flags = block_size_bits
            | (block_count << 6)
            | ((self.is_encrypted as u32) << 22)
            | (compression_index << 23)
            | ((is_compressed_size_32 as u32) << 29)
            | ((is_size_32 as u32) << 30)
            | ((is_offset_32 as u32) << 31);
        writer.write_u32::<LE>(flags)?;

        if block_size_bits == 0x3f {
            writer.write_u32::<LE>(self.compression_block_size)?;
        }
        if is_offset_32 {
            writer.write_u32::<LE>(self.offset as u32)?;
        } else {
            writer.write_u64::<LE>(self.offset)?;
        }
        if is_size_32 {
            writer.write_u32::<LE>(self.size as u32)?;
        } else {
            writer.write_u64::<LE>(self.size)?;
        }

        if self.compression != Compression::None {
            if is_compressed_size_32 {
                writer.write_u32::<LE>(self.compressed_size as u32)?;
            } else {
                writer.write_u64::<LE>(self.compressed_size)?;
            }
            if self.blocks.len() > 1 || self.is_encrypted {
                for block in &self.blocks {
                    let block_size = (block.end - block.start) as u32;
                    writer.write_u32::<LE>(block_size)?;
                }
            }
        }

        Ok(())
    }

    /// Seeks to the entry's payload header, verifies it, and returns the
    /// decoded, decrypted, decompressed file contents.
    pub fn read_file<R: Read + Seek>(
        &self,
        reader: &mut R,
        version: Version,
        compression_names: &[Compression],
        key: Option<&Key>,
        oodle: Option<&dyn Oodle>,
    ) -> Result<Vec<u8>> {
        reader.seek(SeekFrom::Start(self.offset))?;
        // Consumed only to advance the reader to the payload; the entry's
        // own metadata (from the index) is authoritative for decoding.
        Entry::read(reader, version, compression_names)?;
        let data_offset = reader.stream_position()?;

        #[cfg(not(feature = "encryption"))]
        if self.is_encrypted {
            return Err(Error::DecryptionRequired);
        }
        if self.is_encrypted && key.is_none() {
            return Err(Error::DecryptionRequired);
        }

        let raw_len = if self.is_encrypted {
            crypto::align16(self.compressed_size)
        } else {
            self.compressed_size
        };
        let mut raw = vec![0u8; raw_len as usize];
        reader.read_exact(&mut raw)?;

        #[cfg(feature = "encryption")]
        if self.is_encrypted {
            crypto::decrypt(key.expect("checked above"), &mut raw)?;
            raw.truncate(self.compressed_size as usize);
        }

        if self.compression == Compression::None {
            return Ok(raw);
        }

        let origin = if version >= Version::V5 {
            data_offset - self.offset
        } else {
            data_offset
        };
        let ranges: Vec<(usize, usize)> = if self.blocks.is_empty() {
            vec![(0, raw.len())]
        } else {
            self.blocks
                .iter()
                .map(|b| ((b.start - origin) as usize, (b.end - origin) as usize))
                .collect()
        };

        let mut out = Vec::with_capacity(self.size as usize);
        let mut produced = 0u64;
        let multi_block = ranges.len() > 1;
        for (start, end) in ranges {
            let expected = if multi_block {
                (self.compression_block_size as u64).min(self.size - produced)
            } else {
                self.size
            };
            let chunk = compression::decompress(self.compression, &raw[start..end], expected as usize, oodle)?;
            produced += chunk.len() as u64;
            out.extend_from_slice(&chunk);
        }

        if out.len() as u64 != self.size {
            return Err(Error::CorruptEntry("decompressed size does not match entry size"));
        }
        Ok(out)
    }

    /// Writes one uncompressed, unencrypted payload (header + bytes) at the
    /// writer's current position, returning the entry describing it.
    ///
    /// Write-side compression is out of scope; every written entry is
    /// `Compression::None`.
    pub fn write_file<W: Write + Seek>(
        writer: &mut W,
        version: Version,
        compression_names: &[Compression],
        data: &[u8],
    ) -> Result<Entry> {
        use sha1::{Digest, Sha1};
        let hash = Sha1::digest(data).into();

        let offset = writer.stream_position()?;
        let entry = Entry {
            offset,
            compressed_size: data.len() as u64,
            size: data.len() as u64,
            compression: Compression::None,
            timestamp: None,
            hash,
            blocks: Vec::new(),
            is_encrypted: false,
            compression_block_size: 0,
        };
        entry.write(writer, version, compression_names, false)?;
        writer.write_all(data)?;
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn names() -> Vec<Compression> {
        vec![Compression::Zlib, Compression::Gzip, Compression::Oodle]
    }

    fn sample(compression: Compression) -> Entry {
        Entry {
            offset: 16,
            compressed_size: 32,
            size: 32,
            compression,
            timestamp: None,
            hash: [9u8; 20],
            blocks: if compression == Compression::None {
                Vec::new()
            } else {
                vec![Block { start: 0, end: 32 }]
            },
            is_encrypted: false,
            compression_block_size: if compression == Compression::None { 0 } else { 32 },
        }
    }

    #[test]
    fn full_form_round_trips_uncompressed() {
        for version in [Version::V1, Version::V3, Version::V7, Version::V11] {
            let entry = sample(Compression::None);
            let mut buf = Vec::new();
            entry.write(&mut buf, version, &names(), true).unwrap();
            assert_eq!(buf.len() as u64, Entry::serialized_size(version, Compression::None, 0));
            let mut cur = Cursor::new(buf);
            let read_back = Entry::read(&mut cur, version, &names()).unwrap();
            assert_eq!(read_back.offset, entry.offset);
            assert_eq!(read_back.size, entry.size);
            assert_eq!(read_back.hash, entry.hash);
        }
    }

    #[test]
    fn full_form_round_trips_compressed() {
        let version = Version::V7;
        let entry = sample(Compression::Zlib);
        let mut buf = Vec::new();
        entry.write(&mut buf, version, &names(), true).unwrap();
        assert_eq!(
            buf.len() as u64,
            Entry::serialized_size(version, Compression::Zlib, entry.blocks.len() as u64)
        );
        let mut cur = Cursor::new(buf);
        let read_back = Entry::read(&mut cur, version, &names()).unwrap();
        assert_eq!(read_back.compression, Compression::Zlib);
        assert_eq!(read_back.blocks, entry.blocks);
    }

    #[test]
    fn encoded_form_round_trips_single_block() {
        let version = Version::V10;
        let entry = sample(Compression::Zlib);
        let mut buf = Vec::new();
        entry.write_encoded(&mut buf, &names()).unwrap();
        let mut cur = Cursor::new(buf);
        let decoded = Entry::read_encoded(&mut cur, version, &names()).unwrap();
        assert_eq!(decoded.offset, entry.offset);
        assert_eq!(decoded.size, entry.size);
        assert_eq!(decoded.compressed_size, entry.compressed_size);
        assert_eq!(decoded.compression, Compression::Zlib);
    }

    #[test]
    fn encoded_form_large_values_use_64_bit_fields() {
        let version = Version::V10;
        let mut entry = sample(Compression::None);
        entry.offset = (u32::MAX as u64) + 1;
        entry.size = (u32::MAX as u64) + 2;
        entry.compressed_size = entry.size;
        let mut buf = Vec::new();
        entry.write_encoded(&mut buf, &names()).unwrap();
        let mut cur = Cursor::new(buf);
        let decoded = Entry::read_encoded(&mut cur, version, &names()).unwrap();
        assert_eq!(decoded.offset, entry.offset);
        assert_eq!(decoded.size, entry.size);
    }

    #[test]
    fn read_file_round_trips_uncompressed_payload() {
        let version = Version::V7;
        let mut archive = Cursor::new(Vec::new());
        let entry = Entry::write_file(&mut archive, version, &names(), b"hello pak").unwrap();
        let out = entry.read_file(&mut archive, version, &names(), None, None).unwrap();
        assert_eq!(out, b"hello pak");
    }

    #[test]
    fn read_file_requires_key_when_encrypted() {
        let version = Version::V7;
        let mut archive = Cursor::new(Vec::new());
        let mut entry = Entry::write_file(&mut archive, version, &names(), b"secret").unwrap();
        entry.is_encrypted = true;
        let err = entry.read_file(&mut archive, version, &names(), None, None).unwrap_err();
        assert!(matches!(err, Error::DecryptionRequired));
    }
}
