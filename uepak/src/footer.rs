//! Footer location and (de)serialization (`SPEC_FULL.md` §4.2).

use std::io::{Read, Seek, SeekFrom};
use std::str::FromStr;

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use log::{debug, trace};

use crate::ext::{ReadExt, WriteExt};
use crate::{Compression, Error, Result, Version, MAGIC};

/// Trailing footer of a pak archive: locates the index and, for V8A+,
/// carries the table mapping wire compression indices to algorithm tags.
#[derive(Debug, Clone)]
pub struct Footer {
    pub version: Version,
    pub index_offset: u64,
    pub index_size: u64,
    pub index_hash: [u8; 20],
    pub is_encrypted: bool,
    pub encryption_key_guid: Option<[u8; 16]>,
    pub is_frozen: bool,
    pub compression_names: Vec<Compression>,
}

/// Implicit compression table for versions that predate the footer's
/// named-compression-table field (before V8A).
fn implicit_compression_names() -> Vec<Compression> {
    vec![Compression::Zlib, Compression::Gzip, Compression::Oodle]
}

/// Byte distance from end-of-file to the start of the magic field for each
/// of the four footer-probe buckets, in probe order.
const PROBE_OFFSETS: [u64; 4] = [44, 172, 204, 205];

impl Footer {
    /// Total footer size in bytes for `version`, magic through the last
    /// compression-name slot.
    pub fn size(version: Version) -> u64 {
        let mut size = 44; // magic(4) + version(4) + index_offset(8) + index_size(8) + hash(20)
        if version >= Version::V7 {
            size += 16; // encryption_key_guid
        }
        if version >= Version::V4 {
            size += 1; // is_encrypted
        }
        if version == Version::V9 {
            size += 1; // is_frozen
        }
        size += 32 * version.compression_name_slots() as u64;
        size
    }

    /// Probes the four known footer offsets for the magic constant and
    /// returns the detected version.
    fn detect_version<R: Read + Seek>(reader: &mut R) -> Result<Version> {
        let file_len = reader.seek(SeekFrom::End(0))?;

        for &distance in &PROBE_OFFSETS {
            if distance > file_len {
                continue;
            }
            reader.seek(SeekFrom::Start(file_len - distance))?;
            let magic = reader.read_u32::<LE>()?;
            if magic != MAGIC {
                continue;
            }
            let version = match distance {
                44 => {
                    let stored = reader.read_u32::<LE>()?;
                    Version::from_ordinal(stored).ok_or(Error::UnsupportedVersion(stored))?
                }
                172 => Version::V8A,
                204 => {
                    let stored = reader.read_u32::<LE>()?;
                    Version::from_wire_plus_one(stored)
                        .ok_or(Error::UnsupportedVersion(stored + 1))?
                }
                205 => Version::V9,
                _ => unreachable!(),
            };
            trace!("footer magic matched at EOF-{distance}, version {version}");
            return Ok(version);
        }

        Err(Error::InvalidArchive)
    }

    /// Locates and parses the footer, leaving the reader position
    /// unspecified afterward.
    pub fn read<R: Read + Seek>(reader: &mut R) -> Result<Footer> {
        let version = Self::detect_version(reader)?;

        let file_len = reader.seek(SeekFrom::End(0))?;
        reader.seek(SeekFrom::Start(file_len - Self::size(version)))?;

        let encryption_key_guid = if version >= Version::V7 {
            Some(reader.read_guid()?)
        } else {
            None
        };
        let is_encrypted = if version >= Version::V4 {
            reader.read_bool()?
        } else {
            false
        };

        let magic = reader.read_u32::<LE>()?;
        if magic != MAGIC {
            return Err(Error::InvalidArchive);
        }
        let stored_version = reader.read_u32::<LE>()?;
        let decoded = if version >= Version::V8B {
            Version::from_ordinal(stored_version + 1)
        } else {
            Version::from_ordinal(stored_version)
        };
        if decoded != Some(version) {
            return Err(Error::InvalidArchive);
        }

        let index_offset = reader.read_u64::<LE>()?;
        let index_size = reader.read_u64::<LE>()?;
        let index_hash = reader.read_hash()?;

        let is_frozen = if version == Version::V9 {
            reader.read_bool()?
        } else {
            false
        };

        let compression_names = if version >= Version::V8A {
            let mut names = Vec::with_capacity(version.compression_name_slots());
            for _ in 0..version.compression_name_slots() {
                let mut raw = [0u8; 32];
                reader.read_exact(&mut raw)?;
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                let name = std::str::from_utf8(&raw[..end]).unwrap_or("");
                names.push(Compression::from_str(name).unwrap_or_default());
            }
            names
        } else {
            implicit_compression_names()
        };

        debug!(
            "footer: version={version} index_offset={index_offset} index_size={index_size} \
             encrypted={is_encrypted}"
        );

        Ok(Footer {
            version,
            index_offset,
            index_size,
            index_hash,
            is_encrypted,
            encryption_key_guid,
            is_frozen,
            compression_names,
        })
    }

    /// Writes the footer in the same field order `read` expects.
    ///
    /// `compression_names` fills the footer's name slots in order; slots
    /// beyond the list's length are written empty. Index/payload encryption
    /// is out of scope for writing, so `is_encrypted`/`is_frozen` are
    /// always written `false`.
    pub fn write<W: std::io::Write>(
        writer: &mut W,
        version: Version,
        index_offset: u64,
        index_size: u64,
        index_hash: [u8; 20],
        compression_names: &[Compression],
    ) -> Result<()> {
        if version >= Version::V7 {
            writer.write_guid([0u8; 16])?;
        }
        if version >= Version::V4 {
            writer.write_bool(false)?;
        }

        writer.write_u32::<LE>(MAGIC)?;
        writer.write_u32::<LE>(version.wire_value())?;
        writer.write_u64::<LE>(index_offset)?;
        writer.write_u64::<LE>(index_size)?;
        writer.write_hash(index_hash)?;

        if version == Version::V9 {
            writer.write_bool(false)?;
        }

        if version >= Version::V8A {
            for i in 0..version.compression_name_slots() {
                let mut slot = [0u8; 32];
                if let Some(name) = compression_names.get(i) {
                    let bytes = name.to_string();
                    let bytes = bytes.as_bytes();
                    slot[..bytes.len()].copy_from_slice(bytes);
                }
                writer.write_all(&slot)?;
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn round_trip(version: Version) -> Footer {
        let mut buf = Vec::new();
        let names = [Compression::Zlib, Compression::Gzip, Compression::Oodle];
        Footer::write(&mut buf, version, 123, 456, [7u8; 20], &names).unwrap();
        let mut cur = Cursor::new(buf);
        Footer::read(&mut cur).unwrap()
    }

    #[test]
    fn every_version_round_trips() {
        use strum::IntoEnumIterator;
        for version in Version::iter() {
            let footer = round_trip(version);
            assert_eq!(footer.version, version, "version fidelity for {version}");
            assert_eq!(footer.index_offset, 123);
            assert_eq!(footer.index_size, 456);
            assert_eq!(footer.index_hash, [7u8; 20]);
        }
    }

    #[test]
    fn is_frozen_present_only_at_v9() {
        assert!(!round_trip(Version::V8B).is_frozen);
        assert!(!round_trip(Version::V9).is_frozen);
        assert!(!round_trip(Version::V10).is_frozen);
    }

    #[test]
    fn size_matches_probe_distance_buckets() {
        // EOF-172 bucket: V8A has no frozen byte, four compression slots.
        assert_eq!(Footer::size(Version::V8A), 172);
        // EOF-204 bucket: V8B/V10/V11 share five compression slots, no frozen byte.
        assert_eq!(Footer::size(Version::V8B), 204);
        assert_eq!(Footer::size(Version::V10), 204);
        assert_eq!(Footer::size(Version::V11), 204);
        // EOF-205 bucket: V9 alone carries the frozen byte.
        assert_eq!(Footer::size(Version::V9), 205);
    }

    #[test]
    fn detects_version_via_each_probe_bucket() {
        for version in [
            Version::V1,
            Version::V7,
            Version::V8A,
            Version::V8B,
            Version::V9,
            Version::V10,
            Version::V11,
        ] {
            assert_eq!(round_trip(version).version, version);
        }
    }
}
