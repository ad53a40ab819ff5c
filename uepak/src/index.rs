//! Pak index: the pre-V10 inline form and the V10+ split form with a
//! path-hash index and full-directory index (`SPEC_FULL.md` §4.6).

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Seek, SeekFrom, Write};

use byteorder::{ReadBytesExt, WriteBytesExt, LE};
use log::{debug, warn};
use sha1::{Digest, Sha1};

use crate::crypto::{self, Key};
use crate::entry::Entry;
use crate::ext::{ReadExt, WriteExt};
use crate::fnv::{fnv64_path, split_path_child};
use crate::{Compression, Error, Footer, Result, Version};

/// Parsed index: the mount point, the resolved path → entry list, and, for
/// V10+, the raw path-hash and full-directory sub-indexes.
///
/// `entries` is ordered, not sorted: for the pre-V10 inline form this is
/// literal wire order; for the V10+ split form it is recovered from the
/// append order of the encoded-entries blob, which is "the order entries
/// appear on the wire" per the index's own ordering guarantee.
#[derive(Debug, Clone, Default)]
pub struct Index {
    pub mount_point: String,
    pub path_hash_seed: Option<u64>,
    pub path_hash_index: Option<BTreeMap<u64, u32>>,
    pub full_directory_index: Option<BTreeMap<String, BTreeMap<String, i32>>>,
    pub entries: Vec<(String, Entry)>,
}

impl Index {
    pub fn get(&self, path: &str) -> Option<&Entry> {
        self.entries.iter().find(|(p, _)| p == path).map(|(_, e)| e)
    }

    fn decrypt_buffer(buf: &mut [u8], key: Option<&Key>) -> Result<()> {
        #[cfg(not(feature = "encryption"))]
        return Err(Error::DecryptionRequired);
        #[cfg(feature = "encryption")]
        {
            let key = key.ok_or(Error::DecryptionRequired)?;
            crypto::decrypt(key, buf)
        }
    }

    fn read_side_buffer<R: Read + Seek>(
        reader: &mut R,
        offset: u64,
        size: u64,
        is_encrypted: bool,
        key: Option<&Key>,
    ) -> Result<Vec<u8>> {
        reader.seek(SeekFrom::Start(offset))?;
        let mut buf = reader.read_len(size as usize)?;
        if is_encrypted {
            Self::decrypt_buffer(&mut buf, key)?;
        }
        Ok(buf)
    }

    /// Reads and resolves the index described by `footer`.
    pub fn read<R: Read + Seek>(reader: &mut R, footer: &Footer, key: Option<&Key>) -> Result<Index> {
        let raw = Self::read_side_buffer(reader, footer.index_offset, footer.index_size, footer.is_encrypted, key)?;
        if Sha1::digest(&raw).as_slice() != footer.index_hash {
            return Err(Error::CorruptEntry("index does not match footer hash"));
        }
        let mut index = Cursor::new(raw);

        let mount_point = index.read_string()?;
        let entry_count = index.read_u32::<LE>()?;
        debug!("index: mount_point={mount_point:?} entry_count={entry_count}");

        if footer.version < Version::V10 {
            let mut entries = Vec::with_capacity(entry_count as usize);
            for _ in 0..entry_count {
                let path = index.read_string()?;
                let entry = Entry::read(&mut index, footer.version, &footer.compression_names)?;
                entries.push((path, entry));
            }
            return Ok(Index {
                mount_point,
                path_hash_seed: None,
                path_hash_index: None,
                full_directory_index: None,
                entries,
            });
        }

        let path_hash_seed = index.read_u64::<LE>()?;

        let path_hash_index = if index.read_u32::<LE>()? != 0 {
            let offset = index.read_u64::<LE>()?;
            let size = index.read_u64::<LE>()?;
            let _hash = index.read_hash()?;
            let buf = Self::read_side_buffer(reader, offset, size, footer.is_encrypted, key)?;
            let mut side = Cursor::new(buf);
            let count = side.read_u32::<LE>()?;
            let mut map = BTreeMap::new();
            for _ in 0..count {
                let hash = side.read_u64::<LE>()?;
                let encoded_offset = side.read_u32::<LE>()?;
                map.insert(hash, encoded_offset);
            }
            Some(map)
        } else {
            warn!("index has no path-hash sub-index");
            None
        };

        let full_directory_index = if index.read_u32::<LE>()? != 0 {
            let offset = index.read_u64::<LE>()?;
            let size = index.read_u64::<LE>()?;
            let _hash = index.read_hash()?;
            let buf = Self::read_side_buffer(reader, offset, size, footer.is_encrypted, key)?;
            let mut side = Cursor::new(buf);
            let dir_count = side.read_u32::<LE>()?;
            let mut dirs = BTreeMap::new();
            for _ in 0..dir_count {
                let dir_name = side.read_string()?;
                let file_count = side.read_u32::<LE>()?;
                let mut files = BTreeMap::new();
                for _ in 0..file_count {
                    let file_name = side.read_string()?;
                    files.insert(file_name, side.read_i32::<LE>()?);
                }
                dirs.insert(dir_name, files);
            }
            Some(dirs)
        } else {
            warn!("index has no full-directory sub-index; paths cannot be resolved");
            None
        };

        let encoded_len = index.read_u32::<LE>()?;
        let encoded_entries_buf = index.read_len(encoded_len as usize)?;

        let not_encoded_count = index.read_u32::<LE>()?;
        let mut not_encoded_entries = Vec::with_capacity(not_encoded_count as usize);
        for _ in 0..not_encoded_count {
            not_encoded_entries.push(Entry::read(&mut index, footer.version, &footer.compression_names)?);
        }

        // The encoded-entries blob is append-ordered at write time (see
        // `write`), so its offset recovers "the order entries appear on the
        // wire" even though the full-directory index groups paths by
        // directory name instead.
        let mut resolved: Vec<(i64, String, Entry)> = Vec::new();
        if let Some(dirs) = &full_directory_index {
            let mut encoded_cursor = Cursor::new(&encoded_entries_buf);
            for (dir_name, files) in dirs {
                for (file_name, &encoded_offset) in files {
                    let entry = if encoded_offset >= 0 {
                        encoded_cursor.seek(SeekFrom::Start(encoded_offset as u64))?;
                        Entry::read_encoded(&mut encoded_cursor, footer.version, &footer.compression_names)?
                    } else {
                        let idx = (-encoded_offset - 1) as usize;
                        not_encoded_entries
                            .get(idx)
                            .cloned()
                            .ok_or(Error::CorruptEntry("not-encoded entry index out of range"))?
                    };
                    let path = format!("{}{}", dir_name.strip_prefix('/').unwrap_or(dir_name), file_name);
                    let sort_key = if encoded_offset >= 0 {
                        encoded_offset as i64
                    } else {
                        i64::MIN - encoded_offset as i64
                    };
                    resolved.push((sort_key, path, entry));
                }
            }
        }
        resolved.sort_by_key(|(key, ..)| *key);
        let entries = resolved.into_iter().map(|(_, path, entry)| (path, entry)).collect();

        Ok(Index {
            mount_point,
            path_hash_seed: Some(path_hash_seed),
            path_hash_index,
            full_directory_index,
            entries,
        })
    }

    fn write_path_hash_index<W: Write>(
        writer: &mut W,
        seed: u64,
        entries: &[(String, Entry)],
        offsets: &[u32],
    ) -> Result<()> {
        writer.write_u32::<LE>(entries.len() as u32)?;
        for ((path, _), offset) in entries.iter().zip(offsets) {
            writer.write_u64::<LE>(fnv64_path(path, seed))?;
            writer.write_u32::<LE>(*offset)?;
        }
        writer.write_u32::<LE>(0)?;
        Ok(())
    }

    fn write_full_directory_index<W: Write>(
        writer: &mut W,
        entries: &[(String, Entry)],
        offsets: &[u32],
    ) -> Result<()> {
        let mut directories: BTreeMap<&str, BTreeMap<&str, i32>> = BTreeMap::new();
        for ((path, _), offset) in entries.iter().zip(offsets) {
            let mut parent = path.as_str();
            while let Some((grandparent, _)) = split_path_child(parent) {
                parent = grandparent;
                directories.entry(parent).or_default();
            }
            let (directory, filename) = split_path_child(path).expect("entries list never holds the root path");
            directories.entry(directory).or_default().insert(filename, *offset as i32);
        }

        writer.write_u32::<LE>(directories.len() as u32)?;
        for (directory, files) in &directories {
            writer.write_string(directory)?;
            writer.write_u32::<LE>(files.len() as u32)?;
            for (filename, offset) in files {
                writer.write_string(filename)?;
                writer.write_i32::<LE>(*offset)?;
            }
        }
        Ok(())
    }

    /// Writes the index (and, for V10+, its path-hash/full-directory
    /// sub-indexes) at the writer's current position.
    ///
    /// Returns `(index_offset, index_size, index_hash)` for the footer.
    /// Writing an encrypted index is out of scope; `footer.is_encrypted`
    /// is always written as `false`.
    pub fn write<W: Write + Seek>(
        &self,
        writer: &mut W,
        version: Version,
        compression_names: &[Compression],
    ) -> Result<(u64, u64, [u8; 20])> {
        let index_offset = writer.stream_position()?;
        let mut index_buf = Vec::new();
        index_buf.write_string(&self.mount_point)?;
        index_buf.write_u32::<LE>(self.entries.len() as u32)?;

        if version < Version::V10 {
            for (path, entry) in &self.entries {
                index_buf.write_string(path)?;
                entry.write(&mut index_buf, version, compression_names, true)?;
            }
            let index_hash = Sha1::digest(&index_buf).into();
            let index_size = index_buf.len() as u64;
            writer.write_all(&index_buf)?;
            return Ok((index_offset, index_size, index_hash));
        }

        let path_hash_seed = self.path_hash_seed.unwrap_or(0);
        index_buf.write_u64::<LE>(path_hash_seed)?;

        let mut encoded_entries = Vec::new();
        let mut offsets = Vec::with_capacity(self.entries.len());
        for (_, entry) in &self.entries {
            offsets.push(encoded_entries.len() as u32);
            entry.write_encoded(&mut encoded_entries, compression_names)?;
        }

        let mut phi_buf = Vec::new();
        Self::write_path_hash_index(&mut phi_buf, path_hash_seed, &self.entries, &offsets)?;
        let phi_hash: [u8; 20] = Sha1::digest(&phi_buf).into();

        let mut fdi_buf = Vec::new();
        Self::write_full_directory_index(&mut fdi_buf, &self.entries, &offsets)?;
        let fdi_hash: [u8; 20] = Sha1::digest(&fdi_buf).into();

        let mut mount_point_wire = Vec::new();
        mount_point_wire.write_string(&self.mount_point)?;

        let bytes_before_phi = mount_point_wire.len() as u64
            + 4 // entry count
            + 8 // path hash seed
            + (4 + 8 + 8 + 20) // has_phi + phi {offset, size, hash}
            + (4 + 8 + 8 + 20) // has_fdi + fdi {offset, size, hash}
            + 4 // encoded entries length
            + encoded_entries.len() as u64
            + 4; // not-encoded entry count (always zero on write)

        let phi_offset = index_offset + bytes_before_phi;
        let fdi_offset = phi_offset + phi_buf.len() as u64;

        index_buf.write_u32::<LE>(1)?;
        index_buf.write_u64::<LE>(phi_offset)?;
        index_buf.write_u64::<LE>(phi_buf.len() as u64)?;
        index_buf.write_hash(phi_hash)?;

        index_buf.write_u32::<LE>(1)?;
        index_buf.write_u64::<LE>(fdi_offset)?;
        index_buf.write_u64::<LE>(fdi_buf.len() as u64)?;
        index_buf.write_hash(fdi_hash)?;

        index_buf.write_u32::<LE>(encoded_entries.len() as u32)?;
        index_buf.write_all(&encoded_entries)?;
        index_buf.write_u32::<LE>(0)?;

        debug_assert_eq!(index_buf.len() as u64, bytes_before_phi, "index header size drifted from its own offset math");

        let index_hash = Sha1::digest(&index_buf).into();
        let index_size = index_buf.len() as u64;
        writer.write_all(&index_buf)?;
        writer.write_all(&phi_buf)?;
        writer.write_all(&fdi_buf)?;

        Ok((index_offset, index_size, index_hash))
    }
}
