//! Archive façade: open/list/read_file/add_file/remove_file/write
//! (`SPEC_FULL.md` §4.7).

use std::fs::{self, File};
use std::io::{Read, Seek, Write};
use std::path::Path;
use std::sync::Arc;

use memmap2::Mmap;

use crate::compression::Oodle;
use crate::crypto::Key;
use crate::entry::Entry;
use crate::footer::Footer;
use crate::index::Index;
use crate::{Compression, Error, Result, Version};

/// Gathers the optional decryption key, the Oodle capability, and the
/// compression tags a reader is willing to decode, then produces a
/// [`PakReader`] or a [`PakWriter`].
///
/// Collapses the source's `set_key`/`set_version`/`set_mount_point`
/// mutators into a single builder (Design Notes, "hybrid class/instance
/// methods").
#[derive(Default)]
pub struct PakBuilder {
    key: Option<Key>,
    allowed_compression: Vec<Compression>,
    oodle: Option<Arc<dyn Oodle>>,
}

impl PakBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies the 32-byte AES-256 key used to decrypt an encrypted index
    /// or payload.
    #[cfg(feature = "encryption")]
    pub fn key(mut self, key: [u8; 32]) -> Self {
        self.key = Some(Key::from_bytes(&key));
        self
    }

    /// Restricts which compression tags `read_file` will decode. An entry
    /// tagged with a compression outside this set fails with
    /// [`Error::CompressionUnsupported`] even when the crate is built with
    /// support for it.
    pub fn compression(mut self, compression: impl IntoIterator<Item = Compression>) -> Self {
        self.allowed_compression = compression.into_iter().collect();
        self
    }

    /// Supplies the capability used to decompress `Compression::Oodle`
    /// payloads; see `uepak_oodle`.
    pub fn oodle(mut self, oodle: Arc<dyn Oodle>) -> Self {
        self.oodle = Some(oodle);
        self
    }

    pub fn reader<R: Read + Seek>(self, reader: &mut R) -> Result<PakReader> {
        PakReader::open(reader, self.key, self.allowed_compression, self.oodle)
    }

    /// Memory-maps `path` and parses it as a pak archive.
    pub fn reader_mmap(self, path: impl AsRef<Path>) -> Result<(PakReader, Mmap)> {
        let file = File::open(path)?;
        let mmap = unsafe { Mmap::map(&file)? };
        let mut cursor = std::io::Cursor::new(&mmap[..]);
        let reader = PakReader::open(&mut cursor, self.key, self.allowed_compression, self.oodle)?;
        Ok((reader, mmap))
    }

    pub fn writer<W: Write + Seek>(
        self,
        writer: W,
        version: Version,
        mount_point: String,
        path_hash_seed: Option<u64>,
    ) -> PakWriter<W> {
        PakWriter::new(writer, version, mount_point, path_hash_seed)
    }
}

/// A parsed, read-only view of a pak archive.
///
/// Holds only metadata (footer, index, decryption key, allowed compression
/// set); every payload read takes the byte source as a parameter so a
/// single `PakReader` can be shared across workers that each open their own
/// handle onto the same bytes (`SPEC_FULL.md` §5).
pub struct PakReader {
    footer: Footer,
    index: Index,
    key: Option<Key>,
    allowed_compression: Vec<Compression>,
    oodle: Option<Arc<dyn Oodle>>,
}

impl std::fmt::Debug for PakReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PakReader")
            .field("version", &self.footer.version)
            .field("mount_point", &self.index.mount_point)
            .field("entries", &self.index.entries.len())
            .field("is_encrypted", &self.footer.is_encrypted)
            .finish()
    }
}

impl PakReader {
    fn open<R: Read + Seek>(
        reader: &mut R,
        key: Option<Key>,
        allowed_compression: Vec<Compression>,
        oodle: Option<Arc<dyn Oodle>>,
    ) -> Result<PakReader> {
        let footer = Footer::read(reader)?;
        let index = Index::read(reader, &footer, key.as_ref())?;
        Ok(PakReader { footer, index, key, allowed_compression, oodle })
    }

    pub fn version(&self) -> Version {
        self.footer.version
    }

    pub fn mount_point(&self) -> &str {
        &self.index.mount_point
    }

    pub fn is_encrypted(&self) -> bool {
        self.footer.is_encrypted
    }

    pub fn path_hash_seed(&self) -> Option<u64> {
        self.index.path_hash_seed
    }

    pub fn len(&self) -> usize {
        self.index.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.entries.is_empty()
    }

    /// Every entry's path, in the order the index stores them (wire order).
    pub fn list(&self) -> impl Iterator<Item = &str> {
        self.index.entries.iter().map(|(path, _)| path.as_str())
    }

    /// Resolves `path` and returns its fully decompressed, decrypted bytes.
    pub fn read_file<R: Read + Seek>(&self, path: &str, reader: &mut R) -> Result<Vec<u8>> {
        let entry = self.index.get(path).ok_or_else(|| Error::NotFound(path.to_string()))?;
        if entry.compression != Compression::None
            && !self.allowed_compression.is_empty()
            && !self.allowed_compression.contains(&entry.compression)
        {
            return Err(Error::CompressionUnsupported(entry.compression));
        }
        entry.read_file(
            reader,
            self.footer.version,
            &self.footer.compression_names,
            self.key.as_ref(),
            self.oodle.as_deref(),
        )
    }

    /// Converts into a [`PakWriter`] that continues writing to `writer`,
    /// carrying every existing entry forward. Every carried entry is
    /// materialized as plaintext at conversion time (buffered in memory,
    /// matching `add_file`), since the writer never re-emits the original
    /// compressed/encrypted payload bytes (`SPEC_FULL.md` §4.7 non-goal).
    pub fn into_writer<R: Read + Seek, W: Write + Seek>(
        self,
        mut source: R,
        writer: W,
    ) -> Result<PakWriter<W>> {
        let mut pak_writer = PakWriter::new(writer, self.footer.version, self.index.mount_point.clone(), self.index.path_hash_seed);
        for (path, _) in &self.index.entries {
            let data = self.read_file(path, &mut source)?;
            pak_writer.add_file(path.clone(), data);
        }
        Ok(pak_writer)
    }
}

/// A buffer of authoring entries awaiting serialization.
///
/// Every entry's bytes live in memory (`SPEC_FULL.md` §4.7: "buffered in
/// memory") until [`PakWriter::write`] is called; order is insertion
/// order, matching the Testable Property that writing preserves the
/// caller's insertion order.
pub struct PakWriter<W: Write + Seek> {
    writer: W,
    version: Version,
    mount_point: String,
    path_hash_seed: Option<u64>,
    entries: Vec<(String, Vec<u8>)>,
}

impl<W: Write + Seek> std::fmt::Debug for PakWriter<W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PakWriter")
            .field("version", &self.version)
            .field("mount_point", &self.mount_point)
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl<W: Write + Seek> PakWriter<W> {
    fn new(writer: W, version: Version, mount_point: String, path_hash_seed: Option<u64>) -> Self {
        PakWriter { writer, version, mount_point, path_hash_seed, entries: Vec::new() }
    }

    /// Inserts `data` for `path`, buffered in memory. Overwrites any
    /// existing entry at the same path in place, preserving its original
    /// position.
    pub fn add_file(&mut self, path: impl Into<String>, data: impl Into<Vec<u8>>) {
        let path = path.into();
        let data = data.into();
        if let Some(slot) = self.entries.iter_mut().find(|(p, _)| *p == path) {
            slot.1 = data;
        } else {
            self.entries.push((path, data));
        }
    }

    /// Removes `path`; fails with [`Error::NotFound`] if absent.
    pub fn remove_file(&mut self, path: &str) -> Result<()> {
        let pos = self.entries.iter().position(|(p, _)| p == path).ok_or_else(|| Error::NotFound(path.to_string()))?;
        self.entries.remove(pos);
        Ok(())
    }

    pub fn list(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(path, _)| path.as_str())
    }

    /// Serializes the archive: one full-form, plaintext, uncompressed
    /// payload per entry in insertion order, each entry's `offset` set to
    /// its write position, followed by the index and footer.
    pub fn write(mut self) -> Result<W> {
        let mut entries = Vec::with_capacity(self.entries.len());
        for (path, data) in &self.entries {
            let entry = Entry::write_file(&mut self.writer, self.version, &[], data)?;
            entries.push((path.clone(), entry));
        }

        let index = Index {
            mount_point: self.mount_point.clone(),
            path_hash_seed: self.path_hash_seed,
            path_hash_index: None,
            full_directory_index: None,
            entries,
        };
        let (index_offset, index_size, index_hash) = index.write(&mut self.writer, self.version, &[])?;
        Footer::write(&mut self.writer, self.version, index_offset, index_size, index_hash, &[])?;
        Ok(self.writer)
    }
}

impl PakWriter<File> {
    /// Opens `path` for a fresh archive, writing to a sibling temporary
    /// file so a failed or interrupted write never disturbs an existing
    /// archive at `path`. Call [`PakWriter::finish_to_path`] instead of
    /// `write` to complete the atomic rename.
    pub fn create_at_path(
        path: impl AsRef<Path>,
        version: Version,
        mount_point: String,
        path_hash_seed: Option<u64>,
    ) -> Result<(PakWriter<File>, std::path::PathBuf)> {
        let tmp_path = temp_sibling_path(path.as_ref());
        let file = File::create(&tmp_path)?;
        Ok((PakWriter::new(file, version, mount_point, path_hash_seed), tmp_path))
    }

    /// Serializes to the temporary file from [`PakWriter::create_at_path`]
    /// and atomically renames it to `path`.
    pub fn finish_to_path(self, tmp_path: &Path, path: impl AsRef<Path>) -> Result<()> {
        let mut file = self.write()?;
        file.flush()?;
        drop(file);
        fs::rename(tmp_path, path)?;
        Ok(())
    }
}

fn temp_sibling_path(path: &Path) -> std::path::PathBuf {
    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
    let tmp_name = format!(".{file_name}.{}.tmp", std::process::id());
    path.with_file_name(tmp_name)
}

/// Convenience wrapper: writes `entries` (in order) to a fresh archive at
/// `path`, atomically replacing any existing file there.
pub fn write_archive_to_path(
    path: impl AsRef<Path>,
    version: Version,
    mount_point: String,
    path_hash_seed: Option<u64>,
    entries: impl IntoIterator<Item = (String, Vec<u8>)>,
) -> Result<()> {
    let path = path.as_ref();
    let (mut writer, tmp_path) = PakWriter::create_at_path(path, version, mount_point, path_hash_seed)?;
    for (entry_path, data) in entries {
        writer.add_file(entry_path, data);
    }
    writer.finish_to_path(&tmp_path, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn s1_write_then_read_preserves_insertion_order() {
        let buf = Cursor::new(Vec::new());
        let mut writer = PakBuilder::new().writer(buf, Version::V11, "../../../".to_string(), Some(0));
        writer.add_file("test.txt", b"hello".to_vec());
        writer.add_file("dir/a.bin", vec![0u8, 1, 2, 3]);
        let mut archive = writer.write().unwrap();

        archive.set_position(0);
        let reader = PakBuilder::new().reader(&mut archive).unwrap();
        let listed: Vec<&str> = reader.list().collect();
        assert_eq!(listed, vec!["test.txt", "dir/a.bin"]);
        assert_eq!(reader.read_file("test.txt", &mut archive).unwrap(), b"hello");
        assert_eq!(reader.read_file("dir/a.bin", &mut archive).unwrap(), vec![0, 1, 2, 3]);
    }

    #[test]
    fn every_version_round_trips_plaintext() {
        use strum::IntoEnumIterator;
        for version in Version::iter() {
            let buf = Cursor::new(Vec::new());
            let mut writer = PakBuilder::new().writer(buf, version, "../../../".to_string(), Some(0));
            writer.add_file("a.txt", b"one".to_vec());
            writer.add_file("b/c.txt", b"two".to_vec());
            let mut archive = writer.write().unwrap();

            archive.set_position(0);
            let reader = PakBuilder::new().reader(&mut archive).unwrap();
            assert_eq!(reader.version(), version);
            assert_eq!(reader.list().collect::<Vec<_>>(), vec!["a.txt", "b/c.txt"]);
            assert_eq!(reader.read_file("a.txt", &mut archive).unwrap(), b"one");
            assert_eq!(reader.read_file("b/c.txt", &mut archive).unwrap(), b"two");
        }
    }

    #[test]
    fn read_file_missing_path_not_found() {
        let buf = Cursor::new(Vec::new());
        let writer = PakBuilder::new().writer(buf, Version::V11, "../../../".to_string(), Some(0));
        let mut archive = writer.write().unwrap();
        archive.set_position(0);
        let reader = PakBuilder::new().reader(&mut archive).unwrap();
        let err = reader.read_file("missing.txt", &mut archive).unwrap_err();
        assert!(matches!(err, Error::NotFound(p) if p == "missing.txt"));
    }

    #[test]
    fn remove_file_then_write_omits_entry() {
        let buf = Cursor::new(Vec::new());
        let mut writer = PakBuilder::new().writer(buf, Version::V11, "../../../".to_string(), Some(0));
        writer.add_file("a.txt", b"one".to_vec());
        writer.add_file("b.txt", b"two".to_vec());
        writer.remove_file("a.txt").unwrap();
        let mut archive = writer.write().unwrap();

        archive.set_position(0);
        let reader = PakBuilder::new().reader(&mut archive).unwrap();
        assert_eq!(reader.list().collect::<Vec<_>>(), vec!["b.txt"]);
    }

    #[test]
    fn remove_file_missing_path_not_found() {
        let buf = Cursor::new(Vec::new());
        let mut writer = PakBuilder::new().writer(buf, Version::V11, "../../../".to_string(), Some(0));
        assert!(matches!(writer.remove_file("missing").unwrap_err(), Error::NotFound(_)));
    }

    #[test]
    fn add_file_overwrites_in_place() {
        let buf = Cursor::new(Vec::new());
        let mut writer = PakBuilder::new().writer(buf, Version::V11, "../../../".to_string(), Some(0));
        writer.add_file("a.txt", b"one".to_vec());
        writer.add_file("b.txt", b"two".to_vec());
        writer.add_file("a.txt", b"one-updated".to_vec());
        assert_eq!(writer.list().collect::<Vec<_>>(), vec!["a.txt", "b.txt"]);
        let mut archive = writer.write().unwrap();
        archive.set_position(0);
        let reader = PakBuilder::new().reader(&mut archive).unwrap();
        assert_eq!(reader.read_file("a.txt", &mut archive).unwrap(), b"one-updated");
    }

    #[test]
    fn into_writer_carries_existing_entries_forward() {
        let buf = Cursor::new(Vec::new());
        let mut writer = PakBuilder::new().writer(buf, Version::V11, "../../../".to_string(), Some(0));
        writer.add_file("old.txt", b"keep me".to_vec());
        let archive_bytes = writer.write().unwrap().into_inner();

        let mut source = Cursor::new(archive_bytes);
        let reader = PakBuilder::new().reader(&mut source).unwrap();
        let mut new_writer = reader.into_writer(source, Cursor::new(Vec::new())).unwrap();
        new_writer.add_file("new.txt", b"added".to_vec());
        let mut rewritten = new_writer.write().unwrap();

        rewritten.set_position(0);
        let reader = PakBuilder::new().reader(&mut rewritten).unwrap();
        assert_eq!(reader.list().collect::<Vec<_>>(), vec!["old.txt", "new.txt"]);
        assert_eq!(reader.read_file("old.txt", &mut rewritten).unwrap(), b"keep me");
        assert_eq!(reader.read_file("new.txt", &mut rewritten).unwrap(), b"added");
    }

    #[cfg(feature = "compression")]
    #[test]
    fn compression_allowlist_rejects_unlisted_tag() {
        use crate::entry::{Block, Entry};

        // PakWriter never emits compressed entries, so a Zlib-tagged entry
        // is built directly through the lower-level entry/index API here.
        let version = Version::V11;
        let names = vec![Compression::Zlib];
        let mut archive = Cursor::new(Vec::new());

        let payload = b"aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
        let mut compressed = Vec::new();
        {
            use std::io::Write as _;
            let mut enc = flate2::write::ZlibEncoder::new(&mut compressed, flate2::Compression::default());
            enc.write_all(payload).unwrap();
            enc.finish().unwrap();
        }

        let offset = archive.stream_position().unwrap();
        let mut entry = Entry {
            offset,
            compressed_size: compressed.len() as u64,
            size: payload.len() as u64,
            compression: Compression::Zlib,
            timestamp: None,
            hash: [0u8; 20],
            blocks: vec![Block { start: 0, end: compressed.len() as u64 }],
            is_encrypted: false,
            compression_block_size: payload.len() as u32,
        };
        entry.blocks[0].start += Entry::serialized_size(version, Compression::Zlib, 1);
        entry.blocks[0].end += Entry::serialized_size(version, Compression::Zlib, 1);
        entry.write(&mut archive, version, &names, false).unwrap();
        archive.write_all(&compressed).unwrap();

        let entries = vec![("a.bin".to_string(), entry)];
        let index = Index {
            mount_point: "../../../".to_string(),
            path_hash_seed: Some(0),
            path_hash_index: None,
            full_directory_index: None,
            entries,
        };
        let (index_offset, index_size, index_hash) = index.write(&mut archive, version, &names).unwrap();
        Footer::write(&mut archive, version, index_offset, index_size, index_hash, &names).unwrap();

        archive.set_position(0);
        let restrictive = PakBuilder::new().compression([Compression::Gzip]).reader(&mut archive).unwrap();
        let err = restrictive.read_file("a.bin", &mut archive).unwrap_err();
        assert!(matches!(err, Error::CompressionUnsupported(Compression::Zlib)));

        archive.set_position(0);
        let permissive = PakBuilder::new().compression([Compression::Zlib]).reader(&mut archive).unwrap();
        assert_eq!(permissive.read_file("a.bin", &mut archive).unwrap(), payload);
    }
}
