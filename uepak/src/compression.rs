//! Compression dispatch (`SPEC_FULL.md` §4.5).
//!
//! The core only ever decompresses; writing compressed payloads is a
//! documented non-goal. Oodle is consumed as an opaque capability so the
//! core never links against a native library directly.

use crate::{Compression, Error, Result};

/// Opaque Oodle compress/decompress capability, injected by the caller.
///
/// The `uepak_oodle` crate provides the only implementation in this
/// workspace, loading the platform-native shared library on demand; the
/// core crate depends only on this trait so it stays buildable without the
/// `oodle` feature.
pub trait Oodle: Send + Sync {
    fn decompress(&self, input: &[u8], expected_size: usize) -> Result<Vec<u8>>;
    fn compress(&self, input: &[u8], compressor_id: i32, level: i32) -> Result<Vec<u8>>;
}

/// Decompresses one block's worth of (already decrypted) bytes.
///
/// `expected_size` is the number of uncompressed bytes this block is
/// supposed to yield, per `min(compression_block_size, remaining)`.
pub fn decompress(
    tag: Compression,
    input: &[u8],
    expected_size: usize,
    oodle: Option<&dyn Oodle>,
) -> Result<Vec<u8>> {
    match tag {
        Compression::None => Ok(input.to_vec()),
        #[cfg(feature = "compression")]
        Compression::Zlib => {
            use std::io::Read;
            let mut out = Vec::with_capacity(expected_size);
            flate2::read::ZlibDecoder::new(input).read_to_end(&mut out)?;
            Ok(out)
        }
        #[cfg(feature = "compression")]
        Compression::Gzip => {
            use std::io::Read;
            let mut out = Vec::with_capacity(expected_size);
            flate2::read::GzDecoder::new(input).read_to_end(&mut out)?;
            Ok(out)
        }
        #[cfg(not(feature = "compression"))]
        Compression::Zlib | Compression::Gzip => Err(Error::CompressionUnsupported(tag)),
        Compression::Oodle => {
            let oodle = oodle.ok_or(Error::CompressionUnsupported(tag))?;
            let out = oodle.decompress(input, expected_size)?;
            if out.len() != expected_size {
                return Err(Error::CorruptEntry(
                    "oodle decompression produced fewer bytes than expected",
                ));
            }
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn none_is_pass_through() {
        let data = b"raw bytes";
        assert_eq!(decompress(Compression::None, data, data.len(), None).unwrap(), data);
    }

    #[cfg(feature = "compression")]
    #[test]
    fn zlib_round_trips() {
        use std::io::Write;
        let mut enc = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
        enc.write_all(b"hello world").unwrap();
        let compressed = enc.finish().unwrap();
        let out = decompress(Compression::Zlib, &compressed, 11, None).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn oodle_without_capability_is_unsupported() {
        assert!(matches!(
            decompress(Compression::Oodle, b"x", 1, None),
            Err(Error::CompressionUnsupported(Compression::Oodle))
        ));
    }
}
