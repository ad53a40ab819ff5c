//! AES-256-ECB block decryption with 16-byte alignment (`SPEC_FULL.md` §4.4).

use crate::{Error, Result};

#[cfg(feature = "encryption")]
use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};

/// 32 raw AES-256 key bytes, parsed from hex (optionally `0x`-prefixed) or
/// base64, or supplied directly.
#[derive(Clone)]
pub(crate) struct Key(#[cfg(feature = "encryption")] pub(crate) aes::Aes256);

impl std::fmt::Debug for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Key(..)")
    }
}

#[cfg(feature = "encryption")]
impl Key {
    pub fn from_bytes(bytes: &[u8; 32]) -> Key {
        Key(aes::Aes256::new(GenericArray::from_slice(bytes)))
    }
}

/// Rounds `len` up to the next multiple of 16.
pub fn align16(len: u64) -> u64 {
    (len + 15) & !15
}

/// Parses a 32-byte AES key from a hex string (optional `0x` prefix) or
/// base64, matching the CLI's `--aes` contract.
pub fn parse_key(s: &str) -> Result<[u8; 32]> {
    let s = s.trim();
    let hex_candidate = s.strip_prefix("0x").unwrap_or(s);
    let bytes = if let Ok(b) = hex::decode(hex_candidate) {
        b
    } else {
        use base64::Engine;
        base64::engine::general_purpose::STANDARD
            .decode(s.trim_end_matches('='))
            .map_err(|_| Error::KeyFormat("key is neither valid hex nor valid base64"))?
    };
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| Error::InvalidKey(b.len()))
}

#[cfg(feature = "encryption")]
pub(crate) fn decrypt(key: &Key, data: &mut [u8]) -> Result<()> {
    if data.len() % 16 != 0 {
        return Err(Error::CorruptEntry("encrypted payload is not 16-byte aligned"));
    }
    for chunk in data.chunks_mut(16) {
        let block = GenericArray::from_mut_slice(chunk);
        key.0.decrypt_block(block);
    }
    Ok(())
}

#[cfg(feature = "encryption")]
pub(crate) fn encrypt(key: &Key, data: &mut [u8]) -> Result<()> {
    if data.len() % 16 != 0 {
        return Err(Error::CorruptEntry("plaintext to encrypt is not 16-byte aligned"));
    }
    for chunk in data.chunks_mut(16) {
        let block = GenericArray::from_mut_slice(chunk);
        key.0.encrypt_block(block);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align16_rounds_up() {
        assert_eq!(align16(0), 0);
        assert_eq!(align16(1), 16);
        assert_eq!(align16(16), 16);
        assert_eq!(align16(17), 32);
    }

    #[test]
    fn parse_key_accepts_hex_with_and_without_prefix() {
        let hex32 = "00".repeat(32);
        assert_eq!(parse_key(&hex32).unwrap(), [0u8; 32]);
        assert_eq!(parse_key(&format!("0x{hex32}")).unwrap(), [0u8; 32]);
    }

    #[test]
    fn parse_key_accepts_base64() {
        use base64::Engine;
        let b64 = base64::engine::general_purpose::STANDARD.encode([7u8; 32]);
        assert_eq!(parse_key(&b64).unwrap(), [7u8; 32]);
    }

    #[cfg(feature = "encryption")]
    #[test]
    fn decrypt_inverts_encrypt() {
        let key = Key::from_bytes(&[3u8; 32]);
        let mut data = (0..32u8).collect::<Vec<_>>();
        let original = data.clone();
        encrypt(&key, &mut data).unwrap();
        assert_ne!(data, original);
        decrypt(&key, &mut data).unwrap();
        assert_eq!(data, original);
    }
}
