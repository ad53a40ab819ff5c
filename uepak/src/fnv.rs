//! FNV-1a path hashing used by the path-hash index (see `SPEC_FULL.md` §4.6).

const OFFSET_BASIS: u64 = 0xCBF29CE484222325;
const PRIME: u64 = 0x0000_0100_0000_01B3;

/// 64-bit FNV-1a over raw bytes, with the accumulator seeded at
/// `offset_basis + seed` rather than plain `offset_basis`.
pub fn fnv64(data: &[u8], seed: u64) -> u64 {
    let mut hash = OFFSET_BASIS.wrapping_add(seed);
    for &byte in data {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// `fnv64` over the UTF-16LE encoding of `path.to_lowercase()`.
pub fn fnv64_path(path: &str, seed: u64) -> u64 {
    let bytes: Vec<u8> = path
        .to_lowercase()
        .encode_utf16()
        .flat_map(u16::to_le_bytes)
        .collect();
    fnv64(&bytes, seed)
}

/// Splits `path` into `(parent_with_trailing_slash, file_name)`.
///
/// Returns `None` for the root path (`"/"` or empty). A path with no
/// embedded slash is treated as a root-level file: `("/", path)`.
pub fn split_path_child(path: &str) -> Option<(&str, &str)> {
    if path.is_empty() || path == "/" {
        return None;
    }
    let trimmed = path.strip_suffix('/').unwrap_or(path);
    match trimmed.rfind('/') {
        Some(idx) => Some((&trimmed[..idx + 1], &trimmed[idx + 1..])),
        None => Some(("/", trimmed)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv64_matches_reference_vector() {
        // Empty input at seed 0 must equal the bare offset basis.
        assert_eq!(fnv64(&[], 0), OFFSET_BASIS);
    }

    #[test]
    fn fnv64_path_is_case_insensitive() {
        assert_eq!(fnv64_path("Foo/Bar.uasset", 0), fnv64_path("foo/bar.uasset", 0));
    }

    #[test]
    fn fnv64_path_seed_biases_accumulator() {
        assert_ne!(fnv64_path("a", 0), fnv64_path("a", 1));
    }

    #[test]
    fn split_path_child_handles_root_and_nested() {
        assert_eq!(split_path_child(""), None);
        assert_eq!(split_path_child("/"), None);
        assert_eq!(split_path_child("a.txt"), Some(("/", "a.txt")));
        assert_eq!(split_path_child("dir/a.txt"), Some(("dir/", "a.txt")));
        assert_eq!(split_path_child("a/b/c.txt"), Some(("a/b/", "c.txt")));
        assert_eq!(split_path_child("dir/"), Some(("/", "dir")));
    }
}
