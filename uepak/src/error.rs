#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("utf8 conversion: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
    #[error("utf16 conversion: {0}")]
    Utf16(#[from] std::string::FromUtf16Error),

    #[error("no pak magic at any known footer offset")]
    InvalidArchive,
    #[error("unsupported pak version {0}")]
    UnsupportedVersion(u32),
    #[error("read would pass end of buffer")]
    TruncatedData,
    #[error("archive is encrypted but no key was provided")]
    DecryptionRequired,
    #[error("key must be 32 bytes, got {0}")]
    InvalidKey(usize),
    #[error("compression {0} is not supported by this build")]
    CompressionUnsupported(super::Compression),
    #[error("corrupt entry: {0}")]
    CorruptEntry(&'static str),
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("malformed key: {0}")]
    KeyFormat(&'static str),
    #[error("oodle library error: {0}")]
    Oodle(String),
}
