// Licensed under the Apache-2.0 license

use thiserror::Error;

pub type TbfResult<T> = Result<T, TbfError>;

/// A fixed-layout structure could not be decoded from the given bytes.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    #[error("buffer of {len} bytes is too small for a TBF header base ({needed} bytes)")]
    BufferTooSmall { len: usize, needed: usize },
    #[error("unsupported TBF header version {0}")]
    UnsupportedVersion(u16),
    #[error("header size {0} is smaller than the TBF header base")]
    HeaderSizeTooSmall(u16),
    #[error("buffer of {len} bytes is shorter than the declared header size {header_size}")]
    Truncated { len: usize, header_size: u16 },
    #[error("header checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("TLV {tag} at offset {offset:#x} with length {length} runs past the header")]
    TlvOverflow { tag: u16, offset: usize, length: u16 },
    #[error("non-zero padding byte at header offset {offset:#x}")]
    NonZeroPadding { offset: usize },
    #[error("TLV {tag} value of {length} bytes does not fit a 16-bit length")]
    TlvTooLarge { tag: u16, length: usize },
    #[error("header of {0} bytes does not fit a 16-bit header size")]
    HeaderTooLarge(usize),
    #[error("header of {header_size} bytes plus binary of {binary_len} bytes overflows u32")]
    ImageTooLarge { header_size: u16, binary_len: u64 },
    #[error("package name is not valid UTF-8")]
    InvalidPackageName,
    #[error("app binary holds {len} bytes, the crt0 header needs {needed}")]
    Crt0Truncated { len: usize, needed: usize },
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TbfError {
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("size {requested} is smaller than the header and binary ({minimum} bytes)")]
    Size { requested: u32, minimum: u32 },
    #[error("no variant has been selected for this app")]
    NoVariantSelected,
    #[error("variant index {index} out of range for an app with {count} variants")]
    VariantOutOfRange { index: usize, count: usize },
    #[error("the selected variant has no app binary")]
    MissingAppBinary,
    #[error("no app size satisfying the board constraint holds {minimum} bytes")]
    SizeConstraint { minimum: u32 },
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read board config: {0}")]
    Io(#[from] std::io::Error),
    #[error("unable to parse board config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid board config: {0}")]
    Invalid(String),
}
