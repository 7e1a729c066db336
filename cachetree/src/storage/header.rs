//! File header structure and serialization.
//!
//! The header occupies the start of block 0 and records where the tree root
//! and the allocation bitmap live.

use crate::locator::{LOCATOR_SIZE, Locator};

/// Magic number identifying a cachetree block file: "CTREEBLK"
pub const MAGIC: [u8; 8] = *b"CTREEBLK";

/// Current format version.
pub const FORMAT_VERSION: u32 = 1;

/// Serialized header size. Block sizes below this are rejected.
pub const HEADER_LEN: usize = 64;

/// Header field offsets.
mod offsets {
    pub const MAGIC: usize = 0;
    pub const FORMAT_VERSION: usize = 8;
    pub const BLOCK_SIZE: usize = 12;
    pub const TOTAL_BLOCKS: usize = 16;
    pub const DEGREE: usize = 20;
    pub const CACHE_CAPACITY: usize = 24;
    pub const ROOT: usize = 28;
    pub const BITMAP: usize = 37;
    pub const FLAGS: usize = 46;
    pub const CHECKSUM: usize = 48;
    // 52-63: reserved
}

/// Flag bit: the root field holds a committed locator.
const FLAG_HAS_ROOT: u8 = 0b01;

/// Flag bit: the bitmap field holds a committed locator.
const FLAG_HAS_BITMAP: u8 = 0b10;

/// Metadata stored in block 0 of a block file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Format version number.
    pub format_version: u32,
    /// Block size in bytes.
    pub block_size: u32,
    /// Total number of blocks in the file.
    pub total_blocks: u32,
    /// Degree recorded by the last commit (0 if never committed).
    pub degree: u32,
    /// Cache capacity recorded by the last commit (0 if never committed).
    pub cache_capacity: u32,
    /// Root node of the committed tree.
    pub root: Option<Locator>,
    /// Block run holding the committed allocation bitmap.
    pub bitmap: Option<Locator>,
}

impl Header {
    /// Create a header for a fresh file.
    #[must_use]
    pub const fn new(block_size: u32, total_blocks: u32) -> Self {
        Self {
            format_version: FORMAT_VERSION,
            block_size,
            total_blocks,
            degree: 0,
            cache_capacity: 0,
            root: None,
            bitmap: None,
        }
    }

    /// Serialize the header.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];

        buf[offsets::MAGIC..offsets::MAGIC + 8].copy_from_slice(&MAGIC);
        write_u32(&mut buf, offsets::FORMAT_VERSION, self.format_version);
        write_u32(&mut buf, offsets::BLOCK_SIZE, self.block_size);
        write_u32(&mut buf, offsets::TOTAL_BLOCKS, self.total_blocks);
        write_u32(&mut buf, offsets::DEGREE, self.degree);
        write_u32(&mut buf, offsets::CACHE_CAPACITY, self.cache_capacity);

        let mut flags = 0u8;
        if let Some(root) = self.root {
            buf[offsets::ROOT..offsets::ROOT + LOCATOR_SIZE].copy_from_slice(&root.to_bytes());
            flags |= FLAG_HAS_ROOT;
        }
        if let Some(bitmap) = self.bitmap {
            buf[offsets::BITMAP..offsets::BITMAP + LOCATOR_SIZE]
                .copy_from_slice(&bitmap.to_bytes());
            flags |= FLAG_HAS_BITMAP;
        }
        buf[offsets::FLAGS] = flags;

        let checksum = crc32fast::hash(&buf[..offsets::CHECKSUM]);
        write_u32(&mut buf, offsets::CHECKSUM, checksum);
        buf
    }

    /// Deserialize a header.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, HeaderError> {
        if bytes.len() < HEADER_LEN {
            return Err(HeaderError::Truncated(bytes.len()));
        }

        let mut magic = [0u8; 8];
        magic.copy_from_slice(&bytes[offsets::MAGIC..offsets::MAGIC + 8]);
        if magic != MAGIC {
            return Err(HeaderError::InvalidMagic(magic));
        }

        let stored = read_u32(bytes, offsets::CHECKSUM);
        let actual = crc32fast::hash(&bytes[..offsets::CHECKSUM]);
        if stored != actual {
            return Err(HeaderError::ChecksumMismatch {
                expected: stored,
                actual,
            });
        }

        let format_version = read_u32(bytes, offsets::FORMAT_VERSION);
        if format_version != FORMAT_VERSION {
            return Err(HeaderError::UnsupportedVersion(format_version));
        }

        let block_size = read_u32(bytes, offsets::BLOCK_SIZE);
        if (block_size as usize) < HEADER_LEN {
            return Err(HeaderError::InvalidBlockSize(block_size));
        }

        let flags = bytes[offsets::FLAGS];
        let root = if flags & FLAG_HAS_ROOT == 0 {
            None
        } else {
            Some(read_locator(bytes, offsets::ROOT)?)
        };
        let bitmap = if flags & FLAG_HAS_BITMAP == 0 {
            None
        } else {
            Some(read_locator(bytes, offsets::BITMAP)?)
        };

        Ok(Self {
            format_version,
            block_size,
            total_blocks: read_u32(bytes, offsets::TOTAL_BLOCKS),
            degree: read_u32(bytes, offsets::DEGREE),
            cache_capacity: read_u32(bytes, offsets::CACHE_CAPACITY),
            root,
            bitmap,
        })
    }
}

fn write_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ])
}

fn read_locator(buf: &[u8], offset: usize) -> Result<Locator, HeaderError> {
    let mut raw = [0u8; LOCATOR_SIZE];
    raw.copy_from_slice(&buf[offset..offset + LOCATOR_SIZE]);
    let locator = Locator::from_bytes(&raw).map_err(HeaderError::InvalidLocatorTag)?;
    if locator.is_transient() {
        return Err(HeaderError::TransientLocator(locator));
    }
    Ok(locator)
}

/// Errors that can occur when reading a header.
#[derive(Debug)]
pub enum HeaderError {
    /// Fewer than `HEADER_LEN` bytes available.
    Truncated(usize),
    /// Invalid magic number.
    InvalidMagic([u8; 8]),
    /// Header bytes do not match their checksum.
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Unsupported format version.
    UnsupportedVersion(u32),
    /// Invalid block size.
    InvalidBlockSize(u32),
    /// Unknown locator tag byte.
    InvalidLocatorTag(u8),
    /// A committed locator that is not persistent.
    TransientLocator(Locator),
}

impl std::fmt::Display for HeaderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Truncated(len) => write!(f, "header truncated: {len} bytes"),
            Self::InvalidMagic(magic) => {
                write!(
                    f,
                    "invalid magic number: {:?}",
                    String::from_utf8_lossy(magic)
                )
            }
            Self::ChecksumMismatch { expected, actual } => {
                write!(f, "header checksum mismatch: expected {expected}, got {actual}")
            }
            Self::UnsupportedVersion(v) => write!(f, "unsupported format version: {v}"),
            Self::InvalidBlockSize(s) => write!(f, "invalid block size: {s}"),
            Self::InvalidLocatorTag(t) => write!(f, "invalid locator tag: 0x{t:02x}"),
            Self::TransientLocator(loc) => write!(f, "transient locator {loc} in header"),
        }
    }
}

impl std::error::Error for HeaderError {}
