use crate::error::{FbufError, Result};

/// Magic bytes at the start of every FBUF container.
pub const MAGIC: &[u8; 4] = b"FBUF";

/// Fixed size of the container header in bytes.
///   magic[4] + compression:u8 + checksum:u8 + reserved[2]
///   + length:u32 BE + checksum_value:u32 BE
///   = 4 + 1 + 1 + 2 + 4 + 4 = 16
pub const HEADER_SIZE: usize = 16;

/// Offset of the length/checksum summary inside the header.
pub const SUMMARY_OFFSET: u64 = 8;

/// Size of the length/checksum summary, both in the header and as the
/// trailer appended by writers that cannot seek.
pub const TRAILER_SIZE: usize = 8;

/// Size of the big-endian compressed-length prefix before each block.
pub const BLOCK_PREFIX_SIZE: usize = 4;

/// Upper bound on a block in either form. Compressed blocks larger than
/// this are corrupt.
pub const SPILL_SIZE: usize = 65536;

/// Usable uncompressed bytes per block. Kept below `SPILL_SIZE` so the
/// worst-case expansion of an incompressible block still fits one spill.
pub const BLOCK_SIZE: usize = SPILL_SIZE - (SPILL_SIZE / 16);

/// Compressors reject inputs shorter than this; short blocks are zero padded.
pub const MIN_BLOCK_SIZE: usize = 16;

// ── Compression tags ───────────────────────────────────────────────────────

pub const COMPRESSION_STORED: u8 = b'N';
pub const COMPRESSION_LZ4: u8 = b'L';
pub const COMPRESSION_ZSTD: u8 = b'Z';

// ── Checksum tags ──────────────────────────────────────────────────────────

pub const CHECKSUM_NONE: u8 = b'-';
pub const CHECKSUM_ADLER32: u8 = b'A';

// ── Header ─────────────────────────────────────────────────────────────────

/// Decoded representation of the 16-byte container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub compression: u8,
    pub checksum: u8,
    /// Must be zero; kept so readers can reject files that use it.
    pub reserved: u16,
    /// Total decompressed payload length. Zero placeholder for streamed files.
    pub length: u32,
    /// Digest of the decompressed payload. Zero placeholder for streamed files.
    pub checksum_value: u32,
}

impl Header {
    /// A fresh header as written at open time, summary fields still zero.
    pub fn new(compression: u8, checksum: u8) -> Self {
        Self {
            compression,
            checksum,
            reserved: 0,
            length: 0,
            checksum_value: 0,
        }
    }

    /// Serialize to exactly `HEADER_SIZE` bytes.
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[..4].copy_from_slice(MAGIC);
        buf[4] = self.compression;
        buf[5] = self.checksum;
        buf[6..8].copy_from_slice(&self.reserved.to_be_bytes());
        buf[8..16].copy_from_slice(&summary_bytes(self.length, self.checksum_value));
        buf
    }

    /// Deserialize from `HEADER_SIZE` bytes, checking only the magic.
    ///
    /// Algorithm tags are left for the opener to compare against what it
    /// expects; see [`Header::check_compatible`].
    pub fn from_bytes(buf: &[u8; HEADER_SIZE], name: &str) -> Result<Self> {
        if &buf[..4] != MAGIC {
            return Err(FbufError::incompatible(
                name,
                "not an FBUF container or created by an incompatible version",
            ));
        }
        let mut header = Self {
            compression: buf[4],
            checksum: buf[5],
            reserved: u16::from_be_bytes([buf[6], buf[7]]),
            length: 0,
            checksum_value: 0,
        };
        header.apply_summary(&[
            buf[8], buf[9], buf[10], buf[11], buf[12], buf[13], buf[14], buf[15],
        ]);
        Ok(header)
    }

    /// Replace the length/checksum fields with an 8-byte summary, as found
    /// in the trailer of a streamed container.
    pub fn apply_summary(&mut self, summary: &[u8; TRAILER_SIZE]) {
        self.length = u32::from_be_bytes([summary[0], summary[1], summary[2], summary[3]]);
        self.checksum_value =
            u32::from_be_bytes([summary[4], summary[5], summary[6], summary[7]]);
    }

    /// Reject files written with a different compressor or checksum, or that
    /// set the reserved bytes.
    pub fn check_compatible(&self, compression: u8, checksum: u8, name: &str) -> Result<()> {
        if self.compression != compression {
            return Err(FbufError::incompatible(
                name,
                format!(
                    "created with unexpected compression algorithm {}",
                    tag_display(self.compression)
                ),
            ));
        }
        if self.checksum != checksum {
            return Err(FbufError::incompatible(
                name,
                format!(
                    "created with unexpected checksum algorithm {}",
                    tag_display(self.checksum)
                ),
            ));
        }
        if self.reserved != 0 {
            return Err(FbufError::incompatible(
                name,
                format!("reserved header bytes are {:#06x}, expected zero", self.reserved),
            ));
        }
        Ok(())
    }
}

/// The 8 summary bytes: length then checksum, both big-endian.
pub fn summary_bytes(length: u32, checksum: u32) -> [u8; TRAILER_SIZE] {
    let mut buf = [0u8; TRAILER_SIZE];
    buf[..4].copy_from_slice(&length.to_be_bytes());
    buf[4..].copy_from_slice(&checksum.to_be_bytes());
    buf
}

/// Render an algorithm tag for error messages.
pub fn tag_display(tag: u8) -> String {
    if tag.is_ascii_graphic() {
        format!("'{}'", tag as char)
    } else {
        format!("{tag:#04x}")
    }
}
