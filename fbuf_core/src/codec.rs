use thiserror::Error;

/// Failure reported by a block compressor or decompressor.
#[derive(Debug, Error)]
#[error("{codec}: {message}")]
pub struct CodecError {
    pub codec: &'static str,
    pub message: String,
}

impl CodecError {
    pub fn new(codec: &'static str, message: impl Into<String>) -> Self {
        Self {
            codec,
            message: message.into(),
        }
    }
}

/// Block compression primitive used by the framer.
///
/// Each `Codec` implementation:
/// - Is identified by a stable one-byte `tag()` stored in the container header.
///   Readers refuse files whose tag differs from the codec they were given.
/// - Compresses every block independently; no state carries between blocks.
/// - Must compress any input of `MIN_BLOCK_SIZE..=BLOCK_SIZE` bytes into
///   strictly fewer than `SPILL_SIZE` bytes. The framer treats anything else
///   as a contract violation.
pub trait Codec: Send + Sync {
    /// Stable tag stored in byte 4 of the header.
    fn tag(&self) -> u8;

    /// Human-readable codec name for CLI display.
    fn name(&self) -> &'static str;

    /// Compress a single block.
    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError>;

    /// Decompress a single block into `out`, returning the number of bytes
    /// produced. `out.len()` is the maximum output size.
    ///
    /// Returning `Ok(0)` or an error both mean the input is corrupt.
    fn decompress_block(&self, compressed: &[u8], out: &mut [u8]) -> Result<usize, CodecError>;
}
