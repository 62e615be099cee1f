use fbuf_core::codec::{Codec, CodecError};
use fbuf_core::format::COMPRESSION_STORED;

/// No-op codec: stores blocks verbatim, with no compression.
///
/// Useful for debugging the framing by eye and for checking format
/// behaviour independently of any compressor.
pub struct PassThroughCodec;

impl Codec for PassThroughCodec {
    fn tag(&self) -> u8 {
        COMPRESSION_STORED
    }

    fn name(&self) -> &'static str {
        "stored"
    }

    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(raw.to_vec())
    }

    fn decompress_block(&self, compressed: &[u8], out: &mut [u8]) -> Result<usize, CodecError> {
        let cap = out.len();
        let dst = out.get_mut(..compressed.len()).ok_or_else(|| {
            CodecError::new(
                "stored",
                format!("{} byte block exceeds {cap} byte output", compressed.len()),
            )
        })?;
        dst.copy_from_slice(compressed);
        Ok(compressed.len())
    }
}
