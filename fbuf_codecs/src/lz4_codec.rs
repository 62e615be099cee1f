use fbuf_core::codec::{Codec, CodecError};
use fbuf_core::format::COMPRESSION_LZ4;
use lz4_flex::block::{compress, decompress_into};

/// LZ4 block codec.
///
/// Fastest of the bundled codecs in both directions. Blocks carry no size
/// prefix; the framer supplies the output bound.
pub struct Lz4Codec;

impl Codec for Lz4Codec {
    fn tag(&self) -> u8 {
        COMPRESSION_LZ4
    }

    fn name(&self) -> &'static str {
        "lz4"
    }

    fn compress_block(&self, raw: &[u8]) -> Result<Vec<u8>, CodecError> {
        Ok(compress(raw))
    }

    fn decompress_block(&self, compressed: &[u8], out: &mut [u8]) -> Result<usize, CodecError> {
        decompress_into(compressed, out).map_err(|e| CodecError::new("lz4", e.to_string()))
    }
}
