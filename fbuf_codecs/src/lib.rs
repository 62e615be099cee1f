mod lz4_codec;
mod passthrough;
mod zstd_codec;

pub use lz4_codec::Lz4Codec;
pub use passthrough::PassThroughCodec;
pub use zstd_codec::ZstdCodec;

use fbuf_core::format::{COMPRESSION_LZ4, COMPRESSION_STORED, COMPRESSION_ZSTD};
use fbuf_core::Codec;
use std::sync::Arc;

/// Resolve a codec from the compression tag in a container header.
///
/// Used by tools that open containers without knowing in advance how they
/// were written. Returns `None` for tags this build does not know.
pub fn codec_by_tag(tag: u8) -> Option<Arc<dyn Codec>> {
    match tag {
        COMPRESSION_STORED => Some(Arc::new(PassThroughCodec)),
        COMPRESSION_LZ4 => Some(Arc::new(Lz4Codec)),
        COMPRESSION_ZSTD => Some(Arc::new(ZstdCodec::default())),
        _ => None,
    }
}
