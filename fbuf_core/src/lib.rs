pub mod checksum;
pub mod codec;
pub mod error;
pub mod format;
pub mod framer;
pub mod primitive;
pub mod registry;
pub mod session;

pub use checksum::{Checksum, ChecksumAlgo};
pub use codec::{Codec, CodecError};
pub use error::{FbufError, Result};
pub use format::{Header, BLOCK_SIZE, HEADER_SIZE, MAGIC, SPILL_SIZE};
pub use registry::force_close_all;
pub use session::{Mode, Session};
