//! Block framing: the only code that talks to the compressor.
//!
//! # Layout
//! ```text
//! [HEADER: 16 bytes]
//! [len:u32 BE][compressed block 0]
//! [len:u32 BE][compressed block 1]
//! ...
//! [TRAILER: 8 bytes, only when the writer could not seek back]
//! ```

use std::fs::File;
use std::io::{self, Read, Write};
use std::sync::Arc;

use memmap2::Mmap;
use tracing::{debug, trace};

use crate::checksum::Checksum;
use crate::codec::{Codec, CodecError};
use crate::error::{FbufError, Result};
use crate::format::{
    Header, BLOCK_PREFIX_SIZE, BLOCK_SIZE, HEADER_SIZE, MIN_BLOCK_SIZE, SPILL_SIZE, TRAILER_SIZE,
};

/// Initial buffer size when slurping a non-seekable source.
const STREAM_CHUNK: usize = 16384;

// ── Write path ─────────────────────────────────────────────────────────────

/// Accumulates payload bytes and emits compressed blocks.
///
/// Callers reserve space with [`would_spill`](Self::would_spill) /
/// [`flush`](Self::flush) before pushing, so a block is only ever cut when
/// the next value no longer fits.
pub struct BlockWriter {
    codec: Arc<dyn Codec>,
    checksum: Checksum,
    pending: Vec<u8>,
    /// Uncompressed bytes already flushed, padding included.
    total: u64,
    blocks: u64,
    compressed: u64,
}

impl BlockWriter {
    pub fn new(codec: Arc<dyn Codec>, checksum: Checksum) -> Self {
        Self {
            codec,
            checksum,
            pending: Vec::with_capacity(BLOCK_SIZE),
            total: 0,
            blocks: 0,
            compressed: 0,
        }
    }

    /// True when appending `more` bytes would overflow the current block.
    pub fn would_spill(&self, more: usize) -> bool {
        debug_assert!(more <= BLOCK_SIZE);
        self.pending.len() + more > BLOCK_SIZE
    }

    /// Free space left in the current block.
    pub fn room(&self) -> usize {
        BLOCK_SIZE - self.pending.len()
    }

    /// Append bytes that the caller has already made room for.
    pub fn push(&mut self, bytes: &[u8]) {
        debug_assert!(bytes.len() <= self.room(), "push without reserve");
        self.pending.extend_from_slice(bytes);
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn total(&self) -> u64 {
        self.total
    }

    pub fn blocks(&self) -> u64 {
        self.blocks
    }

    /// Compressed bytes written so far, length prefixes included.
    pub fn compressed_total(&self) -> u64 {
        self.compressed
    }

    pub fn checksum(&self) -> &Checksum {
        &self.checksum
    }

    /// Compress the pending bytes as one block and write it to `sink`.
    pub fn flush<W: Write>(&mut self, sink: &mut W, name: &str) -> Result<()> {
        if self.pending.len() < MIN_BLOCK_SIZE {
            self.pending.resize(MIN_BLOCK_SIZE, 0);
        }

        self.checksum.update(&self.pending);

        let compressed = self
            .codec
            .compress_block(&self.pending)
            .map_err(|source| FbufError::Codec {
                name: name.to_string(),
                source,
            })?;

        if compressed.is_empty() || compressed.len() >= SPILL_SIZE {
            return Err(FbufError::Codec {
                name: name.to_string(),
                source: CodecError::new(
                    self.codec.name(),
                    format!(
                        "produced a {} byte block from {} input bytes",
                        compressed.len(),
                        self.pending.len()
                    ),
                ),
            });
        }

        let blksz = compressed.len() as u32;
        sink.write_all(&blksz.to_be_bytes())
            .and_then(|()| sink.write_all(&compressed))
            .map_err(|e| FbufError::io(name, "write", e))?;

        trace!(
            file = name,
            raw = self.pending.len(),
            compressed = compressed.len(),
            "flushed block"
        );

        self.total += self.pending.len() as u64;
        if self.total > u64::from(u32::MAX) {
            return Err(FbufError::PayloadTooLarge {
                name: name.to_string(),
            });
        }
        self.compressed += (BLOCK_PREFIX_SIZE + compressed.len()) as u64;
        self.blocks += 1;
        self.pending.clear();
        Ok(())
    }

    /// Flush whatever is pending and return the final digest.
    ///
    /// Requests a flush of a full block's worth of space, so nothing is
    /// written when the pending buffer is already empty.
    pub fn finish<W: Write>(&mut self, sink: &mut W, name: &str) -> Result<u32> {
        if self.would_spill(BLOCK_SIZE) {
            self.flush(sink, name)?;
        }
        Ok(self.checksum.finish())
    }
}

// ── Read path ──────────────────────────────────────────────────────────────

/// Raw container bytes, either mapped or slurped from a stream.
enum Source {
    Mapped(Mmap),
    Buffered(Vec<u8>),
}

impl std::ops::Deref for Source {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Self::Mapped(map) => map,
            Self::Buffered(buf) => buf,
        }
    }
}

/// A fully decompressed container payload.
#[derive(Debug)]
pub struct Payload {
    pub header: Header,
    pub data: Vec<u8>,
    /// Digest recorded by the writer, from the header or trailer.
    pub expected: u32,
    /// Checksum folded over `data` in decode order.
    pub checksum: Checksum,
    pub blocks: u64,
    /// True when the source could not be mapped and the trailer was used.
    pub streamed: bool,
}

/// Read, validate, and eagerly decompress a whole container from `file`.
///
/// The header is checked against `codec` and `checksum` before any block
/// is touched. Regular files are memory-mapped; anything else is read to
/// end-of-input and its 8-byte trailer replaces the header summary.
pub fn read_payload(
    file: &mut File,
    name: &str,
    codec: &dyn Codec,
    checksum: Checksum,
) -> Result<Payload> {
    let mut header_buf = [0u8; HEADER_SIZE];
    file.read_exact(&mut header_buf).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            FbufError::corrupt(name, "truncated header")
        } else {
            FbufError::io(name, "read", e)
        }
    })?;

    let mut header = Header::from_bytes(&header_buf, name)?;
    header.check_compatible(codec.tag(), checksum.algo().tag(), name)?;

    let meta = file
        .metadata()
        .map_err(|e| FbufError::io(name, "fstat", e))?;

    let streamed = !meta.is_file();
    let source = if streamed {
        let buf = slurp(file, &header_buf, name)?;
        if buf.len() < HEADER_SIZE + TRAILER_SIZE {
            return Err(FbufError::corrupt(name, "stream ended before trailer"));
        }
        let mut trailer = [0u8; TRAILER_SIZE];
        trailer.copy_from_slice(&buf[buf.len() - TRAILER_SIZE..]);
        header.apply_summary(&trailer);
        Source::Buffered(buf)
    } else {
        // SAFETY: the map is read-only and dropped before this function
        // returns; nothing in this process writes the file meanwhile.
        #[allow(unsafe_code)]
        let map = unsafe { Mmap::map(&*file) }.map_err(|e| FbufError::io(name, "mmap", e))?;
        Source::Mapped(map)
    };

    let mut checksum = checksum;
    let (data, blocks) = decompress_blocks(&source, header.length as usize, codec, &mut checksum, name)?;
    drop(source);

    debug!(
        file = name,
        length = header.length,
        blocks,
        streamed,
        "decompressed container"
    );

    Ok(Payload {
        expected: header.checksum_value,
        header,
        data,
        checksum,
        blocks,
        streamed,
    })
}

/// Read a non-seekable source to end-of-input, growing the buffer by
/// doubling. The already-consumed header is copied to the front.
fn slurp(file: &mut File, header: &[u8; HEADER_SIZE], name: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; STREAM_CHUNK];
    buf[..HEADER_SIZE].copy_from_slice(header);
    let mut used = HEADER_SIZE;

    loop {
        if used == buf.len() {
            buf.resize(buf.len() * 2, 0);
        }
        match file.read(&mut buf[used..]) {
            Ok(0) => break,
            Ok(n) => used += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(FbufError::io(name, "read", e)),
        }
    }

    buf.truncate(used);
    Ok(buf)
}

/// Decompress blocks starting just past the header until `length` bytes
/// have been produced, folding each block into `checksum`.
pub fn decompress_blocks(
    input: &[u8],
    length: usize,
    codec: &dyn Codec,
    checksum: &mut Checksum,
    name: &str,
) -> Result<(Vec<u8>, u64)> {
    let mut out = vec![0u8; length];
    let mut scratch = vec![0u8; SPILL_SIZE];
    let mut dst = 0;
    let mut src = HEADER_SIZE;
    let mut blocks = 0u64;

    while dst < length {
        let (blksz, data_start) = block_prefix(input, src, name)?;
        let block = &input[data_start..data_start + blksz];

        let produced = codec
            .decompress_block(block, &mut scratch)
            .map_err(|e| FbufError::corrupt(name, format!("block {blocks}: {e}")))?;
        if produced == 0 {
            return Err(FbufError::corrupt(
                name,
                format!("block {blocks} decompressed to nothing"),
            ));
        }
        if produced > length - dst {
            return Err(FbufError::corrupt(
                name,
                format!(
                    "block {blocks} overruns declared length {length} by {} bytes",
                    produced - (length - dst)
                ),
            ));
        }

        checksum.update(&scratch[..produced]);
        out[dst..dst + produced].copy_from_slice(&scratch[..produced]);

        dst += produced;
        src = data_start + blksz;
        blocks += 1;
    }

    Ok((out, blocks))
}

/// Read and validate the length prefix at `offset`, returning the block
/// length and where its data starts.
fn block_prefix(input: &[u8], offset: usize, name: &str) -> Result<(usize, usize)> {
    let prefix = input
        .get(offset..offset + BLOCK_PREFIX_SIZE)
        .ok_or_else(|| FbufError::corrupt(name, "read past end of compressed file"))?;
    let blksz = u32::from_be_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as usize;

    if blksz > SPILL_SIZE {
        return Err(FbufError::corrupt(
            name,
            format!("block length {blksz} at offset {offset} exceeds {SPILL_SIZE}"),
        ));
    }

    let data_start = offset + BLOCK_PREFIX_SIZE;
    if data_start + blksz > input.len() {
        return Err(FbufError::corrupt(name, "read past end of compressed file"));
    }
    Ok((blksz, data_start))
}

/// Location of one stored block, for inspection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockInfo {
    /// Offset of the length prefix from the start of the file.
    pub offset: u64,
    pub compressed_len: u32,
}

/// Walk the block framing of a seekable container without decompressing.
///
/// Expects the blocks to run to the end of `input`, which holds for files
/// written to a regular file.
pub fn scan_blocks(input: &[u8], name: &str) -> Result<Vec<BlockInfo>> {
    let mut blocks = Vec::new();
    let mut offset = HEADER_SIZE;
    while offset < input.len() {
        let (blksz, data_start) = block_prefix(input, offset, name)?;
        blocks.push(BlockInfo {
            offset: offset as u64,
            compressed_len: blksz as u32,
        });
        offset = data_start + blksz;
    }
    Ok(blocks)
}
