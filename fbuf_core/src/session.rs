use std::fs::File;
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};

use crate::checksum::{Checksum, ChecksumAlgo};
use crate::codec::Codec;
use crate::error::{FbufError, Result};
use crate::format::{summary_bytes, Header, SUMMARY_OFFSET};
use crate::framer::{self, BlockWriter};
use crate::primitive::{self, DecodeError, MAX_VARINT_LEN};
use crate::registry::{self, Entry, SessionHandle};

/// Direction of a session, fixed when it is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Write,
    Read,
}

struct WriteState {
    writer: BlockWriter,
    /// False for pipes and other sinks where the summary is appended.
    seekable: bool,
}

struct ReadState {
    data: Vec<u8>,
    pos: usize,
    checksum: Checksum,
    expected: u32,
}

impl ReadState {
    fn verify(&self, name: &str) -> Result<u32> {
        let computed = self.checksum.finish();
        if computed == self.expected {
            Ok(computed)
        } else {
            Err(FbufError::ChecksumMismatch {
                name: name.to_string(),
                computed,
                expected: self.expected,
            })
        }
    }
}

enum State {
    Write(WriteState),
    Read(ReadState),
}

/// One open container file.
///
/// # Write sessions
/// The 16-byte header is written as soon as the session opens. Values are
/// appended with the `put_*` / `write_*` methods and compressed a block at a
/// time. [`close`](Self::close) flushes the last block and records the
/// payload length and checksum: in place at offset 8 for regular files,
/// appended as an 8-byte trailer for pipes.
///
/// # Read sessions
/// The whole payload is decompressed and checksummed during open; the
/// `get_*` / `read_*` methods then walk the in-memory buffer. `close`
/// compares the digest with the one the writer recorded.
///
/// Sessions are meant for one thread at a time. A write session that ends
/// without a successful close (dropped during error propagation, or `close`
/// itself failing) deletes its output, so no half-written container is left
/// behind.
pub struct Session {
    name: String,
    handle: SessionHandle,
    /// Removed if a write session ends without a successful close.
    output: Option<PathBuf>,
    codec_tag: u8,
    algo: ChecksumAlgo,
    state: State,
    closed: bool,
}

impl Session {
    /// Create (or truncate) `path` and open it for writing.
    ///
    /// Returns `Ok(None)` if the file cannot be created at all.
    pub fn create(
        path: impl AsRef<Path>,
        algo: ChecksumAlgo,
        codec: Arc<dyn Codec>,
    ) -> Result<Option<Self>> {
        let path = path.as_ref();
        let name = path.display().to_string();
        match File::create(path) {
            Ok(file) => {
                Self::attach(file, name, Some(path.to_path_buf()), Mode::Write, algo, codec)
                    .map(Some)
                    .map_err(|e| {
                        let _ = std::fs::remove_file(path);
                        e
                    })
            }
            Err(e) => {
                debug!(file = %name, error = %e, "cannot create container");
                Ok(None)
            }
        }
    }

    /// Open `path` for reading, decompressing the whole payload.
    ///
    /// Returns `Ok(None)` if the file cannot be opened at all; any problem
    /// with its contents is an error.
    pub fn open(
        path: impl AsRef<Path>,
        algo: ChecksumAlgo,
        codec: Arc<dyn Codec>,
    ) -> Result<Option<Self>> {
        let path = path.as_ref();
        let name = path.display().to_string();
        match File::open(path) {
            Ok(file) => Self::attach(file, name, None, Mode::Read, algo, codec).map(Some),
            Err(e) => {
                debug!(file = %name, error = %e, "cannot open container");
                Ok(None)
            }
        }
    }

    /// Wrap an already-open file or pipe.
    ///
    /// `name` is only used in diagnostics. Force-close never deletes
    /// anything for these sessions since there is no path to remove.
    pub fn from_file(
        file: File,
        name: impl Into<String>,
        mode: Mode,
        algo: ChecksumAlgo,
        codec: Arc<dyn Codec>,
    ) -> Result<Self> {
        Self::attach(file, name.into(), None, mode, algo, codec)
    }

    fn attach(
        mut file: File,
        name: String,
        path: Option<PathBuf>,
        mode: Mode,
        algo: ChecksumAlgo,
        codec: Arc<dyn Codec>,
    ) -> Result<Self> {
        let codec_tag = codec.tag();
        let state = match mode {
            Mode::Write => {
                let seekable = file
                    .metadata()
                    .map_err(|e| FbufError::io(&name, "fstat", e))?
                    .is_file();
                file.write_all(&Header::new(codec_tag, algo.tag()).to_bytes())
                    .map_err(|e| FbufError::io(&name, "write", e))?;
                State::Write(WriteState {
                    writer: BlockWriter::new(codec, Checksum::new(algo)),
                    seekable,
                })
            }
            Mode::Read => {
                let payload =
                    framer::read_payload(&mut file, &name, codec.as_ref(), Checksum::new(algo))?;
                State::Read(ReadState {
                    data: payload.data,
                    pos: 0,
                    checksum: payload.checksum,
                    expected: payload.expected,
                })
            }
        };

        let handle = registry::register(Entry {
            name: name.clone(),
            mode,
            path: path.clone(),
            file,
        });
        debug!(file = %name, ?mode, codec = %crate::format::tag_display(codec_tag), "opened session");

        Ok(Self {
            name,
            handle,
            output: path,
            codec_tag,
            algo,
            state,
            closed: false,
        })
    }

    /// Diagnostic name: the path, or whatever was given to [`from_file`](Self::from_file).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mode(&self) -> Mode {
        match self.state {
            State::Write(_) => Mode::Write,
            State::Read(_) => Mode::Read,
        }
    }

    pub fn codec_tag(&self) -> u8 {
        self.codec_tag
    }

    pub fn checksum_algo(&self) -> ChecksumAlgo {
        self.algo
    }

    /// Decompressed payload length of a read session; bytes written so far
    /// (flushed and pending) for a write session.
    pub fn len(&self) -> usize {
        match &self.state {
            State::Write(w) => w.writer.total() as usize + w.writer.pending_len(),
            State::Read(r) => r.data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read cursor. Always 0 for write sessions.
    pub fn position(&self) -> usize {
        match &self.state {
            State::Write(_) => 0,
            State::Read(r) => r.pos,
        }
    }

    /// Bytes left before the end of the payload. Always 0 for write sessions.
    pub fn remaining(&self) -> usize {
        match &self.state {
            State::Write(_) => 0,
            State::Read(r) => r.data.len() - r.pos,
        }
    }

    /// Finish the session and return the payload checksum.
    ///
    /// Write sessions flush their last block and record length and checksum.
    /// Read sessions fail with [`FbufError::ChecksumMismatch`] if the payload
    /// does not match what the writer recorded. Either way the session is
    /// removed from the registry and its file closed; a write session that
    /// fails here also deletes its output.
    pub fn close(mut self) -> Result<u32> {
        self.closed = true;

        let result = match &mut self.state {
            State::Write(w) => finish_write(w, self.handle, &self.name),
            State::Read(r) => r.verify(&self.name),
        };

        let Some(entry) = registry::unregister(self.handle) else {
            return Err(FbufError::ForceClosed {
                name: self.name.clone(),
            });
        };
        drop(entry);

        match result {
            Ok(checksum) => {
                debug!(file = %self.name, checksum, "closed session");
                Ok(checksum)
            }
            Err(e) => {
                self.discard_output();
                Err(e)
            }
        }
    }

    /// Compare the payload digest with the recorded one without closing.
    ///
    /// The whole payload was checksummed at open, so callers can refuse a
    /// damaged container before acting on any of its contents.
    pub fn verify(&self) -> Result<u32> {
        match &self.state {
            State::Read(r) => r.verify(&self.name),
            State::Write(_) => Err(FbufError::WrongMode {
                name: self.name.clone(),
                expected: Mode::Read,
            }),
        }
    }

    fn discard_output(&self) {
        let Some(path) = &self.output else {
            return;
        };
        match std::fs::remove_file(path) {
            Ok(()) => warn!(file = %self.name, "removed unfinished container"),
            Err(e) => warn!(file = %self.name, error = %e, "failed to remove unfinished container"),
        }
    }

    // ── Writing ────────────────────────────────────────────────────────────

    /// Make room for `more` bytes, flushing a full block first if needed.
    fn reserve(&mut self, more: usize) -> Result<&mut BlockWriter> {
        let Self {
            name,
            handle,
            state,
            ..
        } = self;
        let State::Write(w) = state else {
            return Err(FbufError::WrongMode {
                name: name.clone(),
                expected: Mode::Write,
            });
        };
        if w.writer.would_spill(more) {
            let mut file = registry::file(*handle, name)?;
            w.writer.flush(&mut file, name)?;
        }
        Ok(&mut w.writer)
    }

    fn append(&mut self, bytes: &[u8]) -> Result<()> {
        self.reserve(bytes.len())?.push(bytes);
        Ok(())
    }

    /// Unsigned base-128 variable-length integer.
    pub fn put_uint(&mut self, value: u64) -> Result<()> {
        let mut enc = [0u8; MAX_VARINT_LEN];
        let n = primitive::encode_uint(value, &mut enc);
        self.append(&enc[..n])
    }

    /// Signed zig-zag variable-length integer.
    pub fn put_int(&mut self, value: i64) -> Result<()> {
        let mut enc = [0u8; MAX_VARINT_LEN];
        let n = primitive::encode_int(value, &mut enc);
        self.append(&enc[..n])
    }

    pub fn write_u8(&mut self, value: u8) -> Result<()> {
        self.append(&[value])
    }

    pub fn write_u16(&mut self, value: u16) -> Result<()> {
        self.append(&value.to_le_bytes())
    }

    pub fn write_u32(&mut self, value: u32) -> Result<()> {
        self.append(&value.to_le_bytes())
    }

    pub fn write_u64(&mut self, value: u64) -> Result<()> {
        self.append(&value.to_le_bytes())
    }

    /// Stored as its IEEE-754 bit pattern, so NaN payloads survive.
    pub fn write_double(&mut self, value: f64) -> Result<()> {
        self.write_u64(value.to_bits())
    }

    /// Copy `bytes` verbatim. Ranges of any length are split across blocks.
    pub fn write_raw(&mut self, bytes: &[u8]) -> Result<()> {
        let mut rest = bytes;
        while !rest.is_empty() {
            let writer = self.reserve(1)?;
            let n = writer.room().min(rest.len());
            writer.push(&rest[..n]);
            rest = &rest[n..];
        }
        Ok(())
    }

    // ── Reading ────────────────────────────────────────────────────────────

    fn decode<T>(
        &mut self,
        f: impl FnOnce(&[u8], &mut usize) -> std::result::Result<T, DecodeError>,
    ) -> Result<T> {
        let State::Read(r) = &mut self.state else {
            return Err(FbufError::WrongMode {
                name: self.name.clone(),
                expected: Mode::Read,
            });
        };
        f(&r.data, &mut r.pos).map_err(|e| match e {
            DecodeError::Truncated {
                position,
                wanted,
                len,
            } => FbufError::ReadPastEnd {
                name: self.name.clone(),
                position,
                wanted,
                len,
            },
            e @ DecodeError::Overlong { .. } => FbufError::corrupt(&self.name, e.to_string()),
        })
    }

    pub fn get_uint(&mut self) -> Result<u64> {
        self.decode(primitive::decode_uint)
    }

    pub fn get_int(&mut self) -> Result<i64> {
        self.decode(primitive::decode_int)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        self.decode(primitive::decode_u8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        self.decode(primitive::decode_u16)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        self.decode(primitive::decode_u32)
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        self.decode(primitive::decode_u64)
    }

    pub fn read_double(&mut self) -> Result<f64> {
        self.decode(primitive::decode_double)
    }

    /// Fill `buf` from the payload.
    pub fn read_raw(&mut self, buf: &mut [u8]) -> Result<()> {
        self.decode(|data, pos| {
            buf.copy_from_slice(primitive::take(data, pos, buf.len())?);
            Ok(())
        })
    }
}

fn finish_write(w: &mut WriteState, handle: SessionHandle, name: &str) -> Result<u32> {
    let mut file = registry::file(handle, name)?;
    let checksum = w.writer.finish(&mut file, name)?;

    if w.seekable {
        file.seek(SeekFrom::Start(SUMMARY_OFFSET))
            .map_err(|e| FbufError::io(name, "seek", e))?;
    }
    // Pipes cannot seek back, so the summary becomes a trailer.
    let summary = summary_bytes(w.writer.total() as u32, checksum);
    file.write_all(&summary)
        .and_then(|()| file.flush())
        .map_err(|e| FbufError::io(name, "write", e))?;

    debug!(
        file = name,
        length = w.writer.total(),
        blocks = w.writer.blocks(),
        compressed = w.writer.compressed_total(),
        "finished container"
    );
    Ok(checksum)
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        // Force-closed sessions were already cleaned up.
        let Some(entry) = registry::unregister(self.handle) else {
            return;
        };
        drop(entry);
        warn!(file = %self.name, "session dropped without close");
        self.discard_output();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.name)
            .field("mode", &self.mode())
            .field("codec", &(self.codec_tag as char))
            .field("checksum", &self.algo)
            .finish()
    }
}
