//! Error type shared by every FBUF operation.

use std::io;

use thiserror::Error;

use crate::codec::CodecError;
use crate::session::Mode;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, FbufError>;

/// Everything that can go wrong while writing or reading a container.
///
/// None of these are recovered internally. A caller that gets one back should
/// treat the container as unusable: it points at a toolchain bug, a disk
/// problem, or a file produced by an incompatible build.
#[derive(Debug, Error)]
pub enum FbufError {
    /// Underlying open/read/write/seek/stat failure.
    #[error("{name}: {op}: {source}")]
    Io {
        /// Diagnostic name of the session
        name: String,
        /// The operation that failed
        op: &'static str,
        #[source]
        source: io::Error,
    },

    /// Bad magic, unexpected algorithm tags, or non-zero reserved bytes.
    #[error("{name}: {reason}")]
    Incompatible {
        /// Diagnostic name of the session
        name: String,
        /// What did not match
        reason: String,
    },

    /// Framing or compressed data is damaged.
    #[error("file {name} has invalid compression format: {reason}")]
    Corrupt {
        /// Diagnostic name of the session
        name: String,
        /// What was wrong with the data
        reason: String,
    },

    /// The payload decompressed cleanly but does not match its recorded digest.
    #[error("{name}: incorrect checksum {computed:08x}, expected {expected:08x}")]
    ChecksumMismatch {
        /// Diagnostic name of the session
        name: String,
        /// Digest computed over the decompressed payload
        computed: u32,
        /// Digest recorded by the writer
        expected: u32,
    },

    /// A decode asked for bytes beyond the decompressed payload.
    #[error("read past end of decompressed file {name}: {wanted} bytes at offset {position} of {len}")]
    ReadPastEnd {
        /// Diagnostic name of the session
        name: String,
        /// Read cursor when the decode started
        position: usize,
        /// Bytes the decode needed
        wanted: usize,
        /// Decompressed payload length
        len: usize,
    },

    /// The block compressor broke its contract while writing.
    #[error("{name}: compressor failed: {source}")]
    Codec {
        /// Diagnostic name of the session
        name: String,
        #[source]
        source: CodecError,
    },

    /// The payload no longer fits the header's 32-bit length field.
    #[error("{name}: payload exceeds the 4 GiB container limit")]
    PayloadTooLarge {
        /// Diagnostic name of the session
        name: String,
    },

    /// A write operation on a read session or vice versa.
    #[error("{name}: operation requires a session opened in {expected:?} mode")]
    WrongMode {
        /// Diagnostic name of the session
        name: String,
        /// Mode the operation needs
        expected: Mode,
    },

    /// The registry closed this session's file during abnormal shutdown.
    #[error("{name}: session was force-closed")]
    ForceClosed {
        /// Diagnostic name of the session
        name: String,
    },
}

impl FbufError {
    pub(crate) fn io(name: &str, op: &'static str, source: io::Error) -> Self {
        Self::Io {
            name: name.to_string(),
            op,
            source,
        }
    }

    pub(crate) fn corrupt(name: &str, reason: impl Into<String>) -> Self {
        Self::Corrupt {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn incompatible(name: &str, reason: impl Into<String>) -> Self {
        Self::Incompatible {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Diagnostic name of the session the error came from.
    pub fn name(&self) -> &str {
        match self {
            Self::Io { name, .. }
            | Self::Incompatible { name, .. }
            | Self::Corrupt { name, .. }
            | Self::ChecksumMismatch { name, .. }
            | Self::ReadPastEnd { name, .. }
            | Self::Codec { name, .. }
            | Self::PayloadTooLarge { name }
            | Self::WrongMode { name, .. }
            | Self::ForceClosed { name } => name,
        }
    }
}
