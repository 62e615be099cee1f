//! Rolling payload checksums.
//!
//! The digest is folded over logical payload bytes, one block at a time, so
//! the result does not depend on where block boundaries fall.

use crate::format::{CHECKSUM_ADLER32, CHECKSUM_NONE};

const ADLER_BASE: u64 = 65521;

/// Checksum algorithm recorded in byte 5 of the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgo {
    None,
    Adler32,
}

impl ChecksumAlgo {
    pub fn tag(self) -> u8 {
        match self {
            Self::None => CHECKSUM_NONE,
            Self::Adler32 => CHECKSUM_ADLER32,
        }
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            CHECKSUM_NONE => Some(Self::None),
            CHECKSUM_ADLER32 => Some(Self::Adler32),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Adler32 => "adler32",
        }
    }
}

/// Running checksum state, one variant per algorithm.
#[derive(Debug, Clone)]
pub enum Checksum {
    None,
    Adler32 { s1: u64, s2: u64 },
}

impl Checksum {
    pub fn new(algo: ChecksumAlgo) -> Self {
        match algo {
            ChecksumAlgo::None => Self::None,
            ChecksumAlgo::Adler32 => Self::Adler32 { s1: 1, s2: 0 },
        }
    }

    pub fn algo(&self) -> ChecksumAlgo {
        match self {
            Self::None => ChecksumAlgo::None,
            Self::Adler32 { .. } => ChecksumAlgo::Adler32,
        }
    }

    /// Fold `input` into the running state.
    pub fn update(&mut self, input: &[u8]) {
        match self {
            Self::None => {}
            Self::Adler32 { s1, s2 } => adler32_update(s1, s2, input),
        }
    }

    /// Final 32-bit digest. Zero for [`ChecksumAlgo::None`].
    pub fn finish(&self) -> u32 {
        match self {
            Self::None => 0,
            Self::Adler32 { s1, s2 } => ((*s1 << 16) | *s2) as u32,
        }
    }
}

// Leading `len % 8` bytes go one at a time, the rest in batches of eight.
// s1 is reduced after every batch; s2 only when the remaining length is a
// multiple of 0x8000, which keeps it far below u64 overflow.
fn adler32_update(s1_state: &mut u64, s2_state: &mut u64, input: &[u8]) {
    let mut s1 = *s1_state;
    let mut s2 = *s2_state;

    let lead = input.len() % 8;
    if lead != 0 {
        for &b in &input[..lead] {
            s1 += u64::from(b);
            s2 += s1;
        }
        if s1 >= ADLER_BASE {
            s1 -= ADLER_BASE;
        }
        s2 %= ADLER_BASE;
    }

    let mut remaining = input.len() - lead;
    for batch in input[lead..].chunks_exact(8) {
        for &b in batch {
            s1 += u64::from(b);
            s2 += s1;
        }
        remaining -= 8;

        if s1 >= ADLER_BASE {
            s1 -= ADLER_BASE;
        }
        if remaining % 0x8000 == 0 {
            s2 %= ADLER_BASE;
        }
    }

    debug_assert!(s1 < ADLER_BASE);
    debug_assert!(s2 < ADLER_BASE);

    *s1_state = s1;
    *s2_state = s2;
}
