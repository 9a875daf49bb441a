//! Video corruption oracle
//!
//! Curation only needs a yes/no answer per clip. Decoding frames is out of
//! scope here; callers with a real decoder implement [`CorruptionOracle`]
//! themselves (any `Fn(&Path) -> bool` qualifies).
//!
//! [`Mp4BoxProbe`] is the built-in structural check: it walks the top-level
//! ISO-BMFF boxes of the file, which catches the usual damage from an
//! interrupted recording (empty files, truncated `mdat`, missing `moov`).
//! Every probe is bounded by a fixed box budget so no single file can stall
//! a run.

use crate::config::DEFAULT_PROBE_BUDGET;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use tracing::debug;

/// Answers "is this clip readable?"
///
/// Contract: `true` when the clip cannot be opened or read within a fixed
/// budget, `false` otherwise. A missing file is *not* corruption and must
/// return `false`; absence is handled by the caller. Implementations never
/// panic.
pub trait CorruptionOracle: Send + Sync {
    /// Whether the clip at `path` is corrupted
    fn is_corrupted(&self, path: &Path) -> bool;
}

impl<F> CorruptionOracle for F
where
    F: Fn(&Path) -> bool + Send + Sync,
{
    fn is_corrupted(&self, path: &Path) -> bool {
        self(path)
    }
}

/// Bounded structural probe of an MP4 container
#[derive(Debug, Clone, Copy)]
pub struct Mp4BoxProbe {
    budget: usize,
}

impl Default for Mp4BoxProbe {
    fn default() -> Self {
        Self::new(DEFAULT_PROBE_BUDGET)
    }
}

/// Why a clip was judged unreadable
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeFailure {
    /// Could not open or read the file
    Unreadable(String),
    /// Zero-length file
    Empty,
    /// First box is not `ftyp`
    NotMp4,
    /// A box header is cut short or its size runs past end of file
    Truncated {
        /// Offset of the offending box
        offset: u64,
    },
    /// A box declares an impossible size
    BadBoxSize {
        /// Offset of the offending box
        offset: u64,
    },
    /// No `moov` (track metadata) within the budget
    NoMovieBox,
}

impl Mp4BoxProbe {
    /// Probe inspecting at most `budget` top-level boxes
    #[must_use]
    pub const fn new(budget: usize) -> Self {
        Self { budget }
    }

    /// Box budget
    #[must_use]
    pub const fn budget(&self) -> usize {
        self.budget
    }

    /// Full probe result
    ///
    /// # Errors
    ///
    /// Returns the first structural problem found
    pub fn probe(&self, path: &Path) -> Result<(), ProbeFailure> {
        let mut file = File::open(path).map_err(|e| ProbeFailure::Unreadable(e.to_string()))?;
        let len = file
            .metadata()
            .map_err(|e| ProbeFailure::Unreadable(e.to_string()))?
            .len();
        if len == 0 {
            return Err(ProbeFailure::Empty);
        }

        let mut offset = 0u64;
        let mut seen_moov = false;
        for index in 0..self.budget {
            if offset == len {
                break;
            }
            let (size, kind) = read_box_header(&mut file, offset, len)?;
            if index == 0 && &kind != b"ftyp" {
                return Err(ProbeFailure::NotMp4);
            }
            if &kind == b"moov" {
                seen_moov = true;
            }
            offset = offset
                .checked_add(size)
                .filter(|end| *end <= len)
                .ok_or(ProbeFailure::Truncated { offset })?;
            if seen_moov && offset == len {
                break;
            }
        }

        if seen_moov {
            Ok(())
        } else {
            Err(ProbeFailure::NoMovieBox)
        }
    }
}

impl CorruptionOracle for Mp4BoxProbe {
    fn is_corrupted(&self, path: &Path) -> bool {
        if !path.exists() {
            return false;
        }
        match self.probe(path) {
            Ok(()) => false,
            Err(failure) => {
                debug!(path = %path.display(), ?failure, "clip failed container probe");
                true
            }
        }
    }
}

/// Size (including header) and type of the box at `offset`
fn read_box_header(file: &mut File, offset: u64, len: u64) -> Result<(u64, [u8; 4]), ProbeFailure> {
    let unreadable = |e: std::io::Error| ProbeFailure::Unreadable(e.to_string());
    if len - offset < 8 {
        return Err(ProbeFailure::Truncated { offset });
    }
    file.seek(SeekFrom::Start(offset)).map_err(unreadable)?;
    let mut header = [0u8; 8];
    file.read_exact(&mut header).map_err(unreadable)?;

    let size32 = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);
    let kind = [header[4], header[5], header[6], header[7]];
    let size = match size32 {
        // box extends to end of file
        0 => len - offset,
        // 64-bit size follows the type
        1 => {
            if len - offset < 16 {
                return Err(ProbeFailure::Truncated { offset });
            }
            let mut large = [0u8; 8];
            file.read_exact(&mut large).map_err(unreadable)?;
            let size = u64::from_be_bytes(large);
            if size < 16 {
                return Err(ProbeFailure::BadBoxSize { offset });
            }
            size
        }
        2..=7 => return Err(ProbeFailure::BadBoxSize { offset }),
        n => u64::from(n),
    };
    Ok((size, kind))
}
