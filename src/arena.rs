//! Double-buffered arena file.
//!
//! The arena carries two alternating copies of the backing DB image plus
//! a small header naming the active one:
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic: 0x4C455930 ("LEY0")
//! 4       1     version: u8 = 1
//! 5       1     active_buffer: u8 ∈ {0, 1}
//! 6       2     padding
//! 8       8     sequence: u64
//! 16      4080  reserved (zero)
//! 4096    N     buffer 0
//! 4096+N  N     buffer 1
//! ```
//!
//! `N = (filesize − 4096) / 2`. Writers fill the inactive buffer, fsync,
//! then flip `active_buffer` and bump `sequence` — the header flip is the
//! single commit point, so readers never observe a half-written image.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{ProjectionError, Result};

/// Arena header size (one page).
pub const ARENA_HEADER_SIZE: u64 = 4096;

/// Magic bytes "LEY0" as a little-endian u32.
pub const ARENA_MAGIC: u32 = 0x4C45_5930;

/// Format version.
pub const ARENA_VERSION: u8 = 1;

/// Minimum per-buffer capacity for freshly created arenas.
const MIN_BUFFER_SIZE: u64 = 256 * 1024;

const ZERO_CHUNK: usize = 64 * 1024;

// ── Header ─────────────────────────────────────────────────────────

/// Parsed arena header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArenaHeader {
    pub active_buffer: u8,
    pub sequence: u64,
}

impl ArenaHeader {
    /// Parse and validate the first 16 header bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 16 {
            return Err(ProjectionError::ArenaInvalid(
                "file too small for arena header".into(),
            ));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != ARENA_MAGIC {
            return Err(ProjectionError::ArenaInvalid(format!(
                "arena magic mismatch: {magic:#010x}"
            )));
        }
        let version = bytes[4];
        if version != ARENA_VERSION {
            return Err(ProjectionError::ArenaInvalid(format!(
                "unsupported arena version: {version}"
            )));
        }
        let active_buffer = bytes[5];
        if active_buffer > 1 {
            return Err(ProjectionError::ArenaInvalid(format!(
                "active buffer index out of range: {active_buffer}"
            )));
        }
        let sequence = u64::from_le_bytes(bytes[8..16].try_into().unwrap());
        Ok(Self {
            active_buffer,
            sequence,
        })
    }

    /// Serialize into a full header page.
    pub fn to_page(self) -> Vec<u8> {
        let mut page = vec![0u8; ARENA_HEADER_SIZE as usize];
        page[0..4].copy_from_slice(&ARENA_MAGIC.to_le_bytes());
        page[4] = ARENA_VERSION;
        page[5] = self.active_buffer;
        page[8..16].copy_from_slice(&self.sequence.to_le_bytes());
        page
    }
}

// ── Arena ──────────────────────────────────────────────────────────

/// Handle on an arena file.
///
/// The header is re-read from disk on every operation: other processes
/// flip it underneath us and this handle must observe their commits.
#[derive(Debug)]
pub struct Arena {
    file: File,
    path: PathBuf,
    buffer_size: u64,
}

impl Arena {
    /// Create an arena seeded from a DB image, with a default capacity
    /// policy (4× the image, 4 KiB-rounded, at least 256 KiB per buffer).
    pub fn create(db_path: &Path, arena_path: &Path) -> Result<Self> {
        let db_len = std::fs::metadata(db_path)?.len();
        let capacity = (db_len * 4).max(MIN_BUFFER_SIZE);
        Self::create_with_capacity(db_path, arena_path, capacity)
    }

    /// Create an arena with an explicit per-buffer capacity.
    pub fn create_with_capacity(
        db_path: &Path,
        arena_path: &Path,
        capacity: u64,
    ) -> Result<Self> {
        let db = std::fs::read(db_path)?;
        let buffer_size = capacity.max(db.len() as u64).next_multiple_of(4096);

        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(arena_path)?;
        file.set_len(ARENA_HEADER_SIZE + 2 * buffer_size)?;

        file.seek(SeekFrom::Start(ARENA_HEADER_SIZE))?;
        file.write_all(&db)?;

        let header = ArenaHeader {
            active_buffer: 0,
            sequence: 1,
        };
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&header.to_page())?;
        file.sync_all()?;

        Ok(Self {
            file,
            path: arena_path.to_path_buf(),
            buffer_size,
        })
    }

    /// Open an existing arena, validating the header and geometry.
    pub fn open(arena_path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(arena_path)?;
        let len = file.metadata()?.len();
        if len < ARENA_HEADER_SIZE || (len - ARENA_HEADER_SIZE) % 2 != 0 {
            return Err(ProjectionError::ArenaInvalid(format!(
                "arena file has bad geometry: {len} bytes"
            )));
        }
        let buffer_size = (len - ARENA_HEADER_SIZE) / 2;
        let mut arena = Self {
            file,
            path: arena_path.to_path_buf(),
            buffer_size,
        };
        arena.header()?;
        Ok(arena)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Per-buffer capacity in bytes.
    pub fn buffer_size(&self) -> u64 {
        self.buffer_size
    }

    /// Re-read and validate the on-disk header.
    pub fn header(&mut self) -> Result<ArenaHeader> {
        let mut bytes = [0u8; 16];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut bytes)?;
        ArenaHeader::from_bytes(&bytes)
    }

    fn buffer_offset(&self, index: u8) -> u64 {
        ARENA_HEADER_SIZE + u64::from(index) * self.buffer_size
    }

    /// Copy the master DB into the inactive buffer, zero-pad the
    /// remainder, fsync, then flip the header. Returns the new sequence.
    ///
    /// On `Overflow` the arena is untouched.
    pub fn flush(&mut self, master_db_path: &Path) -> Result<u64> {
        let db = std::fs::read(master_db_path)?;
        if db.len() as u64 > self.buffer_size {
            return Err(ProjectionError::Overflow {
                needed: db.len() as u64,
                capacity: self.buffer_size,
            });
        }

        let header = self.header()?;
        let inactive = 1 - header.active_buffer;
        self.file
            .seek(SeekFrom::Start(self.buffer_offset(inactive)))?;
        self.file.write_all(&db)?;
        let mut remaining = self.buffer_size - db.len() as u64;
        let zeros = [0u8; ZERO_CHUNK];
        while remaining > 0 {
            let n = remaining.min(ZERO_CHUNK as u64) as usize;
            self.file.write_all(&zeros[..n])?;
            remaining -= n as u64;
        }
        // Buffer bytes must be durable before the flip becomes visible.
        self.file.sync_all()?;

        let next = ArenaHeader {
            active_buffer: inactive,
            sequence: header.sequence + 1,
        };
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&next.to_page())?;
        self.file.sync_all()?;
        Ok(next.sequence)
    }

    /// Copy the active buffer out as a standalone DB image in a temp
    /// file. The caller owns (and eventually removes) the returned path.
    pub fn extract_active_db(&mut self) -> Result<PathBuf> {
        let header = self.header()?;
        let offset = self.buffer_offset(header.active_buffer);
        self.file.seek(SeekFrom::Start(offset))?;

        let temp = tempfile::Builder::new()
            .prefix("leyline-view-")
            .suffix(".db")
            .tempfile()?;
        let (mut out, temp_path) = temp.keep().map_err(|e| e.error)?;

        let mut remaining = self.buffer_size;
        let mut chunk = vec![0u8; ZERO_CHUNK];
        while remaining > 0 {
            let n = remaining.min(ZERO_CHUNK as u64) as usize;
            self.file.read_exact(&mut chunk[..n])?;
            out.write_all(&chunk[..n])?;
            remaining -= n as u64;
        }
        out.sync_all()?;
        Ok(temp_path)
    }
}

/// Convenience: extract the active DB image from an arena at `path`.
pub fn extract_active_db(path: &Path) -> Result<PathBuf> {
    Arena::open(path)?.extract_active_db()
}
