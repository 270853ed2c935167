//! Mmap'd control block.
//!
//! A 4096-byte file shared between the writer process and any number of
//! reader processes. The generation counter is the only cross-process
//! signal: a reader observing a new generation re-extracts the arena's
//! active buffer. Layout (little-endian):
//!
//! ```text
//! Offset  Size  Field
//! 0       4     magic: 0x4C455943 ("LEYC")
//! 4       4     version: u32 = 1
//! 8       8     generation: u64 (atomic)
//! 16      256   arena_path: NUL-terminated UTF-8
//! 272     8     arena_size: u64
//! 280     3816  reserved (zero)
//! ```

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::MmapMut;

use crate::error::{ProjectionError, Result};

/// Total control block size.
pub const CONTROL_SIZE: usize = 4096;

/// Magic bytes "LEYC" as a little-endian u32.
pub const CONTROL_MAGIC: u32 = 0x4C45_5943;

/// Format version.
pub const CONTROL_VERSION: u32 = 1;

const GENERATION_OFFSET: usize = 8;
const PATH_OFFSET: usize = 16;
const PATH_CAPACITY: usize = 256;
const SIZE_OFFSET: usize = 272;

/// File-backed control block mapping.
#[derive(Debug)]
pub struct ControlBlock {
    mmap: MmapMut,
}

impl ControlBlock {
    /// Open an existing control block or create a fresh one.
    ///
    /// A newly created file is truncated to exactly 4096 bytes and
    /// stamped with magic + version. Re-opening validates both; a
    /// mismatch refuses to open.
    pub fn open_or_create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;
        let len = file.metadata()?.len();
        let fresh = len == 0;
        if fresh {
            file.set_len(CONTROL_SIZE as u64)?;
        } else if len != CONTROL_SIZE as u64 {
            return Err(ProjectionError::Corruption(format!(
                "control block is {} bytes, expected {}",
                len, CONTROL_SIZE
            )));
        }

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        if fresh {
            mmap[0..4].copy_from_slice(&CONTROL_MAGIC.to_le_bytes());
            mmap[4..8].copy_from_slice(&CONTROL_VERSION.to_le_bytes());
            mmap.flush()?;
        } else {
            let magic = u32::from_le_bytes(mmap[0..4].try_into().unwrap());
            if magic != CONTROL_MAGIC {
                return Err(ProjectionError::Corruption(format!(
                    "control block magic mismatch: {magic:#010x}"
                )));
            }
            let version = u32::from_le_bytes(mmap[4..8].try_into().unwrap());
            if version != CONTROL_VERSION {
                return Err(ProjectionError::Corruption(format!(
                    "unsupported control block version: {version}"
                )));
            }
        }
        Ok(Self { mmap })
    }

    fn generation_cell(&self) -> &AtomicU64 {
        // The mapping is page-aligned, so offset 8 is u64-aligned.
        unsafe { &*(self.mmap.as_ptr().add(GENERATION_OFFSET) as *const AtomicU64) }
    }

    /// Read the generation counter with acquire semantics.
    pub fn generation(&self) -> u64 {
        self.generation_cell().load(Ordering::Acquire)
    }

    /// Increment the generation with release semantics; returns the new
    /// value. Readers observing it are guaranteed to see every plain
    /// write made before the call.
    pub fn bump_generation(&self) -> u64 {
        self.generation_cell().fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The arena path recorded by the writer.
    pub fn arena_path(&self) -> Result<PathBuf> {
        let raw = &self.mmap[PATH_OFFSET..PATH_OFFSET + PATH_CAPACITY];
        let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
        let text = std::str::from_utf8(&raw[..end])
            .map_err(|_| ProjectionError::Corruption("arena path is not UTF-8".into()))?;
        Ok(PathBuf::from(text))
    }

    /// The arena file size recorded by the writer.
    pub fn arena_size(&self) -> u64 {
        u64::from_le_bytes(
            self.mmap[SIZE_OFFSET..SIZE_OFFSET + 8]
                .try_into()
                .unwrap(),
        )
    }

    /// Publish a new arena. The path and size are written first; the
    /// generation store (release) is the commit point, so a reader that
    /// observes the new generation also sees the new path.
    pub fn set_arena(&mut self, path: &Path, size: u64, generation: u64) -> Result<()> {
        let bytes = path.to_str().ok_or_else(|| {
            ProjectionError::Corruption("arena path is not UTF-8".into())
        })?;
        if bytes.len() >= PATH_CAPACITY {
            return Err(ProjectionError::PathOverflow(bytes.len()));
        }
        let dst = &mut self.mmap[PATH_OFFSET..PATH_OFFSET + PATH_CAPACITY];
        dst.fill(0);
        dst[..bytes.len()].copy_from_slice(bytes.as_bytes());
        self.mmap[SIZE_OFFSET..SIZE_OFFSET + 8].copy_from_slice(&size.to_le_bytes());
        self.generation_cell().store(generation, Ordering::Release);
        self.mmap.flush()?;
        Ok(())
    }
}
