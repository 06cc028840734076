//! Virtual memory areas.
//!
//! A [`Vma`] describes a contiguous stretch of user address space and what
//! may be materialized inside it; the set of a process's areas is owned and
//! mutated by the process layer. This subsystem only reads the set, under
//! its lock, while resolving faults.

use super::{MapPermission, VirtAddr};
use alloc::sync::Arc;
use alloc::vec::Vec;
use spin::{Mutex, MutexGuard};

/// Backing-store interface the fault resolver needs from the filesystem.
pub trait VmFile: Send + Sync {
    /// Read up to `buf.len()` bytes starting at byte `offset` of the file,
    /// returning how many were read. May sleep on disk I/O, so the caller
    /// must not hold spinlocks across the call.
    fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, FileError>;
}

/// Opaque backing-store failure; the fault resolver reports it as
/// [`FaultError::NoFile`](super::FaultError::NoFile).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FileError;

/// File window backing a [`Vma`]: bytes `[offset, offset + len)` of `file`
/// appear starting at the area's first address; anything past the window
/// reads as zeroes.
#[derive(Clone)]
pub struct FileBacking {
    pub file: Arc<dyn VmFile>,
    pub offset: usize,
    pub len: usize,
}

/// A contiguous region of user address space. `perm` holds at most
/// `R | W | X`; the user bit is applied by the resolver when it installs
/// leaves.
#[derive(Clone)]
pub struct Vma {
    pub va_begin: VirtAddr,
    pub va_end: VirtAddr,
    pub perm: MapPermission,
    pub backing: Option<FileBacking>,
}

impl Vma {
    /// An anonymous, zero-filled area. Bounds are page-aligned; the fault
    /// path computes file offsets from page bases.
    pub fn new(va_begin: VirtAddr, va_end: VirtAddr, perm: MapPermission) -> Self {
        assert!(va_begin.is_aligned() && va_end.is_aligned());
        Self {
            va_begin,
            va_end,
            perm,
            backing: None,
        }
    }

    /// An area whose leading bytes come from a file window.
    pub fn new_backed(
        va_begin: VirtAddr,
        va_end: VirtAddr,
        perm: MapPermission,
        backing: FileBacking,
    ) -> Self {
        assert!(va_begin.is_aligned() && va_end.is_aligned());
        Self {
            va_begin,
            va_end,
            perm,
            backing: Some(backing),
        }
    }

    pub fn contains(&self, va: VirtAddr) -> bool {
        self.va_begin <= va && va < self.va_end
    }
}

/// The area set of one process.
pub struct VmaSet {
    areas: Vec<Vma>,
}

impl VmaSet {
    pub fn new() -> Self {
        Self { areas: Vec::new() }
    }

    pub fn push(&mut self, vma: Vma) {
        self.areas.push(vma);
    }

    /// The area covering `va`, if any.
    pub fn lookup(&self, va: VirtAddr) -> Option<&Vma> {
        self.areas.iter().find(|area| area.contains(va))
    }
}

impl Default for VmaSet {
    fn default() -> Self {
        Self::new()
    }
}

/// Lock-wrapped [`VmaSet`]. The lock covers every lookup/permission-check/
/// install sequence in the fault path so a racing teardown cannot free an
/// area mid-check; it is never held across file I/O.
pub struct VmaTable {
    inner: Mutex<VmaSet>,
}

impl VmaTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(VmaSet::new()),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, VmaSet> {
        self.inner.lock()
    }
}

impl Default for VmaTable {
    fn default() -> Self {
        Self::new()
    }
}
