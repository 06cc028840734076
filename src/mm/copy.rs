//! Copying between kernel memory and user address spaces.
//!
//! All three routines pre-fault the user range before walking it, so a
//! sparse but legal range is materialized up front and the page-by-page
//! copy below never sleeps. Each page is then translated through a
//! user-only walk; a page that is valid but not user-accessible fails the
//! copy rather than leaking kernel mappings.

use super::fault::{resolve_fault, resolve_fault_range, FaultCause, FaultError};
use super::{PageTable, VmaTable};
use crate::config::PAGE_SIZE;

/// Why a user copy failed; syscalls report any of these as `-1`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CopyError {
    /// Pre-faulting the range failed.
    Fault(FaultError),
    /// A page in the range has no valid user-accessible mapping.
    NotUser,
    /// `copy_in_str` ran out of buffer before the terminating NUL.
    StringTooLong,
}

impl From<FaultError> for CopyError {
    fn from(err: FaultError) -> Self {
        Self::Fault(err)
    }
}

/// Copy `src` into user memory at `dst_va`. (kernel → user)
pub fn copy_out(
    pt: &mut PageTable,
    vmas: &VmaTable,
    dst_va: usize,
    src: &[u8],
) -> Result<(), CopyError> {
    resolve_fault_range(pt, vmas, dst_va, src.len(), FaultCause::Write)?;

    let mut va = dst_va;
    let mut copied = 0;
    while copied < src.len() {
        let va0 = va - va % PAGE_SIZE;
        let ppn = pt.translate_user(va0).ok_or(CopyError::NotUser)?;
        let off = va - va0;
        let n = (PAGE_SIZE - off).min(src.len() - copied);
        ppn.as_mut_bytes_array()[off..off + n].copy_from_slice(&src[copied..copied + n]);
        copied += n;
        va = va0 + PAGE_SIZE;
    }
    Ok(())
}

/// Fill `dst` from user memory at `src_va`. (user → kernel)
pub fn copy_in(
    pt: &mut PageTable,
    vmas: &VmaTable,
    src_va: usize,
    dst: &mut [u8],
) -> Result<(), CopyError> {
    resolve_fault_range(pt, vmas, src_va, dst.len(), FaultCause::Read)?;

    let mut va = src_va;
    let mut copied = 0;
    while copied < dst.len() {
        let va0 = va - va % PAGE_SIZE;
        let ppn = pt.translate_user(va0).ok_or(CopyError::NotUser)?;
        let off = va - va0;
        let n = (PAGE_SIZE - off).min(dst.len() - copied);
        dst[copied..copied + n].copy_from_slice(&ppn.as_mut_bytes_array()[off..off + n]);
        copied += n;
        va = va0 + PAGE_SIZE;
    }
    Ok(())
}

/// Copy a NUL-terminated string from user memory at `src_va` into `dst`,
/// terminator included, returning how many bytes were written.
///
/// The string's length is unknown up front, so pages are faulted in and
/// scanned one at a time rather than over a pre-faulted range.
pub fn copy_in_str(
    pt: &mut PageTable,
    vmas: &VmaTable,
    src_va: usize,
    dst: &mut [u8],
) -> Result<usize, CopyError> {
    let mut va = src_va;
    let mut copied = 0;
    loop {
        let va0 = va - va % PAGE_SIZE;
        resolve_fault(pt, vmas, va0, FaultCause::Read)?;
        let ppn = pt.translate_user(va0).ok_or(CopyError::NotUser)?;
        let bytes = ppn.as_mut_bytes_array();
        for &byte in &bytes[va - va0..] {
            if copied == dst.len() {
                return Err(CopyError::StringTooLong);
            }
            dst[copied] = byte;
            copied += 1;
            if byte == 0 {
                return Ok(copied);
            }
        }
        va = va0 + PAGE_SIZE;
    }
}
