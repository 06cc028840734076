//! Demand paging: resolving page faults against a process's VMA set.
//!
//! A fault is resolved in two phases. Everything that must be consistent
//! with the VMA set (lookup, permission check, frame allocation, mapping
//! install) runs inside one lock scope. The backing-store read, which may
//! sleep, runs after the scope ends; only an owned snapshot of the backing
//! descriptor crosses the boundary, so nothing borrowed from the set can
//! outlive the lock.

use super::{frame_alloc, MapPermission, PTEFlags, PageTable, PhysPageNum, VirtAddr, VmFile, VmaTable};
use crate::config::{MAXVA, PAGE_SIZE};
use alloc::sync::Arc;
use log::debug;

/// Access kind that triggered the fault.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultCause {
    Read,
    Write,
    Execute,
}

impl FaultCause {
    /// Maps a RISC-V `scause` page-fault exception code to a cause.
    pub fn from_scause(code: usize) -> Option<Self> {
        match code {
            12 => Some(Self::Execute),
            13 => Some(Self::Read),
            15 => Some(Self::Write),
            _ => None,
        }
    }

    fn required(self) -> MapPermission {
        match self {
            Self::Read => MapPermission::R,
            Self::Write => MapPermission::W,
            Self::Execute => MapPermission::X,
        }
    }
}

/// Why a fault could not be resolved. The trap handler dispatches on this
/// exhaustively; anything but a clean resolution terminates the process.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FaultError {
    /// No area of the process covers the faulting address.
    NoVma,
    /// The covering area forbids the attempted access, or the existing
    /// page is not user-accessible.
    BadPerm,
    /// No frame left to back the page.
    NoMem,
    /// Installing the mapping failed for lack of page-table pages.
    MapFailed,
    /// The backing file could not be read.
    NoFile,
}

/// Backing-store read carried out of the lock scope.
struct PendingFill {
    file: Arc<dyn VmFile>,
    offset: usize,
    len: usize,
    ppn: PhysPageNum,
    page: VirtAddr,
}

/// Resolve a fault at `va` for `cause`, materializing the page on first
/// touch. A repeated fault on an already-resolved page is reported as
/// success without touching the mapping, so stale-TLB faults are cheap.
pub fn resolve_fault(
    pt: &mut PageTable,
    vmas: &VmaTable,
    va: usize,
    cause: FaultCause,
) -> Result<(), FaultError> {
    if va >= MAXVA {
        return Err(FaultError::NoVma);
    }
    let addr = VirtAddr::from(va);
    let vpn = addr.as_vpn_by_floor();
    let page = VirtAddr::from(vpn);

    let fill = {
        let areas = vmas.lock();
        let vma = areas.lookup(addr);

        if let Some(pte) = pt.translate(vpn).filter(|pte| pte.is_valid()) {
            // Already mapped: the fault is stale-TLB noise unless the area
            // or the leaf forbids this access.
            let vma = vma.ok_or(FaultError::NoVma)?;
            if !vma.perm.is_empty() && !vma.perm.contains(cause.required()) {
                return Err(FaultError::BadPerm);
            }
            if !pte.is_user() {
                return Err(FaultError::BadPerm);
            }
            return Ok(());
        }

        let Some(vma) = vma else {
            debug!("fault at {addr:?}: no vma");
            return Err(FaultError::NoVma);
        };
        if !vma.perm.contains(cause.required()) {
            debug!("fault at {addr:?}: {cause:?} not permitted");
            return Err(FaultError::BadPerm);
        }

        let frame = frame_alloc().ok_or(FaultError::NoMem)?;
        let ppn = frame.ppn;
        let flags = PTEFlags::U | PTEFlags::from(vma.perm);
        pt.map_frame(vpn, frame, flags)
            .map_err(|_| FaultError::MapFailed)?;

        match &vma.backing {
            Some(backing) => {
                let page_off = page.0 - vma.va_begin.0;
                if page_off >= backing.len {
                    // Pages past the file window stay zero-filled.
                    None
                } else {
                    Some(PendingFill {
                        file: Arc::clone(&backing.file),
                        offset: backing.offset + page_off,
                        len: PAGE_SIZE.min(backing.len - page_off),
                        ppn,
                        page,
                    })
                }
            }
            None => None,
        }
    };
    // The VMA lock is gone; the read below may sleep.

    let Some(fill) = fill else {
        return Ok(());
    };
    let buf = &mut fill.ppn.as_mut_bytes_array()[..fill.len];
    match fill.file.read_at(fill.offset, buf) {
        Ok(n) if n == fill.len => Ok(()),
        _ => {
            // Back out the page: a leaf over a freed frame must not
            // survive a failed fill.
            pt.unmap_pages(fill.page, PAGE_SIZE, true);
            Err(FaultError::NoFile)
        }
    }
}

/// Resolve every page of `[va, va + len)`, taking the VMA lock afresh for
/// each page, stopping at the first failure.
pub fn resolve_fault_range(
    pt: &mut PageTable,
    vmas: &VmaTable,
    va: usize,
    len: usize,
    cause: FaultCause,
) -> Result<(), FaultError> {
    let end = va.checked_add(len).ok_or(FaultError::NoVma)?;
    let mut page = va - va % PAGE_SIZE;
    while page < end {
        resolve_fault(pt, vmas, page, cause)?;
        page += PAGE_SIZE;
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::super::{free_frame_count, FileBacking, FileError, Vma};
    use super::*;
    use crate::mm::test_support;
    use crate::{test, test_assert};
    use alloc::vec::Vec;

    struct SliceFile(Vec<u8>);

    impl VmFile for SliceFile {
        fn read_at(&self, offset: usize, buf: &mut [u8]) -> Result<usize, FileError> {
            if offset >= self.0.len() {
                return Err(FileError);
            }
            let n = buf.len().min(self.0.len() - offset);
            buf[..n].copy_from_slice(&self.0[offset..offset + n]);
            Ok(n)
        }
    }

    struct BrokenFile;

    impl VmFile for BrokenFile {
        fn read_at(&self, _offset: usize, _buf: &mut [u8]) -> Result<usize, FileError> {
            Err(FileError)
        }
    }

    fn anon_vmas(va_begin: usize, va_end: usize, perm: MapPermission) -> VmaTable {
        let vmas = VmaTable::new();
        vmas.lock()
            .push(Vma::new(va_begin.into(), va_end.into(), perm));
        vmas
    }

    test!(test_write_fault_materializes_page, {
        let _guard = test_support::lock();
        let mut pt = PageTable::new();
        let vmas = anon_vmas(0x2000, 0x4000, MapPermission::R | MapPermission::W);

        test_assert!(resolve_fault(&mut pt, &vmas, 0x2500, FaultCause::Write).is_ok());
        let ppn = pt.translate_user(0x2500).expect("page not materialized");
        test_assert!(ppn.as_mut_bytes_array().iter().all(|&b| b == 0));

        // The area allows R|W only; executing there stays refused.
        test_assert!(
            resolve_fault(&mut pt, &vmas, 0x2500, FaultCause::Execute)
                == Err(FaultError::BadPerm)
        );

        Ok("passed")
    });

    test!(test_repeated_fault_is_idempotent, {
        let _guard = test_support::lock();
        let mut pt = PageTable::new();
        let vmas = anon_vmas(0x2000, 0x4000, MapPermission::R | MapPermission::W);

        test_assert!(resolve_fault(&mut pt, &vmas, 0x2500, FaultCause::Write).is_ok());
        let ppn = pt.translate_user(0x2500);
        let frames = free_frame_count();

        test_assert!(resolve_fault(&mut pt, &vmas, 0x2500, FaultCause::Write).is_ok());
        test_assert!(resolve_fault(&mut pt, &vmas, 0x2500, FaultCause::Read).is_ok());
        test_assert!(pt.translate_user(0x2500) == ppn, "mapping moved");
        test_assert!(free_frame_count() == frames, "fault double-allocated");

        Ok("passed")
    });

    test!(test_fault_outside_any_vma, {
        let _guard = test_support::lock();
        let mut pt = PageTable::new();
        let vmas = anon_vmas(0x2000, 0x4000, MapPermission::R | MapPermission::W);

        test_assert!(
            resolve_fault(&mut pt, &vmas, 0x9000, FaultCause::Read) == Err(FaultError::NoVma)
        );
        test_assert!(
            resolve_fault(&mut pt, &vmas, crate::config::MAXVA + 8, FaultCause::Read)
                == Err(FaultError::NoVma)
        );
        test_assert!(pt.translate_user(0x9000).is_none());

        Ok("passed")
    });

    test!(test_fault_against_vma_permissions, {
        let _guard = test_support::lock();
        let mut pt = PageTable::new();
        let vmas = anon_vmas(0x2000, 0x3000, MapPermission::R);

        test_assert!(
            resolve_fault(&mut pt, &vmas, 0x2000, FaultCause::Write) == Err(FaultError::BadPerm)
        );
        test_assert!(pt.translate_user(0x2000).is_none(), "refused fault left a page");
        test_assert!(resolve_fault(&mut pt, &vmas, 0x2000, FaultCause::Read).is_ok());

        Ok("passed")
    });

    test!(test_fault_on_guard_page, {
        let _guard = test_support::lock();
        let mut pt = PageTable::new();
        let vmas = anon_vmas(0x2000, 0x4000, MapPermission::R | MapPermission::W);

        test_assert!(resolve_fault(&mut pt, &vmas, 0x2000, FaultCause::Write).is_ok());
        pt.clear_user(VirtAddr::from(0x2000));
        // The page exists but is no longer user-accessible.
        test_assert!(
            resolve_fault(&mut pt, &vmas, 0x2000, FaultCause::Write) == Err(FaultError::BadPerm)
        );

        Ok("passed")
    });

    test!(test_fault_without_frames, {
        let _guard = test_support::lock();
        let mut pt = PageTable::new();
        let vmas = anon_vmas(0x2000, 0x3000, MapPermission::R | MapPermission::W);

        let mut hoard = Vec::new();
        while let Some(frame) = frame_alloc() {
            hoard.push(frame);
        }
        test_assert!(
            resolve_fault(&mut pt, &vmas, 0x2000, FaultCause::Write) == Err(FaultError::NoMem)
        );
        drop(hoard);
        test_assert!(resolve_fault(&mut pt, &vmas, 0x2000, FaultCause::Write).is_ok());

        Ok("passed")
    });

    test!(test_file_backed_fill, {
        let _guard = test_support::lock();
        let mut pt = PageTable::new();

        let data: Vec<u8> = (0..6000).map(|i| (i % 251) as u8).collect();
        let vmas = VmaTable::new();
        vmas.lock().push(Vma::new_backed(
            0x10000.into(),
            0x12000.into(),
            MapPermission::R,
            FileBacking {
                file: Arc::new(SliceFile(data.clone())),
                offset: 64,
                len: 5000,
            },
        ));

        // First page: one full page of file bytes.
        test_assert!(resolve_fault(&mut pt, &vmas, 0x10000, FaultCause::Read).is_ok());
        let first = pt.translate_user(0x10000).unwrap().as_mut_bytes_array();
        test_assert!(first[..] == data[64..64 + PAGE_SIZE]);

        // Second page: the 904-byte window tail, then zeroes.
        test_assert!(resolve_fault(&mut pt, &vmas, 0x11000, FaultCause::Read).is_ok());
        let second = pt.translate_user(0x11000).unwrap().as_mut_bytes_array();
        test_assert!(second[..904] == data[64 + PAGE_SIZE..64 + 5000]);
        test_assert!(second[904..].iter().all(|&b| b == 0));

        Ok("passed")
    });

    test!(test_file_window_tail_stays_zero, {
        let _guard = test_support::lock();
        let mut pt = PageTable::new();

        let vmas = VmaTable::new();
        vmas.lock().push(Vma::new_backed(
            0x10000.into(),
            0x13000.into(),
            MapPermission::R | MapPermission::W,
            FileBacking {
                file: Arc::new(SliceFile((0..100u8).collect())),
                offset: 0,
                len: 100,
            },
        ));

        // Entirely past the window: a plain zero page, no read issued.
        test_assert!(resolve_fault(&mut pt, &vmas, 0x12000, FaultCause::Read).is_ok());
        let bytes = pt.translate_user(0x12000).unwrap().as_mut_bytes_array();
        test_assert!(bytes.iter().all(|&b| b == 0));

        Ok("passed")
    });

    test!(test_failed_fill_backs_out_the_page, {
        let _guard = test_support::lock();
        let mut pt = PageTable::new();

        let vmas = VmaTable::new();
        vmas.lock().push(Vma::new_backed(
            0x10000.into(),
            0x11000.into(),
            MapPermission::R,
            FileBacking {
                file: Arc::new(BrokenFile),
                offset: 0,
                len: 512,
            },
        ));

        let frames = free_frame_count();
        test_assert!(
            resolve_fault(&mut pt, &vmas, 0x10000, FaultCause::Read) == Err(FaultError::NoFile)
        );
        test_assert!(
            pt.translate_user(0x10000).is_none(),
            "failed fill left a live mapping"
        );
        // The data frame came back; only page-table pages stay allocated.
        test_assert!(free_frame_count() + 2 == frames);

        Ok("passed")
    });

    test!(test_fault_range_stops_at_first_error, {
        let _guard = test_support::lock();
        let mut pt = PageTable::new();
        let vmas = anon_vmas(0x2000, 0x3000, MapPermission::R | MapPermission::W);

        test_assert!(
            resolve_fault_range(&mut pt, &vmas, 0x2800, 0x1000, FaultCause::Write)
                == Err(FaultError::NoVma)
        );
        // The page inside the area was resolved before the walk stopped.
        test_assert!(pt.translate_user(0x2800).is_some());
        test_assert!(pt.translate_user(0x3000).is_none());

        test_assert!(resolve_fault_range(&mut pt, &vmas, 0x2000, 0x1000, FaultCause::Read).is_ok());

        Ok("passed")
    });
}
