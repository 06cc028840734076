//! User address-space lifecycle: initial image, growth, shrinking,
//! fork-time duplication and teardown.
//!
//! Every operation here works on a [`PageTable`] that is exclusive to its
//! process; frames installed by these methods are owned by the table and
//! flow back to the allocator when unmapped or when the table is torn down.

use super::{frame_alloc, PTEFlags, PageTable, PhysPageNum};
use super::{MapError, VPNRange, VirtAddr, VirtPageNum};
use crate::config::PAGE_SIZE;

impl PageTable {
    /// Load `src` into the very first page of a fresh address space, for
    /// the initial process.
    ///
    /// # Panics
    ///
    /// `src` must fit strictly inside one page, and a frame must be
    /// available; the first process cannot fail to exist.
    pub fn init_image(&mut self, src: &[u8]) {
        assert!(src.len() < PAGE_SIZE, "init_image: more than a page");
        let frame = frame_alloc().expect("init_image: no frames left");
        let ppn = frame.ppn;
        self.map_frame(
            VirtPageNum(0),
            frame,
            PTEFlags::U | PTEFlags::R | PTEFlags::W | PTEFlags::X,
        )
        .expect("init_image: mapping failed");
        ppn.as_mut_bytes_array()[..src.len()].copy_from_slice(src);
    }

    /// Grow the process image from `old_sz` to `new_sz` bytes, mapping a
    /// zeroed frame per page. Returns the new size, or 0 after undoing this
    /// call's own work when a frame or page-table page ran out.
    pub fn grow(&mut self, old_sz: usize, new_sz: usize) -> usize {
        if new_sz < old_sz {
            return old_sz;
        }
        let start = VirtAddr::from(old_sz).as_vpn_by_ceil();
        let end = VirtAddr::from(new_sz).as_vpn_by_ceil();
        for vpn in VPNRange::new(start, end) {
            let Some(frame) = frame_alloc() else {
                self.shrink(VirtAddr::from(vpn).0, old_sz);
                return 0;
            };
            let flags = PTEFlags::U | PTEFlags::R | PTEFlags::W | PTEFlags::X;
            if self.map_frame(vpn, frame, flags).is_err() {
                self.shrink(VirtAddr::from(vpn).0, old_sz);
                return 0;
            }
        }
        new_sz
    }

    /// Shrink the process image from `old_sz` to `new_sz` bytes, freeing
    /// the frames of every whole page past `new_sz`. Returns the new size.
    pub fn shrink(&mut self, old_sz: usize, new_sz: usize) -> usize {
        if new_sz >= old_sz {
            return old_sz;
        }
        let new_up = VirtAddr::from(new_sz).as_vpn_by_ceil();
        let old_up = VirtAddr::from(old_sz).as_vpn_by_ceil();
        if new_up < old_up {
            self.unmap_pages(new_up.into(), (old_up.0 - new_up.0) * PAGE_SIZE, true);
        }
        new_sz
    }

    /// Duplicate the first `sz` bytes of this address space into `dst`,
    /// frame contents included, so parent and child stay independent.
    /// Pages absent from the source are skipped, which keeps sparse
    /// layouts sparse. On failure everything installed in `dst` by this
    /// call is unmapped and freed again.
    pub fn clone_into(&self, dst: &mut PageTable, sz: usize) -> Result<(), MapError> {
        for vpn in VPNRange::new(VirtPageNum(0), VirtAddr::from(sz).as_vpn_by_ceil()) {
            let Some(pte) = self.translate(vpn) else {
                continue;
            };
            if !pte.is_valid() {
                continue;
            }
            let copied = frame_alloc().ok_or(MapError).and_then(|frame| {
                frame
                    .ppn
                    .as_mut_bytes_array()
                    .copy_from_slice(pte.ppn().as_mut_bytes_array());
                dst.map_frame(vpn, frame, pte.flags())
            });
            if copied.is_err() {
                dst.unmap_pages(VirtAddr::from(0), VirtAddr::from(vpn).0, true);
                return Err(MapError);
            }
        }
        Ok(())
    }

    /// Tear down a user address space of `sz` bytes: free every owned frame
    /// under `[0, sz)`, then reclaim the page-table pages themselves.
    /// Borrowed mappings (such as a trampoline) must be unmapped by the
    /// caller beforehand.
    ///
    /// # Panics
    ///
    /// Panics if any leaf survives anywhere in the tree; the caller's size
    /// bookkeeping is broken.
    pub fn free(mut self, sz: usize) {
        self.unmap_pages(VirtAddr::from(0), sz, true);
        assert_no_leaves(self.root_ppn());
        // dropping `self` returns the table pages to the allocator
    }
}

/// Post-teardown check that a table tree carries no live mapping.
fn assert_no_leaves(ppn: PhysPageNum) {
    for pte in ppn.as_mut_pte_array().iter() {
        if pte.is_leaf() {
            panic!("address space teardown: leaf still mapped");
        }
        if pte.is_valid() {
            assert_no_leaves(pte.ppn());
        }
    }
}
