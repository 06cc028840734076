//! Implementation of [`FrameAllocator`]

use super::{PhysAddr, PhysPageNum};
use alloc::vec::Vec;
use core::fmt::{self, Debug, Formatter};
use lazy_static::lazy_static;
use spin::Mutex;

/// Manage a frame which has the same lifecycle as the tracker
pub struct FrameTracker {
    pub ppn: PhysPageNum,
}

impl FrameTracker {
    pub fn new(ppn: PhysPageNum) -> Self {
        let bytes_array = ppn.as_mut_bytes_array();
        bytes_array.fill(0);
        Self { ppn }
    }
}

impl Debug for FrameTracker {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_fmt(format_args!("FrameTracker:PPN={:#x}", self.ppn.0))
    }
}

impl Drop for FrameTracker {
    fn drop(&mut self) {
        frame_dealloc(self.ppn);
    }
}

trait FrameAllocator {
    fn new() -> Self;
    fn alloc(&mut self) -> Option<PhysPageNum>;
    fn dealloc(&mut self, ppn: PhysPageNum);
}

/// An implementation for frame allocator
pub struct StackFrameAllocator {
    current: usize,
    end: usize,
    recycled: Vec<usize>,
}

impl StackFrameAllocator {
    pub fn init(&mut self, l: PhysPageNum, r: PhysPageNum) {
        self.current = l.0;
        self.end = r.0;
    }

    /// Number of frames currently available.
    pub fn free_frames(&self) -> usize {
        self.end - self.current + self.recycled.len()
    }
}

impl FrameAllocator for StackFrameAllocator {
    fn new() -> Self {
        Self {
            current: 0,
            end: 0,
            recycled: Vec::new(),
        }
    }

    fn alloc(&mut self) -> Option<PhysPageNum> {
        match self.recycled.pop() {
            Some(ppn) => Some(ppn.into()),
            None if self.current == self.end => None,
            None => {
                self.current += 1;
                Some((self.current - 1).into())
            }
        }
    }

    fn dealloc(&mut self, ppn: PhysPageNum) {
        let ppn = ppn.0;
        // validity check
        assert!(
            !(ppn >= self.current || self.recycled.iter().any(|&v| v == ppn)),
            "Frame ppn={ppn:#x} has not been allocated!"
        );
        // recycle
        self.recycled.push(ppn);
    }
}

type FrameAllocatorImpl = StackFrameAllocator;

lazy_static! {
    /// FrameAllocator global instance
    pub static ref FRAME_ALLOCATOR: Mutex<FrameAllocatorImpl> =
        Mutex::new(FrameAllocatorImpl::new());
}

/// Hand the physical range `[l, r)` to the frame allocator.
pub fn init(l: PhysAddr, r: PhysAddr) {
    FRAME_ALLOCATOR
        .lock()
        .init(l.as_ppn_by_ceil(), r.as_ppn_by_floor());
}

/// Allocate a frame
pub fn frame_alloc() -> Option<FrameTracker> {
    FRAME_ALLOCATOR.lock().alloc().map(FrameTracker::new)
}

/// Deallocate a frame
pub fn frame_dealloc(ppn: PhysPageNum) {
    FRAME_ALLOCATOR.lock().dealloc(ppn);
}

/// Number of frames the allocator could still hand out.
pub fn free_frame_count() -> usize {
    FRAME_ALLOCATOR.lock().free_frames()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{test, test_assert};

    test!(test_frame_alloc_recycles, {
        let _guard = crate::mm::test_support::lock();

        let f1 = frame_alloc().expect("No space");
        let f2 = frame_alloc().expect("No space");
        test_assert!(f1.ppn != f2.ppn, "Same frame allocated twice");

        let recycled_ppn = f2.ppn;
        drop(f2);
        let f3 = frame_alloc().expect("No space");
        test_assert!(f3.ppn == recycled_ppn, "Dropped frame was not recycled");

        Ok("passed")
    });

    test!(test_frame_tracker_zeroes, {
        let _guard = crate::mm::test_support::lock();

        let f1 = frame_alloc().expect("No space");
        f1.ppn.as_mut_bytes_array().fill(0xA5);
        let ppn = f1.ppn;
        drop(f1);

        let f2 = frame_alloc().expect("No space");
        test_assert!(f2.ppn == ppn);
        test_assert!(f2.ppn.as_mut_bytes_array().iter().all(|&b| b == 0));

        Ok("passed")
    });

    test!(test_free_frame_count, {
        let _guard = crate::mm::test_support::lock();

        let before = free_frame_count();
        let frames: Vec<FrameTracker> = (0..4).map(|_| frame_alloc().unwrap()).collect();
        test_assert!(free_frame_count() == before - 4);
        drop(frames);
        test_assert!(free_frame_count() == before);

        Ok("passed")
    });
}
