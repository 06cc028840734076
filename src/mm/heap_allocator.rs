//! The global allocator

use crate::config::KERNEL_HEAP_SIZE;
use buddy_system_allocator::LockedHeap;
use core::cell::UnsafeCell;

/// Heap allocator instance
#[global_allocator]
static HEAP_ALLOCATOR: LockedHeap<32> = LockedHeap::<32>::empty();

struct HeapSpace {
    data: UnsafeCell<[u8; KERNEL_HEAP_SIZE]>,
}

unsafe impl Sync for HeapSpace {}

impl HeapSpace {
    const fn new() -> Self {
        Self {
            data: UnsafeCell::new([0; KERNEL_HEAP_SIZE]),
        }
    }

    fn as_usize(&self) -> usize {
        self.data.get() as *mut u8 as usize
    }
}

static HEAP_SPACE: HeapSpace = HeapSpace::new();

/// Initialize heap allocator
pub fn init() {
    unsafe {
        HEAP_ALLOCATOR
            .lock()
            .init(HEAP_SPACE.as_usize(), KERNEL_HEAP_SIZE);
    }
}
