//! # Memory management
//!
//! SV39 page-based virtual memory for RV64 systems:
//! - `frame_allocator` hands out physical frames,
//! - `page_table` walks and mutates the three-level tables,
//! - `kernel_space` builds the boot-time direct map,
//! - `user_space` drives the life of a process image,
//! - `fault` materializes pages on demand against the process's VMA set,
//! - `copy` moves bytes across the kernel/user boundary.

mod address;
mod copy;
mod fault;
mod frame_allocator;
#[cfg(target_arch = "riscv64")]
mod heap_allocator;
mod kernel_space;
mod page_table;
mod user_space;
mod vma;

pub use address::{PhysAddr, PhysPageNum, StepByOne, VPNRange, VirtAddr, VirtPageNum};
pub use copy::{copy_in, copy_in_str, copy_out, CopyError};
pub use fault::{resolve_fault, resolve_fault_range, FaultCause, FaultError};
pub use frame_allocator::{frame_alloc, frame_dealloc, free_frame_count, FrameTracker};
pub use kernel_space::{init_hart, kernel_map, kernel_pa, kernel_token, KERNEL_SPACE};
pub use page_table::{
    MapError, MapPermission, PTEFlags, PageTable, PageTableDump, PageTableEntry,
};
pub use vma::{FileBacking, FileError, Vma, VmFile, VmaSet, VmaTable};

use crate::config;

/// Initiate heap allocator, frame allocator and kernel space, then turn
/// paging on for the boot hart. Secondary harts call [`init_hart`] on
/// their own.
pub fn init() {
    #[cfg(target_arch = "riscv64")]
    heap_allocator::init();
    frame_allocator::init(
        PhysAddr::from(config::ekernel()),
        PhysAddr::from(config::PHYSTOP),
    );
    kernel_space::init();
    kernel_space::init_hart();
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Shared plumbing for the hosted test suite: physical frames come from
    //! one page-aligned arena leased from the host allocator, and tests
    //! that touch the global allocator run serialized.

    use super::frame_allocator;
    use super::PhysAddr;
    use crate::config::PAGE_SIZE;
    use spin::{Mutex, MutexGuard};

    const ARENA_PAGES: usize = 8192; // 32 MiB of stand-in physical memory

    static SERIAL: Mutex<()> = Mutex::new(());

    /// Serializes a test against the others and makes sure the frame
    /// allocator is backed by the arena.
    pub fn lock() -> MutexGuard<'static, ()> {
        static ONCE: std::sync::Once = std::sync::Once::new();
        ONCE.call_once(|| {
            let layout =
                std::alloc::Layout::from_size_align(ARENA_PAGES * PAGE_SIZE, PAGE_SIZE).unwrap();
            let base = unsafe { std::alloc::alloc_zeroed(layout) } as usize;
            assert!(base != 0, "test arena allocation failed");
            frame_allocator::init(
                PhysAddr::from(base),
                PhysAddr::from(base + ARENA_PAGES * PAGE_SIZE),
            );
        });
        SERIAL.lock()
    }
}
