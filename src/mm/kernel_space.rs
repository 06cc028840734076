//! The kernel's boot-time address space: a direct map of the devices the
//! kernel drives, the kernel image, the RAM it manages, and the trampoline
//! page at the top of the address space.
//!
//! The table is built once and never mutated afterwards except by
//! [`kernel_map`] during boot; every hart activates the same root.

use super::{MapPermission, PageTable, PhysAddr, VirtAddr};
use crate::config::{
    etext, strampoline, CLINT, CLINT_SIZE, KERNBASE, PAGE_SIZE, PHYSTOP, PLIC, PLIC_SIZE,
    TRAMPOLINE, UART0, VIRTIO0, VIRTIO1,
};
use lazy_static::lazy_static;
use log::{info, trace};
use spin::Mutex;

lazy_static! {
    /// The page table every hart runs on after boot.
    pub static ref KERNEL_SPACE: Mutex<PageTable> = Mutex::new(new_kernel());
}

/// Get kernel-space root ppn in satp format.
pub fn kernel_token() -> usize {
    KERNEL_SPACE.lock().token()
}

fn new_kernel() -> PageTable {
    let mut pt = PageTable::new();

    info!("kernel text [{:#x}, {:#x})", KERNBASE, etext());
    info!("kernel data [{:#x}, {:#x})", etext(), PHYSTOP);

    trace!("mapping uart registers");
    identity_map(&mut pt, UART0, PAGE_SIZE, MapPermission::R | MapPermission::W);

    trace!("mapping virtio disk interfaces");
    identity_map(&mut pt, VIRTIO0, PAGE_SIZE, MapPermission::R | MapPermission::W);
    identity_map(&mut pt, VIRTIO1, PAGE_SIZE, MapPermission::R | MapPermission::W);

    trace!("mapping clint");
    identity_map(&mut pt, CLINT, CLINT_SIZE, MapPermission::R | MapPermission::W);

    trace!("mapping plic");
    identity_map(&mut pt, PLIC, PLIC_SIZE, MapPermission::R | MapPermission::W);

    trace!("mapping kernel text");
    identity_map(
        &mut pt,
        KERNBASE,
        etext() - KERNBASE,
        MapPermission::R | MapPermission::X,
    );

    trace!("mapping kernel data and physical memory");
    identity_map(
        &mut pt,
        etext(),
        PHYSTOP - etext(),
        MapPermission::R | MapPermission::W,
    );

    trace!("mapping trampoline");
    pt.map_pages(
        VirtAddr::from(TRAMPOLINE),
        PAGE_SIZE,
        PhysAddr::from(strampoline()),
        MapPermission::R | MapPermission::X,
    )
    .expect("kernel space: trampoline mapping failed");

    pt
}

fn identity_map(pt: &mut PageTable, base: usize, size: usize, perm: MapPermission) {
    pt.map_pages(VirtAddr::from(base), size, PhysAddr::from(base), perm)
        .expect("kernel space: identity mapping failed");
}

/// Build the kernel page table. Called once at boot, before paging is on.
pub fn init() {
    lazy_static::initialize(&KERNEL_SPACE);
}

/// Switch this hart onto the kernel page table and flush its TLB. No other
/// hart is involved; each one activates the root for itself.
pub fn init_hart() {
    KERNEL_SPACE.lock().activate();
}

/// Add a boot-time mapping (kernel stacks) to the kernel table.
///
/// # Panics
///
/// Boot mappings must succeed; failure panics.
pub fn kernel_map(va: VirtAddr, pa: PhysAddr, size: usize, perm: MapPermission) {
    KERNEL_SPACE
        .lock()
        .map_pages(va, size, pa, perm)
        .expect("kernel_map failed");
}

/// Translate a kernel virtual address through the kernel table, for
/// addresses the kernel itself owns (kernel stacks).
///
/// # Panics
///
/// Panics when `va` is not mapped; the kernel asking for an unmapped
/// kernel address is a bug.
pub fn kernel_pa(va: VirtAddr) -> PhysAddr {
    KERNEL_SPACE
        .lock()
        .translate_va(va)
        .expect("kernel_pa: unmapped address")
}
