//! # pomelo-core
//!
//! The memory-management slice of a small Sv39 supervisor-mode kernel:
//! - three-level hardware page tables ([`mm::PageTable`]),
//! - the boot-time kernel direct map ([`mm::KERNEL_SPACE`]),
//! - per-process address-space lifecycle (create, grow, shrink, fork-copy,
//!   destroy),
//! - demand paging against a per-process VMA set, with optional file-backed
//!   fills ([`mm::resolve_fault`]),
//! - safe bulk copies across the kernel/user boundary ([`mm::copy_in`],
//!   [`mm::copy_out`], [`mm::copy_in_str`]).
//!
//! The crate is `no_std` on kernel targets. On hosted targets it builds
//! against `std` for its test suite, with physical frames leased from the
//! host allocator, so every page-table operation can be exercised off-target.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

#[macro_use]
pub mod console;
pub mod config;
pub mod logging;
pub mod mm;
#[cfg(target_arch = "riscv64")]
mod sbi;
