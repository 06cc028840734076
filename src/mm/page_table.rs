//! Implementation of [`PageTableEntry`] and [`PageTable`].

use super::{frame_alloc, FrameTracker, PhysAddr, PhysPageNum, StepByOne, VPNRange, VirtAddr, VirtPageNum};
use crate::config::{MAXVA, PAGE_SIZE};
use alloc::collections::BTreeMap;
use alloc::{vec, vec::Vec};
use bitflags::bitflags;
use core::fmt::{self, Display, Formatter};

bitflags! {
    /// [`PageTableEntry`] flags
    #[derive(Copy, Clone, PartialEq, Eq)]
    pub struct PTEFlags: u8 {
        const V = 1 << 0;
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
        const G = 1 << 5;
        const A = 1 << 6;
        const D = 1 << 7;
    }
}

bitflags! {
    /// Permissions a mapping is requested with; `V` is managed internally.
    #[derive(Copy, Clone, Debug, PartialEq, Eq)]
    pub struct MapPermission: u8 {
        const R = 1 << 1;
        const W = 1 << 2;
        const X = 1 << 3;
        const U = 1 << 4;
    }
}

impl From<MapPermission> for PTEFlags {
    fn from(perm: MapPermission) -> Self {
        PTEFlags::from_bits_truncate(perm.bits())
    }
}

/// The walker could not allocate a page-table page.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MapError;

/// Page Table Entry
#[repr(C)]
#[derive(Copy, Clone)]
pub struct PageTableEntry {
    bits: usize,
}

impl PageTableEntry {
    pub fn new(ppn: PhysPageNum, flags: PTEFlags) -> Self {
        Self {
            bits: ppn.0 << 10 | flags.bits() as usize,
        }
    }

    pub fn empty() -> Self {
        Self { bits: 0 }
    }

    pub fn bits(self) -> usize {
        self.bits
    }

    pub fn ppn(self) -> PhysPageNum {
        (self.bits >> 10 & ((1usize << 44) - 1)).into()
    }

    pub fn flags(self) -> PTEFlags {
        PTEFlags::from_bits_truncate(self.bits as u8)
    }

    pub fn is_valid(self) -> bool {
        self.flags().contains(PTEFlags::V)
    }

    /// A valid entry with any of `R`/`W`/`X` maps a frame; a valid entry
    /// without them points to a lower-level table.
    pub fn is_leaf(self) -> bool {
        self.is_valid() && self.flags().intersects(PTEFlags::R | PTEFlags::W | PTEFlags::X)
    }

    pub fn is_readable(self) -> bool {
        self.flags().contains(PTEFlags::R)
    }

    pub fn is_writable(self) -> bool {
        self.flags().contains(PTEFlags::W)
    }

    pub fn is_executable(self) -> bool {
        self.flags().contains(PTEFlags::X)
    }

    pub fn is_user(self) -> bool {
        self.flags().contains(PTEFlags::U)
    }
}

/// Page Table
/// - `root_ppn`: The physical page number of the root of the page table
/// - `data_frames`: Physical frames this address space owns, keyed by the
///   virtual page they are mapped at
/// - `metadata_frames`: Physical frames for the page table itself and its
///   directory entries
///
/// Frames referenced by neither collection (device windows, the kernel
/// image, the trampoline) are borrowed and never freed here.
pub struct PageTable {
    root_ppn: PhysPageNum,
    data_frames: BTreeMap<VirtPageNum, FrameTracker>,
    metadata_frames: Vec<FrameTracker>,
}

impl PageTable {
    /// Allocates an empty page table.
    ///
    /// # Panics
    ///
    /// Panics when no frame is left for the root page; address spaces
    /// cannot exist without one.
    pub fn new() -> Self {
        let frame = frame_alloc().expect("page table root: no frames left");
        PageTable {
            root_ppn: frame.ppn,
            data_frames: BTreeMap::new(),
            metadata_frames: vec![frame],
        }
    }

    /// Temporarily used to get arguments from user space: a read-only view
    /// of a foreign table that owns none of its frames.
    pub fn from_token(satp: usize) -> Self {
        Self {
            root_ppn: PhysPageNum::from(satp & ((1usize << 44) - 1)),
            data_frames: BTreeMap::new(),
            metadata_frames: Vec::new(),
        }
    }

    /// Generates a token representing the physical address of the page table
    pub fn token(&self) -> usize {
        8usize << 60 | self.root_ppn.0
    }

    pub fn root_ppn(&self) -> PhysPageNum {
        self.root_ppn
    }

    /// Point the MMU at this table and flush the local TLB. Nothing is done
    /// for other harts; each activates its own root.
    pub fn activate(&self) {
        #[cfg(target_arch = "riscv64")]
        unsafe {
            use riscv::register::satp;
            satp::set(satp::Mode::Sv39, 0, self.root_ppn.0);
            core::arch::asm!("sfence.vma");
        }
    }

    fn find_pte_create(&mut self, vpn: VirtPageNum) -> Option<&mut PageTableEntry> {
        let idxs = vpn.indexes();
        let mut ppn = self.root_ppn;

        for &idx in &idxs[..2] {
            let pte = &mut ppn.as_mut_pte_array()[idx];
            if !pte.is_valid() {
                // Allocation failure surfaces as None; interior tables
                // installed so far stay owned and are reused next time.
                let frame = frame_alloc()?;
                *pte = PageTableEntry::new(frame.ppn, PTEFlags::V);
                self.metadata_frames.push(frame);
            }
            ppn = pte.ppn();
        }
        Some(&mut ppn.as_mut_pte_array()[idxs[2]])
    }

    fn find_pte(&self, vpn: VirtPageNum) -> Option<&mut PageTableEntry> {
        let idxs = vpn.indexes();
        let mut ppn = self.root_ppn;

        for &idx in &idxs[..2] {
            let pte = &mut ppn.as_mut_pte_array()[idx];
            if !pte.is_valid() {
                return None;
            }
            ppn = pte.ppn();
        }

        Some(&mut ppn.as_mut_pte_array()[idxs[2]])
    }

    /// Insert a key-value pair into the multi-level page table.
    ///
    /// # Panics
    ///
    /// Mapping over an already-valid leaf is a caller bug; unmap first.
    pub fn map(&mut self, vpn: VirtPageNum, ppn: PhysPageNum, flags: PTEFlags) -> Result<(), MapError> {
        let pte = self.find_pte_create(vpn).ok_or(MapError)?;
        assert!(!pte.is_valid(), "vpn {vpn:?} is mapped before mapping");
        *pte = PageTableEntry::new(ppn, flags | PTEFlags::V);
        Ok(())
    }

    /// Map a frame this address space will own; the tracker moves into the
    /// table and the frame is returned to the allocator on unmap or drop.
    pub fn map_frame(
        &mut self,
        vpn: VirtPageNum,
        frame: FrameTracker,
        flags: PTEFlags,
    ) -> Result<(), MapError> {
        self.map(vpn, frame.ppn, flags)?;
        self.data_frames.insert(vpn, frame);
        Ok(())
    }

    /// Install a contiguous borrowed mapping of `size` bytes from `va` onto
    /// `pa`. Both ends are rounded to page boundaries.
    pub fn map_pages(
        &mut self,
        va: VirtAddr,
        size: usize,
        pa: PhysAddr,
        perm: MapPermission,
    ) -> Result<(), MapError> {
        assert!(size > 0, "map_pages: empty range");
        let start = va.as_vpn_by_floor();
        let last = VirtAddr::from(va.0 + size - 1).as_vpn_by_floor();
        let mut ppn = pa.as_ppn_by_floor();
        for vpn in VPNRange::new(start, VirtPageNum(last.0 + 1)) {
            self.map(vpn, ppn, perm.into())?;
            ppn.step();
        }
        Ok(())
    }

    /// Remove every mapping in `[va, va + size)`. Pages that were never
    /// mapped are skipped. Frames are returned to the allocator only when
    /// `do_free` is set and this table owns them.
    ///
    /// # Panics
    ///
    /// Panics when the range covers an interior (non-leaf) entry; the
    /// caller passed bounds that cut through a page-table page.
    pub fn unmap_pages(&mut self, va: VirtAddr, size: usize, do_free: bool) {
        if size == 0 {
            return;
        }
        let start = va.as_vpn_by_floor();
        let last = VirtAddr::from(va.0 + size - 1).as_vpn_by_floor();
        for vpn in VPNRange::new(start, VirtPageNum(last.0 + 1)) {
            let Some(pte) = self.find_pte(vpn) else {
                continue;
            };
            if !pte.is_valid() {
                continue;
            }
            assert!(pte.flags() != PTEFlags::V, "unmap_pages: {vpn:?} is not a leaf");
            *pte = PageTableEntry::empty();
            if do_free {
                self.data_frames.remove(&vpn);
            }
        }
    }

    /// Strip the user bit from the leaf at `va`, making the page
    /// inaccessible from user mode. Used to turn the page below a user
    /// stack into a guard page.
    ///
    /// # Panics
    ///
    /// Panics when no leaf-level entry exists at `va`.
    pub fn clear_user(&mut self, va: VirtAddr) {
        let pte = self
            .find_pte(va.as_vpn_by_floor())
            .expect("clear_user: nothing mapped");
        *pte = PageTableEntry::new(pte.ppn(), pte.flags() - PTEFlags::U);
    }

    /// Translates a [`VirtPageNum`] to a [`PageTableEntry`] if the walk
    /// reaches the leaf level. The entry itself may still be invalid.
    pub fn translate(&self, vpn: VirtPageNum) -> Option<PageTableEntry> {
        self.find_pte(vpn).map(|pte| *pte)
    }

    /// Translates a [`VirtAddr`] to a [`PhysAddr`] through a valid leaf.
    pub fn translate_va(&self, va: VirtAddr) -> Option<PhysAddr> {
        self.find_pte(va.as_vpn_by_floor())
            .filter(|pte| pte.is_valid())
            .map(|pte| {
                let aligned_pa: PhysAddr = pte.ppn().into();
                PhysAddr(aligned_pa.0 + va.page_offset())
            })
    }

    /// User-only translation of an untrusted address: the leaf must be
    /// valid and user-accessible. Returns the frame holding `va`'s page.
    /// Addresses at or above [`MAXVA`] are simply not mapped.
    pub fn translate_user(&self, va: usize) -> Option<PhysPageNum> {
        if va >= MAXVA {
            return None;
        }
        let pte = self.find_pte(VirtAddr::from(va).as_vpn_by_floor())?;
        if !pte.is_valid() || !pte.is_user() {
            return None;
        }
        Some(pte.ppn())
    }

    /// Three-level dump of this table for the process `pid` running `cmd`.
    pub fn dump<'a>(&'a self, pid: usize, cmd: &'a str) -> PageTableDump<'a> {
        PageTableDump { table: self, pid, cmd }
    }

    /// Log the [`dump`](Self::dump) rendering to the console.
    pub fn print(&self, pid: usize, cmd: &str) {
        println!("{}", self.dump(pid, cmd));
    }
}

/// Pretty-printer for a three-level page table; one line per live entry,
/// leaves annotated with their flag bits and the VA range they cover.
pub struct PageTableDump<'a> {
    table: &'a PageTable,
    pid: usize,
    cmd: &'a str,
}

impl Display for PageTableDump<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "page table of pid={} cmd={} root={:?}",
            self.pid, self.cmd, self.table.root_ppn
        )?;
        for (i, pte2) in self.table.root_ppn.as_mut_pte_array().iter().enumerate() {
            if pte2.bits() == 0 {
                continue;
            }
            writeln!(f, "..{i:#x}:")?;
            for (j, pte1) in pte2.ppn().as_mut_pte_array().iter().enumerate() {
                if pte1.bits() == 0 {
                    continue;
                }
                writeln!(f, ".. ..{j:#x}:")?;
                for (k, pte) in pte1.ppn().as_mut_pte_array().iter().enumerate() {
                    if pte.bits() == 0 {
                        continue;
                    }
                    let va = (((i << 9) | j) << 9 | k) << 12;
                    writeln!(
                        f,
                        ".. .. ..{:#x}: V={} R={} W={} X={} U={} va=[{:#x}, {:#x}]",
                        k,
                        u8::from(pte.is_valid()),
                        u8::from(pte.is_readable()),
                        u8::from(pte.is_writable()),
                        u8::from(pte.is_executable()),
                        u8::from(pte.is_user()),
                        va,
                        va + PAGE_SIZE - 1,
                    )?;
                }
            }
        }
        Ok(())
    }
}
