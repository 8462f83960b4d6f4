//! Three-level Sv39 page-table primitives.
//!
//! This module knows nothing about VMAs, inodes, or COW policy beyond
//! the one step `clone` performs when installing a shared mapping — it
//! only walks, installs, clears, and frees PTEs.

use arch::mm::{sfence_vma_addr, sfence_vma_all_except_global};
use config::mm::{MAXVA, PAGE_SIZE, PTES_PER_PAGE};
use systype::{SysError, SysResult};

use crate::address::{PhysAddr, VirtAddr};
use crate::frame::{self, page_bytes_mut};
use crate::vm::pte::{PageTableEntry, PteFlags};

/// Owns the root frame of one three-level page table. Interior and leaf
/// frames are owned through the allocator's refcounts, not through this
/// struct, so `PageTable` is cheap to pass around by value.
#[derive(Debug)]
pub struct PageTable {
    root: PhysAddr,
}

fn zero_page(pa: PhysAddr) {
    page_bytes_mut(pa).fill(0);
}

fn table_of(pa: PhysAddr) -> &'static mut [PageTableEntry; PTES_PER_PAGE] {
    let bytes = page_bytes_mut(pa);
    unsafe { &mut *(bytes.as_mut_ptr() as *mut [PageTableEntry; PTES_PER_PAGE]) }
}

impl PageTable {
    /// Allocates a fresh, zeroed root table.
    pub fn new() -> SysResult<Self> {
        let root = frame::kalloc().ok_or(SysError::ENOMEM)?;
        zero_page(root);
        Ok(PageTable { root })
    }

    pub fn root_pa(&self) -> PhysAddr {
        self.root
    }

    /// `satp` value a hart would load to switch into this table (mode 8 =
    /// Sv39, ASID 0 — ASID management belongs to the scheduler).
    pub fn satp(&self) -> usize {
        (8usize << 60) | (self.root.0 >> 12)
    }

    /// Returns the level-0 slot for `va`, optionally allocating the
    /// interior tables along the way. `None` covers both "no mapping" and
    /// "an interior table would be needed but the allocator is out of
    /// frames" — callers that care which one happened are the ones
    /// passing `alloc: true` in the first place.
    pub fn walk(&self, va: VirtAddr, alloc: bool) -> Option<&'static mut PageTableEntry> {
        assert!(va.0 < MAXVA, "walk: va {:#x} >= MAXVA", va.0);
        let idx = va.indices();
        let mut pa = self.root;
        for level in idx.iter().take(2) {
            let table = table_of(pa);
            let pte = &mut table[*level];
            if !pte.is_valid() {
                if !alloc {
                    return None;
                }
                let child = frame::kalloc()?;
                zero_page(child);
                *pte = PageTableEntry::new(child.page_number(), PteFlags::V);
            } else if pte.is_leaf() {
                panic!("walk: va {:#x} passes through a leaf at an interior level", va.0);
            }
            pa = PhysAddr::from(pte.ppn());
        }
        let table = table_of(pa);
        Some(&mut table[idx[2]])
    }

    /// Installs a single leaf. `va` and `pa` must be page-aligned; it is a
    /// fatal invariant violation to remap an already-valid leaf.
    pub fn map(&self, va: VirtAddr, pa: PhysAddr, flags: PteFlags) -> SysResult<()> {
        assert!(va.is_aligned() && pa.is_aligned(), "map: misaligned address");
        let pte = self.walk(va, true).ok_or(SysError::ENOMEM)?;
        if pte.is_valid() {
            panic!("map: remap at {:#x}", va.0);
        }
        *pte = PageTableEntry::new(pa.page_number(), flags | PteFlags::V | PteFlags::U);
        sfence_vma_addr(va.0);
        Ok(())
    }

    /// User-only lookup: returns 0 unless the leaf is both valid and
    /// user-accessible, refusing to leak supervisor-only translations
    /// (trampoline, trapframe, stack guard page).
    pub fn getpa(&self, va: VirtAddr) -> Option<PhysAddr> {
        if va.0 >= MAXVA {
            return None;
        }
        let pte = self.walk(va, false)?;
        if !pte.is_valid() || !pte.is_user() {
            return None;
        }
        Some(PhysAddr::from(pte.ppn()))
    }

    /// Clears the `U` bit of an already-installed leaf. Used to turn a
    /// page mapped as user-accessible (via `map`, which always sets `U`)
    /// into a supervisor-only page: the trampoline, the trapframe, and a
    /// stack guard page.
    pub fn clearubit(&self, va: VirtAddr) {
        let pte = self.walk(va, false).expect("clearubit: no such mapping");
        pte.set_flags(pte.flags() - PteFlags::U);
        sfence_vma_addr(va.0);
    }

    /// Clears every leaf in `[va_start, va_end)`, optionally releasing the
    /// backing frame through the allocator.
    pub fn unmap_impl(&self, va_start: VirtAddr, va_end: VirtAddr, dealloc: bool) {
        assert!(
            va_end.0 <= MAXVA && va_end.0 >= va_start.0 && va_start.is_aligned() && va_end.is_aligned(),
            "unmap_impl: invalid range [{:#x}, {:#x})",
            va_start.0,
            va_end.0
        );
        let mut addr = va_start.0;
        while addr < va_end.0 {
            let va = VirtAddr(addr);
            if let Some(pte) = self.walk(va, false) {
                if pte.is_valid() {
                    if !pte.is_leaf() {
                        panic!("unmap_impl: {:#x} is not a leaf", addr);
                    }
                    if dealloc {
                        frame::kfree(PhysAddr::from(pte.ppn()));
                    }
                    *pte = PageTableEntry::default();
                }
            }
            addr += PAGE_SIZE;
        }
        sfence_vma_all_except_global();
    }

    pub fn unmap(&self, va_start: VirtAddr, va_end: VirtAddr) {
        self.unmap_impl(va_start, va_end, false);
    }

    pub fn deallocunmap(&self, va_start: VirtAddr, va_end: VirtAddr) {
        self.unmap_impl(va_start, va_end, true);
    }

    /// Allocates, zeroes, and maps every page in `[va_start, va_end)`. On
    /// any failure, rolls back the pages already installed.
    pub fn allocmap(&self, va_start: VirtAddr, va_end: VirtAddr, flags: PteFlags) -> SysResult<()> {
        assert!(va_start.is_aligned() && va_end.is_aligned() && va_end.0 >= va_start.0);
        let mut addr = va_start.0;
        while addr < va_end.0 {
            let va = VirtAddr(addr);
            let mem = match frame::kalloc() {
                Some(pa) => pa,
                None => {
                    self.deallocunmap(va_start, va);
                    return Err(SysError::ENOMEM);
                }
            };
            zero_page(mem);
            if self.map(va, mem, flags).is_err() {
                frame::kfree(mem);
                self.deallocunmap(va_start, va);
                return Err(SysError::ENOMEM);
            }
            addr += PAGE_SIZE;
        }
        Ok(())
    }

    /// Installs the copy-on-write mapping used by fork: clears `W` on the
    /// source leaf, copies it verbatim into `dst`, and raises the shared
    /// frame's reference count.
    pub fn clone_range(&self, dst: &PageTable, va_start: VirtAddr, va_end: VirtAddr) -> SysResult<()> {
        assert!(va_start.is_aligned() && va_end.is_aligned() && va_end.0 >= va_start.0);
        let mut addr = va_start.0;
        while addr < va_end.0 {
            let va = VirtAddr(addr);
            let src_pte = match self.walk(va, false) {
                Some(pte) if pte.is_valid() => pte,
                _ => {
                    addr += PAGE_SIZE;
                    continue;
                }
            };
            let pa = PhysAddr::from(src_pte.ppn());
            src_pte.set_flags(src_pte.flags() - PteFlags::W);
            let copied = *src_pte;

            let dst_pte = match dst.walk(va, true) {
                Some(pte) => pte,
                None => {
                    dst.deallocunmap(va_start, va);
                    return Err(SysError::ENOMEM);
                }
            };
            *dst_pte = copied;
            frame::kincref(pa);
            addr += PAGE_SIZE;
        }
        sfence_vma_all_except_global();
        Ok(())
    }

    /// Recursively tears down every interior table; panics if a leaf
    /// remains (the caller must unmap every VMA first).
    pub fn free(self) {
        free_subtree(self.root);
    }
}

fn free_subtree(pa: PhysAddr) {
    let table = table_of(pa);
    for pte in table.iter_mut() {
        if pte.is_valid() {
            if pte.is_leaf() {
                panic!("PageTable::free: leaf still present");
            }
            free_subtree(PhysAddr::from(pte.ppn()));
        }
    }
    frame::kfree(pa);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();
    fn ensure_init() {
        INIT.call_once(frame::kinit);
    }

    #[test]
    fn map_and_getpa() {
        ensure_init();
        let pt = PageTable::new().unwrap();
        let frame = frame::kalloc().unwrap();
        let va = VirtAddr(0x1000);
        pt.map(va, frame, PteFlags::R | PteFlags::W).unwrap();
        assert_eq!(pt.getpa(va), Some(frame));
        pt.deallocunmap(va, VirtAddr(0x2000));
        assert_eq!(pt.getpa(va), None);
        pt.free();
    }

    #[test]
    #[should_panic(expected = "remap")]
    fn remap_panics() {
        ensure_init();
        let pt = PageTable::new().unwrap();
        let f1 = frame::kalloc().unwrap();
        let f2 = frame::kalloc().unwrap();
        let va = VirtAddr(0x3000);
        pt.map(va, f1, PteFlags::R).unwrap();
        pt.map(va, f2, PteFlags::R).unwrap();
    }

    #[test]
    fn clearubit_hides_from_getpa() {
        ensure_init();
        let pt = PageTable::new().unwrap();
        let frame = frame::kalloc().unwrap();
        let va = VirtAddr(0x4000);
        pt.map(va, frame, PteFlags::R | PteFlags::W).unwrap();
        pt.clearubit(va);
        assert_eq!(pt.getpa(va), None);
        pt.deallocunmap(va, VirtAddr(0x5000));
        pt.free();
    }

    #[test]
    fn clone_range_shares_and_write_protects() {
        ensure_init();
        let src = PageTable::new().unwrap();
        let dst = PageTable::new().unwrap();
        let frame = frame::kalloc().unwrap();
        let va = VirtAddr(0x6000);
        src.map(va, frame, PteFlags::R | PteFlags::W).unwrap();
        src.clone_range(&dst, va, VirtAddr(0x7000)).unwrap();

        let src_pte = src.walk(va, false).unwrap();
        assert!(!src_pte.is_writable());
        let dst_pte = dst.walk(va, false).unwrap();
        assert!(!dst_pte.is_writable());
        assert_eq!(dst_pte.ppn(), src_pte.ppn());
        assert!(!frame::ksingleref(frame));

        src.deallocunmap(va, VirtAddr(0x7000));
        dst.deallocunmap(va, VirtAddr(0x7000));
        src.free();
        dst.free();
    }
}
