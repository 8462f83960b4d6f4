//! The user address space: one page table plus a bounded set of VMAs.

use config::mm::{MAXVA, START_VMAS_ADDR, TRAMPOLINE, TRAPFRAME, VMA_SIZE};
use systype::fs::InodeRef;
use systype::{SysError, SysResult};

use crate::address::{VirtAddr, pground_down, pground_up};
use crate::vm::page_table::PageTable;
use crate::vm::pte::PteFlags;
use crate::vm::vma::{self, MapFlags, MapPerm, VmArea, VmaId, vma_intersect};

/// One process's page table and its VMAs. `vmas[i]` is a slot; `heap`
/// names whichever slot (if any) is the distinguished, always-resident
/// heap VMA.
pub struct AddrSpace {
    pagetable: PageTable,
    vmas: [Option<VmaId>; VMA_SIZE],
    heap: Option<usize>,
}

fn checked_max(a: usize, b: usize) -> usize {
    if a > b { a } else { b }
}
fn checked_min(a: usize, b: usize) -> usize {
    if a < b { a } else { b }
}

impl AddrSpace {
    pub fn pagetable(&self) -> &PageTable {
        &self.pagetable
    }

    fn vma_slot(&self, id: VmaId) -> Option<usize> {
        self.vmas.iter().position(|s| *s == Some(id))
    }

    /// Finds the VMA (if any) covering `va`. Mirrors the original
    /// kernel's linear `uvm_va2vma` scan — the slot table is small
    /// enough that this is cheaper than keeping it sorted.
    pub fn find_vma(&self, va: usize) -> Option<VmaId> {
        self.vmas.iter().flatten().copied().find(|&id| vma::vma_get(id).contains(va))
    }

    /// Allocates a fresh page table with the trampoline and trapframe
    /// pre-mapped, both supervisor-only. `trampoline_pa` is the single
    /// physical page holding trap-entry/exit code, shared by every
    /// address space; `trapframe_pa` is this process's own save area.
    pub fn uvm_new(trampoline_pa: crate::address::PhysAddr, trapframe_pa: crate::address::PhysAddr) -> SysResult<Self> {
        let pagetable = PageTable::new()?;
        let tramp_va = VirtAddr(TRAMPOLINE);
        if pagetable.map(tramp_va, trampoline_pa, PteFlags::R | PteFlags::X).is_err() {
            pagetable.free();
            return Err(SysError::ENOMEM);
        }
        pagetable.clearubit(tramp_va);

        let trapframe_va = VirtAddr(TRAPFRAME);
        if pagetable.map(trapframe_va, trapframe_pa, PteFlags::R | PteFlags::W).is_err() {
            pagetable.unmap(tramp_va, VirtAddr(TRAMPOLINE + 4096));
            pagetable.free();
            return Err(SysError::ENOMEM);
        }
        pagetable.clearubit(trapframe_va);

        Ok(AddrSpace {
            pagetable,
            vmas: [None; VMA_SIZE],
            heap: None,
        })
    }

    /// True iff `[start, start+length)` overlaps no live VMA (page-rounded).
    pub fn uvm_israngefree(&self, start: usize, length: usize) -> bool {
        let probe_end = pground_up(start + length);
        let probe_start = pground_down(start);
        !self
            .vmas
            .iter()
            .flatten()
            .map(|&id| vma::vma_get(id))
            .any(|area| {
                let (a0, a1) = area.page_rounded_range();
                checked_max(probe_start, a0) < checked_min(probe_end, a1)
            })
    }

    /// Finds the lowest free address at or above `START_VMAS_ADDR` where
    /// `length` bytes fit without overlapping an existing VMA.
    pub fn getfreevrange(&self, length: usize) -> Option<usize> {
        let mut addr = START_VMAS_ADDR;
        loop {
            if self.uvm_israngefree(addr, length) {
                return Some(addr);
            }
            let previous_addr = addr;
            let mut next = MAXVA;
            for area in self.vmas.iter().flatten().map(|&id| vma::vma_get(id)) {
                let end_vma = pground_up(area.end());
                if end_vma > previous_addr {
                    next = checked_min(next, end_vma);
                }
            }
            addr = pground_up(next);
            if addr.checked_add(length).map(|e| e > MAXVA).unwrap_or(true) {
                return None;
            }
        }
    }

    /// Declares a new mapping; installs no frames and no PTEs — they
    /// appear lazily through `uvm_completemap`.
    #[allow(clippy::too_many_arguments)]
    pub fn uvm_map(
        &mut self,
        addr: usize,
        length: usize,
        perm: MapPerm,
        flags: MapFlags,
        inode: Option<InodeRef>,
        offset: usize,
        filesz: usize,
    ) -> SysResult<usize> {
        if inode.is_none() && flags != MapFlags::Private {
            return Err(SysError::EINVAL);
        }
        if length == 0 || addr.checked_add(length).map(|e| e > MAXVA).unwrap_or(true) {
            return Err(SysError::EINVAL);
        }
        if !self.uvm_israngefree(addr, length) {
            return Err(SysError::EINVAL);
        }
        let slot = self.vmas.iter().position(|s| s.is_none()).ok_or(SysError::ENOMEM)?;
        let id = vma::vma_alloc().ok_or(SysError::ENOMEM)?;
        vma::vma_init(id, addr, length, perm, flags, inode, offset, filesz);
        self.vmas[slot] = Some(id);
        Ok(addr)
    }

    /// Unmaps a prefix, a suffix, or the whole of the VMA containing
    /// `addr`; any other sub-range is a programmer error (interior
    /// unmaps must be expressed as two calls by the caller).
    pub fn uvm_unmap(&mut self, addr: usize, length: usize) {
        let id = self.find_vma(addr).expect("uvm_unmap: address is not in any vma");
        let area = vma::vma_get(id);
        let whole = addr == area.start && addr + length == area.end();
        let prefix = addr == area.start && addr + length < area.end();
        let suffix = addr > area.start && addr + length == area.end();
        assert!(whole || prefix || suffix, "uvm_unmap: not a prefix/suffix/whole unmap");

        if area.flags == MapFlags::Shared && area.is_file_backed() {
            self.writeback_shared(&area, addr, length);
        }

        if whole {
            self.pagetable.deallocunmap(VirtAddr(pground_down(addr)), VirtAddr(pground_up(addr + length)));
            let slot = self.vma_slot(id).expect("uvm_unmap: vma not in slot table");
            self.vmas[slot] = None;
            if self.heap == Some(slot) {
                self.heap = None;
            }
            vma::vma_free(id);
        } else if prefix {
            self.pagetable
                .deallocunmap(VirtAddr(pground_down(addr)), VirtAddr(pground_down(addr + length)));
            let mut area = area;
            area.start += length;
            area.offset += length;
            area.length -= length;
            area.filesz = area.filesz.saturating_sub(length);
            vma::vma_set(id, area);
        } else {
            self.pagetable
                .deallocunmap(VirtAddr(pground_up(addr)), VirtAddr(pground_up(addr + length)));
            let mut area = area;
            area.length -= length;
            area.filesz = checked_min(area.filesz, area.length);
            vma::vma_set(id, area);
        }
    }

    fn writeback_shared(&self, area: &VmArea, addr: usize, length: usize) {
        let ino = area.inode.expect("writeback_shared: not file backed");
        crate_interface::call_interface!(systype::fs::FileBackedOps::begin_op());
        crate_interface::call_interface!(systype::fs::FileBackedOps::ilock(ino));
        let mut va = pground_down(addr);
        while va < pground_up(addr + length) {
            if let Some(pa) = self.pagetable.getpa(VirtAddr(va)) {
                let va0 = checked_max(va, addr);
                let va1 = checked_min(checked_min(va + 4096, addr + length), area.start + area.filesz);
                if va1 > va0 {
                    let page = crate::frame::bytes(pa, 4096);
                    let slice = &page[(va0 - va)..(va0 - va) + (va1 - va0)];
                    let file_off = area.offset + (va0 - area.start);
                    let written = crate_interface::call_interface!(systype::fs::FileBackedOps::writei(ino, slice, file_off))
                        .expect("writeback_shared: writei failed");
                    assert_eq!(written, va1 - va0, "writeback_shared: short write");
                }
            }
            va += 4096;
        }
        crate_interface::call_interface!(systype::fs::FileBackedOps::iunlock(ino));
        crate_interface::call_interface!(systype::fs::FileBackedOps::end_op());
    }

    /// Grows (`n > 0`) or shrinks (`n < 0`) the heap VMA. Growing is
    /// rejected if it would collide with another VMA or cross
    /// `TRAPFRAME`; shrinking is rejected if it would leave the heap
    /// below one resident page, or if the heap is file-backed.
    pub fn uvm_growheap(&mut self, n: isize) -> SysResult<()> {
        let slot = self.heap.ok_or(SysError::EINVAL)?;
        let id = self.vmas[slot].expect("uvm_growheap: heap slot is empty");
        let mut heap = vma::vma_get(id);

        if n > 0 {
            let grow = n as usize;
            let new_end = heap
                .end()
                .checked_add(grow)
                .filter(|&e| e <= TRAPFRAME)
                .ok_or(SysError::ENOMEM)?;
            let grown = VmArea { length: heap.length + grow, ..heap };
            for other_id in self.vmas.iter().flatten().copied() {
                if other_id == id {
                    continue;
                }
                if vma_intersect(&grown, &vma::vma_get(other_id)) {
                    return Err(SysError::ENOMEM);
                }
            }
            let _ = new_end;
            vma::vma_set(id, grown);
            Ok(())
        } else if n < 0 {
            if heap.is_file_backed() {
                return Err(SysError::EINVAL);
            }
            let shrink = (-n) as usize;
            if heap.length < 4096 + shrink {
                return Err(SysError::EINVAL);
            }
            let unmap_start = heap.end() - shrink;
            heap.length -= shrink;
            vma::vma_set(id, heap);
            self.uvm_unmap(unmap_start, shrink);
            Ok(())
        } else {
            Ok(())
        }
    }

    /// Establishes the distinguished heap VMA (used by `exec`-equivalent
    /// setup code, before any `sbrk`). `slot` must already hold a VMA.
    pub fn mark_heap(&mut self, addr: usize) {
        let slot = self
            .vmas
            .iter()
            .position(|s| s.map(vma::vma_get).map(|a| a.start) == Some(addr))
            .expect("mark_heap: no vma at that address");
        self.heap = Some(slot);
    }

    /// Clones every VMA and its installed page-table range into `child`.
    /// Rolls every already-cloned child VMA back on the first failure.
    pub fn uvm_dup(&self, child: &mut AddrSpace) -> SysResult<()> {
        for (slot, id) in self.vmas.iter().enumerate() {
            let Some(id) = *id else { continue };
            let area = vma::vma_get(id);
            let result = (|| {
                let new_id = vma::vma_dup(id).ok_or(SysError::ENOMEM)?;
                let (start, end) = area.page_rounded_range();
                if self
                    .pagetable
                    .clone_range(&child.pagetable, VirtAddr(start), VirtAddr(end))
                    .is_err()
                {
                    vma::vma_free(new_id);
                    return Err(SysError::ENOMEM);
                }
                Ok(new_id)
            })();

            match result {
                Ok(new_id) => {
                    child.vmas[slot] = Some(new_id);
                    if self.heap == Some(slot) {
                        child.heap = Some(slot);
                    }
                }
                Err(e) => {
                    for s in child.vmas.iter_mut() {
                        if let Some(cid) = s.take() {
                            let carea = vma::vma_get(cid);
                            child.pagetable.deallocunmap(
                                VirtAddr(carea.page_rounded_range().0),
                                VirtAddr(carea.page_rounded_range().1),
                            );
                            vma::vma_free(cid);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Unmaps every VMA, the trampoline, and the trapframe, then frees
    /// every remaining page-table frame.
    pub fn uvm_free(mut self) {
        let ids = self.vmas;
        for id in ids.into_iter().flatten() {
            let area = vma::vma_get(id);
            self.uvm_unmap(area.start, area.length);
        }
        self.pagetable.unmap(VirtAddr(TRAMPOLINE), VirtAddr(TRAMPOLINE + 4096));
        self.pagetable.unmap(VirtAddr(TRAPFRAME), VirtAddr(TRAPFRAME + 4096));
        self.pagetable.free();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();
    fn ensure_init() {
        INIT.call_once(crate::frame::kinit);
    }

    fn new_uvm() -> AddrSpace {
        ensure_init();
        let trampoline = crate::frame::kalloc().unwrap();
        let trapframe = crate::frame::kalloc().unwrap();
        AddrSpace::uvm_new(trampoline, trapframe).unwrap()
    }

    #[test]
    fn new_uvm_hides_trampoline_and_trapframe() {
        let uvm = new_uvm();
        assert_eq!(uvm.pagetable().getpa(VirtAddr(TRAMPOLINE)), None);
        assert_eq!(uvm.pagetable().getpa(VirtAddr(TRAPFRAME)), None);
    }

    #[test]
    fn map_rejects_overlap() {
        let mut uvm = new_uvm();
        uvm.uvm_map(0x1000, 0x2000, MapPerm::R | MapPerm::W, MapFlags::Private, None, 0, 0)
            .unwrap();
        assert!(uvm.uvm_map(0x1500, 0x1000, MapPerm::R, MapFlags::Private, None, 0, 0).is_err());
    }

    #[test]
    fn getfreevrange_skips_existing_vma() {
        let mut uvm = new_uvm();
        let first = uvm.getfreevrange(0x1000).unwrap();
        uvm.uvm_map(first, 0x1000, MapPerm::R | MapPerm::W, MapFlags::Private, None, 0, 0)
            .unwrap();
        let second = uvm.getfreevrange(0x1000).unwrap();
        assert!(second >= first + 0x1000);
    }
}
