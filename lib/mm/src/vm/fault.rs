//! Completes whatever `uvm_map` only declared. Every user page starts
//! life as a bare VMA record with no PTE at all; this is the single
//! place a frame actually gets installed, whether that's because
//! nothing was there yet, because a COW sharer needs its own copy, or
//! because the access turns out to already be satisfiable.

use config::mm::PAGE_SIZE;
use simdebug::when_debug;
use systype::{SysError, SysResult};

use crate::address::{PhysAddr, VirtAddr, pground_down};
use crate::frame;
use crate::vm::addr_space::AddrSpace;
use crate::vm::pte::{PageTableEntry, PteFlags};
use crate::vm::vma::MapPerm;

/// Which permission the faulting access required.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
    Exec,
}

fn perm_to_pte_flags(perm: MapPerm) -> PteFlags {
    let mut flags = PteFlags::empty();
    if perm.contains(MapPerm::R) {
        flags |= PteFlags::R;
    }
    if perm.contains(MapPerm::W) {
        flags |= PteFlags::W;
    }
    if perm.contains(MapPerm::X) {
        flags |= PteFlags::X;
    }
    flags
}

/// Which `MapPerm` bit a given access requires the VMA to grant.
fn access_to_mapperm(access: AccessKind) -> MapPerm {
    match access {
        AccessKind::Read => MapPerm::R,
        AccessKind::Write => MapPerm::W,
        AccessKind::Exec => MapPerm::X,
    }
}

/// Completes the mapping covering `va` for the given kind of access.
/// Returns the physical page now backing it.
///
/// - the containing VMA doesn't grant the access at all: `EFAULT`,
///   before anything is walked or installed.
/// - no leaf installed yet: allocate a zeroed frame, map it, and load
///   the file-backed prefix (if any) that overlaps this page.
/// - leaf installed but not user-accessible: the access reaches past
///   what this VMA grants (e.g. a stack guard page) — `EFAULT`.
/// - leaf installed, user-accessible, write requested but not
///   writable: a COW sharer. Take the frame in place if it's the last
///   reference, otherwise copy.
/// - anything else: the access was already satisfiable — a benign
///   re-entry (two harts faulting on the same page at once, or the
///   trap handler racing a completed `copyin`/`copyout`). Not an error.
pub fn uvm_completemap(uvm: &AddrSpace, va: usize, access: AccessKind) -> SysResult<PhysAddr> {
    let id = uvm.find_vma(va).ok_or(SysError::EFAULT)?;
    let area = crate::vm::vma::vma_get(id);
    if !area.perm.contains(access_to_mapperm(access)) {
        return Err(SysError::EFAULT);
    }
    let page_va = VirtAddr(pground_down(va));
    let pt = uvm.pagetable();

    let pte = pt.walk(page_va, true).ok_or(SysError::ENOMEM)?;

    if !pte.is_valid() {
        let mem = frame::kalloc().ok_or(SysError::ENOMEM)?;
        frame::page_bytes_mut(mem).fill(0);

        if area.is_file_backed() && page_va.0 < area.start + area.filesz {
            let ino = area.inode.expect("uvm_completemap: file-backed area with no inode");
            let file_off = area.offset + (page_va.0 - area.start);
            let want = core::cmp::min(PAGE_SIZE, area.start + area.filesz - page_va.0);
            crate_interface::call_interface!(systype::fs::FileBackedOps::ilock(ino));
            let n = crate_interface::call_interface!(systype::fs::FileBackedOps::readi(
                ino,
                &mut frame::page_bytes_mut(mem)[..want],
                file_off
            ));
            crate_interface::call_interface!(systype::fs::FileBackedOps::iunlock(ino));
            match n {
                Ok(n) if n == want => {}
                _ => {
                    frame::kfree(mem);
                    panic!("uvm_completemap: short read loading {:#x}", page_va.0);
                }
            }
        }

        *pte = PageTableEntry::new(mem.page_number(), perm_to_pte_flags(area.perm) | PteFlags::V | PteFlags::U);
        when_debug!({
            log::trace!("uvm_completemap: installed {:#x} -> {:#x} for {:?}", page_va.0, mem.0, access);
        });
        Ok(mem)
    } else if !pte.is_user() {
        Err(SysError::EFAULT)
    } else if access == AccessKind::Write && !pte.is_writable() {
        let pa = PhysAddr::from(pte.ppn());
        if frame::ksingleref(pa) {
            pte.set_flags(pte.flags() | PteFlags::W);
            Ok(pa)
        } else {
            let mem = frame::kalloc().ok_or(SysError::ENOMEM)?;
            frame::page_bytes_mut(mem).copy_from_slice(frame::page_bytes(pa));
            pte.set_ppn(mem.page_number());
            pte.set_flags(pte.flags() | PteFlags::W);
            frame::kfree(pa);
            Ok(mem)
        }
    } else {
        Ok(PhysAddr::from(pte.ppn()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::vma::MapFlags;
    use std::sync::Once;

    static INIT: Once = Once::new();
    fn ensure_init() {
        INIT.call_once(frame::kinit);
    }

    fn new_uvm() -> AddrSpace {
        ensure_init();
        let trampoline = frame::kalloc().unwrap();
        let trapframe = frame::kalloc().unwrap();
        AddrSpace::uvm_new(trampoline, trapframe).unwrap()
    }

    #[test]
    fn demand_zero_anonymous_page() {
        let mut uvm = new_uvm();
        let addr = uvm.getfreevrange(0x1000).unwrap();
        uvm.uvm_map(addr, 0x1000, MapPerm::R | MapPerm::W, MapFlags::Private, None, 0, 0)
            .unwrap();
        let pa = uvm_completemap(&uvm, addr, AccessKind::Read).unwrap();
        assert_eq!(frame::page_bytes(pa)[0], 0);
        assert_eq!(uvm_completemap(&uvm, addr, AccessKind::Write).unwrap(), pa);
    }

    #[test]
    fn cow_write_fault_copies_when_shared() {
        let mut parent = new_uvm();
        let addr = parent.getfreevrange(0x1000).unwrap();
        parent
            .uvm_map(addr, 0x1000, MapPerm::R | MapPerm::W, MapFlags::Private, None, 0, 0)
            .unwrap();
        let parent_pa = uvm_completemap(&parent, addr, AccessKind::Write).unwrap();
        frame::page_bytes_mut(parent_pa)[0] = 0xAB;

        let mut child = new_uvm();
        parent.uvm_dup(&mut child).unwrap();
        assert!(!frame::ksingleref(parent_pa));

        let child_pa = uvm_completemap(&child, addr, AccessKind::Write).unwrap();
        assert_ne!(child_pa, parent_pa);
        assert_eq!(frame::page_bytes(child_pa)[0], 0xAB);
        assert!(frame::ksingleref(parent_pa));
    }

    #[test]
    fn out_of_range_access_faults() {
        let uvm = new_uvm();
        assert_eq!(uvm_completemap(&uvm, 0x9000, AccessKind::Read), Err(SysError::EFAULT));
    }

    #[test]
    fn exec_fault_without_x_perm_faults() {
        let mut uvm = new_uvm();
        let addr = uvm.getfreevrange(0x1000).unwrap();
        uvm.uvm_map(addr, 0x1000, MapPerm::R | MapPerm::W, MapFlags::Private, None, 0, 0)
            .unwrap();
        assert_eq!(uvm_completemap(&uvm, addr, AccessKind::Exec), Err(SysError::EFAULT));
        // the gate runs before any leaf is installed
        assert!(uvm.pagetable().getpa(VirtAddr(addr)).is_none());
    }
}
