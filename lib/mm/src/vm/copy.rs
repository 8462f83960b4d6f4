//! Crosses the kernel/user boundary a page at a time, completing
//! lazily-mapped pages on demand rather than requiring the caller to
//! have touched them first.

use config::mm::{MAXVA, PAGE_SIZE};
use systype::{SysError, SysResult};

use crate::address::VirtAddr;
use crate::frame;
use crate::vm::addr_space::AddrSpace;
use crate::vm::fault::{AccessKind, uvm_completemap};

fn already_writable(uvm: &AddrSpace, page_va: VirtAddr) -> Option<crate::address::PhysAddr> {
    match uvm.pagetable().walk(page_va, false) {
        Some(pte) if pte.is_valid() && pte.is_user() && pte.is_writable() => Some(crate::address::PhysAddr::from(pte.ppn())),
        _ => None,
    }
}

/// Copies `src` into user memory starting at `dst_va`. Walks the
/// destination's existing mapping first and only calls
/// [`uvm_completemap`] when the page isn't already there, writable, and
/// user-accessible — the common case of writing into a buffer the
/// process already faulted in costs one walk, not two.
pub fn copyout(uvm: &AddrSpace, dst_va: usize, src: &[u8]) -> SysResult<()> {
    let end = dst_va.checked_add(src.len()).ok_or(SysError::EFAULT)?;
    if end > MAXVA {
        return Err(SysError::EFAULT);
    }

    let mut remaining = src;
    let mut va = dst_va;
    while !remaining.is_empty() {
        let page_va = VirtAddr(va & !(PAGE_SIZE - 1));
        let off = va - page_va.0;
        let n = core::cmp::min(PAGE_SIZE - off, remaining.len());

        let pa = match already_writable(uvm, page_va) {
            Some(pa) => pa,
            None => uvm_completemap(uvm, va, AccessKind::Write)?,
        };

        frame::bytes_mut(pa, PAGE_SIZE)[off..off + n].copy_from_slice(&remaining[..n]);
        remaining = &remaining[n..];
        va += n;
    }
    Ok(())
}

/// Copies `dst.len()` bytes out of user memory starting at `src_va`.
pub fn copyin(uvm: &AddrSpace, src_va: usize, dst: &mut [u8]) -> SysResult<()> {
    let mut written = 0;
    let mut va = src_va;
    while written < dst.len() {
        let page_va = VirtAddr(va & !(PAGE_SIZE - 1));
        let off = va - page_va.0;
        let n = core::cmp::min(PAGE_SIZE - off, dst.len() - written);

        let pa = match uvm.pagetable().getpa(page_va) {
            Some(pa) => pa,
            None => uvm_completemap(uvm, va, AccessKind::Read)?,
        };

        dst[written..written + n].copy_from_slice(&frame::bytes(pa, PAGE_SIZE)[off..off + n]);
        written += n;
        va += n;
    }
    Ok(())
}

/// Copies a NUL-terminated string out of user memory, stopping at the
/// first NUL or once `max` bytes have been scanned without finding one.
/// Returns the string's length, not counting the NUL.
pub fn copyinstr(uvm: &AddrSpace, src_va: usize, dst: &mut [u8], max: usize) -> SysResult<usize> {
    let max = core::cmp::min(max, dst.len());
    let mut va = src_va;
    let mut copied = 0;

    while copied < max {
        let page_va = VirtAddr(va & !(PAGE_SIZE - 1));
        let off = va - page_va.0;
        let n = core::cmp::min(PAGE_SIZE - off, max - copied);

        let pa = match uvm.pagetable().getpa(page_va) {
            Some(pa) => pa,
            None => uvm_completemap(uvm, va, AccessKind::Read)?,
        };

        let page = &frame::bytes(pa, PAGE_SIZE)[off..off + n];
        if let Some(nul) = page.iter().position(|&b| b == 0) {
            dst[copied..copied + nul].copy_from_slice(&page[..nul]);
            return Ok(copied + nul);
        }
        dst[copied..copied + n].copy_from_slice(page);
        copied += n;
        va += n;
    }
    Err(SysError::EFAULT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::vma::{MapFlags, MapPerm};
    use std::sync::Once;

    static INIT: Once = Once::new();
    fn ensure_init() {
        INIT.call_once(frame::kinit);
    }

    fn new_uvm_with_mapping(addr: usize, length: usize) -> AddrSpace {
        ensure_init();
        let trampoline = frame::kalloc().unwrap();
        let trapframe = frame::kalloc().unwrap();
        let mut uvm = AddrSpace::uvm_new(trampoline, trapframe).unwrap();
        uvm.uvm_map(addr, length, MapPerm::R | MapPerm::W, MapFlags::Private, None, 0, 0)
            .unwrap();
        uvm
    }

    #[test]
    fn copyout_then_copyin_round_trip() {
        let uvm = new_uvm_with_mapping(0x1000, 0x3000);
        let msg = b"hello from the kernel side, crossing a page boundary here";
        copyout(&uvm, 0x1ff0, msg).unwrap();

        let mut back = vec![0u8; msg.len()];
        copyin(&uvm, 0x1ff0, &mut back).unwrap();
        assert_eq!(&back, msg);
    }

    #[test]
    fn copyinstr_stops_at_nul() {
        let uvm = new_uvm_with_mapping(0x4000, 0x1000);
        copyout(&uvm, 0x4000, b"hi\0garbage").unwrap();

        let mut buf = [0xffu8; 16];
        let len = copyinstr(&uvm, 0x4000, &mut buf, 16).unwrap();
        assert_eq!(len, 2);
        assert_eq!(&buf[..2], b"hi");
    }

    #[test]
    fn copyinstr_without_nul_errors() {
        let uvm = new_uvm_with_mapping(0x5000, 0x1000);
        copyout(&uvm, 0x5000, &[b'x'; 8]).unwrap();

        let mut buf = [0u8; 8];
        assert_eq!(copyinstr(&uvm, 0x5000, &mut buf, 8), Err(SysError::EFAULT));
    }

    #[test]
    fn copyout_past_maxva_faults_instead_of_panicking() {
        let uvm = new_uvm_with_mapping(0x6000, 0x1000);
        assert_eq!(copyout(&uvm, MAXVA, &[1u8; 4]), Err(SysError::EFAULT));
        assert_eq!(copyout(&uvm, MAXVA + 0x1000, &[1u8; 4]), Err(SysError::EFAULT));
    }
}
