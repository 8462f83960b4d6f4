//! Reference-counted physical page allocator.
//!
//! Physical memory here is a single static byte array standing in for
//! real DRAM (there is no linker-provided `_ekernel`/`PHYSTOP` pair in
//! this crate and no boot-time memory map to discover). `PhysAddr` is an
//! offset into that array. Bookkeeping mirrors the reference kernel's
//! `kmem` structure exactly: one spinlock guards a free-count, a flat
//! freelist of frame indices, and a flat array of per-frame reference
//! counts — not a bitmap, not a buddy allocator, because neither gives a
//! cheap place to hang a refcount needed for copy-on-write.

use config::mm::{KERNEL_RESERVED_PAGES, MAX_PAGES, PAGE_SIZE, RAM_SIZE};
use mutex::SpinNoIrqLock;

use crate::address::PhysAddr;

static RAM: Ram = Ram::new();

struct Ram(core::cell::UnsafeCell<[u8; RAM_SIZE]>);

// The allocator's lock is the only thing allowed to hand out references
// into this array; every access is mediated through a refcounted frame.
unsafe impl Sync for Ram {}

impl Ram {
    const fn new() -> Self {
        Ram(core::cell::UnsafeCell::new([0; RAM_SIZE]))
    }
}

struct Kmem {
    numfree: usize,
    freelist: [usize; MAX_PAGES],
    refs: [u32; MAX_PAGES],
}

impl Kmem {
    const fn new() -> Self {
        Kmem {
            numfree: 0,
            freelist: [0; MAX_PAGES],
            refs: [0; MAX_PAGES],
        }
    }
}

static KMEM: SpinNoIrqLock<Kmem> = SpinNoIrqLock::new(Kmem::new());

fn frame_index(pa: PhysAddr) -> usize {
    assert!(pa.is_aligned(), "frame_index: {:#x} is not page aligned", pa.0);
    let idx = pa.0 / PAGE_SIZE;
    assert!(idx < MAX_PAGES, "frame_index: {:#x} out of range", pa.0);
    idx
}

unsafe fn ram_ptr(pa: PhysAddr) -> *mut u8 {
    let base = RAM.0.get() as *mut u8;
    unsafe { base.add(pa.0) }
}

/// Raw byte access to one physical page. Used by the page-table
/// primitives to read/write PTE arrays and by the fault engine to
/// zero/copy page contents.
pub fn page_bytes_mut(pa: PhysAddr) -> &'static mut [u8; PAGE_SIZE] {
    assert!(pa.is_aligned());
    frame_index(pa);
    unsafe { &mut *(ram_ptr(pa) as *mut [u8; PAGE_SIZE]) }
}

pub fn page_bytes(pa: PhysAddr) -> &'static [u8; PAGE_SIZE] {
    assert!(pa.is_aligned());
    frame_index(pa);
    unsafe { &*(ram_ptr(pa) as *const [u8; PAGE_SIZE]) }
}

/// Arbitrary (not necessarily page-aligned) byte access, for `copyin`/
/// `copyout`'s partial-page transfers.
pub fn bytes_mut(pa: PhysAddr, len: usize) -> &'static mut [u8] {
    unsafe { core::slice::from_raw_parts_mut(ram_ptr(pa), len) }
}

pub fn bytes(pa: PhysAddr, len: usize) -> &'static [u8] {
    unsafe { core::slice::from_raw_parts(ram_ptr(pa), len) }
}

fn scribble(pa: PhysAddr, byte: u8) {
    page_bytes_mut(pa).fill(byte);
}

/// Populates the freelist with every frame above the reserved region.
/// Must be called exactly once before any other allocator entry point.
pub fn kinit() {
    let mut k = KMEM.lock();
    for idx in KERNEL_RESERVED_PAGES..MAX_PAGES {
        let n = k.numfree;
        k.freelist[n] = idx;
        k.numfree = n + 1;
    }
    log::debug!(
        "kinit: {} pages free ({} reserved for the kernel image)",
        k.numfree,
        KERNEL_RESERVED_PAGES
    );
}

/// Allocates one frame with `refs == 1`. Returns `None` when the
/// freelist is exhausted; callers turn this into `SysError::ENOMEM`.
pub fn kalloc() -> Option<PhysAddr> {
    let pa = {
        let mut k = KMEM.lock();
        if k.numfree == 0 {
            return None;
        }
        k.numfree -= 1;
        let idx = k.freelist[k.numfree];
        k.refs[idx] = 1;
        PhysAddr((idx) * PAGE_SIZE)
    };
    scribble(pa, 5);
    Some(pa)
}

/// Raises `pa`'s reference count. Used whenever a second leaf PTE is
/// installed to point at an already-live frame (page-table clone, COW
/// fork).
pub fn kincref(pa: PhysAddr) {
    let idx = frame_index(pa);
    let mut k = KMEM.lock();
    assert!(k.refs[idx] > 0, "kincref: frame {:#x} is not allocated", pa.0);
    k.refs[idx] += 1;
}

/// Lowers `pa`'s reference count, releasing the frame back to the
/// freelist once it reaches zero. It is a fatal invariant violation to
/// free an already-free frame.
pub fn kfree(pa: PhysAddr) {
    let idx = frame_index(pa);
    let released = {
        let mut k = KMEM.lock();
        assert!(k.refs[idx] > 0, "kfree: frame {:#x} is already free", pa.0);
        k.refs[idx] -= 1;
        if k.refs[idx] == 0 {
            let n = k.numfree;
            k.freelist[n] = idx;
            k.numfree = n + 1;
            true
        } else {
            false
        }
    };
    if released {
        scribble(pa, 1);
    }
}

/// True iff `pa` has exactly one owner — the fast path for a
/// copy-on-write write fault that can upgrade in place instead of
/// copying.
pub fn ksingleref(pa: PhysAddr) -> bool {
    let idx = frame_index(pa);
    let k = KMEM.lock();
    k.refs[idx] == 1
}

/// Number of frames currently on the freelist. Exposed for the
/// idempotent-teardown property: tearing down an address space must
/// leave this exactly where it was before the address space acquired
/// any frames.
pub fn free_count() -> usize {
    KMEM.lock().numfree
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static INIT: Once = Once::new();

    fn ensure_init() {
        INIT.call_once(kinit);
    }

    #[test]
    fn alloc_free_round_trip() {
        ensure_init();
        let pa = kalloc().expect("frame available");
        assert!(ksingleref(pa));
        kfree(pa);
    }

    #[test]
    fn refcount_sharing() {
        ensure_init();
        let pa = kalloc().expect("frame available");
        kincref(pa);
        assert!(!ksingleref(pa));
        kfree(pa);
        assert!(ksingleref(pa));
        kfree(pa);
    }

    #[test]
    #[should_panic(expected = "already free")]
    fn double_free_panics() {
        ensure_init();
        let pa = kalloc().expect("frame available");
        kfree(pa);
        kfree(pa);
    }
}
