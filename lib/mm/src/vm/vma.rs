//! Virtual Memory Area records and the fixed-capacity pool that backs
//! every address space's mappings.
//!
//! A process-wide pool (not a per-address-space `Vec`) keeps the fault
//! path free of a second allocator: claiming or releasing a VMA never
//! touches the frame allocator or the heap.

use bitflags::bitflags;
use config::mm::MAX_VMAS;
use mutex::SpinNoIrqLock;
use systype::fs::InodeRef;

use crate::address::{pground_down, pground_up};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
    pub struct MapPerm: usize {
        const R = 1 << 0;
        const W = 1 << 1;
        const X = 1 << 2;
    }
}

/// `mmap`'s MAP_PRIVATE / MAP_SHARED distinction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MapFlags {
    Private,
    Shared,
}

impl Default for MapFlags {
    fn default() -> Self {
        MapFlags::Private
    }
}

pub const PROT_READ: usize = MapPerm::R.bits();
pub const PROT_WRITE: usize = MapPerm::W.bits();
pub const PROT_EXECUTE: usize = MapPerm::X.bits();
pub const MAP_PRIVATE: i32 = 0;
pub const MAP_SHARED: i32 = 1;
pub const MAP_FAILED: isize = -1;

/// One mapped range of a process's address space.
#[derive(Clone, Copy, Debug, Default)]
pub struct VmArea {
    pub used: bool,
    pub start: usize,
    pub length: usize,
    pub perm: MapPerm,
    pub flags: MapFlags,
    pub inode: Option<InodeRef>,
    pub offset: usize,
    pub filesz: usize,
}

impl VmArea {
    pub const fn empty() -> Self {
        VmArea {
            used: false,
            start: 0,
            length: 0,
            perm: MapPerm::empty(),
            flags: MapFlags::Private,
            inode: None,
            offset: 0,
            filesz: 0,
        }
    }

    pub fn end(&self) -> usize {
        self.start + self.length
    }

    /// The page-rounded range this VMA occupies in the page table —
    /// overlap and unmap arithmetic always works in these units.
    pub fn page_rounded_range(&self) -> (usize, usize) {
        (pground_down(self.start), pground_up(self.end()))
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.start && addr < self.end()
    }

    pub fn is_file_backed(&self) -> bool {
        self.inode.is_some()
    }
}

/// True iff the page-rounded ranges of `a` and `b` overlap.
pub fn vma_intersect(a: &VmArea, b: &VmArea) -> bool {
    let (a0, a1) = a.page_rounded_range();
    let (b0, b1) = b.page_rounded_range();
    a0 < b1 && b0 < a1
}

pub type VmaId = usize;

struct VmaPool {
    areas: [VmArea; MAX_VMAS],
}

impl VmaPool {
    const fn new() -> Self {
        VmaPool {
            areas: [VmArea::empty(); MAX_VMAS],
        }
    }
}

static VMAS: SpinNoIrqLock<VmaPool> = SpinNoIrqLock::new(VmaPool::new());

/// Claims a free pool slot. Returns `None` if the global pool is
/// exhausted.
pub fn vma_alloc() -> Option<VmaId> {
    let mut pool = VMAS.lock();
    for (i, area) in pool.areas.iter_mut().enumerate() {
        if !area.used {
            *area = VmArea::empty();
            area.used = true;
            return Some(i);
        }
    }
    None
}

/// Populates a freshly allocated slot. Takes its own reference on `inode`
/// via `idup` so the caller's handle remains independently valid.
#[allow(clippy::too_many_arguments)]
pub fn vma_init(
    id: VmaId,
    start: usize,
    length: usize,
    perm: MapPerm,
    flags: MapFlags,
    inode: Option<InodeRef>,
    offset: usize,
    filesz: usize,
) {
    let owned_inode = inode.map(|ino| crate_interface::call_interface!(systype::fs::FileBackedOps::idup(ino)));
    let mut pool = VMAS.lock();
    let area = &mut pool.areas[id];
    area.start = start;
    area.length = length;
    area.perm = perm;
    area.flags = flags;
    area.inode = owned_inode;
    area.offset = offset;
    area.filesz = filesz;
}

/// Duplicates a VMA into a fresh pool slot, including its inode
/// reference. Used by `uvm_dup` (fork); never touches page tables.
pub fn vma_dup(id: VmaId) -> Option<VmaId> {
    let src = vma_get(id);
    let dup_inode = src
        .inode
        .map(|ino| crate_interface::call_interface!(systype::fs::FileBackedOps::idup(ino)));
    let new_id = vma_alloc()?;
    let mut pool = VMAS.lock();
    pool.areas[new_id] = src;
    pool.areas[new_id].inode = dup_inode;
    Some(new_id)
}

/// Releases a VMA's inode reference (if any) under a filesystem
/// transaction, then returns the slot to the pool.
pub fn vma_free(id: VmaId) {
    let inode = vma_get(id).inode;
    if let Some(ino) = inode {
        crate_interface::call_interface!(systype::fs::FileBackedOps::begin_op());
        crate_interface::call_interface!(systype::fs::FileBackedOps::iput(ino));
        crate_interface::call_interface!(systype::fs::FileBackedOps::end_op());
    }
    let mut pool = VMAS.lock();
    pool.areas[id] = VmArea::empty();
}

pub fn vma_get(id: VmaId) -> VmArea {
    VMAS.lock().areas[id]
}

pub fn vma_set(id: VmaId, area: VmArea) {
    VMAS.lock().areas[id] = area;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_init_free_round_trip() {
        let id = vma_alloc().expect("pool has room");
        vma_init(id, 0x1000, 0x2000, MapPerm::R | MapPerm::W, MapFlags::Private, None, 0, 0);
        let area = vma_get(id);
        assert_eq!(area.start, 0x1000);
        assert_eq!(area.page_rounded_range(), (0x1000, 0x3000));
        vma_free(id);
        assert!(!vma_get(id).used);
    }

    #[test]
    fn intersect_detects_overlap() {
        let mut a = VmArea::empty();
        a.start = 0x1000;
        a.length = 0x2000;
        let mut b = VmArea::empty();
        b.start = 0x2500;
        b.length = 0x1000;
        assert!(vma_intersect(&a, &b));
        b.start = 0x3000;
        assert!(!vma_intersect(&a, &b));
    }
}
