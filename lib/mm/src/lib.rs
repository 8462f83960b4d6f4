#![cfg_attr(not(test), no_std)]

pub mod address;
pub mod frame;
#[cfg(test)]
pub mod test_support;
pub mod vm;

pub use address::{PhysAddr, PhysPageNum, VirtAddr, VirtPageNum};
pub use frame::{free_count, kalloc, kfree, kincref, kinit, ksingleref};
pub use vm::addr_space::AddrSpace;
pub use vm::copy::{copyin, copyinstr, copyout};
pub use vm::fault::{AccessKind, uvm_completemap};
pub use vm::page_table::PageTable;
pub use vm::pte::{PageTableEntry, PteFlags};
pub use vm::vma::{MapFlags, MapPerm, VmArea};
