//! Memory layout constants for the Sv39-style user virtual memory subsystem.

/// Width of a virtual address in Sv39.
pub const VA_WIDTH_SV39: usize = 39;
/// Width of a physical address in Sv39.
pub const PA_WIDTH_SV39: usize = 56;
/// Bits of page offset.
pub const PAGE_OFFSET_WIDTH: usize = 12;
/// Bits consumed by each of the three page-table levels.
pub const PTE_INDEX_WIDTH: usize = 9;
/// Number of page-table levels.
pub const PAGE_LEVELS: usize = 3;
/// Entries per page-table page.
pub const PTES_PER_PAGE: usize = 512;

/// Page size in bytes.
pub const PAGE_SIZE: usize = 4096;
/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: usize = 12;

/// One past the highest valid user virtual address.
///
/// Kept one bit below the full Sv39 range (`1 << VA_WIDTH_SV39`) so that
/// every address below it sign-extends the same way a real Sv39 walker
/// would expect, matching the reference kernel this subsystem descends from.
pub const MAXVA: usize = 1 << (VA_WIDTH_SV39 - 1);

/// Trampoline page: highest page of every user address space, supervisor-only.
pub const TRAMPOLINE: usize = MAXVA - PAGE_SIZE;
/// Trapframe page: directly below the trampoline, supervisor-only.
pub const TRAPFRAME: usize = TRAMPOLINE - PAGE_SIZE;

/// Lowest address `getfreevrange` will ever hand out.
pub const START_VMAS_ADDR: usize = 0x1000_0000;

/// Capacity of the global VMA pool shared by every address space.
pub const MAX_VMAS: usize = 256;
/// Capacity of the per-address-space VMA slot array.
pub const VMA_SIZE: usize = 16;

/// Size of the simulated physical RAM arena backing the frame allocator.
///
/// There is no linker-provided `_ekernel` symbol or real DRAM in this
/// crate, so physical memory is modeled as a single static byte array and
/// this constant sizes it.
pub const RAM_SIZE: usize = 16 * 1024 * 1024;
/// Number of frames carved out of the front of the arena to stand in for
/// the kernel image / boot reservations; only the remainder is ever handed
/// out by the allocator.
pub const KERNEL_RESERVED_PAGES: usize = 64;
/// Total number of page frames in the simulated arena.
pub const MAX_PAGES: usize = RAM_SIZE / PAGE_SIZE;
