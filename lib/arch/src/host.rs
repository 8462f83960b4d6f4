//! No-op stand-ins for the riscv64 TLB/page-table-register primitives,
//! used when this crate is built for the host (`cfg(test)`) rather than
//! for a real riscv64 target. There is no MMU to drive on the host; the
//! page-table primitives call these purely to keep their control flow
//! identical across targets.

pub fn switch_page_table(_satp: usize) {}

pub fn sfence_vma_addr(_va: usize) {}

pub fn sfence_vma_all_except_global() {}

pub fn fence() {}

pub fn tlb_shootdown(va: usize, count: usize) {
    log::trace!("tlb_shootdown (host no-op): va={:#x} count={}", va, count);
}
