//! Spinlocks, the only lock primitive the VM subsystem needs.
//!
//! The filesystem's sleep-locks live in the filesystem crate, out of
//! scope here; everything in this crate only ever protects short,
//! non-suspending critical sections (the allocator freelist, the VMA
//! pool's `used` bitmap).

pub mod spin_mutex;

pub use spin_mutex::SpinMutex;

#[cfg(target_arch = "riscv64")]
use riscv::register::sstatus;

pub type SpinLock<T> = SpinMutex<T, Spin>;
pub type SpinNoIrqLock<T> = SpinMutex<T, SpinNoIrq>;

/// Low-level support for a `SpinMutex` (plain spin vs. IRQ-disabling spin).
pub trait MutexSupport {
    /// Data stashed across the critical section, restored on unlock.
    type GuardData;
    /// Called before the lock is acquired.
    fn before_lock() -> Self::GuardData;
    /// Called when the guard protecting the critical section drops.
    fn after_unlock(_: &mut Self::GuardData);
}

/// Plain spin, no interrupt masking.
#[derive(Debug)]
pub struct Spin;

impl MutexSupport for Spin {
    type GuardData = ();
    #[inline(always)]
    fn before_lock() -> Self::GuardData {}
    #[inline(always)]
    fn after_unlock(_: &mut Self::GuardData) {}
}

/// Saves and restores the interrupt-enable bit around a critical section so
/// a timer interrupt can never re-enter a lock already held on this hart.
pub struct SieGuard(bool);

impl SieGuard {
    fn new() -> Self {
        #[cfg(target_arch = "riscv64")]
        let old_ie = {
            let sie = sstatus::read().sie();
            unsafe {
                sstatus::clear_sie();
            }
            sie
        };
        #[cfg(not(target_arch = "riscv64"))]
        let old_ie = false;
        Self(old_ie)
    }
}

impl Drop for SieGuard {
    fn drop(&mut self) {
        #[cfg(target_arch = "riscv64")]
        if self.0 {
            unsafe {
                sstatus::set_sie();
            }
        }
    }
}

/// Spin while interrupts are masked on this hart.
#[derive(Debug)]
pub struct SpinNoIrq;

impl MutexSupport for SpinNoIrq {
    type GuardData = SieGuard;
    #[inline(always)]
    fn before_lock() -> Self::GuardData {
        SieGuard::new()
    }
    #[inline(always)]
    fn after_unlock(_: &mut Self::GuardData) {}
}
