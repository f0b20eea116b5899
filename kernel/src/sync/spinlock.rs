//! Test-and-set spinlocks with IRQ discipline.
//!
//! Acquiring disables interrupts on the local CPU before spinning, so a
//! lock shared with interrupt handlers cannot deadlock against its own
//! CPU. The holder's CPU id is recorded: re-acquiring a held lock or
//! releasing somebody else's is a kernel bug and panics.

use crate::{arch, cpu, support::IrqGuard};
use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
};

const OWNER_NONE: usize = usize::MAX;

#[derive(Debug)]
pub struct RawSpinLock {
    locked: AtomicBool,
    owner_cpu: AtomicUsize,
    name: &'static str,
}

impl RawSpinLock {
    pub const fn new(name: &'static str) -> Self {
        Self {
            locked: AtomicBool::new(false),
            owner_cpu: AtomicUsize::new(OWNER_NONE),
            name,
        }
    }

    pub fn acquire(&self) {
        cpu::irq_save();
        if self.holding_impl() {
            panic!("cpu {} already holding {}", arch::cpu_id(), self.name);
        }
        loop {
            if self
                .locked
                .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                break;
            }
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
        self.owner_cpu.store(arch::cpu_id(), Ordering::Relaxed);
        cpu::current_cpu().note_spinlock_acquired();
    }

    pub fn release(&self) {
        if !self.holding_impl() {
            panic!(
                "cpu {} cannot release {}: not the holder",
                arch::cpu_id(),
                self.name
            );
        }
        cpu::current_cpu().note_spinlock_released();
        self.owner_cpu.store(OWNER_NONE, Ordering::Relaxed);
        self.locked.store(false, Ordering::Release);
        cpu::irq_restore();
    }

    /// Whether the calling CPU holds this lock.
    pub fn holding(&self) -> bool {
        let _irq = IrqGuard::new();
        self.holding_impl()
    }

    // Requires interrupts disabled: reads the local CPU id.
    fn holding_impl(&self) -> bool {
        self.locked.load(Ordering::Relaxed) && self.owner_cpu.load(Ordering::Relaxed) == arch::cpu_id()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    #[cfg(test)]
    pub(crate) fn force_reset_for_tests(&self) {
        self.owner_cpu.store(OWNER_NONE, Ordering::Relaxed);
        self.locked.store(false, Ordering::Relaxed);
    }
}

/// A value protected by a [`RawSpinLock`].
#[derive(Debug)]
pub struct SpinLock<T: ?Sized> {
    raw: RawSpinLock,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    pub const fn new(name: &'static str, data: T) -> Self {
        Self {
            raw: RawSpinLock::new(name),
            data: UnsafeCell::new(data),
        }
    }
}

impl<T: ?Sized> SpinLock<T> {
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        self.raw.acquire();
        SpinLockGuard { lock: self }
    }

    pub fn holding(&self) -> bool {
        self.raw.holding()
    }
}

#[derive(Debug)]
pub struct SpinLockGuard<'a, T: ?Sized> {
    lock: &'a SpinLock<T>,
}

impl<'a, T: ?Sized> Deref for SpinLockGuard<'a, T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> DerefMut for SpinLockGuard<'a, T> {
    #[inline]
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<'a, T: ?Sized> Drop for SpinLockGuard<'a, T> {
    #[inline]
    fn drop(&mut self) {
        self.lock.raw.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_disables_interrupts() {
        let _g = crate::test_support::kernel_guard();
        let l = SpinLock::new("test", 0u32);
        assert!(!l.holding());
        {
            let mut v = l.lock();
            *v += 1;
            assert!(l.holding());
            assert!(!arch::irq_enabled());
        }
        assert!(!l.holding());
        assert!(arch::irq_enabled());
        assert_eq!(*l.lock(), 1);
    }

    #[test]
    #[should_panic(expected = "already holding")]
    fn recursive_acquire_is_fatal() {
        let _g = crate::test_support::kernel_guard();
        let l = RawSpinLock::new("recursive");
        l.acquire();
        l.acquire();
    }

    #[test]
    #[should_panic(expected = "not the holder")]
    fn foreign_release_is_fatal() {
        let _g = crate::test_support::kernel_guard();
        let l = RawSpinLock::new("foreign");
        l.release();
    }
}
