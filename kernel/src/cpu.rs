//! Per-CPU bookkeeping.
//!
//! One [`CpuState`] exists per core and is touched only by code running on
//! that core with interrupts disabled, so plain `Cell`s suffice. The
//! `current` slot holds the scheduler's reference to the running thread;
//! it is `None` while the CPU sits in its scheduler loop.

use crate::{arch, config::NUM_CORES, support::IrqGuard, thread::ThreadNode};
use core::cell::{Cell, UnsafeCell};

pub(crate) struct CpuState {
    current: UnsafeCell<Option<ThreadNode>>,
    /// Saved stack pointer of the scheduler loop context.
    sched_sp: UnsafeCell<usize>,
    sched_lock_depth: Cell<u32>,
    irq_save_depth: Cell<u32>,
    /// Interrupt flags captured by the outermost irq_save. Meaningful only
    /// while irq_save_depth > 0.
    irq_saved_flags: Cell<usize>,
    /// Number of spinlocks held by this CPU, the scheduler lock included.
    spinlocks_held: Cell<u32>,
    isr_nesting: Cell<u32>,
}

// Each CpuState is only ever accessed from its own core.
unsafe impl Sync for CpuState {}

impl CpuState {
    const fn new() -> Self {
        Self {
            current: UnsafeCell::new(None),
            sched_sp: UnsafeCell::new(0),
            sched_lock_depth: Cell::new(0),
            irq_save_depth: Cell::new(0),
            irq_saved_flags: Cell::new(0),
            spinlocks_held: Cell::new(0),
            isr_nesting: Cell::new(0),
        }
    }

    #[inline]
    pub fn sched_lock_depth(&self) -> u32 {
        self.sched_lock_depth.get()
    }

    #[inline]
    pub fn set_sched_lock_depth(&self, depth: u32) {
        self.sched_lock_depth.set(depth);
    }

    #[inline]
    pub fn irq_state(&self) -> (u32, usize) {
        (self.irq_save_depth.get(), self.irq_saved_flags.get())
    }

    #[inline]
    pub fn set_irq_state(&self, state: (u32, usize)) {
        self.irq_save_depth.set(state.0);
        self.irq_saved_flags.set(state.1);
    }

    #[inline]
    pub fn spinlocks_held(&self) -> u32 {
        self.spinlocks_held.get()
    }

    #[inline]
    pub fn note_spinlock_acquired(&self) {
        self.spinlocks_held.set(self.spinlocks_held.get() + 1);
    }

    #[inline]
    pub fn note_spinlock_released(&self) {
        let held = self.spinlocks_held.get();
        debug_assert!(held > 0);
        self.spinlocks_held.set(held - 1);
    }

    #[inline]
    pub fn isr_nesting(&self) -> u32 {
        self.isr_nesting.get()
    }

    #[inline]
    pub fn set_isr_nesting(&self, n: u32) {
        self.isr_nesting.set(n);
    }

    /// Swap the current-thread slot, returning the previous occupant.
    pub fn swap_current(&self, t: Option<ThreadNode>) -> Option<ThreadNode> {
        unsafe { core::mem::replace(&mut *self.current.get(), t) }
    }

    pub fn current_cloned(&self) -> Option<ThreadNode> {
        unsafe { (*self.current.get()).clone() }
    }

    /// Run `f` against the current-thread slot without taking a reference.
    pub fn with_current<R>(&self, f: impl FnOnce(Option<&ThreadNode>) -> R) -> R {
        f(unsafe { (*self.current.get()).as_ref() })
    }

    #[inline]
    pub fn sched_sp(&self) -> usize {
        unsafe { *self.sched_sp.get() }
    }

    #[inline]
    pub fn sched_sp_slot(&self) -> *mut usize {
        self.sched_sp.get()
    }
}

static CPUS: [CpuState; NUM_CORES] = [const { CpuState::new() }; NUM_CORES];

/// The calling CPU's state. Callers must have interrupts disabled (or hold
/// the scheduler lock), otherwise the CPU could change under them.
#[inline]
pub(crate) fn current_cpu() -> &'static CpuState {
    debug_assert!(!arch::irq_enabled());
    &CPUS[arch::cpu_id()]
}

/// Enter a nestable IRQ-disabled region on the local CPU. The outermost
/// call captures and disables the interrupt flag; inner calls only count.
pub fn irq_save() {
    let flags = arch::irq_save_disable();
    let cpu = current_cpu();
    let depth = cpu.irq_save_depth.get();
    if depth == 0 {
        cpu.irq_saved_flags.set(flags);
    }
    cpu.irq_save_depth.set(depth + 1);
}

/// Leave one level of the IRQ-disabled region. The outermost call restores
/// the flag captured by the matching `irq_save`.
pub fn irq_restore() {
    let cpu = current_cpu();
    let depth = cpu.irq_save_depth.get();
    if depth == 0 {
        panic!("irq_restore without irq_save");
    }
    cpu.irq_save_depth.set(depth - 1);
    if depth == 1 {
        arch::irq_restore(cpu.irq_saved_flags.get());
    }
}

/// The thread running on the calling CPU, if any. Pins the CPU for the
/// duration of the read only; the returned reference stays valid because
/// the scheduler keeps its own reference until the thread is reaped.
pub(crate) fn current_thread() -> Option<ThreadNode> {
    let _irq = IrqGuard::new();
    current_cpu().current_cloned()
}

/// True while the calling CPU is running an interrupt handler.
pub fn in_isr() -> bool {
    let _irq = IrqGuard::new();
    current_cpu().isr_nesting() > 0
}

// A should_panic test can unwind mid-critical-section; start the next
// test from a clean CPU 0.
#[cfg(test)]
pub(crate) fn reset_for_tests() {
    let cpu = &CPUS[0];
    cpu.sched_lock_depth.set(0);
    cpu.irq_save_depth.set(0);
    cpu.irq_saved_flags.set(0);
    cpu.spinlocks_held.set(0);
    cpu.isr_nesting.set(0);
    drop(cpu.swap_current(None));
    arch::irq_enable();
}
