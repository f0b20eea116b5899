//! Host-test scaffolding. The hosted arch backend gives the kernel one
//! emulated CPU inside the test process: the test body plays the role of
//! that CPU's scheduler loop via [`run_to_idle`] and drives time by
//! calling `time::tick` directly. Everything here serializes on one
//! process-wide lock because the per-CPU state is process-global.

use crate::{arch, cpu, sched};
use std::sync::{Mutex, MutexGuard, Once};

static LOCK: Mutex<()> = Mutex::new(());
static INIT: Once = Once::new();

/// Serialize tests that touch kernel state, and repair the per-CPU
/// bookkeeping a previously panicking (`should_panic`) test left behind.
pub(crate) fn kernel_guard() -> MutexGuard<'static, ()> {
    let guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    INIT.call_once(crate::init);
    cpu::reset_for_tests();
    sched::reset_lock_for_tests();
    guard
}

/// Play the scheduler loop: run ready threads until none is runnable.
pub(crate) fn run_to_idle() {
    sched::lock();
    sched::run_ready_locked();
    sched::unlock();
}

/// Pretend the hardware delivered an interrupt and `f` is its handler.
pub(crate) fn simulate_irq(f: impl FnOnce()) {
    let flags = arch::irq_save_disable();
    sched::irq_handler_begin();
    f();
    sched::irq_handler_end();
    arch::irq_restore(flags);
}
