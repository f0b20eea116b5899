//! Hosted backend. There is no interrupt controller to program, so the
//! local interrupt flag is a process-global atomic and the machine always
//! reports CPU 0. Scheduling still works for real: `switch.rs` swaps
//! stacks natively, so kernel threads run inside an ordinary process
//! (serialized by the test harness).

use core::sync::atomic::{AtomicBool, Ordering};

static IRQ_ENABLED: AtomicBool = AtomicBool::new(true);

#[inline]
pub(crate) fn cpu_id() -> usize {
    0
}

#[inline]
pub(crate) fn irq_save_disable() -> usize {
    IRQ_ENABLED.swap(false, Ordering::SeqCst) as usize
}

#[inline]
pub(crate) fn irq_restore(old: usize) {
    IRQ_ENABLED.store(old != 0, Ordering::SeqCst);
}

#[inline]
pub(crate) fn irq_enable() {
    IRQ_ENABLED.store(true, Ordering::SeqCst);
}

#[inline]
pub(crate) fn irq_enabled() -> bool {
    IRQ_ENABLED.load(Ordering::SeqCst)
}

#[inline]
pub(crate) fn wait_for_interrupt() {
    core::hint::spin_loop();
}
