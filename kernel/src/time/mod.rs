//! System time base.
//!
//! The platform timer interrupt drives everything: each interrupt calls
//! [`tick`] (between `irq_handler_begin` and `irq_handler_end`), which
//! advances the tick counter and credits every pending timer. All
//! timeouts in the kernel are tick counts.

pub mod timer;

use crate::{config::TICK_HZ, sched};
use core::sync::atomic::{AtomicUsize, Ordering};

/// A zero tick count disables the sleep timer: wait indefinitely.
pub const WAITING_FOREVER: usize = 0;

static TICKS: AtomicUsize = AtomicUsize::new(0);

pub(crate) fn init() {
    timer::init();
}

/// Ticks elapsed since boot.
pub fn get_ticks() -> usize {
    TICKS.load(Ordering::Relaxed)
}

/// Advance the time base by one tick and run expired timers. Called from
/// the platform timer ISR; timer callbacks run under the scheduler lock
/// and must stay bounded and non-blocking.
pub fn tick() {
    sched::lock();
    TICKS.fetch_add(1, Ordering::Relaxed);
    timer::run_pending_locked();
    sched::unlock();
}

pub fn tick_from_millisecond(ms: usize) -> usize {
    let ticks = TICK_HZ * (ms / 1000);
    ticks + (TICK_HZ * (ms % 1000)).div_ceil(1000)
}

pub fn tick_to_millisecond(ticks: usize) -> usize {
    ticks * (1000 / TICK_HZ)
}

/// Milliseconds since boot, at tick granularity.
pub fn get_milliseconds() -> usize {
    tick_to_millisecond(get_ticks())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn millisecond_conversion_rounds_up() {
        // TICK_HZ = 100: one tick is 10ms.
        assert_eq!(tick_from_millisecond(0), 0);
        assert_eq!(tick_from_millisecond(1), 1);
        assert_eq!(tick_from_millisecond(10), 1);
        assert_eq!(tick_from_millisecond(15), 2);
        assert_eq!(tick_from_millisecond(1000), 100);
        assert_eq!(tick_to_millisecond(3), 30);
    }
}
