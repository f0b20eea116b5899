//! Single-shot tick timers.
//!
//! Armed timers sit on one global pending list protected by the scheduler
//! lock. Every tick decrements every pending timer; a timer reaching zero
//! is taken off the list and its callback runs immediately, still under
//! the scheduler lock. Callbacks therefore only perform scheduler-side
//! work, typically moving a thread from a sleep queue to the ready table.

use crate::{
    sched,
    types::{impl_intrusive_adapter, Arc, ArcList, ListNode},
};
use alloc::boxed::Box;
use core::cell::{Cell, UnsafeCell};

impl_intrusive_adapter!(OffsetOfTimerNode, KTimer, link);

type TimerList = ArcList<KTimer, OffsetOfTimerNode>;

pub struct KTimer {
    pub(crate) link: ListNode<KTimer, OffsetOfTimerNode>,
    remaining: Cell<usize>,
    active: Cell<bool>,
    callback: UnsafeCell<Option<Box<dyn Fn() + Send + Sync>>>,
}

// All fields are guarded by the scheduler lock.
unsafe impl Send for KTimer {}
unsafe impl Sync for KTimer {}

impl KTimer {
    pub fn new() -> Arc<KTimer> {
        Arc::new(Self {
            link: ListNode::new(),
            remaining: Cell::new(0),
            active: Cell::new(false),
            callback: UnsafeCell::new(None),
        })
    }

    pub(crate) fn is_active_locked(&self) -> bool {
        sched::assert_locked();
        self.active.get()
    }

    pub(crate) fn set_callback_locked(&self, callback: Box<dyn Fn() + Send + Sync>) {
        sched::assert_locked();
        unsafe { *self.callback.get() = Some(callback) };
    }

    /// Arm for `ticks` ticks from now. Re-arming an active timer restarts
    /// it.
    pub(crate) fn start_locked(&self, ticks: usize) {
        sched::assert_locked();
        debug_assert!(ticks > 0);
        let me = unsafe { TimerList::arc_from_node(&self.link) };
        if self.active.replace(true) {
            TimerList::detach(&me);
        }
        self.remaining.set(ticks);
        pending_locked().push_back(me);
    }

    /// Disarm and drop the callback. The callback often captures the
    /// owning thread, so keeping it would pin the descriptor alive.
    pub(crate) fn stop_locked(&self) {
        sched::assert_locked();
        if self.active.replace(false) {
            let me = unsafe { TimerList::arc_from_node(&self.link) };
            TimerList::detach(&me);
        }
        drop(unsafe { (*self.callback.get()).take() });
    }

    fn fire_locked(&self) {
        let callback = unsafe { (*self.callback.get()).take() };
        if let Some(callback) = callback {
            callback();
        }
    }
}

struct PendingTimers(UnsafeCell<TimerList>);

// Guarded by the scheduler lock.
unsafe impl Sync for PendingTimers {}

static PENDING: PendingTimers = PendingTimers(UnsafeCell::new(TimerList::new()));

#[allow(clippy::mut_from_ref)]
fn pending_locked() -> &'static mut TimerList {
    sched::assert_locked();
    unsafe { &mut *PENDING.0.get() }
}

pub(crate) fn init() {
    sched::lock();
    unsafe { &mut *PENDING.0.get() }.init();
    sched::unlock();
}

/// Credit one tick to every pending timer and fire the expired ones.
pub(crate) fn run_pending_locked() {
    sched::assert_locked();
    for timer in pending_locked().iter() {
        let remaining = timer.remaining.get();
        if remaining > 1 {
            timer.remaining.set(remaining - 1);
            continue;
        }
        timer.remaining.set(0);
        timer.active.set(false);
        TimerList::detach(&timer);
        timer.fire_locked();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    fn counting_timer(counter: &Arc<AtomicUsize>) -> Arc<KTimer> {
        let timer = KTimer::new();
        let counter = counter.clone();
        sched::lock();
        timer.set_callback_locked(Box::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        }));
        sched::unlock();
        timer
    }

    #[test]
    fn timer_fires_once_after_interval() {
        let _g = crate::test_support::kernel_guard();
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = counting_timer(&fired);
        sched::lock();
        timer.start_locked(3);
        assert!(timer.is_active_locked());
        sched::unlock();
        for _ in 0..2 {
            crate::time::tick();
            assert_eq!(fired.load(Ordering::Relaxed), 0);
        }
        crate::time::tick();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
        sched::lock();
        assert!(!timer.is_active_locked());
        sched::unlock();
        // Expired timers stay off the pending list.
        crate::time::tick();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn stop_cancels_a_pending_timer() {
        let _g = crate::test_support::kernel_guard();
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = counting_timer(&fired);
        sched::lock();
        timer.start_locked(2);
        timer.stop_locked();
        assert!(!timer.is_active_locked());
        sched::unlock();
        for _ in 0..3 {
            crate::time::tick();
        }
        assert_eq!(fired.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn restart_resets_the_interval() {
        let _g = crate::test_support::kernel_guard();
        let fired = Arc::new(AtomicUsize::new(0));
        let timer = counting_timer(&fired);
        sched::lock();
        timer.start_locked(2);
        sched::unlock();
        crate::time::tick();
        sched::lock();
        timer.start_locked(3);
        sched::unlock();
        for _ in 0..2 {
            crate::time::tick();
            assert_eq!(fired.load(Ordering::Relaxed), 0);
        }
        crate::time::tick();
        assert_eq!(fired.load(Ordering::Relaxed), 1);
    }
}
