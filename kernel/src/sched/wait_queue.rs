//! Sleep queues.
//!
//! A wait queue is an ordered list of threads blocked on one event,
//! linked through each thread's own `sleep_node` so a sleeper occupies at
//! most one queue and blocking allocates nothing. Insertion is FIFO;
//! wakeup picks the highest-priority sleeper, ties resolved in insertion
//! order. All mutation happens under the scheduler lock.

use crate::{
    sched,
    thread::{OffsetOfSleepNode, Thread, ThreadNode},
    types::ArcList,
};
use core::cell::UnsafeCell;

pub(crate) type SleepList = ArcList<Thread, OffsetOfSleepNode>;

pub struct WaitQueue {
    sleepers: UnsafeCell<SleepList>,
}

// Guarded by the scheduler lock.
unsafe impl Send for WaitQueue {}
unsafe impl Sync for WaitQueue {}

impl WaitQueue {
    pub const fn new() -> Self {
        Self {
            sleepers: UnsafeCell::new(SleepList::new()),
        }
    }

    /// Link the sentinels. Must run once before first use, after the
    /// queue has reached its final address.
    pub fn init(&self) -> bool {
        unsafe { &mut *self.sleepers.get() }.init()
    }

    #[allow(clippy::mut_from_ref)]
    unsafe fn list_mut(&self) -> &mut SleepList {
        &mut *self.sleepers.get()
    }

    pub(crate) fn push_back_locked(&self, t: ThreadNode) {
        sched::assert_locked();
        let ok = unsafe { self.list_mut() }.push_back(t);
        assert!(ok, "thread already sits on a sleep queue");
    }

    pub(crate) fn pop_front_locked(&self) -> Option<ThreadNode> {
        sched::assert_locked();
        unsafe { self.list_mut() }.pop_front()
    }

    /// Detach the highest-priority sleeper; FIFO among equals because the
    /// scan keeps the first candidate of any given priority.
    pub(crate) fn remove_highest_locked(&self) -> Option<ThreadNode> {
        sched::assert_locked();
        let list = unsafe { self.list_mut() };
        let mut best: Option<ThreadNode> = None;
        for t in list.iter() {
            match &best {
                Some(b) if t.priority() >= b.priority() => {}
                _ => best = Some(t),
            }
        }
        let best = best?;
        let ok = SleepList::detach(&best);
        debug_assert!(ok);
        Some(best)
    }

    /// Highest priority among the sleepers, if any.
    pub(crate) fn top_priority_locked(&self) -> Option<crate::types::Priority> {
        sched::assert_locked();
        let list = unsafe { self.list_mut() };
        let mut top = None;
        for t in list.iter() {
            match top {
                Some(p) if t.priority() >= p => {}
                _ => top = Some(t.priority()),
            }
        }
        top
    }

    pub(crate) fn is_empty_locked(&self) -> bool {
        sched::assert_locked();
        unsafe { self.list_mut() }.is_empty()
    }
}

/// Pull a sleeper out of whatever queue holds it; used by the sleep-timer
/// callback, which knows the thread but not the queue. Returns false for
/// a queueless sleep.
pub(crate) fn detach_sleeper(t: &ThreadNode) -> bool {
    sched::assert_locked();
    SleepList::detach(t)
}
