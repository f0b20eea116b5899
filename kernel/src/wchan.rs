//! Wait channels: a named sleep queue for ad-hoc events.
//!
//! Collaborators (drivers, the process layer) that just need "sleep until
//! poked" block here instead of building a primitive of their own. The
//! caller's spinlock is released atomically with respect to wakeup, as in
//! every sleep path.

use crate::{error::Error, sched, sched::WaitQueue, sync::spinlock::SpinLockGuard, time};

pub struct WaitChannel {
    name: &'static str,
    queue: WaitQueue,
}

impl WaitChannel {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            queue: WaitQueue::new(),
        }
    }

    /// Must run once before first use.
    pub fn init(&self) -> bool {
        self.queue.init()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Wait for the event guarded by `guard`'s lock, releasing the lock
    /// while asleep. The caller re-takes its lock and re-checks the
    /// condition afterwards.
    pub fn sleep<T: ?Sized>(&self, guard: SpinLockGuard<'_, T>) -> Result<(), Error> {
        sched::sleep_on(&self.queue, time::WAITING_FOREVER, guard)
    }

    /// Wake the highest-priority sleeper, if any.
    pub fn wakeup_one(&self) {
        sched::wakeup_one(&self.queue, 0);
    }

    /// Wake every sleeper.
    pub fn wakeup_all(&self) {
        sched::wakeup_all(&self.queue, 0);
    }
}
