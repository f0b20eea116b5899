//! Mutexes with priority inheritance.
//!
//! Unlike the other primitives a mutex has no spinlock of its own: every
//! operation manipulates scheduler state (waiter queues, effective
//! priorities, ready-queue positions), so everything runs under the
//! scheduler lock.
//!
//! Ownership forms a forest, not pointer cycles: each thread records the
//! mutexes it holds and the single mutex it is blocked on, and effective
//! priorities are recomputed from those tables on lock and unlock. While
//! a thread is blocked on a mutex, the owner's effective priority is at
//! least the blocked thread's (numerically no larger), transitively along
//! the chain of owners up to `MUTEX_CHAIN_MAX` hops.

use crate::{
    config::MUTEX_CHAIN_MAX,
    cpu, sched,
    sched::WaitQueue,
    thread::ThreadNode,
    time::WAITING_FOREVER,
    types::{impl_intrusive_adapter, Arc, ArcList, ListNode, Priority},
};
use core::{
    cell::UnsafeCell,
    sync::atomic::{AtomicU32, Ordering},
};

const MUTEX_MAGIC: u32 = u32::from_le_bytes(*b"mutx");

impl_intrusive_adapter!(OffsetOfOwnedNode, Mutex, owned_node);

pub(crate) type OwnedList = ArcList<Mutex, OffsetOfOwnedNode>;

pub struct Mutex {
    magic: AtomicU32,
    /// Guarded by the scheduler lock.
    owner: UnsafeCell<Option<ThreadNode>>,
    waiters: WaitQueue,
    /// Links this mutex into its owner's held-mutex list.
    pub(crate) owned_node: ListNode<Mutex, OffsetOfOwnedNode>,
}

unsafe impl Send for Mutex {}
unsafe impl Sync for Mutex {}

impl Mutex {
    pub fn create() -> Arc<Mutex> {
        let m = Arc::new(Self {
            magic: AtomicU32::new(MUTEX_MAGIC),
            owner: UnsafeCell::new(None),
            waiters: WaitQueue::new(),
            owned_node: ListNode::new(),
        });
        m.waiters.init();
        m
    }

    fn check(&self) {
        if self.magic.load(Ordering::Relaxed) != MUTEX_MAGIC {
            panic!("bad mutex pointer");
        }
    }

    pub(crate) fn owner_locked(&self) -> Option<ThreadNode> {
        sched::assert_locked();
        unsafe { (*self.owner.get()).clone() }
    }

    fn set_owner_locked(&self, t: Option<ThreadNode>) {
        sched::assert_locked();
        unsafe { *self.owner.get() = t };
    }

    /// Acquire, blocking while owned and donating the caller's priority
    /// to the owner chain in the meantime.
    pub fn lock(&self) {
        self.check();
        assert!(!cpu::in_isr(), "mutex lock in interrupt context");
        sched::lock();
        let t = cpu::current_thread().expect("mutex lock without current thread");
        let me = unsafe { OwnedList::arc_from_node(&self.owned_node) };
        match self.owner_locked() {
            None => {
                self.set_owner_locked(Some(t.clone()));
                let ok = unsafe { t.owned_mutexes_locked() }.push_back(me);
                debug_assert!(ok);
            }
            Some(owner) if Arc::ptr_eq(&owner, &t) => {
                panic!("recursive mutex lock");
            }
            Some(owner) => {
                t.set_pending_mutex_locked(Some(me));
                raise_owner_priority_locked(owner, t.priority());
                let result = sched::sleep_locked(Some(&self.waiters), WAITING_FOREVER);
                // Ownership was transferred to us by the unlocking
                // thread before we were made runnable.
                debug_assert_eq!(result, 0);
                t.set_pending_mutex_locked(None);
            }
        }
        sched::unlock();
    }

    /// Release, handing the mutex to the highest-priority waiter and
    /// shedding any priority inherited through it.
    pub fn unlock(&self) {
        self.check();
        sched::lock();
        let t = cpu::current_thread().expect("mutex unlock without current thread");
        match self.owner_locked() {
            Some(owner) if Arc::ptr_eq(&owner, &t) => {}
            _ => panic!("mutex can only be released by its owner"),
        }
        let me = unsafe { OwnedList::arc_from_node(&self.owned_node) };
        let ok = OwnedList::detach(&me);
        debug_assert!(ok);
        if let Some(next) = self.waiters.remove_highest_locked() {
            self.set_owner_locked(Some(next.clone()));
            let ok = unsafe { next.owned_mutexes_locked() }.push_back(me);
            debug_assert!(ok);
            next.set_sleep_result(0);
            restore_priority_locked(&t);
            sched::enqueue_locked(next.clone());
            sched::may_yield_locked(&next);
        } else {
            self.set_owner_locked(None);
            restore_priority_locked(&t);
        }
        sched::unlock();
    }

    /// Highest priority among the threads blocked on this mutex.
    pub(crate) fn top_waiter_priority_locked(&self) -> Option<Priority> {
        self.waiters.top_priority_locked()
    }
}

// Donate `priority` along the chain of owners: the direct owner, then
// whatever that owner is itself blocked on, and so on. The walk stops
// once an owner already runs at least that urgently, or after
// MUTEX_CHAIN_MAX hops.
fn raise_owner_priority_locked(mut owner: ThreadNode, priority: Priority) {
    for _ in 0..MUTEX_CHAIN_MAX {
        if owner.priority() <= priority {
            break;
        }
        sched::set_priority_locked(&owner, priority);
        let Some(next_mutex) = owner.pending_mutex_locked() else {
            break;
        };
        let Some(next_owner) = next_mutex.owner_locked() else {
            break;
        };
        owner = next_owner;
    }
}

// Recompute a thread's effective priority after it released a mutex:
// the strongest of its base priority and the top waiter of every mutex
// it still holds.
fn restore_priority_locked(t: &ThreadNode) {
    let mut priority = t.base_priority();
    for m in unsafe { t.owned_mutexes_locked() }.iter() {
        if let Some(p) = m.top_waiter_priority_locked() {
            if p < priority {
                priority = p;
            }
        }
    }
    sched::set_priority_locked(t, priority);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thread::{Builder, Entry};

    // Donation walks at most MUTEX_CHAIN_MAX hops; owners further down a
    // pathological chain keep their priority.
    #[test]
    fn inheritance_chain_is_capped() {
        let _g = crate::test_support::kernel_guard();
        let n = MUTEX_CHAIN_MAX + 2;
        let mut threads = Vec::new();
        let mut mutexes = Vec::new();
        for _ in 0..n {
            threads.push(
                Builder::new(Entry::Closure(Box::new(|| {})))
                    .set_priority(20)
                    .build()
                    .unwrap(),
            );
            mutexes.push(Mutex::create());
        }
        sched::lock();
        for i in 0..n {
            mutexes[i].set_owner_locked(Some(threads[i].clone()));
        }
        for i in 1..n {
            threads[i].set_pending_mutex_locked(Some(mutexes[i - 1].clone()));
        }
        // A priority-0 waiter arrives at the mutex held by the chain's
        // last thread.
        raise_owner_priority_locked(threads[n - 1].clone(), 0);
        sched::unlock();
        for (i, t) in threads.iter().enumerate() {
            let expected = if i >= n - MUTEX_CHAIN_MAX { 0 } else { 20 };
            assert_eq!(t.priority(), expected, "thread {}", i);
        }
    }
}
