//! The priority scheduler.
//!
//! One global spinlock serializes every scheduler mutation: ready queues,
//! sleep queues, pending timers, thread states and effective priorities.
//! The lock nests per CPU (`sched_lock_depth`), and interrupts stay
//! disabled on a CPU for as long as it holds the lock, so no interrupt
//! handler can ever observe scheduler state mid-update.
//!
//! Each CPU runs [`start`], an endless loop that pulls the
//! highest-priority ready thread and switches into it; a thread comes
//! back to the loop by yielding, sleeping or exiting. There is no idle
//! thread: an idle CPU waits for an interrupt inside the loop itself.

mod wait_queue;
pub use wait_queue::WaitQueue;

use crate::{
    arch, cpu,
    config::MAX_PRIORITIES,
    error::{code, Error},
    sync::spinlock::{RawSpinLock, SpinLockGuard},
    thread,
    thread::{OffsetOfSchedNode, Thread, ThreadNode},
    time,
    time::timer::KTimer,
    types::{ArcList, Priority},
};
use alloc::boxed::Box;
use core::cell::{Cell, UnsafeCell};

type ReadyQueue = ArcList<Thread, OffsetOfSchedNode>;

static SCHED_LOCK: RawSpinLock = RawSpinLock::new("sched");

struct ReadyTable {
    /// Bit N set iff queue N is non-empty.
    active: Cell<u32>,
    queues: [UnsafeCell<ReadyQueue>; MAX_PRIORITIES],
}

// Guarded by SCHED_LOCK.
unsafe impl Sync for ReadyTable {}

static READY_TABLE: ReadyTable = ReadyTable {
    active: Cell::new(0),
    queues: [const { UnsafeCell::new(ReadyQueue::new()) }; MAX_PRIORITIES],
};

static INIT: spin::Once<()> = spin::Once::new();

pub(crate) fn init() {
    INIT.call_once(|| {
        lock();
        for queue in READY_TABLE.queues.iter() {
            unsafe { &mut *queue.get() }.init();
        }
        unlock();
    });
}

#[cfg(test)]
pub(crate) fn reset_lock_for_tests() {
    SCHED_LOCK.force_reset_for_tests();
}

/// Acquire the scheduler lock, nesting per CPU. Interrupts are disabled
/// from entry until the matching [`unlock`].
pub(crate) fn lock() {
    cpu::irq_save();
    let cpu = cpu::current_cpu();
    let depth = cpu.sched_lock_depth();
    if depth == 0 {
        SCHED_LOCK.acquire();
    }
    cpu.set_sched_lock_depth(depth + 1);
}

pub(crate) fn unlock() {
    let cpu = cpu::current_cpu();
    let depth = cpu.sched_lock_depth();
    assert!(depth > 0, "scheduler lock not held");
    cpu.set_sched_lock_depth(depth - 1);
    if depth == 1 {
        SCHED_LOCK.release();
    }
    cpu::irq_restore();
}

#[inline]
pub(crate) fn assert_locked() {
    debug_assert!(SCHED_LOCK.holding(), "scheduler lock required");
}

/// Append to the ready queue matching the thread's effective priority.
pub(crate) fn enqueue_locked(t: ThreadNode) {
    assert_locked();
    let priority = t.priority() as usize;
    debug_assert!(priority < MAX_PRIORITIES);
    t.set_state(thread::READY);
    let queue = unsafe { &mut *READY_TABLE.queues[priority].get() };
    let ok = queue.push_back(t);
    assert!(ok, "thread already sits on a run queue");
    READY_TABLE.active.set(READY_TABLE.active.get() | 1 << priority);
}

/// Head of the first non-empty ready queue, scanning from priority 0.
pub(crate) fn dequeue_highest_locked() -> Option<ThreadNode> {
    assert_locked();
    let active = READY_TABLE.active.get();
    let priority = active.trailing_zeros() as usize;
    if priority >= MAX_PRIORITIES {
        return None;
    }
    let queue = unsafe { &mut *READY_TABLE.queues[priority].get() };
    let t = queue.pop_front();
    debug_assert!(t.is_some());
    if queue.is_empty() {
        READY_TABLE.active.set(active & !(1 << priority));
    }
    t
}

pub(crate) fn remove_from_ready_locked(t: &ThreadNode) -> bool {
    assert_locked();
    debug_assert_eq!(t.state(), thread::READY);
    let priority = t.priority() as usize;
    if !ReadyQueue::detach(t) {
        return false;
    }
    let queue = unsafe { &mut *READY_TABLE.queues[priority].get() };
    if queue.is_empty() {
        READY_TABLE.active.set(READY_TABLE.active.get() & !(1 << priority));
    }
    true
}

/// Change a thread's effective priority, repositioning it if it currently
/// sits on a ready queue.
pub(crate) fn set_priority_locked(t: &ThreadNode, priority: Priority) {
    assert_locked();
    if t.priority() == priority {
        return;
    }
    if t.state() == thread::READY {
        let ok = remove_from_ready_locked(t);
        debug_assert!(ok);
        t.set_effective_priority(priority);
        enqueue_locked(t.clone());
    } else {
        t.set_effective_priority(priority);
    }
}

/// Preemption decision after `candidate` became runnable: if it outranks
/// the thread running on this CPU, either reschedule now or, from inside
/// an interrupt handler, mark the current thread for a deferred
/// reschedule at ISR exit.
pub(crate) fn may_yield_locked(candidate: &ThreadNode) {
    assert_locked();
    let cpu = cpu::current_cpu();
    let Some(current) = cpu.current_cloned() else {
        return;
    };
    if candidate.priority() >= current.priority() {
        return;
    }
    if cpu.isr_nesting() > 0 {
        current.set_need_resched();
    } else {
        enqueue_locked(current);
        yield_locked();
    }
}

/// Switch from the running thread back into this CPU's scheduler loop.
/// The caller is responsible for having queued the thread somewhere if it
/// should ever run again.
///
/// The per-thread IRQ-save state crosses the switch out of band: it is
/// part of the thread's context, not the CPU's.
pub(crate) fn yield_locked() {
    let cpu = cpu::current_cpu();
    assert!(SCHED_LOCK.holding(), "yield without the scheduler lock");
    assert_eq!(
        cpu.spinlocks_held(),
        1,
        "yield while holding a non-scheduler spinlock"
    );
    let irq_state = cpu.irq_state();
    let sp_slot = cpu.with_current(|t| {
        t.expect("yield without current thread").saved_sp_slot()
    });
    unsafe { arch::context_switch(sp_slot, cpu.sched_sp()) };
    // Possibly resumed on a different CPU.
    let cpu = cpu::current_cpu();
    cpu.set_irq_state(irq_state);
}

/// Enqueue the calling thread and give the CPU away.
pub fn yield_me() {
    lock();
    let cpu = cpu::current_cpu();
    let current = cpu.current_cloned().expect("yield without current thread");
    enqueue_locked(current);
    yield_locked();
    unlock();
}

/// Put the calling thread to sleep. With a queue the thread is appended
/// for a later [`wakeup_one_locked`]; without one only a timeout or an
/// explicit enqueue can revive it. A zero `timeout` means no timer.
/// Returns the raw sleep result.
pub(crate) fn sleep_locked(queue: Option<&WaitQueue>, timeout: usize) -> i32 {
    assert_locked();
    let cpu = cpu::current_cpu();
    assert_eq!(cpu.isr_nesting(), 0, "sleeping in interrupt context");
    let t = cpu.current_cloned().expect("sleep without current thread");
    if timeout != time::WAITING_FOREVER {
        arm_sleep_timer_locked(&t, timeout);
    }
    if let Some(queue) = queue {
        queue.push_back_locked(t.clone());
    }
    t.set_state(thread::SLEEPING);
    yield_locked();
    if timeout != time::WAITING_FOREVER {
        // On a normal wakeup the timer is still pending; expiry already
        // disarmed it.
        if let Some(timer) = t.sleep_timer_locked() {
            if timer.is_active_locked() {
                timer.stop_locked();
            }
        }
    }
    t.sleep_result()
}

/// Block on `queue`, atomically releasing the caller's spinlock guard with
/// respect to wakeup: the guard drops only after the scheduler lock is
/// held, and every waker must take the scheduler lock, so a wakeup racing
/// with this call still finds the thread on the queue. The caller
/// re-acquires its own lock afterwards if it needs it.
pub(crate) fn sleep_on<T: ?Sized>(
    queue: &WaitQueue,
    timeout: usize,
    guard: SpinLockGuard<'_, T>,
) -> Result<(), Error> {
    lock();
    drop(guard);
    let result = sleep_locked(Some(queue), timeout);
    unlock();
    Error::check(result)
}

/// Wake the highest-priority sleeper (FIFO within a priority), handing it
/// `result` as its sleep outcome. Returns false if the queue was empty.
pub(crate) fn wakeup_one_locked(queue: &WaitQueue, result: i32) -> bool {
    assert_locked();
    let Some(t) = queue.remove_highest_locked() else {
        return false;
    };
    debug_assert_eq!(t.state(), thread::SLEEPING);
    t.set_sleep_result(result);
    enqueue_locked(t.clone());
    may_yield_locked(&t);
    true
}

/// Wake every sleeper in FIFO order.
pub(crate) fn wakeup_all_locked(queue: &WaitQueue, result: i32) {
    assert_locked();
    while let Some(t) = queue.pop_front_locked() {
        debug_assert_eq!(t.state(), thread::SLEEPING);
        t.set_sleep_result(result);
        enqueue_locked(t.clone());
        may_yield_locked(&t);
    }
}

pub(crate) fn wakeup_one(queue: &WaitQueue, result: i32) -> bool {
    lock();
    let woke = wakeup_one_locked(queue, result);
    unlock();
    woke
}

pub(crate) fn wakeup_all(queue: &WaitQueue, result: i32) {
    lock();
    wakeup_all_locked(queue, result);
    unlock();
}

fn arm_sleep_timer_locked(t: &ThreadNode, timeout: usize) {
    let timer = match t.sleep_timer_locked() {
        Some(timer) => timer,
        None => {
            let timer = KTimer::new();
            t.set_sleep_timer_locked(timer.clone());
            timer
        }
    };
    let th = t.clone();
    timer.set_callback_locked(Box::new(move || {
        // The sleeper may have been woken normally between the tick and
        // this callback; only a still-sleeping thread times out.
        if th.state() == thread::SLEEPING {
            th.set_sleep_result(code::ETIMEDOUT.to_errno());
            wait_queue::detach_sleeper(&th);
            enqueue_locked(th.clone());
            may_yield_locked(&th);
        }
    }));
    timer.start_locked(timeout);
}

/// Note that an interrupt handler started on this CPU. Preemption is
/// deferred until the outermost matching [`irq_handler_end`].
pub fn irq_handler_begin() {
    debug_assert!(!arch::irq_enabled());
    let cpu = cpu::current_cpu();
    cpu.set_isr_nesting(cpu.isr_nesting() + 1);
}

/// Leave an interrupt handler; on the outermost exit, reschedule if a
/// higher-priority thread became ready during the interrupt.
pub fn irq_handler_end() {
    lock();
    let cpu = cpu::current_cpu();
    let nesting = cpu.isr_nesting();
    if nesting == 0 {
        panic!("irq_handler_end without matching begin");
    }
    cpu.set_isr_nesting(nesting - 1);
    if nesting == 1 {
        if let Some(current) = cpu.current_cloned() {
            if current.needs_resched() {
                current.clear_need_resched();
                enqueue_locked(current);
                yield_locked();
            }
        }
    }
    unlock();
}

/// Hooks run around every switch into a thread; the process layer uses
/// them to load and unload address spaces.
pub struct SwitchHooks {
    pub prepare: fn(&ThreadNode),
    pub finish: fn(&ThreadNode),
}

static SWITCH_HOOKS: spin::Once<SwitchHooks> = spin::Once::new();

/// Install the context-switch hooks. Effective once, before scheduling
/// starts.
pub fn register_switch_hooks(hooks: SwitchHooks) {
    SWITCH_HOOKS.call_once(|| hooks);
}

/// Drain the ready table, running each thread until it blocks or exits.
/// Returns with the scheduler lock still held once nothing is runnable.
pub(crate) fn run_ready_locked() {
    assert_locked();
    loop {
        let Some(next) = dequeue_highest_locked() else {
            return;
        };
        debug_assert_eq!(next.state(), thread::READY);
        next.set_state(thread::RUNNING);
        let cpu = cpu::current_cpu();
        let previous = cpu.swap_current(Some(next.clone()));
        debug_assert!(previous.is_none());
        if let Some(hooks) = SWITCH_HOOKS.get() {
            (hooks.prepare)(&next);
        }
        unsafe { arch::context_switch(cpu.sched_sp_slot(), next.saved_sp()) };
        // The thread gave the CPU back: it yielded, slept or exited.
        let cpu = cpu::current_cpu();
        if let Some(hooks) = SWITCH_HOOKS.get() {
            (hooks.finish)(&next);
        }
        drop(cpu.swap_current(None));
        if next.state() == thread::DESTROYED {
            next.set_state(thread::NONE);
            let stack = next.take_stack();
            // Free the stack and descriptor with the lock released.
            unlock();
            drop(stack);
            drop(next);
            lock();
        }
    }
}

/// Per-CPU scheduler main loop. Never returns; an idle CPU enables
/// interrupts and halts until one arrives.
pub fn start() -> ! {
    init();
    lock();
    loop {
        run_ready_locked();
        unlock();
        arch::irq_enable();
        arch::wait_for_interrupt();
        lock();
    }
}
