//! Kernel threads.
//!
//! A thread is a schedulable flow of control with its own stack and saved
//! register context. Descriptors are shared through [`ThreadNode`]
//! references: the ready/sleep queues, the per-CPU current slot and any
//! creator each hold one, and the descriptor is freed when the last
//! reference drops after the scheduler reaps the exited thread.
//!
//! Fields below the atomics are guarded by the scheduler lock; the
//! `_locked` accessors document that requirement.

use crate::{
    arch, cpu,
    error::{code, Error},
    sched,
    sync::mutex::{Mutex, OffsetOfOwnedNode},
    time::timer::KTimer,
    types::{impl_intrusive_adapter, Arc, ArcList, ListNode, Priority},
};
use alloc::boxed::Box;
use bitflags::bitflags;
use core::{
    cell::UnsafeCell,
    ffi::c_void,
    sync::atomic::{AtomicI32, AtomicU8, Ordering},
};

mod builder;
pub use builder::{spawn, Builder, Stack, StackStorage};

pub type ThreadNode = Arc<Thread>;

impl_intrusive_adapter!(OffsetOfSchedNode, Thread, sched_node);
impl_intrusive_adapter!(OffsetOfSleepNode, Thread, sleep_node);

/// Created or explicitly suspended; becomes runnable through [`resume`].
pub const SUSPENDED: u8 = 0;
/// Sitting in a ready queue.
pub const READY: u8 = 1;
/// Running on some CPU.
pub const RUNNING: u8 = 2;
/// Blocked on a sleep queue or a plain timed sleep.
pub const SLEEPING: u8 = 3;
/// Exited; awaiting the scheduler's reap.
pub const DESTROYED: u8 = 4;
/// Reaped; stack released.
pub const NONE: u8 = 5;

bitflags! {
    #[derive(Debug, Clone, Copy)]
    pub struct ThreadFlags: u8 {
        /// A higher-priority thread became ready while this one was
        /// interrupted; reschedule at the outermost ISR exit.
        const NEED_RESCHED = 1 << 0;
    }
}

pub enum Entry {
    C(extern "C" fn(*mut c_void), *mut c_void),
    Closure(Box<dyn FnOnce() + Send>),
}

pub struct Thread {
    pub(crate) sched_node: ListNode<Thread, OffsetOfSchedNode>,
    pub(crate) sleep_node: ListNode<Thread, OffsetOfSleepNode>,
    state: AtomicU8,
    flags: AtomicU8,
    base_priority: AtomicU8,
    priority: AtomicU8,
    sleep_result: AtomicI32,
    saved_sp: UnsafeCell<usize>,
    stack: UnsafeCell<Option<Stack>>,
    entry: UnsafeCell<Option<Entry>>,
    /// Lazily created on the first timed sleep, then reused.
    sleep_timer: UnsafeCell<Option<Arc<KTimer>>>,
    /// The mutex this thread is currently blocked on, for priority
    /// inheritance chains.
    pending_mutex: UnsafeCell<Option<Arc<Mutex>>>,
    /// Mutexes this thread holds, for the priority recompute on unlock.
    owned_mutexes: UnsafeCell<ArcList<Mutex, OffsetOfOwnedNode>>,
}

unsafe impl Send for Thread {}
unsafe impl Sync for Thread {}

impl Thread {
    pub(crate) fn new(priority: Priority) -> Self {
        Self {
            sched_node: ListNode::new(),
            sleep_node: ListNode::new(),
            state: AtomicU8::new(SUSPENDED),
            flags: AtomicU8::new(0),
            base_priority: AtomicU8::new(priority),
            priority: AtomicU8::new(priority),
            sleep_result: AtomicI32::new(0),
            saved_sp: UnsafeCell::new(0),
            stack: UnsafeCell::new(None),
            entry: UnsafeCell::new(None),
            sleep_timer: UnsafeCell::new(None),
            pending_mutex: UnsafeCell::new(None),
            owned_mutexes: UnsafeCell::new(ArcList::new()),
        }
    }

    #[inline]
    pub fn id(me: &ThreadNode) -> usize {
        Arc::handle(me)
    }

    #[inline]
    pub fn state(&self) -> u8 {
        self.state.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_state(&self, state: u8) {
        self.state.store(state, Ordering::Relaxed);
    }

    pub fn state_to_str(&self) -> &'static str {
        match self.state() {
            SUSPENDED => "suspended",
            READY => "ready",
            RUNNING => "running",
            SLEEPING => "sleeping",
            DESTROYED => "destroyed",
            NONE => "none",
            _ => "unknown",
        }
    }

    /// Effective scheduling priority; smaller runs first.
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority.load(Ordering::Relaxed)
    }

    /// The priority requested at creation, before any inheritance.
    #[inline]
    pub fn base_priority(&self) -> Priority {
        self.base_priority.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_effective_priority(&self, priority: Priority) {
        self.priority.store(priority, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn set_need_resched(&self) {
        self.flags
            .fetch_or(ThreadFlags::NEED_RESCHED.bits(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn clear_need_resched(&self) {
        self.flags
            .fetch_and(!ThreadFlags::NEED_RESCHED.bits(), Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn needs_resched(&self) -> bool {
        self.flags.load(Ordering::Relaxed) & ThreadFlags::NEED_RESCHED.bits() != 0
    }

    /// Outcome of the most recent sleep: 0 for a normal wakeup, a negative
    /// errno for timeout or destruction.
    #[inline]
    pub fn sleep_result(&self) -> i32 {
        self.sleep_result.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_sleep_result(&self, result: i32) {
        self.sleep_result.store(result, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn saved_sp(&self) -> usize {
        unsafe { *self.saved_sp.get() }
    }

    #[inline]
    pub(crate) fn saved_sp_slot(&self) -> *mut usize {
        self.saved_sp.get()
    }

    #[inline]
    pub(crate) fn set_saved_sp(&self, sp: usize) {
        unsafe { *self.saved_sp.get() = sp };
    }

    // The entry is written once at build time and taken once by the
    // trampoline on this thread's own stack.
    pub(crate) fn set_entry(&self, entry: Entry) {
        unsafe { *self.entry.get() = Some(entry) };
    }

    pub(crate) fn take_entry(&self) -> Option<Entry> {
        unsafe { (*self.entry.get()).take() }
    }

    pub(crate) fn set_stack(&self, stack: Stack) {
        unsafe { *self.stack.get() = Some(stack) };
    }

    /// Caller holds the scheduler lock; used by the reap path.
    pub(crate) fn take_stack(&self) -> Option<Stack> {
        unsafe { (*self.stack.get()).take() }
    }

    /// Caller holds the scheduler lock.
    pub(crate) fn sleep_timer_locked(&self) -> Option<Arc<KTimer>> {
        sched::assert_locked();
        unsafe { (*self.sleep_timer.get()).clone() }
    }

    /// Caller holds the scheduler lock.
    pub(crate) fn set_sleep_timer_locked(&self, timer: Arc<KTimer>) {
        sched::assert_locked();
        unsafe { *self.sleep_timer.get() = Some(timer) };
    }

    /// Caller holds the scheduler lock.
    pub(crate) fn pending_mutex_locked(&self) -> Option<Arc<Mutex>> {
        sched::assert_locked();
        unsafe { (*self.pending_mutex.get()).clone() }
    }

    /// Caller holds the scheduler lock.
    pub(crate) fn set_pending_mutex_locked(&self, m: Option<Arc<Mutex>>) {
        sched::assert_locked();
        unsafe { *self.pending_mutex.get() = m };
    }

    /// Caller holds the scheduler lock.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn owned_mutexes_locked(&self) -> &mut ArcList<Mutex, OffsetOfOwnedNode> {
        sched::assert_locked();
        &mut *self.owned_mutexes.get()
    }

    // Builder-time: the list sentinels must be linked after the descriptor
    // has reached its final address.
    pub(crate) fn init_lists(&self) {
        unsafe { (*self.owned_mutexes.get()).init() };
    }
}

impl Drop for Thread {
    fn drop(&mut self) {
        debug_assert!(self.sched_node.is_detached());
        debug_assert!(self.sleep_node.is_detached());
    }
}

/// The thread running on the calling CPU, if any.
pub fn current() -> Option<ThreadNode> {
    cpu::current_thread()
}

/// Create a suspended thread with a C-style entry. Make it runnable with
/// [`resume`].
pub fn create(
    entry: extern "C" fn(*mut c_void),
    arg: *mut c_void,
    priority: Priority,
) -> Result<ThreadNode, Error> {
    Builder::new(Entry::C(entry, arg)).set_priority(priority).build()
}

/// Resume a suspended thread, preempting the caller if the resumed thread
/// has higher priority.
pub fn resume(t: &ThreadNode) -> Result<(), Error> {
    sched::lock();
    if t.state() != SUSPENDED {
        sched::unlock();
        return Err(code::EINVAL);
    }
    sched::enqueue_locked(t.clone());
    sched::may_yield_locked(t);
    sched::unlock();
    Ok(())
}

/// Exit the calling thread. The scheduler frees the stack and drops its
/// descriptor reference after switching away.
pub fn exit() -> ! {
    sched::lock();
    cpu::current_cpu().with_current(|t| {
        let t = t.expect("exit without current thread");
        debug_assert_eq!(t.state(), RUNNING);
        t.set_state(DESTROYED);
    });
    sched::yield_locked();
    panic!("destroyed thread resumed");
}

// Execution of every thread begins here, on its own stack. The scheduler
// loop still holds the scheduler lock across the first switch.
pub(crate) extern "C" fn thread_entry() -> ! {
    sched::unlock();
    arch::irq_enable();
    let entry = {
        let t = current().expect("thread entry without current thread");
        t.take_entry()
    };
    match entry {
        Some(Entry::C(f, arg)) => f(arg),
        Some(Entry::Closure(f)) => f(),
        None => {}
    }
    exit();
}
