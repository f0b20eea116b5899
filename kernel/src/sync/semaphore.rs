//! Counting semaphores.
//!
//! The semaphore's spinlock protects the counter; the wait queue, like
//! every sleep queue, is touched only under the scheduler lock. Both
//! statically allocated (`new` + `init`) and pool-backed (`create`)
//! flavors exist, tagged so cross-use is caught.

use crate::{
    cpu,
    error::{code, Error},
    pool::{ObjectPool, PoolBox, PoolObject},
    sched,
    sched::WaitQueue,
    sync::spinlock::SpinLock,
};
use core::{
    mem::MaybeUninit,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

const SEMAPHORE_MAGIC: u32 = u32::from_le_bytes(*b"sema");

pub struct Semaphore {
    magic: AtomicU32,
    is_static: AtomicBool,
    count: SpinLock<usize>,
    waiters: WaitQueue,
}

fn semaphore_ctor(slot: &mut MaybeUninit<Semaphore>) {
    slot.write(Semaphore::new(0));
    // Sentinels link at the block's final address.
    unsafe { slot.assume_init_ref() }.waiters.init();
}

static SEMAPHORE_POOL: ObjectPool<Semaphore> = ObjectPool::new("k-semaphore", semaphore_ctor);

impl Semaphore {
    /// A statically allocatable semaphore; [`init`](Self::init) must run
    /// before first use.
    pub const fn new(count: usize) -> Self {
        Self {
            magic: AtomicU32::new(0),
            is_static: AtomicBool::new(false),
            count: SpinLock::new("semaphore", count),
            waiters: WaitQueue::new(),
        }
    }

    /// Initialize a statically allocated semaphore. Returns false if it
    /// was already initialized.
    pub fn init(&self) -> bool {
        if self.magic.load(Ordering::Relaxed) == SEMAPHORE_MAGIC {
            return false;
        }
        self.waiters.init();
        self.is_static.store(true, Ordering::Relaxed);
        self.magic.store(SEMAPHORE_MAGIC, Ordering::Relaxed);
        true
    }

    /// Allocate a semaphore from the pool. Dropping the handle destroys
    /// it, waking any remaining waiters with `EINVAL`.
    pub fn create(count: usize) -> Result<PoolBox<Semaphore>, Error> {
        let sem = SEMAPHORE_POOL.get().ok_or(code::ENOMEM)?;
        *sem.count.lock() = count;
        sem.is_static.store(false, Ordering::Relaxed);
        sem.magic.store(SEMAPHORE_MAGIC, Ordering::Relaxed);
        Ok(sem)
    }

    pub fn destroy(sem: PoolBox<Semaphore>) {
        drop(sem);
    }

    fn check(&self) {
        if self.magic.load(Ordering::Relaxed) != SEMAPHORE_MAGIC {
            panic!("bad semaphore pointer");
        }
    }

    /// Take one unit without blocking.
    pub fn try_get(&self) -> Result<(), Error> {
        self.check();
        let mut count = self.count.lock();
        if *count == 0 {
            return Err(code::EAGAIN);
        }
        *count -= 1;
        Ok(())
    }

    /// Take one unit, blocking while the count is zero. A zero `timeout`
    /// waits forever; otherwise `ETIMEDOUT` after that many ticks.
    /// `EINVAL` if the semaphore is destroyed while waiting.
    pub fn get(&self, timeout: usize) -> Result<(), Error> {
        self.check();
        assert!(!cpu::in_isr(), "blocking semaphore get in interrupt context");
        let mut count = self.count.lock();
        loop {
            if *count > 0 {
                *count -= 1;
                return Ok(());
            }
            sched::sleep_on(&self.waiters, timeout, count)?;
            self.check();
            count = self.count.lock();
        }
    }

    /// Release one unit and wake the highest-priority waiter.
    pub fn put(&self) {
        self.check();
        let mut count = self.count.lock();
        *count += 1;
        drop(count);
        sched::wakeup_one(&self.waiters, 0);
    }

    pub fn count(&self) -> usize {
        self.check();
        *self.count.lock()
    }

    fn fini_common(&self) {
        sched::lock();
        sched::wakeup_all_locked(&self.waiters, code::EINVAL.to_errno());
        debug_assert!(self.waiters.is_empty_locked());
        sched::unlock();
    }

    /// Tear down a statically initialized semaphore, waking every waiter
    /// with `EINVAL`.
    pub fn fini(&self) {
        self.check();
        if !self.is_static.load(Ordering::Relaxed) {
            panic!("cannot fini a pool-allocated semaphore");
        }
        self.fini_common();
        self.magic.store(0, Ordering::Relaxed);
    }
}

impl PoolObject for Semaphore {
    fn on_put(&self) {
        if self.magic.load(Ordering::Relaxed) != SEMAPHORE_MAGIC {
            return;
        }
        debug_assert!(!self.is_static.load(Ordering::Relaxed));
        self.fini_common();
        self.magic.store(0, Ordering::Relaxed);
    }
}
