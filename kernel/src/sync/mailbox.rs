//! Bounded mailboxes: ring buffers of fixed-size messages with blocking
//! send and receive.
//!
//! The mailbox spinlock protects the ring; the two sleep queues are
//! scheduler-lock territory. Wakeups fire on the edge transitions only:
//! one receiver when the box stops being empty, one sender when it stops
//! being full. A mailbox is either statically allocated over caller
//! memory (`new` + `init`, torn down with `fini`) or pool-backed with a
//! heap ring (`create`, torn down by dropping the handle); the type tag
//! and the static flag make any cross-use fatal.

use crate::{
    cpu,
    error::{code, Error},
    pool::{ObjectPool, PoolBox, PoolObject},
    sched,
    sched::WaitQueue,
    sync::spinlock::{SpinLock, SpinLockGuard},
};
use core::{
    mem::MaybeUninit,
    ptr,
    sync::atomic::{AtomicBool, AtomicU32, Ordering},
};

const MAILBOX_MAGIC: u32 = u32::from_le_bytes(*b"mbox");

struct Ring {
    buf_start: *mut u8,
    buf_end: *mut u8,
    read_ptr: *mut u8,
    write_ptr: *mut u8,
    msg_size: usize,
    capacity: usize,
    count: usize,
    /// Heap ring owned by this mailbox; freed on teardown.
    heap_len: Option<usize>,
}

unsafe impl Send for Ring {}

impl Ring {
    const fn empty() -> Self {
        Self {
            buf_start: ptr::null_mut(),
            buf_end: ptr::null_mut(),
            read_ptr: ptr::null_mut(),
            write_ptr: ptr::null_mut(),
            msg_size: 0,
            capacity: 0,
            count: 0,
            heap_len: None,
        }
    }

    fn setup(&mut self, buf: *mut u8, buf_size: usize, msg_size: usize, heap: bool) {
        self.buf_start = buf;
        // Ignore a trailing partial message slot.
        self.buf_end = unsafe { buf.add(buf_size - buf_size % msg_size) };
        self.read_ptr = buf;
        self.write_ptr = buf;
        self.msg_size = msg_size;
        self.capacity = buf_size / msg_size;
        self.count = 0;
        self.heap_len = heap.then_some(buf_size);
    }
}

pub struct Mailbox {
    magic: AtomicU32,
    is_static: AtomicBool,
    ring: SpinLock<Ring>,
    receivers: WaitQueue,
    senders: WaitQueue,
}

fn mailbox_ctor(slot: &mut MaybeUninit<Mailbox>) {
    slot.write(Mailbox::new());
    let mb = unsafe { slot.assume_init_ref() };
    mb.receivers.init();
    mb.senders.init();
}

static MAILBOX_POOL: ObjectPool<Mailbox> = ObjectPool::new("k-mailbox", mailbox_ctor);

impl Mailbox {
    /// A statically allocatable mailbox; [`init`](Self::init) must run
    /// before first use.
    pub const fn new() -> Self {
        Self {
            magic: AtomicU32::new(0),
            is_static: AtomicBool::new(false),
            ring: SpinLock::new("mailbox", Ring::empty()),
            receivers: WaitQueue::new(),
            senders: WaitQueue::new(),
        }
    }

    /// Initialize a statically allocated mailbox over caller-provided
    /// storage. Capacity is `buf.len() / msg_size` messages.
    pub fn init(&self, msg_size: usize, buf: &'static mut [u8]) -> Result<(), Error> {
        if msg_size == 0 || buf.len() < msg_size {
            return Err(code::EINVAL);
        }
        self.receivers.init();
        self.senders.init();
        self.ring.lock().setup(buf.as_mut_ptr(), buf.len(), msg_size, false);
        self.is_static.store(true, Ordering::Relaxed);
        self.magic.store(MAILBOX_MAGIC, Ordering::Relaxed);
        Ok(())
    }

    /// Allocate a mailbox from the pool with a heap ring of `buf_size`
    /// bytes. Dropping the handle destroys the mailbox, waking every
    /// blocked sender and receiver with `EINVAL`.
    pub fn create(msg_size: usize, buf_size: usize) -> Result<PoolBox<Mailbox>, Error> {
        if msg_size == 0 || buf_size < msg_size {
            return Err(code::EINVAL);
        }
        let mb = MAILBOX_POOL.get().ok_or(code::ENOMEM)?;
        let buf = alloc::vec![0u8; buf_size].into_boxed_slice();
        let ptr = alloc::boxed::Box::into_raw(buf) as *mut u8;
        mb.ring.lock().setup(ptr, buf_size, msg_size, true);
        mb.is_static.store(false, Ordering::Relaxed);
        mb.magic.store(MAILBOX_MAGIC, Ordering::Relaxed);
        Ok(mb)
    }

    pub fn destroy(mb: PoolBox<Mailbox>) {
        drop(mb);
    }

    fn check(&self) {
        if self.magic.load(Ordering::Relaxed) != MAILBOX_MAGIC {
            panic!("bad mailbox pointer");
        }
    }

    pub fn msg_size(&self) -> usize {
        self.check();
        self.ring.lock().msg_size
    }

    pub fn capacity(&self) -> usize {
        self.check();
        self.ring.lock().capacity
    }

    /// Messages currently queued.
    pub fn count(&self) -> usize {
        self.check();
        self.ring.lock().count
    }

    // Returns whether the store made the box non-empty, i.e. whether one
    // receiver should be woken once the ring lock is released.
    fn send_locked(ring: &mut SpinLockGuard<'_, Ring>, msg: &[u8]) -> Result<bool, Error> {
        if msg.len() != ring.msg_size {
            return Err(code::EINVAL);
        }
        if ring.count == ring.capacity {
            return Err(code::EAGAIN);
        }
        unsafe {
            ptr::copy_nonoverlapping(msg.as_ptr(), ring.write_ptr, ring.msg_size);
            ring.write_ptr = ring.write_ptr.add(ring.msg_size);
            if ring.write_ptr >= ring.buf_end {
                ring.write_ptr = ring.buf_start;
            }
        }
        ring.count += 1;
        Ok(ring.count == 1)
    }

    // Returns whether the load made the box non-full.
    fn receive_locked(ring: &mut SpinLockGuard<'_, Ring>, msg: &mut [u8]) -> Result<bool, Error> {
        if msg.len() != ring.msg_size {
            return Err(code::EINVAL);
        }
        if ring.count == 0 {
            return Err(code::EAGAIN);
        }
        let was_full = ring.count == ring.capacity;
        unsafe {
            ptr::copy_nonoverlapping(ring.read_ptr, msg.as_mut_ptr(), ring.msg_size);
            ring.read_ptr = ring.read_ptr.add(ring.msg_size);
            if ring.read_ptr >= ring.buf_end {
                ring.read_ptr = ring.buf_start;
            }
        }
        ring.count -= 1;
        Ok(was_full)
    }

    /// Post a message without blocking; `EAGAIN` when full.
    pub fn try_send(&self, msg: &[u8]) -> Result<(), Error> {
        self.check();
        let mut ring = self.ring.lock();
        let wake = Self::send_locked(&mut ring, msg)?;
        drop(ring);
        if wake {
            sched::wakeup_one(&self.receivers, 0);
        }
        Ok(())
    }

    /// Post a message, blocking while the box is full. A zero `timeout`
    /// waits forever. `ETIMEDOUT` on expiry, `EINVAL` if the mailbox is
    /// destroyed while waiting.
    pub fn timed_send(&self, msg: &[u8], timeout: usize) -> Result<(), Error> {
        self.check();
        assert!(!cpu::in_isr(), "blocking mailbox send in interrupt context");
        let mut ring = self.ring.lock();
        loop {
            match Self::send_locked(&mut ring, msg) {
                Ok(wake) => {
                    drop(ring);
                    if wake {
                        sched::wakeup_one(&self.receivers, 0);
                    }
                    return Ok(());
                }
                Err(e) if e == code::EAGAIN => {
                    sched::sleep_on(&self.senders, timeout, ring)?;
                    self.check();
                    ring = self.ring.lock();
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Take the oldest message without blocking; `EAGAIN` when empty.
    pub fn try_receive(&self, msg: &mut [u8]) -> Result<(), Error> {
        self.check();
        let mut ring = self.ring.lock();
        let wake = Self::receive_locked(&mut ring, msg)?;
        drop(ring);
        if wake {
            sched::wakeup_one(&self.senders, 0);
        }
        Ok(())
    }

    /// Take the oldest message, blocking while the box is empty; timeout
    /// and destruction behave as for [`timed_send`].
    pub fn timed_receive(&self, msg: &mut [u8], timeout: usize) -> Result<(), Error> {
        self.check();
        assert!(!cpu::in_isr(), "blocking mailbox receive in interrupt context");
        let mut ring = self.ring.lock();
        loop {
            match Self::receive_locked(&mut ring, msg) {
                Ok(wake) => {
                    drop(ring);
                    if wake {
                        sched::wakeup_one(&self.senders, 0);
                    }
                    return Ok(());
                }
                Err(e) if e == code::EAGAIN => {
                    sched::sleep_on(&self.receivers, timeout, ring)?;
                    self.check();
                    ring = self.ring.lock();
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn fini_common(&self) {
        sched::lock();
        sched::wakeup_all_locked(&self.receivers, code::EINVAL.to_errno());
        sched::wakeup_all_locked(&self.senders, code::EINVAL.to_errno());
        debug_assert!(self.receivers.is_empty_locked());
        debug_assert!(self.senders.is_empty_locked());
        sched::unlock();
    }

    /// Tear down a statically initialized mailbox, waking every waiter
    /// with `EINVAL`. The caller's buffer is not touched.
    pub fn fini(&self) {
        self.check();
        if !self.is_static.load(Ordering::Relaxed) {
            panic!("cannot fini a pool-allocated mailbox");
        }
        self.fini_common();
        self.magic.store(0, Ordering::Relaxed);
    }
}

impl PoolObject for Mailbox {
    fn on_put(&self) {
        if self.magic.load(Ordering::Relaxed) != MAILBOX_MAGIC {
            return;
        }
        debug_assert!(!self.is_static.load(Ordering::Relaxed));
        self.fini_common();
        let mut ring = self.ring.lock();
        if let Some(len) = ring.heap_len {
            let slice = ptr::slice_from_raw_parts_mut(ring.buf_start, len);
            drop(unsafe { alloc::boxed::Box::from_raw(slice) });
        }
        *ring = Ring::empty();
        drop(ring);
        self.magic.store(0, Ordering::Relaxed);
    }
}
