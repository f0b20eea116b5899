use crate::{
    arch, config,
    error::{code, Error},
    pool::{ObjectPool, PoolBox, PoolObject},
    thread,
    thread::{Entry, Thread, ThreadNode},
    types::{Arc, Priority},
};
use alloc::boxed::Box;
use core::mem::MaybeUninit;

/// Backing storage for a default-sized thread stack.
#[repr(align(16))]
pub struct StackStorage(pub(crate) [u8; config::DEFAULT_STACK_SIZE]);

impl PoolObject for StackStorage {}

fn stack_ctor(slot: &mut MaybeUninit<StackStorage>) {
    // Zero once; reused blocks keep whatever the previous thread left.
    unsafe { slot.as_mut_ptr().write_bytes(0, 1) };
}

static STACK_POOL: ObjectPool<StackStorage> = ObjectPool::new("thread-stack", stack_ctor);

pub enum Stack {
    /// Fixed-size block from the stack pool; returned on drop.
    Pooled(PoolBox<StackStorage>),
    /// Caller-provided memory, e.g. a static system-thread stack.
    Raw { base: usize, size: usize },
}

impl Stack {
    pub fn base(&self) -> usize {
        match self {
            Stack::Pooled(block) => block.0.as_ptr() as usize,
            Stack::Raw { base, .. } => *base,
        }
    }

    pub fn size(&self) -> usize {
        match self {
            Stack::Pooled(block) => block.0.len(),
            Stack::Raw { size, .. } => *size,
        }
    }

    pub fn top(&self) -> usize {
        self.base() + self.size()
    }
}

pub struct Builder {
    entry: Entry,
    priority: Priority,
    stack: Option<Stack>,
}

impl Builder {
    pub fn new(entry: Entry) -> Self {
        Self {
            entry,
            priority: config::DEFAULT_PRIORITY,
            stack: None,
        }
    }

    #[inline]
    pub fn set_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    #[inline]
    pub fn set_stack(mut self, stack: Stack) -> Self {
        self.stack = Some(stack);
        self
    }

    /// Allocate the descriptor and stack and fabricate the initial
    /// context. The thread comes back `Suspended`.
    pub fn build(self) -> Result<ThreadNode, Error> {
        if (self.priority as usize) >= config::MAX_PRIORITIES {
            return Err(code::EINVAL);
        }
        let stack = match self.stack {
            Some(stack) => stack,
            None => Stack::Pooled(STACK_POOL.get().ok_or(code::ENOMEM)?),
        };
        let t = Arc::new(Thread::new(self.priority));
        // The descriptor has its final address now; list heads may link.
        t.init_lists();
        t.set_entry(self.entry);
        t.set_saved_sp(arch::init_stack(stack.top(), thread::thread_entry));
        t.set_stack(stack);
        Ok(t)
    }

    /// Build and immediately make runnable.
    pub fn start(self) -> Result<ThreadNode, Error> {
        let t = self.build()?;
        thread::resume(&t)?;
        Ok(t)
    }
}

/// Spawn a closure as a runnable thread at the default priority.
pub fn spawn<F>(f: F) -> Result<ThreadNode, Error>
where
    F: FnOnce() + Send + 'static,
{
    Builder::new(Entry::Closure(Box::new(f))).start()
}
