//! Slab-style object pools.
//!
//! A pool hands out fixed-size blocks for descriptor churn (thread
//! stacks, dynamic mailboxes and semaphores) without fragmenting the
//! heap. Storage grows in slabs of `OBJECT_POOL_SLAB_CAPACITY` blocks;
//! each slab threads a free list through its blocks and the pool keeps
//! slabs grouped by occupancy so a partially used slab is found in O(1).
//! A block is constructed by the pool's ctor the first time it is handed
//! out and keeps its constructed state across get/put cycles.

use crate::{
    config::{OBJECT_POOL_NAME_MAX, OBJECT_POOL_SLAB_CAPACITY},
    sync::spinlock::SpinLock,
    types::{Adapter, List, ListNode},
};
use alloc::boxed::Box;
use core::{mem::MaybeUninit, ops::Deref, ptr::NonNull};

/// Implemented by pool-managed types; `on_put` runs when a handle
/// returns its block, before the block re-enters the free list.
pub trait PoolObject {
    fn on_put(&self) {}
}

#[repr(C)]
struct Block<T> {
    owner: *mut Slab<T>,
    next_free: *mut Block<T>,
    constructed: bool,
    payload: MaybeUninit<T>,
}

#[derive(Default, Debug)]
pub(crate) struct OffsetOfSlabNode;

// Slab is repr(C) with the node first, so the offset is zero for every
// payload type.
impl Adapter for OffsetOfSlabNode {
    const OFFSET: usize = 0;
}

#[repr(C)]
struct Slab<T> {
    node: ListNode<Slab<T>, OffsetOfSlabNode>,
    free: *mut Block<T>,
    used: usize,
}

type SlabList<T> = List<Slab<T>, OffsetOfSlabNode>;

struct PoolInner<T> {
    /// Slabs with both used and free blocks; preferred source.
    partial: SlabList<T>,
    /// Slabs with every block handed out.
    depleted: SlabList<T>,
    /// Slabs with every block free.
    unused: SlabList<T>,
    inited: bool,
}

unsafe impl<T> Send for PoolInner<T> {}

pub struct ObjectPool<T: PoolObject> {
    name: &'static str,
    ctor: fn(&mut MaybeUninit<T>),
    inner: SpinLock<PoolInner<T>>,
}

unsafe impl<T: PoolObject> Sync for ObjectPool<T> {}

impl<T: PoolObject> ObjectPool<T> {
    pub const fn new(name: &'static str, ctor: fn(&mut MaybeUninit<T>)) -> Self {
        assert!(name.len() <= OBJECT_POOL_NAME_MAX);
        Self {
            name,
            ctor,
            inner: SpinLock::new(
                "pool",
                PoolInner {
                    partial: SlabList::new(),
                    depleted: SlabList::new(),
                    unused: SlabList::new(),
                    inited: false,
                },
            ),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Take a block, growing the pool by one slab if none is free.
    pub fn get(&'static self) -> Option<PoolBox<T>> {
        let mut inner = self.inner.lock();
        if !inner.inited {
            inner.partial.init();
            inner.depleted.init();
            inner.unused.init();
            inner.inited = true;
        }
        let slab = match inner.partial.pop_front().or_else(|| inner.unused.pop_front()) {
            Some(slab) => slab,
            None => new_slab::<T>()?,
        };
        unsafe {
            let s = slab.as_ptr();
            let block = (*s).free;
            debug_assert!(!block.is_null());
            (*s).free = (*block).next_free;
            (*s).used += 1;
            if (*s).used == OBJECT_POOL_SLAB_CAPACITY {
                inner.depleted.push_back(slab);
            } else {
                inner.partial.push_back(slab);
            }
            drop(inner);
            if !(*block).constructed {
                (self.ctor)(&mut (*block).payload);
                (*block).constructed = true;
            }
            Some(PoolBox {
                block: NonNull::new_unchecked(block),
                pool: self,
            })
        }
    }

    fn put(&self, block: NonNull<Block<T>>) {
        let mut inner = self.inner.lock();
        unsafe {
            let b = block.as_ptr();
            let slab = (*b).owner;
            debug_assert!(!slab.is_null());
            (*b).next_free = (*slab).free;
            (*slab).free = b;
            debug_assert!((*slab).used > 0);
            (*slab).used -= 1;
            let slab = NonNull::new_unchecked(slab);
            let ok = SlabList::<T>::detach(slab);
            debug_assert!(ok);
            if slab.as_ref().used == 0 {
                inner.unused.push_back(slab);
            } else {
                inner.partial.push_back(slab);
            }
        }
    }
}

// Slabs live until shutdown; pools never shrink. Block storage is carved
// out raw so no oversized payload ever materializes on the stack.
fn new_slab<T>() -> Option<NonNull<Slab<T>>> {
    let layout = core::alloc::Layout::array::<Block<T>>(OBJECT_POOL_SLAB_CAPACITY).ok()?;
    let blocks = unsafe { alloc::alloc::alloc(layout) as *mut Block<T> };
    if blocks.is_null() {
        return None;
    }
    let slab = Box::leak(Box::new(Slab::<T> {
        node: ListNode::new(),
        free: core::ptr::null_mut(),
        used: 0,
    }));
    let slab_ptr = slab as *mut Slab<T>;
    for i in 0..OBJECT_POOL_SLAB_CAPACITY {
        unsafe {
            let block = blocks.add(i);
            core::ptr::addr_of_mut!((*block).owner).write(slab_ptr);
            core::ptr::addr_of_mut!((*block).next_free).write(slab.free);
            core::ptr::addr_of_mut!((*block).constructed).write(false);
            slab.free = block;
        }
    }
    Some(NonNull::from(slab))
}

/// Owning handle to a pool block. Dropping it runs the payload's
/// [`PoolObject::on_put`] and returns the block for reuse.
pub struct PoolBox<T: PoolObject + 'static> {
    block: NonNull<Block<T>>,
    pool: &'static ObjectPool<T>,
}

unsafe impl<T: PoolObject + Send> Send for PoolBox<T> {}
unsafe impl<T: PoolObject + Sync> Sync for PoolBox<T> {}

impl<T: PoolObject> Deref for PoolBox<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { self.block.as_ref().payload.assume_init_ref() }
    }
}

impl<T: PoolObject> Drop for PoolBox<T> {
    fn drop(&mut self) {
        self.deref().on_put();
        self.pool.put(self.block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicUsize, Ordering};

    static CTOR_RUNS: AtomicUsize = AtomicUsize::new(0);
    static PUTS: AtomicUsize = AtomicUsize::new(0);

    struct Widget {
        serial: usize,
    }

    impl PoolObject for Widget {
        fn on_put(&self) {
            PUTS.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn widget_ctor(slot: &mut MaybeUninit<Widget>) {
        let serial = CTOR_RUNS.fetch_add(1, Ordering::Relaxed);
        slot.write(Widget { serial });
    }

    // Each test owns a pool so free-list order stays deterministic.
    #[test]
    fn blocks_are_constructed_once_and_reused() {
        static POOL: ObjectPool<Widget> = ObjectPool::new("widget-reuse", widget_ctor);
        let _g = crate::test_support::kernel_guard();
        let a = POOL.get().unwrap();
        let serial = a.serial;
        let puts_before = PUTS.load(Ordering::Relaxed);
        drop(a);
        assert_eq!(PUTS.load(Ordering::Relaxed), puts_before + 1);
        // The freed block comes back without re-running the ctor.
        let runs = CTOR_RUNS.load(Ordering::Relaxed);
        let b = POOL.get().unwrap();
        assert_eq!(b.serial, serial);
        assert_eq!(CTOR_RUNS.load(Ordering::Relaxed), runs);
    }

    #[test]
    fn pool_grows_past_one_slab() {
        static POOL: ObjectPool<Widget> = ObjectPool::new("widget-grow", widget_ctor);
        let _g = crate::test_support::kernel_guard();
        let mut held = alloc::vec::Vec::new();
        for _ in 0..(OBJECT_POOL_SLAB_CAPACITY * 2 + 1) {
            held.push(POOL.get().unwrap());
        }
        // Every block is distinct.
        for (i, a) in held.iter().enumerate() {
            for b in held.iter().skip(i + 1) {
                assert_ne!(a.serial, b.serial);
            }
        }
    }

    #[test]
    fn name_is_reported() {
        static POOL: ObjectPool<Widget> = ObjectPool::new("widget-name", widget_ctor);
        assert_eq!(POOL.name(), "widget-name");
    }
}
