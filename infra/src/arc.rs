// A minimal atomically reference-counted pointer plus an intrusive list
// that shares ownership of its elements. Unlike `alloc::sync::Arc` there
// is no weak count, and a control block can live in static storage so
// kernel singletons need no boot-time allocation.

extern crate alloc;

use crate::{
    intrusive::Adapter,
    list::{ListNode, NodeIterator},
};
use alloc::boxed::Box;
use core::{
    marker::PhantomData,
    ops::Deref,
    ptr::NonNull,
    sync::atomic::{fence, AtomicUsize, Ordering},
};

#[derive(Debug)]
pub struct ArcInner<T> {
    data: T,
    strong: AtomicUsize,
}

impl<T> ArcInner<T> {
    pub const fn new(data: T) -> Self {
        Self {
            data,
            strong: AtomicUsize::new(1),
        }
    }
}

unsafe impl<T> Send for ArcInner<T> {}
unsafe impl<T> Sync for ArcInner<T> {}

// repr(transparent) keeps Option<Arc<T>> pointer-sized.
#[derive(Debug)]
#[repr(transparent)]
pub struct Arc<T> {
    inner: NonNull<ArcInner<T>>,
}

impl<T> Arc<T> {
    pub fn new(data: T) -> Self {
        let inner = Box::new(ArcInner::new(data));
        Self {
            inner: unsafe { NonNull::new_unchecked(Box::into_raw(inner)) },
        }
    }

    /// A stable identity for the managed value, valid while any reference
    /// is alive.
    #[inline]
    pub fn handle(this: &Self) -> usize {
        this.inner.as_ptr() as usize
    }

    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        this.inner == other.inner
    }

    #[inline]
    pub fn strong_count(this: &Self) -> usize {
        unsafe { this.inner.as_ref() }.strong.load(Ordering::Relaxed)
    }

    // The list below shares ownership of its elements by adjusting the
    // strong count directly; the count must never reach zero this way.
    unsafe fn increment_strong(this: &Self) {
        let old = this.inner.as_ref().strong.fetch_add(1, Ordering::Relaxed);
        debug_assert_ne!(old, 0);
    }

    unsafe fn decrement_strong(this: &Self) {
        let old = this.inner.as_ref().strong.fetch_sub(1, Ordering::Relaxed);
        debug_assert!(old > 1);
    }

    unsafe fn from_inner(inner: NonNull<ArcInner<T>>) -> Self {
        inner.as_ref().strong.fetch_add(1, Ordering::Relaxed);
        Self { inner }
    }
}

impl<T> Clone for Arc<T> {
    #[inline]
    fn clone(&self) -> Self {
        let old = unsafe { self.inner.as_ref() }
            .strong
            .fetch_add(1, Ordering::Relaxed);
        debug_assert_ne!(old, 0);
        Self { inner: self.inner }
    }
}

impl<T> Drop for Arc<T> {
    fn drop(&mut self) {
        let old = unsafe { self.inner.as_ref() }
            .strong
            .fetch_sub(1, Ordering::Release);
        if old != 1 {
            return;
        }
        fence(Ordering::Acquire);
        // Statically allocated control blocks keep a permanent reference
        // and never reach this point.
        drop(unsafe { Box::from_raw(self.inner.as_ptr()) });
    }
}

impl<T> Deref for Arc<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        unsafe { &self.inner.as_ref().data }
    }
}

// Arc is a pointer to the managed value, not the value itself.
unsafe impl<T> Send for Arc<T> {}
unsafe impl<T> Sync for Arc<T> {}

/// An intrusive list of `Arc`-managed elements. The list holds one strong
/// reference per linked element. An element joins through the embedded
/// `ListNode` field selected by the adapter `A`, so one value can sit on
/// several `ArcList`s at once through different fields.
///
/// Not concurrency safe; callers serialize access externally.
#[derive(Debug)]
pub struct ArcList<T, A: Adapter> {
    head: ListNode<T, A>,
    tail: ListNode<T, A>,
    _marker: PhantomData<T>,
}

impl<T, A: Adapter> ArcList<T, A> {
    pub const fn new() -> Self {
        Self {
            head: ListNode::new(),
            tail: ListNode::new(),
            _marker: PhantomData,
        }
    }

    /// Link the sentinels. Returns false if already initialized.
    pub fn init(&mut self) -> bool {
        if self.head.next.is_some() {
            return false;
        }
        ListNode::insert_after(&mut self.head, NonNull::from(&self.tail))
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        debug_assert!(self.head.next.is_some(), "list not initialized");
        self.head.next == Some(NonNull::from(&self.tail))
    }

    #[inline]
    fn node_of(me: &Arc<T>) -> NonNull<ListNode<T, A>> {
        let base = me.deref() as *const T as *const u8;
        unsafe { NonNull::new_unchecked(base.add(A::OFFSET) as *mut ListNode<T, A>) }
    }

    /// Recover an owning `Arc` from an element's embedded node, taking a
    /// new reference.
    ///
    /// # Safety
    ///
    /// `node` must be the `A` node of a `T` managed by an `Arc`.
    pub unsafe fn arc_from_node(node: &ListNode<T, A>) -> Arc<T> {
        let offset = core::mem::offset_of!(ArcInner<T>, data) + A::OFFSET;
        let ptr = (node as *const _ as *const u8).sub(offset) as *mut ArcInner<T>;
        Arc::from_inner(NonNull::new_unchecked(ptr))
    }

    /// Append to the back. Fails (without taking a reference) if the
    /// element's node is already linked somewhere.
    pub fn push_back(&mut self, me: Arc<T>) -> bool {
        if !ListNode::insert_before(&mut self.tail, Self::node_of(&me)) {
            return false;
        }
        unsafe { Arc::increment_strong(&me) };
        true
    }

    pub fn pop_front(&mut self) -> Option<Arc<T>> {
        if self.is_empty() {
            return None;
        }
        let node = self.head.next?;
        let arc = unsafe { Self::arc_from_node(node.as_ref()) };
        let ok = ListNode::detach(node);
        debug_assert!(ok);
        // The list gives up its reference; the caller keeps the one taken
        // by arc_from_node.
        unsafe { Arc::decrement_strong(&arc) };
        Some(arc)
    }

    /// Unlink an element from whatever `A`-list holds it, releasing that
    /// list's reference. Returns false if the element is not linked.
    pub fn detach(me: &Arc<T>) -> bool {
        if !ListNode::detach(Self::node_of(me)) {
            return false;
        }
        unsafe { Arc::decrement_strong(me) };
        true
    }

    pub fn iter(&self) -> ArcIterator<T, A> {
        ArcIterator {
            nodes: NodeIterator::new(&self.head, Some(NonNull::from(&self.tail))),
        }
    }

    /// Detach every element, dropping the list's references.
    pub fn clear(&mut self) -> usize {
        let mut n = 0;
        while self.pop_front().is_some() {
            n += 1;
        }
        n
    }
}

pub struct ArcIterator<T, A: Adapter> {
    nodes: NodeIterator<T, A>,
}

impl<T, A: Adapter> Iterator for ArcIterator<T, A> {
    type Item = Arc<T>;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.nodes.next()?;
        Some(unsafe { ArcList::<T, A>::arc_from_node(node.as_ref()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::impl_intrusive_adapter;

    impl_intrusive_adapter!(OffsetOfRun, Task, run_node);
    impl_intrusive_adapter!(OffsetOfWait, Task, wait_node);

    #[derive(Default, Debug)]
    struct Task {
        run_node: ListNode<Task, OffsetOfRun>,
        wait_node: ListNode<Task, OffsetOfWait>,
        id: usize,
    }

    type RunList = ArcList<Task, OffsetOfRun>;
    type WaitList = ArcList<Task, OffsetOfWait>;

    fn task(id: usize) -> Arc<Task> {
        Arc::new(Task {
            id,
            ..Default::default()
        })
    }

    #[test]
    fn arc_counts() {
        let t = task(1);
        assert_eq!(Arc::strong_count(&t), 1);
        let u = t.clone();
        assert_eq!(Arc::strong_count(&t), 2);
        assert!(Arc::ptr_eq(&t, &u));
        drop(u);
        assert_eq!(Arc::strong_count(&t), 1);
    }

    #[test]
    fn push_pop_fifo() {
        let mut l = RunList::new();
        assert!(l.init());
        assert!(!l.init());
        for i in 0..8 {
            let t = task(i);
            assert!(l.push_back(t.clone()));
            assert!(!l.push_back(t.clone()));
            assert_eq!(Arc::strong_count(&t), 2);
        }
        for i in 0..8 {
            let t = l.pop_front().unwrap();
            assert_eq!(t.id, i);
            assert_eq!(Arc::strong_count(&t), 1);
        }
        assert!(l.pop_front().is_none());
        assert!(l.is_empty());
    }

    #[test]
    fn two_lists_one_element() {
        let mut run = RunList::new();
        let mut wait = WaitList::new();
        run.init();
        wait.init();
        let t = task(3);
        assert!(run.push_back(t.clone()));
        assert!(wait.push_back(t.clone()));
        assert_eq!(Arc::strong_count(&t), 3);
        assert!(WaitList::detach(&t));
        assert!(!WaitList::detach(&t));
        assert_eq!(Arc::strong_count(&t), 2);
        assert_eq!(run.pop_front().unwrap().id, 3);
        assert_eq!(Arc::strong_count(&t), 1);
    }

    #[test]
    fn detach_during_iteration() {
        let mut l = RunList::new();
        l.init();
        for i in 0..4 {
            l.push_back(task(i));
        }
        let mut seen = 0;
        for t in l.iter() {
            assert!(RunList::detach(&t));
            seen += 1;
        }
        assert_eq!(seen, 4);
        assert!(l.is_empty());
    }

    #[test]
    fn clear_drops_references() {
        let mut l = RunList::new();
        l.init();
        let t = task(9);
        l.push_back(t.clone());
        assert_eq!(l.clear(), 1);
        assert_eq!(Arc::strong_count(&t), 1);
        assert!(l.is_empty());
    }
}
