// Intrusive doubly-linked lists. A list is delimited by two sentinel
// nodes owned by the list value itself, so a linked element always has
// both neighbors and `is_detached` is unambiguous. The sentinels
// reference each other, which a `const fn` cannot express; every list
// must therefore be `init`ed once before use.
//
// Nothing here is concurrency safe. Callers serialize access with their
// own lock (in the kernel: the scheduler lock or a primitive's spinlock).

use crate::intrusive::Adapter;
use core::{marker::PhantomData, ptr::NonNull};

#[derive(Default, Debug)]
pub struct ListNode<T, A: Adapter> {
    pub prev: Option<NonNull<ListNode<T, A>>>,
    pub next: Option<NonNull<ListNode<T, A>>>,
    _owner: PhantomData<T>,
    _adapter: PhantomData<A>,
}

impl<T, A: Adapter> ListNode<T, A> {
    pub const fn new() -> Self {
        Self {
            prev: None,
            next: None,
            _owner: PhantomData,
            _adapter: PhantomData,
        }
    }

    /// Recover a reference to the value this node is embedded in.
    ///
    /// # Safety
    ///
    /// The node must actually live at `A::OFFSET` inside a `T`; sentinel
    /// nodes are not embedded in a `T` and must never be passed here.
    pub unsafe fn owner<'a>(me: NonNull<ListNode<T, A>>) -> &'a T {
        let ptr = me.as_ptr() as *const u8;
        &*(ptr.sub(A::OFFSET) as *const T)
    }

    #[inline]
    pub fn is_detached(&self) -> bool {
        self.prev.is_none() && self.next.is_none()
    }

    /// Link `me` right after `at`. Fails if `me` is already linked.
    pub fn insert_after(at: &mut ListNode<T, A>, mut me: NonNull<ListNode<T, A>>) -> bool {
        unsafe {
            if !me.as_ref().is_detached() {
                return false;
            }
            let next = at.next.replace(me);
            me.as_mut().prev = Some(NonNull::from(&mut *at));
            me.as_mut().next = next;
            if let Some(mut next) = next {
                next.as_mut().prev = Some(me);
            }
        }
        true
    }

    /// Link `me` right before `at`. Fails if `me` is already linked.
    pub fn insert_before(at: &mut ListNode<T, A>, mut me: NonNull<ListNode<T, A>>) -> bool {
        unsafe {
            if !me.as_ref().is_detached() {
                return false;
            }
            let prev = at.prev.replace(me);
            me.as_mut().next = Some(NonNull::from(&mut *at));
            me.as_mut().prev = prev;
            if let Some(mut prev) = prev {
                prev.as_mut().next = Some(me);
            }
        }
        true
    }

    /// Unlink `me` from whatever list currently holds it. Fails if `me`
    /// is not linked.
    pub fn detach(mut me: NonNull<ListNode<T, A>>) -> bool {
        unsafe {
            let node = me.as_mut();
            if node.is_detached() {
                return false;
            }
            if let Some(mut prev) = node.prev {
                prev.as_mut().next = node.next;
            }
            if let Some(mut next) = node.next {
                next.as_mut().prev = node.prev;
            }
            node.prev = None;
            node.next = None;
        }
        true
    }
}

/// A list of borrowed elements, addressed by raw pointer. The list takes
/// no ownership; the caller keeps elements alive while they are linked.
#[derive(Debug)]
pub struct List<T, A: Adapter> {
    head: ListNode<T, A>,
    tail: ListNode<T, A>,
}

impl<T, A: Adapter> List<T, A> {
    pub const fn new() -> Self {
        Self {
            head: ListNode::new(),
            tail: ListNode::new(),
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
    pub fn is_inited(&self) -> bool {
        self.head.next.is_some()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        debug_assert!(self.is_inited(), "list not initialized");
        self.head.next == Some(NonNull::from(&self.tail))
    }

    #[inline]
    fn node_of(me: NonNull<T>) -> NonNull<ListNode<T, A>> {
        unsafe { NonNull::new_unchecked((me.as_ptr() as *mut u8).add(A::OFFSET) as *mut _) }
    }

    pub fn push_back(&mut self, me: NonNull<T>) -> bool {
        ListNode::insert_before(&mut self.tail, Self::node_of(me))
    }

    pub fn pop_front(&mut self) -> Option<NonNull<T>> {
        if self.is_empty() {
            return None;
        }
        let node = self.head.next?;
        let ok = ListNode::detach(node);
        debug_assert!(ok);
        Some(unsafe { NonNull::from(ListNode::owner(node)) })
    }

    /// Unlink an element from whatever `A`-list holds it.
    pub fn detach(me: NonNull<T>) -> bool {
        ListNode::detach(Self::node_of(me))
    }
}

pub struct NodeIterator<T, A: Adapter> {
    next: Option<NonNull<ListNode<T, A>>>,
    end: Option<NonNull<ListNode<T, A>>>,
}

impl<T, A: Adapter> NodeIterator<T, A> {
    /// Walks the nodes strictly between `start` and `end`. The yielded
    /// node may be detached without disturbing the iteration.
    pub fn new(start: &ListNode<T, A>, end: Option<NonNull<ListNode<T, A>>>) -> Self {
        Self {
            next: start.next,
            end,
        }
    }
}

impl<T, A: Adapter> Iterator for NodeIterator<T, A> {
    type Item = NonNull<ListNode<T, A>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next == self.end {
            return None;
        }
        let current = self.next?;
        self.next = unsafe { current.as_ref().next };
        Some(current)
    }
}
