//! Lock-free intrusive singly-linked stacks, CAS'd on a head pointer.
//!
//! Two instantiations are used: the ready-stack (nodes are [`WorkerSlot`]s,
//! rooted on a messenger -- see `worker.rs`/`messenger.rs`) and the
//! request-stack (nodes are [`Request`]s, rooted on a worker). There is
//! exactly one consumer per stack; producers may be many. No ABA issue
//! arises because nodes never re-enter the same stack across a
//! splice/pop boundary (see module docs on each node type).
//!
//! This mirrors `xlist_add`/`xlist_splice`/`request_add`/`request_splice`
//! from the original's `futex.c`, translated from an intrusive C pointer
//! list into an intrusive Rust one built on `AtomicPtr`.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

/// Implemented by node types that can sit on an [`IntrusiveStack`]. The
/// node owns its own "next" link, exactly as `struct thread_data::next`
/// and `struct request::next` do in the original.
pub trait StackNode {
    fn next_link(&self) -> &AtomicPtr<Self>
    where
        Self: Sized;
}

pub struct IntrusiveStack<T> {
    head: AtomicPtr<T>,
}

impl<T: StackNode> IntrusiveStack<T> {
    pub const fn new() -> Self {
        IntrusiveStack {
            head: AtomicPtr::new(ptr::null_mut()),
        }
    }

    /// Push `node` onto the stack. `node` must be a valid, exclusively-owned
    /// pointer (not already linked into any stack).
    ///
    /// # Safety
    /// `node` must point to a live `T` for as long as it might still be
    /// reachable through this stack (i.e. until some consumer splices it
    /// back off).
    pub unsafe fn push(&self, node: *mut T) {
        loop {
            let old = self.head.load(Ordering::SeqCst);
            (*node).next_link().store(old, Ordering::Relaxed);
            if self
                .head
                .compare_exchange(old, node, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Atomically take the entire list, leaving the stack empty. Order is
    /// LIFO (most-recently-pushed first) -- acceptable when only the *set*
    /// of popped nodes matters, as for the ready-stack.
    pub fn splice(&self) -> *mut T {
        loop {
            let old = self.head.load(Ordering::SeqCst);
            if self
                .head
                .compare_exchange(old, ptr::null_mut(), Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return old;
            }
        }
    }

    /// Same as [`Self::splice`], but reverses the list first so that
    /// consumers see oldest-first (FIFO) order. Used for the request-stack,
    /// where enqueue order is an observable fairness guarantee; the
    /// ready-stack deliberately does *not* reverse.
    ///
    /// # Safety
    /// Every node reachable from the spliced list must be valid to
    /// dereference (to read/rewrite its `next_link`).
    pub unsafe fn splice_reversed(&self) -> *mut T {
        let mut list = self.splice();
        let mut reversed: *mut T = ptr::null_mut();
        while !list.is_null() {
            let next = (*list).next_link().load(Ordering::Relaxed);
            (*list).next_link().store(reversed, Ordering::Relaxed);
            reversed = list;
            list = next;
        }
        reversed
    }
}

impl<T: StackNode> Default for IntrusiveStack<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Node {
        val: i32,
        next: AtomicPtr<Node>,
    }

    impl StackNode for Node {
        fn next_link(&self) -> &AtomicPtr<Self> {
            &self.next
        }
    }

    fn collect(mut p: *mut Node) -> Vec<i32> {
        let mut out = Vec::new();
        unsafe {
            while !p.is_null() {
                out.push((*p).val);
                p = (*p).next.load(Ordering::Relaxed);
            }
        }
        out
    }

    #[test]
    fn splice_is_lifo() {
        let s: IntrusiveStack<Node> = IntrusiveStack::new();
        let nodes: Vec<Box<Node>> = (0..3)
            .map(|i| {
                Box::new(Node {
                    val: i,
                    next: AtomicPtr::new(ptr::null_mut()),
                })
            })
            .collect();
        for n in &nodes {
            unsafe { s.push(Box::as_ref(n) as *const Node as *mut Node) };
        }
        let out = collect(s.splice());
        assert_eq!(out, vec![2, 1, 0]);
    }

    #[test]
    fn splice_reversed_is_fifo() {
        let s: IntrusiveStack<Node> = IntrusiveStack::new();
        let nodes: Vec<Box<Node>> = (0..4)
            .map(|i| {
                Box::new(Node {
                    val: i,
                    next: AtomicPtr::new(ptr::null_mut()),
                })
            })
            .collect();
        for n in &nodes {
            unsafe { s.push(Box::as_ref(n) as *const Node as *mut Node) };
        }
        let out = collect(unsafe { s.splice_reversed() });
        assert_eq!(out, vec![0, 1, 2, 3]);
    }

    #[test]
    fn empty_splice_is_null() {
        let s: IntrusiveStack<Node> = IntrusiveStack::new();
        assert!(s.splice().is_null());
    }
}
