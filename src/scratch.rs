//! Per-thread scratch arenas for transient tensors.
//!
//! Every thread owns two arenas. `with` hands the closure the first arena
//! that is not already borrowed further up the stack, so a kernel that is
//! called while its caller holds an arena transparently receives the other
//! one. Buffers are recycled between takes instead of hitting the global
//! allocator on the hot path.

use crate::tensor::Tensor;
use crate::types::Shape;
use std::cell::RefCell;

pub struct ScratchArena {
    pool: Vec<Vec<f32>>,
}

impl ScratchArena {
    fn new() -> Self {
        Self { pool: Vec::new() }
    }

    /// Zeroed tensor of `shape`, reusing a pooled buffer when one fits.
    pub fn take(&mut self, shape: Shape) -> Tensor {
        self.take_alloc(shape, shape.size())
    }

    /// Zeroed tensor of `shape` with at least `alloc` elements of capacity.
    pub fn take_alloc(&mut self, shape: Shape, alloc: usize) -> Tensor {
        let alloc = alloc.max(shape.size()).max(1);
        let mut buf = match self.pool.iter().position(|b| b.len() >= alloc) {
            Some(i) => self.pool.swap_remove(i),
            None => vec![0.0; alloc],
        };
        buf.iter_mut().for_each(|v| *v = 0.0);

        // alloc is clamped to the element count above, so this cannot
        // fail.
        Tensor::from_vec(shape, buf).expect("scratch buffer sizing")
    }

    /// Returns a tensor's buffer to the pool for reuse.
    pub fn put(&mut self, t: Tensor) {
        self.pool.push(t.into_vec());
    }
}

thread_local! {
    static ARENAS: [RefCell<ScratchArena>; 2] =
        [RefCell::new(ScratchArena::new()), RefCell::new(ScratchArena::new())];
}

/// Runs `f` with a scratch arena that no caller up-stack is using.
///
/// Nesting deeper than two levels falls back to a transient arena; that
/// path allocates but stays correct.
pub fn with<R>(f: impl FnOnce(&mut ScratchArena) -> R) -> R {
    ARENAS.with(|arenas| {
        for arena in arenas {
            if let Ok(mut guard) = arena.try_borrow_mut() {
                return f(&mut guard);
            }
        }
        f(&mut ScratchArena::new())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_reuses_returned_buffers() {
        with(|s| {
            let t = s.take(Shape::new(8, 8, 1));
            let ptr = t.data().as_ptr();
            s.put(t);

            let t2 = s.take(Shape::new(4, 4, 1));
            assert_eq!(t2.data().as_ptr(), ptr);
            assert!(t2.is_zero());
        });
    }

    #[test]
    fn nested_with_gets_a_different_arena() {
        with(|outer| {
            let a = outer.take(Shape::new(2, 2, 1));
            with(|inner| {
                // The outer arena is borrowed; this take must not panic.
                let b = inner.take(Shape::new(2, 2, 1));
                inner.put(b);
            });
            outer.put(a);
        });
    }
}
