//! Reentrancy Detection for Cache Computations
//!
//! A cache provider may, while computing, call back into the very cache site
//! that invoked it (directly or through a chain of other sites). Caching a
//! value computed mid-cycle would poison the cache with an unstable result,
//! so the engine runs every computation under a thread-local recursion guard:
//!
//! - [`run_detecting_recursion`] pushes the computation's identity onto a
//!   per-thread stack and returns `None` ("in progress") instead of recursing
//!   when the identity is already on the stack.
//! - [`mark_stack`] captures a [`StackStamp`] before the computation;
//!   [`StackStamp::may_cache_now`] answers whether any cycle was observed on
//!   this thread between taking the stamp and finishing.
//!
//! Detecting a cycle marks every stack frame the cycle runs through and bumps
//! a thread-local reentrancy epoch, so both the frames inside the cycle and
//! any stamp taken before detection refuse caching. Reentrancy is a
//! designed-for control-flow case, never an error.

use std::cell::{Cell, RefCell};

/// Identity of one computation, typically derived from the address of the
/// cache site running it. Two calls with the same identity on one thread are
/// treated as the same logical computation.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct ComputationId(usize);

impl ComputationId {
    /// Creates an identity from a raw discriminator.
    pub fn new(raw: usize) -> Self {
        ComputationId(raw)
    }
}

struct Frame {
    key: ComputationId,
    /// Set when a cycle is detected running through this frame.
    dirty: bool,
}

thread_local! {
    static STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
    static REENTRANCY_EPOCH: Cell<u64> = const { Cell::new(0) };
}

/// A snapshot of the thread's reentrancy state.
///
/// Take it before computing, query it after: if any cycle was detected in
/// between, the computed value was (or may have been) derived mid-cycle and
/// must not be cached.
#[derive(Debug)]
pub struct StackStamp {
    epoch: u64,
}

impl StackStamp {
    /// True iff no recursion was detected on this thread since the stamp was
    /// taken and no enclosing computation is part of an active cycle.
    pub fn may_cache_now(&self) -> bool {
        let epoch_clean = REENTRANCY_EPOCH.with(|epoch| epoch.get() == self.epoch);
        epoch_clean && STACK.with(|stack| stack.borrow().iter().all(|frame| !frame.dirty))
    }
}

/// Captures the current reentrancy state of this thread.
pub fn mark_stack() -> StackStamp {
    StackStamp {
        epoch: REENTRANCY_EPOCH.with(Cell::get),
    }
}

/// Runs `compute` under recursion detection keyed by `key`.
///
/// Returns `None` without invoking `compute` when `key` is already being
/// computed further up this thread's stack; the caller is expected to fall
/// back to an uncached inline computation. Otherwise returns the computed
/// value. The frame is popped even if `compute` panics, so a failing
/// provider leaves the guard stack clean.
pub fn run_detecting_recursion<V>(key: ComputationId, compute: impl FnOnce() -> V) -> Option<V> {
    let reentrant = STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        if let Some(position) = stack.iter().position(|frame| frame.key == key) {
            // Every frame between the outer computation and this reentrant
            // call is part of the cycle.
            for frame in &mut stack[position..] {
                frame.dirty = true;
            }
            true
        } else {
            stack.push(Frame { key, dirty: false });
            false
        }
    });

    if reentrant {
        REENTRANCY_EPOCH.with(|epoch| epoch.set(epoch.get() + 1));
        return None;
    }

    let _frame = FrameGuard;
    Some(compute())
}

struct FrameGuard;

impl Drop for FrameGuard {
    fn drop(&mut self) {
        STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_straight_line_call_may_cache() {
        let stamp = mark_stack();
        let result = run_detecting_recursion(ComputationId::new(1), || 42);
        assert_eq!(result, Some(42));
        assert!(stamp.may_cache_now());
    }

    #[test]
    fn test_reentrant_call_returns_none() {
        let result = run_detecting_recursion(ComputationId::new(2), || {
            run_detecting_recursion(ComputationId::new(2), || 1)
        });
        assert_eq!(result, Some(None));
    }

    #[test]
    fn test_cycle_invalidates_outer_stamp() {
        let stamp = mark_stack();
        run_detecting_recursion(ComputationId::new(3), || {
            let _ = run_detecting_recursion(ComputationId::new(3), || ());
        });
        assert!(!stamp.may_cache_now());
    }

    #[test]
    fn test_stamp_inside_cycle_refuses_caching() {
        run_detecting_recursion(ComputationId::new(4), || {
            let _ = run_detecting_recursion(ComputationId::new(4), || ());
            // The enclosing frame is marked dirty; even a freshly taken
            // stamp must refuse caching while inside the cycle.
            let stamp = mark_stack();
            assert!(!stamp.may_cache_now());
        });
    }

    #[test]
    fn test_distinct_keys_do_not_collide() {
        let stamp = mark_stack();
        let result = run_detecting_recursion(ComputationId::new(5), || {
            run_detecting_recursion(ComputationId::new(6), || 7)
        });
        assert_eq!(result, Some(Some(7)));
        assert!(stamp.may_cache_now());
    }

    #[test]
    fn test_panic_unwinds_frame() {
        let key = ComputationId::new(8);
        let outcome = std::panic::catch_unwind(|| {
            run_detecting_recursion(key, || panic!("provider failed"));
        });
        assert!(outcome.is_err());
        // The frame must have been popped; a fresh run is not reentrant.
        assert_eq!(run_detecting_recursion(key, || 9), Some(9));
    }

    #[test]
    fn test_fresh_call_after_cycle_may_cache() {
        run_detecting_recursion(ComputationId::new(10), || {
            let _ = run_detecting_recursion(ComputationId::new(10), || ());
        });
        let stamp = mark_stack();
        let result = run_detecting_recursion(ComputationId::new(10), || 11);
        assert_eq!(result, Some(11));
        assert!(stamp.may_cache_now());
    }
}
