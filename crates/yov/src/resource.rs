//! Resource bookkeeping for a single run: recursion-depth limits and the
//! scratch-arena pool intrinsics borrow from.
//!
//! Grounded on the teacher's `ResourceLimits`/`ResourceTracker` pair: a
//! builder struct configuring limits, and a small value threaded through
//! execution that can be swapped for a no-op when limits are not wanted.

use std::cell::RefCell;
use std::fmt;

/// Default maximum call-stack depth, matching the teacher's
/// `DEFAULT_MAX_RECURSION_DEPTH` role but sized for an IR interpreter
/// rather than a tree-walker (each `Scope` push is cheaper).
pub const DEFAULT_MAX_RECURSION_DEPTH: usize = 2048;

/// Raised when a configured [`ResourceLimits`] bound is exceeded.
#[derive(Debug, Clone)]
pub enum ResourceError {
    /// The call stack (`Scope` pushes) exceeded `limit`.
    Recursion { limit: usize },
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Recursion { limit } => write!(f, "stack overflow: recursion exceeded {limit} nested calls"),
        }
    }
}

impl std::error::Error for ResourceError {}

/// Builder for the limits a [`crate::interpreter::Interpreter`] enforces.
#[derive(Debug, Clone, Copy)]
pub struct ResourceLimits {
    pub max_recursion_depth: usize,
    /// How many pc-decreasing branches the dispatch loop executes between
    /// opportunistic heap sweeps (see the runtime design's §5 sweep rule).
    pub sweep_interval: u32,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self { max_recursion_depth: DEFAULT_MAX_RECURSION_DEPTH, sweep_interval: 32 }
    }
}

impl ResourceLimits {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn max_recursion_depth(mut self, limit: usize) -> Self {
        self.max_recursion_depth = limit;
        self
    }

    #[must_use]
    pub fn sweep_interval(mut self, interval: u32) -> Self {
        self.sweep_interval = interval.max(1);
        self
    }
}

/// A single per-thread bump arena checked out by an intrinsic that needs a
/// transient scratch buffer (e.g. assembling a directory listing).
///
/// Unlike the teacher's general-purpose resource tracker, the scratch pool
/// here only needs to guarantee release on scope exit; it does not track
/// byte budgets, so it is a plain free list of reusable `Vec<u8>` buffers.
#[derive(Default)]
pub struct ScratchArenaPool {
    free: RefCell<Vec<Vec<u8>>>,
}

/// An arena checked out from a [`ScratchArenaPool`]; returns its buffer to
/// the pool on drop so a caller that checks one out for the lifetime of a
/// `Scope` can never leak it past that scope's exit.
pub struct ScratchArena<'a> {
    pool: &'a ScratchArenaPool,
    buffer: Vec<u8>,
}

impl ScratchArenaPool {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn checkout(&self) -> ScratchArena<'_> {
        let buffer = self.free.borrow_mut().pop().unwrap_or_default();
        ScratchArena { pool: self, buffer }
    }
}

impl ScratchArena<'_> {
    #[must_use]
    pub fn buffer_mut(&mut self) -> &mut Vec<u8> {
        &mut self.buffer
    }
}

impl Drop for ScratchArena<'_> {
    fn drop(&mut self) {
        let mut buffer = std::mem::take(&mut self.buffer);
        buffer.clear();
        self.pool.free.borrow_mut().push(buffer);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_arena_returns_buffer_to_pool_on_drop() {
        let pool = ScratchArenaPool::new();
        {
            let mut arena = pool.checkout();
            arena.buffer_mut().extend_from_slice(b"hello");
        }
        assert_eq!(pool.free.borrow().len(), 1);
        assert!(pool.free.borrow()[0].is_empty());
    }
}
