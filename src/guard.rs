// ABOUTME: Cycle detection for object graphs during encoding.
// ABOUTME: Tracks the addresses of objects on the active encode chain.

use crate::error::{Error, Result};
use crate::types::limits;

/// Detects reference cycles while walking an object graph.
///
/// Only the chain of objects currently being encoded is tracked, so shared
/// references that form a DAG pass; re-entering an object that is already
/// on the chain fails. Identity is the object's address, which is stable
/// for the duration of its encode call. The chain length is also capped,
/// bounding recursion for graphs too tangled to reach the writer's own
/// depth check.
pub struct CycleGuard {
    active: Vec<usize>,
    max_depth: usize,
}

impl Default for CycleGuard {
    fn default() -> Self {
        CycleGuard::new()
    }
}

impl CycleGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::with_max_depth(limits::MAX_DEPTH)
    }

    #[must_use]
    pub fn with_max_depth(max_depth: usize) -> Self {
        CycleGuard {
            active: Vec::new(),
            max_depth,
        }
    }

    /// Marks an object as being encoded. Fails if it already is, or if the
    /// chain is at its depth cap.
    pub fn enter(&mut self, address: usize) -> Result<()> {
        if self.active.len() >= self.max_depth {
            return Err(Error::MaxDepthExceeded);
        }
        if self.active.contains(&address) {
            return Err(Error::CircularReference);
        }
        self.active.push(address);
        Ok(())
    }

    /// Unmarks an object. Must be called on both success and failure paths.
    pub fn exit(&mut self, address: usize) {
        if let Some(pos) = self.active.iter().rposition(|&a| a == address) {
            self.active.remove(pos);
        }
    }

    #[must_use]
    pub fn depth(&self) -> usize {
        self.active.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reentry_is_a_cycle() {
        let mut guard = CycleGuard::new();
        guard.enter(0x1000).unwrap();
        guard.enter(0x2000).unwrap();
        assert!(matches!(guard.enter(0x1000), Err(Error::CircularReference)));
    }

    #[test]
    fn exit_allows_revisiting() {
        let mut guard = CycleGuard::new();
        guard.enter(0x1000).unwrap();
        guard.exit(0x1000);
        guard.enter(0x1000).unwrap();
        assert_eq!(guard.depth(), 1);
    }

    #[test]
    fn chain_length_is_capped() {
        let mut guard = CycleGuard::with_max_depth(2);
        guard.enter(1).unwrap();
        guard.enter(2).unwrap();
        assert!(matches!(guard.enter(3), Err(Error::MaxDepthExceeded)));
    }
}
