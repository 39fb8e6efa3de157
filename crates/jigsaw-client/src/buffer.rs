//! Update buffer for mutations that arrive before the baseline snapshot.
//!
//! The stream can deliver mutations 5, 6, 7 while the snapshot (reflecting
//! state through 4) is still in flight. Everything is kept in arrival order;
//! the snapshot's `nextUpdateID` decides at drain time what is already
//! reflected in the baseline and what still has to be applied.

use jigsaw_types::Mutation;
use tracing::{debug, trace};

/// Mutations held back until a baseline exists.
#[derive(Debug, Clone, Default)]
pub struct UpdateBuffer {
    pending: Vec<Mutation>,
}

impl UpdateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffer a mutation. Never drops, never reorders.
    pub fn append(&mut self, mutation: Mutation) {
        trace!(
            "Buffering {} mutation {} ({} pending)",
            mutation.action(),
            mutation.id,
            self.pending.len() + 1
        );
        self.pending.push(mutation);
    }

    /// Number of buffered mutations.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Take every buffered mutation with `id >= cursor`, in arrival order,
    /// and empty the buffer. Older ids are already part of the baseline and
    /// are discarded.
    pub fn drain_from(&mut self, cursor: u64) -> Vec<Mutation> {
        let total = self.pending.len();
        let surviving: Vec<Mutation> = self
            .pending
            .drain(..)
            .filter(|m| m.id >= cursor)
            .collect();
        if total > 0 {
            debug!(
                "Drained update buffer at cursor {}: {} to apply, {} already in baseline",
                cursor,
                surviving.len(),
                total - surviving.len()
            );
        }
        surviving
    }

    /// Forget everything (the connection these came from is gone).
    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
