//! Bounded undo/redo stacks of selection snapshots.

use std::collections::VecDeque;

use vmask_models::SelectionState;

/// Default number of undo steps kept.
pub const DEFAULT_HISTORY_CAPACITY: usize = 100;

/// Two bounded stacks of deep [`SelectionState`] snapshots.
///
/// When a stack is full the oldest snapshot is evicted.
#[derive(Debug, Clone)]
pub struct SelectionHistory {
    undo: VecDeque<SelectionState>,
    redo: VecDeque<SelectionState>,
    capacity: usize,
}

impl Default for SelectionHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

impl SelectionHistory {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            undo: VecDeque::with_capacity(capacity),
            redo: VecDeque::new(),
            capacity,
        }
    }

    /// Record the pre-mutation state. Clears the redo stack.
    pub fn snapshot(&mut self, before: SelectionState) {
        push_bounded(&mut self.undo, before, self.capacity);
        self.redo.clear();
    }

    /// Pop the latest undo snapshot, parking `current` on the redo stack.
    pub fn undo(&mut self, current: SelectionState) -> Option<SelectionState> {
        let previous = self.undo.pop_back()?;
        push_bounded(&mut self.redo, current, self.capacity);
        Some(previous)
    }

    /// Pop the latest redo snapshot, parking `current` on the undo stack.
    pub fn redo(&mut self, current: SelectionState) -> Option<SelectionState> {
        let next = self.redo.pop_back()?;
        push_bounded(&mut self.undo, current, self.capacity);
        Some(next)
    }

    pub fn clear(&mut self) {
        self.undo.clear();
        self.redo.clear();
    }

    pub fn can_undo(&self) -> bool {
        !self.undo.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo.is_empty()
    }

    pub fn undo_len(&self) -> usize {
        self.undo.len()
    }

    pub fn redo_len(&self) -> usize {
        self.redo.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

fn push_bounded(stack: &mut VecDeque<SelectionState>, state: SelectionState, capacity: usize) {
    if stack.len() == capacity {
        stack.pop_front();
    }
    stack.push_back(state);
}
