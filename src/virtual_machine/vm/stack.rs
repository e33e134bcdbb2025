use crate::virtual_machine::errors::VMError;

/// Bounded value stack shared by `PUSH`/`POP` and `CALL`/`RET`.
pub(super) struct Stack {
    items: Vec<u32>,
    capacity: usize,
}

impl Stack {
    pub(super) fn new(capacity: usize) -> Self {
        Self {
            items: Vec::with_capacity(capacity.min(1024)),
            capacity,
        }
    }

    pub(super) fn push(&mut self, value: u32) -> Result<(), VMError> {
        if self.items.len() >= self.capacity {
            return Err(VMError::StackOverflow {
                capacity: self.capacity,
            });
        }
        self.items.push(value);
        Ok(())
    }

    /// Pops the top value. An empty stack yields 0.
    pub(super) fn pop(&mut self) -> u32 {
        self.items.pop().unwrap_or(0)
    }

    pub(super) fn len(&self) -> usize {
        self.items.len()
    }

    pub(super) fn capacity(&self) -> usize {
        self.capacity
    }
}
