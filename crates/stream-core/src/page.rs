//! Fixed-capacity tuple buffer used to batch stream I/O.

use crate::tuple::DataTuple;

#[derive(Debug, Clone)]
pub struct Page {
    capacity: usize,
    tuples: Vec<DataTuple>,
}

impl Page {
    /// Creates an empty page. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            tuples: Vec::with_capacity(capacity),
        }
    }

    /// Appends a tuple. A full page hands the tuple back instead of
    /// growing past its capacity.
    pub fn put(&mut self, tuple: DataTuple) -> Result<(), DataTuple> {
        if self.is_full() {
            return Err(tuple);
        }
        self.tuples.push(tuple);
        Ok(())
    }

    pub fn is_full(&self) -> bool {
        self.tuples.len() >= self.capacity
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn size(&self) -> usize {
        self.tuples.len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn tuples(&self) -> &[DataTuple] {
        &self.tuples
    }

    /// Takes every buffered tuple, leaving the page empty and reusable.
    pub fn drain(&mut self) -> Vec<DataTuple> {
        std::mem::replace(&mut self.tuples, Vec::with_capacity(self.capacity))
    }
}
